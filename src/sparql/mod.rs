//! SPARQL engine (C8 + C9): the normalized algebra the parser adapter
//! produces, the expression/property-path/aggregate lowering rules, and
//! the translator that compiles a whole query or update into SQL.

pub mod aggregate;
pub mod algebra;
pub mod expr;
pub mod paths;
pub mod translate;
pub mod update;

pub use algebra::{Algebra, AggregateCall, OrderKey, PredicateOrPath, QueryForm, SortDirection, TermOrVar, TriplePattern, ValuesRow};
pub use expr::{translate as translate_expr, Binding, Binds, BuiltIn, CmpOp, ArithOp, Expr, VarResolver};
pub use paths::{translate_path, PathOptions, PropertyPath, DEFAULT_MAX_PATH_DEPTH};
pub use translate::{execute_ask, execute_select, execute_select_full, BoundTermColumns, CompiledQuery, Translator};
pub use update::{execute as execute_update, GraphTarget, GroundQuad, UpdateForm, UpdateReport, DEFAULT_GRAPH_URI};
