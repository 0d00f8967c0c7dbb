//! SPARQL Parser Adapter (C8) — the normalized algebra shapes the
//! translator (C9) consumes.
//!
//! The engine does not parse SPARQL text. Callers hand in an `Algebra`
//! tree already built by an external parser (e.g. adapted from
//! `spargebra`'s output); this module only defines the node shapes and
//! the top-level query/update forms. An adapter that builds these nodes
//! from a third-party parser's tree lives behind the caller, not here.

use crate::sparql::expr::Expr;
use crate::sparql::paths::PropertyPath;
use crate::term::Term;

/// A pattern-position value: either a bound term or a SPARQL variable
/// name (without the leading `?`/`$`).
#[derive(Debug, Clone, PartialEq)]
pub enum TermOrVar {
    Term(Term),
    Var(String),
}

impl TermOrVar {
    pub fn as_var(&self) -> Option<&str> {
        match self {
            TermOrVar::Var(name) => Some(name),
            TermOrVar::Term(_) => None,
        }
    }
}

/// A triple pattern's predicate position: a plain term/variable, or a
/// property path expression.
#[derive(Debug, Clone)]
pub enum PredicateOrPath {
    Plain(TermOrVar),
    Path(PropertyPath),
}

#[derive(Debug, Clone)]
pub struct TriplePattern {
    pub subject: TermOrVar,
    pub predicate: PredicateOrPath,
    pub object: TermOrVar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct OrderKey {
    pub expr: Expr,
    pub direction: SortDirection,
}

#[derive(Debug, Clone)]
pub enum AggregateCall {
    Count { expr: Option<Expr>, distinct: bool },
    Sum { expr: Expr, distinct: bool },
    Avg { expr: Expr, distinct: bool },
    Min { expr: Expr },
    Max { expr: Expr },
    GroupConcat { expr: Expr, separator: String, distinct: bool },
    Sample { expr: Expr },
}

/// A row of inline data for a VALUES clause; `None` marks UNDEF.
pub type ValuesRow = Vec<Option<Term>>;

/// The normalized SPARQL algebra, per spec.md §4.8's node list: BGP,
/// Join, LeftJoin (OPTIONAL), Union, Minus, Filter, Extend (BIND),
/// Project, Distinct, Reduced, Slice (LIMIT/OFFSET), OrderBy, Group,
/// Values, Graph (named-graph scope). Aggregate is expressed as part of
/// `Group`, matching the way an aggregate query's algebra nests: a
/// `Group` node whose aggregate list is empty behaves as a plain
/// `DISTINCT`-on-keys grouping.
#[derive(Debug, Clone)]
pub enum Algebra {
    Bgp(Vec<TriplePattern>),
    Join(Box<Algebra>, Box<Algebra>),
    LeftJoin(Box<Algebra>, Box<Algebra>, Option<Expr>),
    Union(Box<Algebra>, Box<Algebra>),
    Minus(Box<Algebra>, Box<Algebra>),
    Filter(Box<Algebra>, Expr),
    Extend(Box<Algebra>, String, Expr),
    Project(Box<Algebra>, Vec<String>),
    Distinct(Box<Algebra>),
    Reduced(Box<Algebra>),
    Slice(Box<Algebra>, Option<u64>, Option<u64>),
    OrderBy(Box<Algebra>, Vec<OrderKey>),
    Group(Box<Algebra>, Vec<String>, Vec<(String, AggregateCall)>),
    Values(Vec<String>, Vec<ValuesRow>),
    Graph(Box<Algebra>, TermOrVar),
}

impl Algebra {
    pub fn boxed(self) -> Box<Algebra> {
        Box::new(self)
    }
}

/// The top-level query shells. `Select`/`Ask`/`Describe`/`Construct`
/// all wrap a WHERE-clause algebra; `Construct` additionally carries a
/// triple template.
#[derive(Debug, Clone)]
pub enum QueryForm {
    Select { vars: Vec<String>, algebra: Algebra },
    Ask { algebra: Algebra },
    Construct { template: Vec<TriplePattern>, algebra: Algebra },
    Describe { resources: Vec<TermOrVar>, algebra: Option<Algebra> },
}
