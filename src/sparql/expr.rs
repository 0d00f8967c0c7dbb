//! SPARQL filter/BIND expressions and their built-ins (part of C9).
//!
//! `Expr` is the normalized expression tree the parser adapter (C8)
//! produces for FILTER/BIND/HAVING bodies. `translate` lowers one into
//! a SQL text fragment against the column aliases a [`VarResolver`]
//! hands out, threading constants through a shared [`Binds`]
//! accumulator so the translator can bind them as ordinary `sqlx`
//! parameters rather than interpolating literals into the query.

use crate::error::{EngineError, Result};
use crate::sparql::algebra::Algebra;
use crate::term::{Term, TermKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// The built-in functions spec.md §4.9 requires, grouped as listed
/// there. `Regex`'s `flags` holds the raw SPARQL flag string (e.g. `"i"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuiltIn {
    Bound,
    IsUri,
    IsBlank,
    IsLiteral,
    IsNumeric,
    Datatype,
    Lang,
    LangMatches,
    SameTerm,
    In,
    Str,
    StrLen,
    SubStr,
    UCase,
    LCase,
    Concat,
    Contains,
    StrStarts,
    StrEnds,
    StrBefore,
    StrAfter,
    Replace,
    Regex { flags: Option<String> },
    EncodeForUri,
    Abs,
    Ceil,
    Floor,
    Round,
    Rand,
    Now,
    Year,
    Month,
    Day,
    Hours,
    Minutes,
    Seconds,
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
    Uri,
    BNode,
    StrDt,
    StrLang,
    StrUuid,
    Uuid,
    If,
    Coalesce,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Var(String),
    Constant(Term),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    Negate(Box<Expr>),
    Call(BuiltIn, Vec<Expr>),
    Exists(Box<Algebra>),
    NotExists(Box<Algebra>),
}

/// A single positional bind value, appended in emission order so the
/// caller can `.bind()` them onto the assembled `sqlx::query` in order.
#[derive(Debug, Clone)]
pub enum Binding {
    Text(String),
    Uuid(uuid::Uuid),
    Int(i64),
    Float(f64),
    Bool(bool),
}

/// Accumulates bind values across an entire query translation so
/// placeholder numbers (`$1`, `$2`, ...) stay consistent everywhere a
/// fragment of the query is built, not just within one expression.
#[derive(Debug, Default)]
pub struct Binds(pub Vec<Binding>);

impl Binds {
    pub fn push(&mut self, value: Binding) -> String {
        self.0.push(value);
        format!("${}", self.0.len())
    }
}

/// Resolves a SPARQL variable to the SQL columns carrying its bound
/// term's UUID, lexical form, kind, datatype, and language, per the
/// stable column-alias contract spec.md §4.9 describes ("Variable
/// mapping"). Implemented by the translator's scope (`translate.rs`).
pub trait VarResolver {
    fn uuid_col(&self, var: &str) -> Result<String>;
    fn lexical_col(&self, var: &str) -> Result<String>;
    fn kind_col(&self, var: &str) -> Result<String>;
    fn datatype_col(&self, var: &str) -> Result<String>;
    fn language_col(&self, var: &str) -> Result<String>;
    fn translate_subquery(&self, algebra: &Algebra, binds: &mut Binds) -> Result<String>;
}

const NUMERIC_DATATYPE_LITERALS: &[&str] = &[
    "http://www.w3.org/2001/XMLSchema#integer",
    "http://www.w3.org/2001/XMLSchema#decimal",
    "http://www.w3.org/2001/XMLSchema#float",
    "http://www.w3.org/2001/XMLSchema#double",
    "http://www.w3.org/2001/XMLSchema#long",
    "http://www.w3.org/2001/XMLSchema#int",
];

fn const_sql(term: &Term, binds: &mut Binds) -> String {
    match term.kind {
        TermKind::Literal => binds.push(Binding::Text(term.lexical.clone())),
        _ => binds.push(Binding::Uuid(term.uuid)),
    }
}

fn var_name(expr: &Expr) -> Result<&str> {
    match expr {
        Expr::Var(name) => Ok(name),
        _ => Err(EngineError::sparql("expected a variable argument")),
    }
}

/// Resolves an expression to the SQL carrying its bound term's full
/// identity (the UUID column for a variable, the term's own UUID for a
/// constant), never its lexical form. `sameTerm` must compare RDF-term
/// identity, not string equality, and a literal constant's UUID is just
/// as content-addressed as a URI's (see `Term::uuid`), so both cases
/// route through here rather than through `translate`'s lexical default.
fn uuid_sql(expr: &Expr, resolver: &dyn VarResolver, binds: &mut Binds) -> Result<String> {
    match expr {
        Expr::Var(name) => resolver.uuid_col(name),
        Expr::Constant(term) => Ok(binds.push(Binding::Uuid(term.uuid))),
        other => Err(EngineError::sparql(format!("sameTerm: unsupported argument {other:?}"))),
    }
}

/// Lowers one `Expr` node into a parenthesized SQL boolean/value
/// fragment against `resolver`'s column aliases, appending any
/// constants it needs to `binds`.
pub fn translate(expr: &Expr, resolver: &dyn VarResolver, binds: &mut Binds) -> Result<String> {
    match expr {
        Expr::Var(name) => resolver.lexical_col(name),
        Expr::Constant(term) => Ok(const_sql(term, binds)),
        Expr::And(l, r) => Ok(format!(
            "({} AND {})",
            translate(l, resolver, binds)?,
            translate(r, resolver, binds)?
        )),
        Expr::Or(l, r) => Ok(format!(
            "({} OR {})",
            translate(l, resolver, binds)?,
            translate(r, resolver, binds)?
        )),
        Expr::Not(inner) => Ok(format!("(NOT {})", translate(inner, resolver, binds)?)),
        Expr::Negate(inner) => Ok(format!("(-{})", translate(inner, resolver, binds)?)),
        Expr::Cmp(op, l, r) => {
            let lhs = translate(l, resolver, binds)?;
            let rhs = translate(r, resolver, binds)?;
            let sym = match op {
                CmpOp::Eq => "=",
                CmpOp::Ne => "<>",
                CmpOp::Lt => "<",
                CmpOp::Le => "<=",
                CmpOp::Gt => ">",
                CmpOp::Ge => ">=",
            };
            Ok(format!("({lhs} {sym} {rhs})"))
        }
        Expr::Arith(op, l, r) => {
            let lhs = translate(l, resolver, binds)?;
            let rhs = translate(r, resolver, binds)?;
            let sym = match op {
                ArithOp::Add => "+",
                ArithOp::Sub => "-",
                ArithOp::Mul => "*",
                ArithOp::Div => "/",
            };
            Ok(format!("({lhs} {sym} {rhs})"))
        }
        Expr::Call(builtin, args) => translate_call(builtin, args, resolver, binds),
        Expr::Exists(algebra) => Ok(format!("EXISTS ({})", resolver.translate_subquery(algebra, binds)?)),
        Expr::NotExists(algebra) => Ok(format!("NOT EXISTS ({})", resolver.translate_subquery(algebra, binds)?)),
    }
}

fn translate_call(builtin: &BuiltIn, args: &[Expr], resolver: &dyn VarResolver, binds: &mut Binds) -> Result<String> {
    let arg = |i: usize, binds: &mut Binds| -> Result<String> {
        args.get(i)
            .ok_or_else(|| EngineError::sparql(format!("{builtin:?}: missing argument {i}")))
            .and_then(|e| translate(e, resolver, binds))
    };

    match builtin {
        BuiltIn::Bound => {
            let name = var_name(&args[0])?;
            Ok(format!("({} IS NOT NULL)", resolver.uuid_col(name)?))
        }
        BuiltIn::IsUri => kind_equals(&args[0], resolver, TermKind::Uri),
        BuiltIn::IsBlank => kind_equals(&args[0], resolver, TermKind::BlankNode),
        BuiltIn::IsLiteral => kind_equals(&args[0], resolver, TermKind::Literal),
        BuiltIn::IsNumeric => {
            let dt = resolver.datatype_col(var_name(&args[0])?)?;
            let list = NUMERIC_DATATYPE_LITERALS
                .iter()
                .map(|d| format!("'{d}'"))
                .collect::<Vec<_>>()
                .join(", ");
            Ok(format!("({dt} IN ({list}))"))
        }
        BuiltIn::Datatype => resolver.datatype_col(var_name(&args[0])?),
        BuiltIn::Lang => Ok(format!("COALESCE({}, '')", resolver.language_col(var_name(&args[0])?)?)),
        BuiltIn::LangMatches => Ok(format!("({} ILIKE {})", arg(0, binds)?, arg(1, binds)?)),
        BuiltIn::SameTerm => Ok(format!(
            "({} = {})",
            uuid_sql(&args[0], resolver, binds)?,
            uuid_sql(&args[1], resolver, binds)?
        )),
        BuiltIn::In => {
            let needle = arg(0, binds)?;
            let mut rest = Vec::with_capacity(args.len() - 1);
            for i in 1..args.len() {
                rest.push(arg(i, binds)?);
            }
            Ok(format!("({} IN ({}))", needle, rest.join(", ")))
        }
        BuiltIn::Str => arg(0, binds),
        BuiltIn::StrLen => Ok(format!("char_length({})", arg(0, binds)?)),
        BuiltIn::UCase => Ok(format!("upper({})", arg(0, binds)?)),
        BuiltIn::LCase => Ok(format!("lower({})", arg(0, binds)?)),
        BuiltIn::SubStr if args.len() == 2 => Ok(format!("substr({}, {})", arg(0, binds)?, arg(1, binds)?)),
        BuiltIn::SubStr => Ok(format!("substr({}, {}, {})", arg(0, binds)?, arg(1, binds)?, arg(2, binds)?)),
        BuiltIn::Concat => {
            let mut parts = Vec::with_capacity(args.len());
            for i in 0..args.len() {
                parts.push(arg(i, binds)?);
            }
            Ok(format!("concat({})", parts.join(", ")))
        }
        BuiltIn::Contains => Ok(format!("(position({} in {}) > 0)", arg(1, binds)?, arg(0, binds)?)),
        BuiltIn::StrStarts => Ok(format!("({} LIKE {} || '%')", arg(0, binds)?, arg(1, binds)?)),
        BuiltIn::StrEnds => Ok(format!("({} LIKE '%' || {})", arg(0, binds)?, arg(1, binds)?)),
        BuiltIn::StrBefore => Ok(format!("split_part({}, {}, 1)", arg(0, binds)?, arg(1, binds)?)),
        BuiltIn::StrAfter => Ok(format!("split_part({}, {}, 2)", arg(0, binds)?, arg(1, binds)?)),
        BuiltIn::Replace => Ok(format!("replace({}, {}, {})", arg(0, binds)?, arg(1, binds)?, arg(2, binds)?)),
        BuiltIn::Regex { flags } => {
            let op = if flags.as_deref() == Some("i") { "~*" } else { "~" };
            Ok(format!("({} {op} {})", arg(0, binds)?, arg(1, binds)?))
        }
        BuiltIn::EncodeForUri => Ok(format!("regexp_replace({}, '[^A-Za-z0-9_.~-]', '', 'g')", arg(0, binds)?)),
        BuiltIn::Abs => Ok(format!("abs({})", arg(0, binds)?)),
        BuiltIn::Ceil => Ok(format!("ceil({})", arg(0, binds)?)),
        BuiltIn::Floor => Ok(format!("floor({})", arg(0, binds)?)),
        BuiltIn::Round => Ok(format!("round({})", arg(0, binds)?)),
        BuiltIn::Rand => Ok("random()".to_string()),
        BuiltIn::Now => Ok("now()".to_string()),
        BuiltIn::Year => Ok(format!("EXTRACT(YEAR FROM {})", arg(0, binds)?)),
        BuiltIn::Month => Ok(format!("EXTRACT(MONTH FROM {})", arg(0, binds)?)),
        BuiltIn::Day => Ok(format!("EXTRACT(DAY FROM {})", arg(0, binds)?)),
        BuiltIn::Hours => Ok(format!("EXTRACT(HOUR FROM {})", arg(0, binds)?)),
        BuiltIn::Minutes => Ok(format!("EXTRACT(MINUTE FROM {})", arg(0, binds)?)),
        BuiltIn::Seconds => Ok(format!("EXTRACT(SECOND FROM {})", arg(0, binds)?)),
        BuiltIn::Md5 => Ok(format!("md5({})", arg(0, binds)?)),
        BuiltIn::Sha1 => Ok(digest_call(&arg(0, binds)?, "sha1")),
        BuiltIn::Sha256 => Ok(digest_call(&arg(0, binds)?, "sha256")),
        BuiltIn::Sha384 => Ok(digest_call(&arg(0, binds)?, "sha384")),
        BuiltIn::Sha512 => Ok(digest_call(&arg(0, binds)?, "sha512")),
        BuiltIn::Uri => arg(0, binds),
        BuiltIn::BNode => Ok("gen_random_uuid()".to_string()),
        BuiltIn::StrDt => arg(0, binds),
        BuiltIn::StrLang => arg(0, binds),
        BuiltIn::StrUuid => Ok("gen_random_uuid()::text".to_string()),
        BuiltIn::Uuid => Ok("('urn:uuid:' || gen_random_uuid()::text)".to_string()),
        BuiltIn::If => Ok(format!(
            "(CASE WHEN {} THEN {} ELSE {} END)",
            arg(0, binds)?,
            arg(1, binds)?,
            arg(2, binds)?
        )),
        BuiltIn::Coalesce => {
            let mut parts = Vec::with_capacity(args.len());
            for i in 0..args.len() {
                parts.push(arg(i, binds)?);
            }
            Ok(format!("coalesce({})", parts.join(", ")))
        }
    }
}

fn digest_call(value: &str, algo: &str) -> String {
    format!("encode(digest({value}, '{algo}'), 'hex')")
}

fn kind_equals(expr: &Expr, resolver: &dyn VarResolver, kind: TermKind) -> Result<String> {
    let col = resolver.kind_col(var_name(expr)?)?;
    Ok(format!("({col} = {})", kind as i16))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedResolver;
    impl VarResolver for FixedResolver {
        fn uuid_col(&self, var: &str) -> Result<String> {
            Ok(format!("t_{var}.uuid"))
        }
        fn lexical_col(&self, var: &str) -> Result<String> {
            Ok(format!("t_{var}_term.lexical"))
        }
        fn kind_col(&self, var: &str) -> Result<String> {
            Ok(format!("t_{var}_term.kind"))
        }
        fn datatype_col(&self, var: &str) -> Result<String> {
            Ok(format!("t_{var}_term.datatype"))
        }
        fn language_col(&self, var: &str) -> Result<String> {
            Ok(format!("t_{var}_term.language"))
        }
        fn translate_subquery(&self, _algebra: &Algebra, _binds: &mut Binds) -> Result<String> {
            Ok("SELECT 1".to_string())
        }
    }

    #[test]
    fn bound_checks_the_uuid_column_for_null() {
        let resolver = FixedResolver;
        let mut binds = Binds::default();
        let expr = Expr::Call(BuiltIn::Bound, vec![Expr::Var("x".into())]);
        let sql = translate(&expr, &resolver, &mut binds).unwrap();
        assert_eq!(sql, "(t_x.uuid IS NOT NULL)");
    }

    #[test]
    fn comparison_binds_the_constant_and_emits_a_placeholder() {
        let resolver = FixedResolver;
        let mut binds = Binds::default();
        let expr = Expr::Cmp(
            CmpOp::Eq,
            Box::new(Expr::Var("x".into())),
            Box::new(Expr::Constant(Term::plain_literal("hello"))),
        );
        let sql = translate(&expr, &resolver, &mut binds).unwrap();
        assert_eq!(sql, "(t_x_term.lexical = $1)");
        assert_eq!(binds.0.len(), 1);
    }

    #[test]
    fn is_numeric_checks_datatype_against_the_numeric_set() {
        let resolver = FixedResolver;
        let mut binds = Binds::default();
        let expr = Expr::Call(BuiltIn::IsNumeric, vec![Expr::Var("n".into())]);
        let sql = translate(&expr, &resolver, &mut binds).unwrap();
        assert!(sql.contains("t_n_term.datatype IN"));
        assert!(sql.contains("XMLSchema#integer"));
    }

    #[test]
    fn same_term_compares_uuid_columns_for_two_variables() {
        let resolver = FixedResolver;
        let mut binds = Binds::default();
        let expr = Expr::Call(BuiltIn::SameTerm, vec![Expr::Var("x".into()), Expr::Var("y".into())]);
        let sql = translate(&expr, &resolver, &mut binds).unwrap();
        assert_eq!(sql, "(t_x.uuid = t_y.uuid)");
        assert!(binds.0.is_empty(), "no constants to bind when both sides are variables");
    }

    #[test]
    fn same_term_binds_a_literal_constants_uuid_not_its_lexical_form() {
        let resolver = FixedResolver;
        let mut binds = Binds::default();
        let literal = Term::plain_literal("hello");
        let expr = Expr::Call(BuiltIn::SameTerm, vec![Expr::Var("x".into()), Expr::Constant(literal.clone())]);
        let sql = translate(&expr, &resolver, &mut binds).unwrap();
        assert_eq!(sql, "(t_x.uuid = $1)");
        match &binds.0[0] {
            Binding::Uuid(uuid) => assert_eq!(*uuid, literal.uuid),
            other => panic!("expected a bound UUID, got {other:?}"),
        }
    }

    #[test]
    fn regex_with_case_insensitive_flag_uses_the_tilde_star_operator() {
        let resolver = FixedResolver;
        let mut binds = Binds::default();
        let expr = Expr::Call(
            BuiltIn::Regex { flags: Some("i".to_string()) },
            vec![Expr::Var("x".into()), Expr::Constant(Term::plain_literal("^foo"))],
        );
        let sql = translate(&expr, &resolver, &mut binds).unwrap();
        assert!(sql.contains("~*"));
    }
}
