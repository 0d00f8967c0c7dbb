//! Aggregate lowering (part of C9) — `COUNT`, `SUM`, `AVG`, `MIN`,
//! `MAX`, `GROUP_CONCAT`, `SAMPLE`, and the `HAVING` filter that
//! follows grouping.

use crate::error::Result;
use crate::sparql::algebra::AggregateCall;
use crate::sparql::expr::{translate, Binds, VarResolver};

/// Lowers one aggregate call into its SQL form. Numeric-typed operands
/// (`SUM`/`AVG`) cast the lexical form to `numeric` since the term
/// table stores every value as text; non-numeric input fails at query
/// time with a Postgres cast error rather than silently coercing.
pub fn translate_aggregate(call: &AggregateCall, resolver: &dyn VarResolver, binds: &mut Binds) -> Result<String> {
    match call {
        AggregateCall::Count { expr: None, distinct: _ } => Ok("COUNT(*)".to_string()),
        AggregateCall::Count { expr: Some(e), distinct } => {
            let inner = translate(e, resolver, binds)?;
            Ok(if *distinct {
                format!("COUNT(DISTINCT {inner})")
            } else {
                format!("COUNT({inner})")
            })
        }
        AggregateCall::Sum { expr, distinct } => {
            let inner = translate(expr, resolver, binds)?;
            Ok(if *distinct {
                format!("SUM(DISTINCT ({inner})::numeric)")
            } else {
                format!("SUM(({inner})::numeric)")
            })
        }
        AggregateCall::Avg { expr, distinct } => {
            let inner = translate(expr, resolver, binds)?;
            Ok(if *distinct {
                format!("AVG(DISTINCT ({inner})::numeric)")
            } else {
                format!("AVG(({inner})::numeric)")
            })
        }
        AggregateCall::Min { expr } => Ok(format!("MIN({})", translate(expr, resolver, binds)?)),
        AggregateCall::Max { expr } => Ok(format!("MAX({})", translate(expr, resolver, binds)?)),
        AggregateCall::GroupConcat { expr, separator, distinct } => {
            let inner = translate(expr, resolver, binds)?;
            let sep_placeholder = binds.push(crate::sparql::expr::Binding::Text(separator.clone()));
            Ok(if *distinct {
                format!("STRING_AGG(DISTINCT {inner}, {sep_placeholder})")
            } else {
                format!("STRING_AGG({inner}, {sep_placeholder})")
            })
        }
        AggregateCall::Sample { expr } => {
            let inner = translate(expr, resolver, binds)?;
            Ok(format!("(array_agg({inner}))[1]"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparql::algebra::Algebra;
    use crate::sparql::expr::Expr;

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
    fn count_star_ignores_distinct() {
        let resolver = FixedResolver;
        let mut binds = Binds::default();
        let sql = translate_aggregate(&AggregateCall::Count { expr: None, distinct: true }, &resolver, &mut binds).unwrap();
        assert_eq!(sql, "COUNT(*)");
    }

    #[test]
    fn sum_casts_to_numeric() {
        let resolver = FixedResolver;
        let mut binds = Binds::default();
        let call = AggregateCall::Sum { expr: Expr::Var("x".into()), distinct: false };
        let sql = translate_aggregate(&call, &resolver, &mut binds).unwrap();
        assert!(sql.contains("::numeric"));
    }

    #[test]
    fn group_concat_binds_the_separator() {
        let resolver = FixedResolver;
        let mut binds = Binds::default();
        let call = AggregateCall::GroupConcat {
            expr: Expr::Var("x".into()),
            separator: ", ".to_string(),
            distinct: false,
        };
        let sql = translate_aggregate(&call, &resolver, &mut binds).unwrap();
        assert!(sql.starts_with("STRING_AGG("));
        assert_eq!(binds.0.len(), 1);
    }
}
