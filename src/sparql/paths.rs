//! Property paths (part of C9) — `p1/p2`, `p1|p2`, `^p`, `p+`, `p*`,
//! `p?`, and negated property sets `!p`.
//!
//! Transitive paths (`+`, `*`) lower to a recursive CTE keyed on the
//! starting node. Cycle detection accumulates a `visited` array on each
//! recursive step and excludes any candidate already present in it;
//! depth is bounded by [`DEFAULT_MAX_PATH_DEPTH`], after which the
//! query fails with *path depth exceeded* rather than looping forever.

use uuid::Uuid;

use crate::error::{EngineError, Result};

/// Default recursion bound for `+`/`*` paths, per spec.md §4.9 ("a few
/// hundred"). Configurable per query by constructing [`PathOptions`]
/// directly.
pub const DEFAULT_MAX_PATH_DEPTH: u32 = 200;

#[derive(Debug, Clone, Copy)]
pub struct PathOptions {
    pub max_depth: u32,
}

impl Default for PathOptions {
    fn default() -> Self {
        Self { max_depth: DEFAULT_MAX_PATH_DEPTH }
    }
}

#[derive(Debug, Clone)]
pub enum PropertyPath {
    Predicate(Uuid),
    Sequence(Box<PropertyPath>, Box<PropertyPath>),
    Alternative(Box<PropertyPath>, Box<PropertyPath>),
    Inverse(Box<PropertyPath>),
    OneOrMore(Box<PropertyPath>),
    ZeroOrMore(Box<PropertyPath>),
    ZeroOrOne(Box<PropertyPath>),
    Negated(Vec<Uuid>),
}

/// Translates a property path into a SQL fragment producing
/// `(start_id, end_id)` pairs reachable under the path, scoped to
/// `quad_table`. `start_binds`/`end_binds` name the outer query's
/// subject/object columns the path joins against; when the path is
/// used stand-alone (no outer correlation), pass the literal column
/// names of a `CROSS JOIN LATERAL` the caller wraps around this.
pub fn translate_path(path: &PropertyPath, quad_table: &str, options: PathOptions) -> Result<String> {
    translate_inner(path, quad_table, options, 0)
}

fn translate_inner(path: &PropertyPath, quad_table: &str, options: PathOptions, depth: u32) -> Result<String> {
    if depth > options.max_depth {
        return Err(EngineError::sparql("path depth exceeded"));
    }
    match path {
        PropertyPath::Predicate(pred) => Ok(format!(
            "SELECT subject_id AS start_id, object_id AS end_id FROM {quad_table} WHERE predicate_id = '{pred}'"
        )),
        PropertyPath::Inverse(inner) => {
            let base = translate_inner(inner, quad_table, options, depth + 1)?;
            Ok(format!("SELECT end_id AS start_id, start_id AS end_id FROM ({base}) AS inv"))
        }
        PropertyPath::Sequence(left, right) => {
            let l = translate_inner(left, quad_table, options, depth + 1)?;
            let r = translate_inner(right, quad_table, options, depth + 1)?;
            Ok(format!(
                "SELECT l.start_id AS start_id, r.end_id AS end_id FROM ({l}) AS l JOIN ({r}) AS r ON l.end_id = r.start_id"
            ))
        }
        PropertyPath::Alternative(left, right) => {
            let l = translate_inner(left, quad_table, options, depth + 1)?;
            let r = translate_inner(right, quad_table, options, depth + 1)?;
            Ok(format!("({l}) UNION ({r})"))
        }
        PropertyPath::ZeroOrOne(inner) => {
            let base = translate_inner(inner, quad_table, options, depth + 1)?;
            Ok(format!(
                "({base}) UNION (SELECT DISTINCT subject_id AS start_id, subject_id AS end_id FROM {quad_table})"
            ))
        }
        PropertyPath::OneOrMore(inner) => translate_transitive(inner, quad_table, options, depth, false),
        PropertyPath::ZeroOrMore(inner) => translate_transitive(inner, quad_table, options, depth, true),
        PropertyPath::Negated(excluded) => {
            let list = excluded
                .iter()
                .map(|u| format!("'{u}'"))
                .collect::<Vec<_>>()
                .join(", ");
            Ok(format!(
                "SELECT subject_id AS start_id, object_id AS end_id FROM {quad_table} WHERE predicate_id NOT IN ({list})"
            ))
        }
    }
}

/// `p+` / `p*` as a recursive CTE, tracking visited nodes in an array
/// to stop cycles from looping past `max_depth`.
fn translate_transitive(
    inner: &PropertyPath,
    quad_table: &str,
    options: PathOptions,
    depth: u32,
    include_zero: bool,
) -> Result<String> {
    let base = translate_inner(inner, quad_table, options, depth + 1)?;
    let seed = if include_zero {
        format!(
            "SELECT subject_id AS start_id, subject_id AS end_id, ARRAY[subject_id] AS visited, 0 AS depth FROM {quad_table}
             UNION ALL
             SELECT start_id, end_id, ARRAY[start_id, end_id], 1 FROM ({base}) AS step0"
        )
    } else {
        format!("SELECT start_id, end_id, ARRAY[start_id, end_id] AS visited, 1 AS depth FROM ({base}) AS step0")
    };
    Ok(format!(
        "WITH RECURSIVE path_closure(start_id, end_id, visited, depth) AS (
            {seed}
            UNION ALL
            SELECT pc.start_id, step.end_id, pc.visited || step.end_id, pc.depth + 1
            FROM path_closure pc
            JOIN ({base}) AS step ON step.start_id = pc.end_id
            WHERE NOT (step.end_id = ANY(pc.visited)) AND pc.depth < {}
        )
        SELECT DISTINCT start_id, end_id FROM path_closure",
        options.max_depth
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uuid(n: u8) -> Uuid {
        Uuid::from_bytes([n; 16])
    }

    #[test]
    fn predicate_path_selects_from_quad_table() {
        let path = PropertyPath::Predicate(uuid(1));
        let sql = translate_path(&path, "vg__s1__rdf_quad", PathOptions::default()).unwrap();
        assert!(sql.contains("vg__s1__rdf_quad"));
        assert!(sql.contains("predicate_id ="));
    }

    #[test]
    fn one_or_more_emits_a_recursive_cte_with_cycle_guard() {
        let path = PropertyPath::OneOrMore(Box::new(PropertyPath::Predicate(uuid(2))));
        let sql = translate_path(&path, "vg__s1__rdf_quad", PathOptions::default()).unwrap();
        assert!(sql.starts_with("WITH RECURSIVE"));
        assert!(sql.contains("ANY(pc.visited)"));
        assert!(sql.contains("pc.depth < 200"));
    }

    #[test]
    fn inverse_swaps_start_and_end() {
        let path = PropertyPath::Inverse(Box::new(PropertyPath::Predicate(uuid(3))));
        let sql = translate_path(&path, "vg__s1__rdf_quad", PathOptions::default()).unwrap();
        assert!(sql.contains("end_id AS start_id, start_id AS end_id"));
    }

    #[test]
    fn negated_excludes_the_given_predicate_set() {
        let path = PropertyPath::Negated(vec![uuid(4), uuid(5)]);
        let sql = translate_path(&path, "vg__s1__rdf_quad", PathOptions::default()).unwrap();
        assert!(sql.contains("NOT IN"));
    }

    #[test]
    fn exceeding_configured_depth_fails_before_emitting_sql() {
        let options = PathOptions { max_depth: 1 };
        let path = PropertyPath::Sequence(
            Box::new(PropertyPath::Sequence(
                Box::new(PropertyPath::Predicate(uuid(1))),
                Box::new(PropertyPath::Predicate(uuid(2))),
            )),
            Box::new(PropertyPath::Predicate(uuid(3))),
        );
        assert!(translate_path(&path, "vg__s1__rdf_quad", options).is_err());
    }
}
