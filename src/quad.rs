//! Quad API (C7) — pattern iteration and single/batch add-delete over
//! the per-space quad table.
//!
//! Generalizes the teacher's `EntityStore::get`/`put`/`query` (which
//! built ad-hoc SQL strings keyed by `quad_N.column` placeholders for
//! each triple pattern) into an explicit four-position pattern over a
//! single quad table, since this engine stores generic RDF quads rather
//! than JSON-LD entities exploded across many triples.

use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::schema::{table_name, LogicalTable};
use crate::term::{Term, TermCache};
use crate::txn::{Txn, TransactionManager};
use std::sync::Arc;

/// A quad: four term UUIDs. Term material itself lives in the term
/// table; the quad table holds only inert foreign keys, so there is no
/// in-memory graph of linked term objects that could form reference
/// cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Quad {
    pub subject: Uuid,
    pub predicate: Uuid,
    pub object: Uuid,
    pub graph: Uuid,
}

/// Outcome of a batched [`QuadApi::add_quads`] call: how many quad rows
/// and how many term rows were *actually* inserted, net of `ON CONFLICT
/// DO NOTHING` deduplication — not how many were merely processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuadBatchResult {
    pub quads_inserted: u64,
    pub terms_inserted: u64,
}

/// One position of a quad pattern: match anything, match a concrete
/// term, or match a regex against the lexical form materialized at that
/// position.
#[derive(Debug, Clone)]
pub enum PatternTerm {
    Any,
    Concrete(Uuid),
    Regex(regex::Regex),
}

#[derive(Debug, Clone, Default)]
pub struct QuadPattern {
    pub subject: Option<PatternTerm>,
    pub predicate: Option<PatternTerm>,
    pub object: Option<PatternTerm>,
    pub graph: Option<PatternTerm>,
}

impl QuadPattern {
    pub fn all() -> Self {
        Self::default()
    }
}

fn quad_table(prefix: &str, space_id: &str) -> String {
    table_name(prefix, space_id, LogicalTable::RdfQuad)
}

fn term_table(prefix: &str, space_id: &str) -> String {
    table_name(prefix, space_id, LogicalTable::Term)
}

/// Validates a term's placement. Predicates must be URIs; subjects must
/// be URI or blank node; graph contexts must be URIs. Objects may be any
/// kind.
fn validate_placement(subject: &Term, predicate: &Term, graph: &Term) -> Result<()> {
    use crate::term::TermKind;
    if predicate.kind != TermKind::Uri {
        return Err(EngineError::validation(format!(
            "invalid term placement: predicate must be a URI, got {:?}",
            predicate.kind
        )));
    }
    if !matches!(subject.kind, TermKind::Uri | TermKind::BlankNode) {
        return Err(EngineError::validation(format!(
            "invalid term placement: subject must be URI or blank node, got {:?}",
            subject.kind
        )));
    }
    if graph.kind != TermKind::Uri {
        return Err(EngineError::validation(format!(
            "invalid term placement: graph context must be a URI, got {:?}",
            graph.kind
        )));
    }
    Ok(())
}

/// Inserts a term row if its UUID is not already present (term
/// identity is content-addressed, so `ON CONFLICT DO NOTHING` makes
/// repeated inserts of the same term idempotent).
/// Upserts `term`, returning 1 if a new row was actually inserted and 0
/// if it was already present — `ON CONFLICT DO NOTHING` makes the insert
/// itself idempotent, but callers that report "terms created" need to
/// know which of those two happened.
async fn upsert_term(
    pool_tx: &mut sqlx::Transaction<'static, sqlx::Postgres>,
    table: &str,
    term: &Term,
) -> Result<u64> {
    let result = sqlx::query(&format!(
        "INSERT INTO {table} (uuid, kind, lexical, datatype, language)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (uuid) DO NOTHING"
    ))
    .bind(term.uuid)
    .bind(term.kind as i16)
    .bind(&term.lexical)
    .bind(&term.datatype)
    .bind(&term.language)
    .execute(&mut **pool_tx)
    .await?;
    Ok(result.rows_affected())
}

pub struct QuadApi {
    pool: PgPool,
    prefix: String,
    cache: Arc<TermCache>,
}

impl QuadApi {
    pub fn new(pool: PgPool, prefix: impl Into<String>, cache: Arc<TermCache>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
            cache,
        }
    }

    /// Resolves a term's UUID via the cache, falling back to encoding +
    /// caching the result. Never touches the database: lexical→UUID is
    /// a pure function (C1), so a cache miss is just a recompute, not a
    /// query.
    fn resolve(&self, space_id: &str, term: &Term) -> Uuid {
        if let Some(uuid) = self.cache.lookup_uuid(space_id, term) {
            return uuid;
        }
        self.cache.insert(space_id, term.clone());
        term.uuid
    }

    /// Adds a single quad, opening its own `Txn` unless the caller
    /// supplies one.
    pub async fn add_quad(
        &self,
        txn_manager: &TransactionManager,
        space_id: &str,
        subject: &Term,
        predicate: &Term,
        object: &Term,
        graph: &Term,
        txn: Option<&Arc<Txn>>,
    ) -> Result<()> {
        validate_placement(subject, predicate, graph)?;
        let terms = [subject, predicate, object, graph];
        let quad = Quad {
            subject: self.resolve(space_id, subject),
            predicate: self.resolve(space_id, predicate),
            object: self.resolve(space_id, object),
            graph: self.resolve(space_id, graph),
        };

        let active_txn: Arc<Txn> = match txn {
            Some(t) => t.clone(),
            None => txn_manager.begin().await?,
        };

        let term_table = term_table(&self.prefix, space_id);
        let quad_table = quad_table(&self.prefix, space_id);
        let mut terms_created = 0u64;
        {
            let mut guard = active_txn.connection().await?;
            let tx = guard.as_mut().expect("checked Some above");
            for term in terms {
                terms_created += upsert_term(tx, &term_table, term).await?;
            }
            sqlx::query(&format!(
                "INSERT INTO {quad_table} (subject_id, predicate_id, object_id, graph_id)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT DO NOTHING"
            ))
            .bind(quad.subject)
            .bind(quad.predicate)
            .bind(quad.object)
            .bind(quad.graph)
            .execute(&mut **tx)
            .await?;
        }
        active_txn.record_terms_added(terms_created);
        active_txn.record_quads_added(1);

        if txn.is_none() {
            txn_manager.commit(&active_txn).await?;
        }
        Ok(())
    }

    /// Batched add; returns the counts actually inserted (duplicates
    /// deducted by `ON CONFLICT DO NOTHING`'s row counts on both tables).
    pub async fn add_quads(
        &self,
        space_id: &str,
        quads: &[(Term, Term, Term, Term)],
        txn: &Arc<Txn>,
    ) -> Result<QuadBatchResult> {
        let term_table = term_table(&self.prefix, space_id);
        let quad_table = quad_table(&self.prefix, space_id);

        let mut guard = txn.connection().await?;
        let tx = guard.as_mut().expect("checked Some above");

        let mut quads_inserted = 0u64;
        let mut terms_inserted = 0u64;
        for (s, p, o, g) in quads {
            validate_placement(s, p, g)?;
            for term in [s, p, o, g] {
                terms_inserted += upsert_term(tx, &term_table, term).await?;
            }
            let result = sqlx::query(&format!(
                "INSERT INTO {quad_table} (subject_id, predicate_id, object_id, graph_id)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT DO NOTHING"
            ))
            .bind(s.uuid)
            .bind(p.uuid)
            .bind(o.uuid)
            .bind(g.uuid)
            .execute(&mut **tx)
            .await?;
            quads_inserted += result.rows_affected();
        }
        drop(guard);
        txn.record_terms_added(terms_inserted);
        txn.record_quads_added(quads_inserted);
        Ok(QuadBatchResult { quads_inserted, terms_inserted })
    }

    pub async fn remove_quad(&self, space_id: &str, pattern: &QuadPattern, txn: &Arc<Txn>) -> Result<u64> {
        self.remove_quads_by_pattern(space_id, pattern, txn).await
    }

    pub async fn remove_quads_by_pattern(
        &self,
        space_id: &str,
        pattern: &QuadPattern,
        txn: &Arc<Txn>,
    ) -> Result<u64> {
        let quad_table = quad_table(&self.prefix, space_id);
        let term_table = term_table(&self.prefix, space_id);
        let has_regex = [&pattern.subject, &pattern.predicate, &pattern.object, &pattern.graph]
            .iter()
            .any(|p| matches!(p, Some(PatternTerm::Regex(_))));

        let mut guard = txn.connection().await?;
        let tx = guard.as_mut().expect("checked Some above");

        if has_regex {
            let (from_clause, where_clause, binds) = build_query_clauses(pattern, &quad_table, &term_table);
            let sql = format!(
                "DELETE FROM {quad_table} WHERE (subject_id, predicate_id, object_id, graph_id) IN \
                 (SELECT {quad_table}.subject_id, {quad_table}.predicate_id, {quad_table}.object_id, {quad_table}.graph_id FROM {from_clause} WHERE {where_clause})"
            );
            let mut query = sqlx::query(&sql);
            for bind in &binds {
                query = bind_pattern_value(query, bind);
            }
            let result = query.execute(&mut **tx).await?;
            Ok(result.rows_affected())
        } else {
            let (where_clause, binds) = build_where_clause(pattern);
            let mut query = sqlx::query(&format!("DELETE FROM {quad_table} WHERE {where_clause}"));
            for bind in &binds {
                query = query.bind(bind);
            }
            let result = query.execute(&mut **tx).await?;
            Ok(result.rows_affected())
        }
    }

    /// Iterates quads matching `pattern`. Ordering is unspecified unless
    /// the caller asked for one; rows come back in whatever order the
    /// selected index produces.
    pub async fn quads(&self, space_id: &str, pattern: &QuadPattern) -> Result<Vec<Quad>> {
        let quad_table = quad_table(&self.prefix, space_id);
        let term_table = term_table(&self.prefix, space_id);
        let (from_clause, where_clause, binds) = build_query_clauses(pattern, &quad_table, &term_table);
        let mut query = sqlx::query(&format!(
            "SELECT DISTINCT {quad_table}.subject_id, {quad_table}.predicate_id, {quad_table}.object_id, {quad_table}.graph_id FROM {from_clause} WHERE {where_clause}"
        ));
        for bind in &binds {
            query = bind_pattern_value(query, bind);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|row| Quad {
                subject: row.get("subject_id"),
                predicate: row.get("predicate_id"),
                object: row.get("object_id"),
                graph: row.get("graph_id"),
            })
            .collect())
    }

    /// Cheap `COUNT(*)` using the most selective available index
    /// (Postgres' planner picks it given the equality predicates we
    /// emit; we don't force an index hint).
    pub async fn count_quads(&self, space_id: &str, pattern: Option<&QuadPattern>) -> Result<i64> {
        let quad_table = quad_table(&self.prefix, space_id);
        let term_table = term_table(&self.prefix, space_id);
        let default_pattern = QuadPattern::all();
        let pattern = pattern.unwrap_or(&default_pattern);
        let (from_clause, where_clause, binds) = build_query_clauses(pattern, &quad_table, &term_table);
        let mut query = sqlx::query(&format!(
            "SELECT COUNT(DISTINCT ({quad_table}.subject_id, {quad_table}.predicate_id, {quad_table}.object_id, {quad_table}.graph_id)) AS n FROM {from_clause} WHERE {where_clause}"
        ));
        for bind in &binds {
            query = bind_pattern_value(query, bind);
        }
        let row = query.fetch_one(&self.pool).await?;
        Ok(row.get::<i64, _>("n"))
    }
}

/// A bind value accumulated while building a pattern's `WHERE` clause —
/// either a concrete term UUID or a regex pattern string to match
/// against a joined term's lexical form.
enum PatternBind {
    Uuid(Uuid),
    Regex(String),
}

fn bind_pattern_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    value: &'q PatternBind,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    match value {
        PatternBind::Uuid(u) => query.bind(u),
        PatternBind::Regex(r) => query.bind(r),
    }
}

/// Builds the `FROM`/`WHERE` clauses for a quad pattern that may include
/// regex positions. A regex position joins the term table and matches
/// its lexical form with `~`; positions with no regex skip the join
/// entirely, so a pattern with no regex positions degenerates to the
/// plain quad-table scan `build_where_clause` alone would produce.
fn build_query_clauses(pattern: &QuadPattern, quad_table: &str, term_table: &str) -> (String, String, Vec<PatternBind>) {
    let mut froms = vec![quad_table.to_string()];
    let mut clauses = Vec::new();
    let mut binds = Vec::new();
    let columns = [
        ("subject_id", &pattern.subject),
        ("predicate_id", &pattern.predicate),
        ("object_id", &pattern.object),
        ("graph_id", &pattern.graph),
    ];
    for (column, value) in columns {
        match value {
            Some(PatternTerm::Concrete(uuid)) => {
                binds.push(PatternBind::Uuid(*uuid));
                clauses.push(format!("{quad_table}.{column} = ${}", binds.len()));
            }
            Some(PatternTerm::Regex(re)) => {
                let alias = format!("{column}_term");
                froms.push(format!("JOIN {term_table} {alias} ON {alias}.uuid = {quad_table}.{column}"));
                binds.push(PatternBind::Regex(re.as_str().to_string()));
                clauses.push(format!("{alias}.lexical ~ ${}", binds.len()));
            }
            Some(PatternTerm::Any) | None => {}
        }
    }
    let where_clause = if clauses.is_empty() { "true".to_string() } else { clauses.join(" AND ") };
    (froms.join(" "), where_clause, binds)
}

/// Builds a `WHERE` clause from a quad pattern's concrete positions
/// only — used on the fast path where no position is a regex, so the
/// query never needs to join the term table at all.
fn build_where_clause(pattern: &QuadPattern) -> (String, Vec<Uuid>) {
    let mut clauses = Vec::new();
    let mut binds = Vec::new();
    let columns = [
        ("subject_id", &pattern.subject),
        ("predicate_id", &pattern.predicate),
        ("object_id", &pattern.object),
        ("graph_id", &pattern.graph),
    ];
    for (column, value) in columns {
        if let Some(PatternTerm::Concrete(uuid)) = value {
            binds.push(*uuid);
            clauses.push(format!("{column} = ${}", binds.len()));
        }
    }
    if clauses.is_empty() {
        ("true".to_string(), binds)
    } else {
        (clauses.join(" AND "), binds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::TermKind;

    #[test]
    fn invalid_predicate_kind_is_rejected() {
        let subject = Term::uri("http://ex/s");
        let predicate = Term::plain_literal("not-a-uri");
        let graph = Term::uri("http://g/1");
        assert!(validate_placement(&subject, &predicate, &graph).is_err());
    }

    #[test]
    fn blank_node_subject_is_allowed() {
        let subject = Term::blank_node("s1", "b1");
        let predicate = Term::uri("http://ex/p");
        let graph = Term::uri("http://g/1");
        assert!(validate_placement(&subject, &predicate, &graph).is_ok());
        assert_eq!(subject.kind, TermKind::BlankNode);
    }

    #[test]
    fn wildcard_pattern_has_no_where_clause_restriction() {
        let (clause, binds) = build_where_clause(&QuadPattern::all());
        assert_eq!(clause, "true");
        assert!(binds.is_empty());
    }

    #[test]
    fn partial_pattern_only_constrains_bound_positions() {
        let subject = Term::uri("http://ex/a");
        let pattern = QuadPattern {
            subject: Some(PatternTerm::Concrete(subject.uuid)),
            ..QuadPattern::all()
        };
        let (clause, binds) = build_where_clause(&pattern);
        assert_eq!(clause, "subject_id = $1");
        assert_eq!(binds, vec![subject.uuid]);
    }

    #[test]
    fn regex_position_joins_the_term_table_for_that_column_only() {
        let pattern = QuadPattern {
            object: Some(PatternTerm::Regex(regex::Regex::new("^foo").unwrap())),
            ..QuadPattern::all()
        };
        let (from, where_clause, binds) = build_query_clauses(&pattern, "vg__s1__rdf_quad", "vg__s1__term");
        assert!(from.contains("JOIN vg__s1__term object_id_term ON object_id_term.uuid = vg__s1__rdf_quad.object_id"));
        assert!(where_clause.contains("object_id_term.lexical ~ $1"));
        assert_eq!(binds.len(), 1);
    }

    #[test]
    fn concrete_and_regex_positions_combine_in_one_query() {
        let subject = Term::uri("http://ex/a");
        let pattern = QuadPattern {
            subject: Some(PatternTerm::Concrete(subject.uuid)),
            object: Some(PatternTerm::Regex(regex::Regex::new("bar$").unwrap())),
            ..QuadPattern::all()
        };
        let (from, where_clause, binds) = build_query_clauses(&pattern, "vg__s1__rdf_quad", "vg__s1__term");
        assert!(from.contains("JOIN"));
        assert!(where_clause.contains("subject_id = $1"));
        assert!(where_clause.contains("object_id_term.lexical ~ $2"));
        assert_eq!(binds.len(), 2);
    }
}
