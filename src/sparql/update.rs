//! SPARQL Update (part of C9) — lowers UPDATE forms to the quad API
//! and schema-level DDL, all inside one caller-supplied [`Txn`].
//!
//! `INSERT DATA`/`DELETE DATA` operate on ground triples directly.
//! `INSERT WHERE`/`DELETE WHERE` evaluate the WHERE pattern first (via
//! [`crate::sparql::translate`]) and then instantiate the template per
//! solution row, same as `CONSTRUCT`. Graph management forms (`CREATE`,
//! `DROP`, `CLEAR`, `ADD`, `MOVE`, `COPY`) operate purely on the
//! `graph_id` column, since this engine has no separate graph-catalog
//! table — a named graph exists exactly when some quad uses it.

use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::quad::{PatternTerm, QuadApi, QuadPattern};
use crate::sparql::algebra::{Algebra, TermOrVar, TriplePattern};
use crate::sparql::translate::{execute_select_full, BoundTermColumns, Translator};
use crate::term::{encode as encode_term, Term, TermKind};
use crate::txn::Txn;
use sqlx::PgPool;

/// The distinguished global graph quads fall back to when no explicit
/// graph is named, per the default-graph union policy (spec.md §4.9).
pub const DEFAULT_GRAPH_URI: &str = "urn:vitalgraph:global";

/// One ground triple plus the graph it targets, the unit `INSERT
/// DATA`/`DELETE DATA` operate over.
#[derive(Debug, Clone)]
pub struct GroundQuad {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
    pub graph: Term,
}

#[derive(Debug, Clone)]
pub enum UpdateForm {
    InsertData { quads: Vec<GroundQuad> },
    DeleteData { quads: Vec<GroundQuad> },
    InsertWhere { template: Vec<TriplePattern>, pattern: Algebra },
    DeleteWhere { template: Vec<TriplePattern>, pattern: Algebra },
    Load { source_graph: Term, into: Option<Term> },
    Clear { graph: GraphTarget },
    Drop { graph: GraphTarget },
    Create { graph: Term },
    Add { from: GraphTarget, to: GraphTarget },
    Move { from: GraphTarget, to: GraphTarget },
    Copy { from: GraphTarget, to: GraphTarget },
}

#[derive(Debug, Clone)]
pub enum GraphTarget {
    Default,
    Named(Term),
    All,
}

#[derive(Debug, Default, Clone)]
pub struct UpdateReport {
    pub quads_inserted: u64,
    pub quads_deleted: u64,
}

/// Executes one update form inside `txn`. `default_graph` supplies the
/// graph context for `InsertData`/`DeleteData`/`InsertWhere`/`DeleteWhere`
/// quads that don't name an explicit graph (the engine requires quads to
/// carry a concrete graph term, so callers resolve an unnamed default
/// graph to the distinguished global graph before building `GroundQuad`s).
pub async fn execute(
    quads: &QuadApi,
    pool: &PgPool,
    translator: &Translator,
    space_id: &str,
    form: &UpdateForm,
    txn: &Arc<Txn>,
) -> Result<UpdateReport> {
    match form {
        UpdateForm::InsertData { quads: ground } => {
            let rows: Vec<(Term, Term, Term, Term)> = ground
                .iter()
                .map(|g| (g.subject.clone(), g.predicate.clone(), g.object.clone(), g.graph.clone()))
                .collect();
            let result = quads.add_quads(space_id, &rows, txn).await?;
            Ok(UpdateReport { quads_inserted: result.quads_inserted, quads_deleted: 0 })
        }
        UpdateForm::DeleteData { quads: ground } => {
            let mut deleted = 0u64;
            for g in ground {
                let pattern = QuadPattern {
                    subject: Some(PatternTerm::Concrete(g.subject.uuid)),
                    predicate: Some(PatternTerm::Concrete(g.predicate.uuid)),
                    object: Some(PatternTerm::Concrete(g.object.uuid)),
                    graph: Some(PatternTerm::Concrete(g.graph.uuid)),
                };
                deleted += quads.remove_quads_by_pattern(space_id, &pattern, txn).await?;
            }
            Ok(UpdateReport { quads_inserted: 0, quads_deleted: deleted })
        }
        UpdateForm::InsertWhere { template, pattern } => {
            let rows = evaluate_pattern(translator, pool, pattern).await?;
            let ground = instantiate_template(template, &rows, space_id)?;
            let as_rows: Vec<(Term, Term, Term, Term)> = ground
                .into_iter()
                .map(|g| (g.subject, g.predicate, g.object, g.graph))
                .collect();
            let result = quads.add_quads(space_id, &as_rows, txn).await?;
            Ok(UpdateReport { quads_inserted: result.quads_inserted, quads_deleted: 0 })
        }
        UpdateForm::DeleteWhere { template, pattern } => {
            let rows = evaluate_pattern(translator, pool, pattern).await?;
            let ground = instantiate_template(template, &rows, space_id)?;
            let mut deleted = 0u64;
            for g in ground {
                let quad_pattern = QuadPattern {
                    subject: Some(PatternTerm::Concrete(g.subject.uuid)),
                    predicate: Some(PatternTerm::Concrete(g.predicate.uuid)),
                    object: Some(PatternTerm::Concrete(g.object.uuid)),
                    graph: Some(PatternTerm::Concrete(g.graph.uuid)),
                };
                deleted += quads.remove_quads_by_pattern(space_id, &quad_pattern, txn).await?;
            }
            Ok(UpdateReport { quads_inserted: 0, quads_deleted: deleted })
        }
        UpdateForm::Load { .. } => Err(EngineError::sparql(
            "LOAD is handled by the bulk loader (C6), not the update executor",
        )),
        UpdateForm::Clear { graph } | UpdateForm::Drop { graph } => {
            let deleted = clear_graph(quads, space_id, graph, txn).await?;
            Ok(UpdateReport { quads_inserted: 0, quads_deleted: deleted })
        }
        UpdateForm::Create { graph: _ } => {
            // A named graph exists exactly when a quad uses it; CREATE is
            // a no-op unless a later INSERT gives it quads.
            Ok(UpdateReport::default())
        }
        UpdateForm::Add { from, to } => copy_between(quads, space_id, from, to, false, txn).await,
        UpdateForm::Copy { from, to } => copy_between(quads, space_id, from, to, true, txn).await,
        UpdateForm::Move { from, to } => {
            let report = copy_between(quads, space_id, from, to, true, txn).await?;
            let deleted = clear_graph(quads, space_id, from, txn).await?;
            Ok(UpdateReport { quads_inserted: report.quads_inserted, quads_deleted: deleted })
        }
    }
}

async fn evaluate_pattern(
    translator: &Translator,
    pool: &PgPool,
    pattern: &Algebra,
) -> Result<Vec<std::collections::HashMap<String, BoundTermColumns>>> {
    let vars = collect_vars(pattern);
    let compiled = translator.compile_select_full(&vars, pattern)?;
    execute_select_full(pool, &compiled).await
}

fn collect_vars(algebra: &Algebra) -> Vec<String> {
    fn walk(a: &Algebra, out: &mut Vec<String>) {
        match a {
            Algebra::Bgp(patterns) => {
                for p in patterns {
                    for pos in [&p.subject, &p.object] {
                        if let TermOrVar::Var(name) = pos {
                            if !out.contains(name) {
                                out.push(name.clone());
                            }
                        }
                    }
                    if let crate::sparql::algebra::PredicateOrPath::Plain(TermOrVar::Var(name)) = &p.predicate {
                        if !out.contains(name) {
                            out.push(name.clone());
                        }
                    }
                }
            }
            Algebra::Join(l, r) | Algebra::Union(l, r) | Algebra::Minus(l, r) => {
                walk(l, out);
                walk(r, out);
            }
            Algebra::LeftJoin(l, r, _) => {
                walk(l, out);
                walk(r, out);
            }
            Algebra::Filter(inner, _)
            | Algebra::Distinct(inner)
            | Algebra::Reduced(inner)
            | Algebra::Slice(inner, _, _)
            | Algebra::OrderBy(inner, _)
            | Algebra::Graph(inner, _) => walk(inner, out),
            Algebra::Extend(inner, name, _) => {
                walk(inner, out);
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            Algebra::Project(_, vars) => {
                for v in vars {
                    if !out.contains(v) {
                        out.push(v.clone());
                    }
                }
            }
            Algebra::Group(inner, keys, aggregates) => {
                walk(inner, out);
                for k in keys {
                    if !out.contains(k) {
                        out.push(k.clone());
                    }
                }
                for (name, _) in aggregates {
                    if !out.contains(name) {
                        out.push(name.clone());
                    }
                }
            }
            Algebra::Values(vars, _) => {
                for v in vars {
                    if !out.contains(v) {
                        out.push(v.clone());
                    }
                }
            }
        }
    }
    let mut out = Vec::new();
    walk(algebra, &mut out);
    out
}

/// Instantiates `template` once per solution row, substituting each
/// variable with the lexical value it was bound to in that row and
/// skipping rows where the template references a variable left unbound.
fn instantiate_template(
    template: &[TriplePattern],
    rows: &[std::collections::HashMap<String, BoundTermColumns>],
    space_id: &str,
) -> Result<Vec<GroundQuad>> {
    let mut out = Vec::new();
    for row in rows {
        for pattern in template {
            let subject = resolve_template_term(&pattern.subject, row, space_id)?;
            let predicate = match &pattern.predicate {
                crate::sparql::algebra::PredicateOrPath::Plain(pos) => resolve_template_term(pos, row, space_id)?,
                crate::sparql::algebra::PredicateOrPath::Path(_) => {
                    return Err(EngineError::sparql("property paths are not valid in an update template"));
                }
            };
            let object = resolve_template_term(&pattern.object, row, space_id)?;
            let (Some(subject), Some(predicate), Some(object)) = (subject, predicate, object) else {
                continue;
            };
            out.push(GroundQuad { subject, predicate, object, graph: Term::uri(DEFAULT_GRAPH_URI) });
        }
    }
    Ok(out)
}

/// Reconstructs the `Term` a template variable was actually bound to,
/// using its full kind/datatype/language columns rather than assuming
/// URI — a solution row can bind a variable to any term kind, and a
/// literal's UUID depends on its datatype/language too (spec.md §3), so
/// guessing the kind would derive the wrong UUID and silently target
/// (or insert) the wrong term.
fn resolve_template_term(
    pos: &TermOrVar,
    row: &std::collections::HashMap<String, BoundTermColumns>,
    space_id: &str,
) -> Result<Option<Term>> {
    match pos {
        TermOrVar::Term(t) => Ok(Some(t.clone())),
        TermOrVar::Var(name) => {
            let Some(cols) = row.get(name) else { return Ok(None) };
            let (Some(lexical), Some(kind_raw)) = (&cols.lexical, cols.kind) else {
                return Ok(None);
            };
            let kind = TermKind::try_from(kind_raw)
                .map_err(|e| EngineError::sparql(format!("template variable ?{name}: {e}")))?;
            Ok(Some(encode_term(
                kind,
                lexical,
                cols.datatype.as_deref(),
                cols.language.as_deref(),
                space_id,
            )))
        }
    }
}

async fn clear_graph(quads: &QuadApi, space_id: &str, target: &GraphTarget, txn: &Arc<Txn>) -> Result<u64> {
    let pattern = match target {
        GraphTarget::All => QuadPattern::all(),
        GraphTarget::Default => QuadPattern {
            graph: Some(PatternTerm::Concrete(Term::uri(DEFAULT_GRAPH_URI).uuid)),
            ..QuadPattern::all()
        },
        GraphTarget::Named(term) => QuadPattern {
            graph: Some(PatternTerm::Concrete(term.uuid)),
            ..QuadPattern::all()
        },
    };
    quads.remove_quads_by_pattern(space_id, &pattern, txn).await
}

async fn copy_between(
    quads: &QuadApi,
    space_id: &str,
    from: &GraphTarget,
    to: &GraphTarget,
    overwrite: bool,
    txn: &Arc<Txn>,
) -> Result<UpdateReport> {
    let from_graph = match from {
        GraphTarget::Default | GraphTarget::All => Term::uri(DEFAULT_GRAPH_URI),
        GraphTarget::Named(t) => t.clone(),
    };
    let to_graph = match to {
        GraphTarget::Default | GraphTarget::All => Term::uri(DEFAULT_GRAPH_URI),
        GraphTarget::Named(t) => t.clone(),
    };
    if overwrite {
        clear_graph(quads, space_id, to, txn).await?;
    }
    let pattern = QuadPattern {
        graph: Some(PatternTerm::Concrete(from_graph.uuid)),
        ..QuadPattern::all()
    };
    let existing = quads.quads(space_id, &pattern).await?;
    let mut inserted = 0u64;
    for quad in existing {
        // The term rows for these UUIDs already exist (they came from the
        // source graph's own quads), so `add_quads`'s per-term upsert is a
        // no-op `ON CONFLICT DO NOTHING`; only the UUID is load-bearing here.
        let result = quads
            .add_quads(
                space_id,
                &[(
                    term_by_uuid(quad.subject),
                    term_by_uuid(quad.predicate),
                    term_by_uuid(quad.object),
                    to_graph.clone(),
                )],
                txn,
            )
            .await;
        if result.is_ok() {
            inserted += 1;
        }
    }
    Ok(UpdateReport { quads_inserted: inserted, quads_deleted: 0 })
}

/// A term value carrying only a known UUID, used when re-inserting a
/// quad whose term rows are already present under that UUID (the
/// lexical form is never read in that path).
fn term_by_uuid(uuid: uuid::Uuid) -> Term {
    Term {
        uuid,
        kind: crate::term::TermKind::Uri,
        lexical: String::new(),
        datatype: None,
        language: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparql::algebra::PredicateOrPath;

    #[test]
    fn collect_vars_walks_join_and_project_nodes() {
        let bgp = Algebra::Bgp(vec![TriplePattern {
            subject: TermOrVar::Var("s".into()),
            predicate: PredicateOrPath::Plain(TermOrVar::Term(Term::uri("http://ex/p"))),
            object: TermOrVar::Var("o".into()),
        }]);
        let projected = Algebra::Project(bgp.boxed(), vec!["s".to_string()]);
        assert_eq!(collect_vars(&projected), vec!["s".to_string()]);
    }

    fn uri_cols(lexical: &str) -> BoundTermColumns {
        BoundTermColumns {
            lexical: Some(lexical.to_string()),
            kind: Some(TermKind::Uri as i16),
            datatype: None,
            language: None,
        }
    }

    #[test]
    fn instantiate_template_skips_rows_missing_a_referenced_variable() {
        let template = vec![TriplePattern {
            subject: TermOrVar::Var("s".into()),
            predicate: PredicateOrPath::Plain(TermOrVar::Term(Term::uri("http://ex/p"))),
            object: TermOrVar::Var("o".into()),
        }];
        let mut complete = std::collections::HashMap::new();
        complete.insert("s".to_string(), uri_cols("http://ex/a"));
        complete.insert("o".to_string(), uri_cols("http://ex/b"));
        let mut incomplete = std::collections::HashMap::new();
        incomplete.insert("s".to_string(), uri_cols("http://ex/a"));
        incomplete.insert("o".to_string(), BoundTermColumns::default());
        let rows = vec![complete, incomplete];
        let ground = instantiate_template(&template, &rows, "s1").unwrap();
        assert_eq!(ground.len(), 1);
    }

    #[test]
    fn instantiate_template_reconstructs_a_literal_bound_variable_by_kind() {
        let template = vec![TriplePattern {
            subject: TermOrVar::Term(Term::uri("http://ex/a")),
            predicate: PredicateOrPath::Plain(TermOrVar::Term(Term::uri("http://ex/name"))),
            object: TermOrVar::Var("n".into()),
        }];
        let mut row = std::collections::HashMap::new();
        row.insert(
            "n".to_string(),
            BoundTermColumns {
                lexical: Some("hello".to_string()),
                kind: Some(TermKind::Literal as i16),
                datatype: None,
                language: None,
            },
        );
        let ground = instantiate_template(&template, &[row], "s1").unwrap();
        assert_eq!(ground.len(), 1);
        let expected = Term::plain_literal("hello");
        assert_eq!(ground[0].object.kind, TermKind::Literal);
        assert_eq!(ground[0].object.uuid, expected.uuid, "must derive the literal's real UUID, not a URI's");
    }
}
