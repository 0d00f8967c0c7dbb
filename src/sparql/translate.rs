//! SPARQL Translator (C9) — lowers a normalized [`Algebra`] tree into
//! SQL against a space's quad/term tables.
//!
//! Every translated node, at any depth, produces a `SELECT` whose
//! output columns follow one fixed convention: for each variable `v`
//! bound at that point, the columns `v__uuid`, `v__lexical`, `v__kind`,
//! `v__datatype`, `v__language`. A parent combinator only ever needs to
//! know *which variables* a child exposes — the column names are
//! always derivable from that — so `Join`/`Union`/`Minus`/`LeftJoin`
//! wrap their children as `(child_sql) AS alias` without threading any
//! other bookkeeping through.
//!
//! `EXISTS`/`NOT EXISTS` subqueries correlate back to the enclosing
//! scope by matching variable names: the subquery's algebra is
//! translated independently, then joined to the outer row wherever a
//! variable name appears on both sides. A subquery that shares no
//! variable with its enclosing scope degenerates to an uncorrelated
//! existence check.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::{PgPool, Row};

use crate::error::{EngineError, Result};
use crate::schema::{table_name, LogicalTable};
use crate::sparql::aggregate::translate_aggregate;
use crate::sparql::algebra::{Algebra, OrderKey, PredicateOrPath, QueryForm, SortDirection, TermOrVar, TriplePattern};
use crate::sparql::expr::{translate as translate_expr, Binding, Binds, VarResolver};
use crate::sparql::paths::{translate_path, PathOptions};
use crate::term::{Term, TermCache, TermKind};

/// Named-graph scope threaded down through BGP/Graph translation. The
/// default-graph union policy (spec.md §4.9): with no `GRAPH` block,
/// every quad's context column is unconstrained (logical union of all
/// named graphs plus the distinguished global graph), so `None` simply
/// omits the graph-context predicate rather than restricting it.
#[derive(Debug, Clone)]
enum GraphScope {
    Default,
    Constant(uuid::Uuid),
    Variable(String),
}

pub struct Translator {
    prefix: String,
    space_id: String,
    cache: Arc<TermCache>,
    path_options: PathOptions,
    alias_counter: std::cell::Cell<u32>,
}

impl Translator {
    pub fn new(prefix: impl Into<String>, space_id: impl Into<String>, cache: Arc<TermCache>) -> Self {
        Self {
            prefix: prefix.into(),
            space_id: space_id.into(),
            cache,
            path_options: PathOptions::default(),
            alias_counter: std::cell::Cell::new(0),
        }
    }

    fn quad_table(&self) -> String {
        table_name(&self.prefix, &self.space_id, LogicalTable::RdfQuad)
    }

    fn term_table(&self) -> String {
        table_name(&self.prefix, &self.space_id, LogicalTable::Term)
    }

    fn next_alias(&self) -> String {
        let n = self.alias_counter.get();
        self.alias_counter.set(n + 1);
        format!("r{n}")
    }

    fn resolve_constant(&self, term: &Term) -> uuid::Uuid {
        if let Some(uuid) = self.cache.lookup_uuid(&self.space_id, term) {
            return uuid;
        }
        self.cache.insert(&self.space_id, term.clone());
        term.uuid
    }

    /// Compiles a SELECT query for `form`, returning the final SQL text
    /// (with `$n` placeholders) and the ordered bind values.
    /// Compiles a SELECT-shaped query the same way [`Self::compile`] does,
    /// but projects each variable's kind/datatype/language alongside its
    /// lexical form rather than lexical alone. The plain `compile` path
    /// is enough for a caller that only displays results; a caller that
    /// needs to reconstruct a full, correctly-classified [`crate::term::Term`]
    /// (e.g. instantiating an `INSERT WHERE`/`DELETE WHERE` template)
    /// needs the extra columns, since a literal's UUID is a function of
    /// more than its lexical form (spec.md §3).
    pub fn compile_select_full(&self, vars: &[String], algebra: &Algebra) -> Result<CompiledQuery> {
        let mut binds = Binds::default();
        let (sql, bound_vars) = self.translate_algebra(algebra, &mut binds, &GraphScope::Default)?;
        let missing: Vec<_> = vars.iter().filter(|v| !bound_vars.contains(v)).cloned().collect();
        if !missing.is_empty() {
            return Err(EngineError::sparql(format!("SELECT projects unbound variable(s): {missing:?}")));
        }
        let columns = vars
            .iter()
            .map(|v| {
                format!(
                    "{v}__lexical AS {v}__lexical, {v}__kind AS {v}__kind, {v}__datatype AS {v}__datatype, {v}__language AS {v}__language"
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        Ok(CompiledQuery {
            sql: format!("SELECT {columns} FROM ({sql}) AS final_select"),
            binds: binds.0,
            vars: vars.to_vec(),
        })
    }

    pub fn compile(&self, form: &QueryForm) -> Result<CompiledQuery> {
        let mut binds = Binds::default();
        match form {
            QueryForm::Select { vars, algebra } => {
                let (sql, bound_vars) = self.translate_algebra(algebra, &mut binds, &GraphScope::Default)?;
                let missing: Vec<_> = vars.iter().filter(|v| !bound_vars.contains(v)).cloned().collect();
                if !missing.is_empty() {
                    return Err(EngineError::sparql(format!("SELECT projects unbound variable(s): {missing:?}")));
                }
                let columns = vars
                    .iter()
                    .map(|v| format!("{v}__lexical AS {v}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                Ok(CompiledQuery {
                    sql: format!("SELECT {columns} FROM ({sql}) AS final_select"),
                    binds: binds.0,
                    vars: vars.clone(),
                })
            }
            QueryForm::Ask { algebra } => {
                let (sql, _) = self.translate_algebra(algebra, &mut binds, &GraphScope::Default)?;
                Ok(CompiledQuery {
                    sql: format!("SELECT 1 FROM ({sql}) AS ask_check LIMIT 1"),
                    binds: binds.0,
                    vars: vec![],
                })
            }
            QueryForm::Construct { template, algebra } => {
                let (sql, bound_vars) = self.translate_algebra(algebra, &mut binds, &GraphScope::Default)?;
                self.validate_template(template, &bound_vars)?;
                let columns = bound_vars
                    .iter()
                    .map(|v| format!("{v}__lexical AS {v}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                Ok(CompiledQuery {
                    // Distinct solutions can still instantiate the same
                    // template triple (e.g. when the template only uses a
                    // subset of the WHERE clause's variables); dedup here
                    // rather than leaving it to the caller.
                    sql: format!("SELECT DISTINCT {columns} FROM ({sql}) AS construct_source"),
                    binds: binds.0,
                    vars: bound_vars,
                })
            }
            QueryForm::Describe { resources, algebra } => {
                let quad = self.quad_table();
                let base = algebra
                    .as_ref()
                    .map(|a| self.translate_algebra(a, &mut binds, &GraphScope::Default))
                    .transpose()?;

                let mut ids = Vec::new();
                for r in resources {
                    if let TermOrVar::Term(t) = r {
                        ids.push(self.resolve_constant(t));
                    }
                }
                let mut placeholders = Vec::new();
                for id in &ids {
                    placeholders.push(binds.push(Binding::Uuid(*id)));
                }
                let resource_filter = if placeholders.is_empty() {
                    "false".to_string()
                } else {
                    format!("subject_id IN ({0}) OR object_id IN ({0})", placeholders.join(", "))
                };

                // `DESCRIBE ?var WHERE {...}` resolves each named variable to
                // the set of UUIDs it was bound to across the WHERE solution,
                // not to a fixed column name — one-hop symmetric expansion
                // from there (spec.md §9 open question).
                let mut var_selects = Vec::new();
                if let Some((inner_sql, bound_vars)) = &base {
                    for r in resources {
                        if let TermOrVar::Var(name) = r {
                            if bound_vars.contains(name) {
                                var_selects.push(format!(
                                    "SELECT {name}__uuid AS id FROM ({inner_sql}) AS describe_source"
                                ));
                            } else {
                                return Err(EngineError::sparql(format!(
                                    "DESCRIBE references unbound variable ?{name}"
                                )));
                            }
                        }
                    }
                }

                let sql = if var_selects.is_empty() {
                    format!("SELECT * FROM {quad} WHERE {resource_filter}")
                } else {
                    let union = var_selects.join(" UNION ALL ");
                    format!(
                        "SELECT * FROM {quad} WHERE ({resource_filter}) OR subject_id IN ({union}) OR object_id IN ({union})"
                    )
                };
                Ok(CompiledQuery { sql, binds: binds.0, vars: vec![] })
            }
        }
    }

    fn validate_template(&self, template: &[TriplePattern], bound_vars: &[String]) -> Result<()> {
        for pattern in template {
            for pos in [&pattern.subject, &pattern.object] {
                if let TermOrVar::Var(name) = pos {
                    if !bound_vars.contains(name) {
                        return Err(EngineError::sparql(format!(
                            "CONSTRUCT template references unbound variable ?{name}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Returns `(select_sql, bound_variable_names)` for `algebra`. The
    /// SQL's output columns follow the `v__uuid`/`v__lexical`/... naming
    /// convention for each name in the returned variable list.
    fn translate_algebra(&self, algebra: &Algebra, binds: &mut Binds, graph: &GraphScope) -> Result<(String, Vec<String>)> {
        match algebra {
            Algebra::Bgp(patterns) => self.translate_bgp(patterns, binds, graph),
            Algebra::Join(l, r) => self.translate_join(l, r, binds, graph, false, None),
            Algebra::LeftJoin(l, r, cond) => self.translate_join(l, r, binds, graph, true, cond.as_ref()),
            Algebra::Union(l, r) => self.translate_union(l, r, binds, graph),
            Algebra::Minus(l, r) => self.translate_minus(l, r, binds, graph),
            Algebra::Filter(inner, expr) => self.translate_filter(inner, expr, binds, graph),
            Algebra::Extend(inner, name, expr) => self.translate_extend(inner, name, expr, binds, graph),
            Algebra::Project(inner, vars) => self.translate_project(inner, vars, binds, graph),
            Algebra::Distinct(inner) => self.translate_modifier(inner, binds, graph, "DISTINCT"),
            Algebra::Reduced(inner) => self.translate_algebra(inner, binds, graph),
            Algebra::Slice(inner, offset, limit) => self.translate_slice(inner, *offset, *limit, binds, graph),
            Algebra::OrderBy(inner, keys) => self.translate_order_by(inner, keys, binds, graph),
            Algebra::Group(inner, keys, aggregates) => self.translate_group(inner, keys, aggregates, binds, graph),
            Algebra::Values(vars, rows) => self.translate_values(vars, rows, binds),
            Algebra::Graph(inner, scope) => self.translate_graph(inner, scope, binds),
        }
    }

    fn translate_bgp(&self, patterns: &[TriplePattern], binds: &mut Binds, graph: &GraphScope) -> Result<(String, Vec<String>)> {
        if patterns.is_empty() {
            return Ok(("SELECT 1 AS unit_row".to_string(), vec![]));
        }
        let quad = self.quad_table();
        let term = self.term_table();

        let mut froms = Vec::new();
        let mut wheres = Vec::new();
        let mut first_occurrence: HashMap<String, (String, &'static str)> = HashMap::new();
        let mut order: Vec<String> = Vec::new();

        for (i, pattern) in patterns.iter().enumerate() {
            let alias = format!("q{i}");
            froms.push(format!("{quad} {alias}"));

            let positions: [(&'static str, &TermOrVar); 2] = [("subject_id", &pattern.subject), ("object_id", &pattern.object)];
            for (column, value) in positions {
                match value {
                    TermOrVar::Term(t) => {
                        let placeholder = binds.push(Binding::Uuid(self.resolve_constant(t)));
                        wheres.push(format!("{alias}.{column} = {placeholder}"));
                    }
                    TermOrVar::Var(name) => {
                        if let Some((prev_alias, prev_col)) = first_occurrence.get(name) {
                            wheres.push(format!("{alias}.{column} = {prev_alias}.{prev_col}"));
                        } else {
                            first_occurrence.insert(name.clone(), (alias.clone(), column));
                            order.push(name.clone());
                        }
                    }
                }
            }

            match &pattern.predicate {
                PredicateOrPath::Plain(TermOrVar::Term(t)) => {
                    let placeholder = binds.push(Binding::Uuid(self.resolve_constant(t)));
                    wheres.push(format!("{alias}.predicate_id = {placeholder}"));
                }
                PredicateOrPath::Plain(TermOrVar::Var(name)) => {
                    if let Some((prev_alias, prev_col)) = first_occurrence.get(name) {
                        wheres.push(format!("{alias}.predicate_id = {prev_alias}.{prev_col}"));
                    } else {
                        first_occurrence.insert(name.clone(), (alias.clone(), "predicate_id"));
                        order.push(name.clone());
                    }
                }
                PredicateOrPath::Path(path) => {
                    let path_sql = translate_path(path, &quad, self.path_options)?;
                    let path_alias = format!("{alias}_path");
                    froms.push(format!("({path_sql}) {path_alias}"));
                    wheres.push(format!("{path_alias}.start_id = {alias}.subject_id"));
                    wheres.push(format!("{path_alias}.end_id = {alias}.object_id"));
                }
            }

            match graph {
                GraphScope::Constant(uuid) => {
                    let placeholder = binds.push(Binding::Uuid(*uuid));
                    wheres.push(format!("{alias}.graph_id = {placeholder}"));
                }
                GraphScope::Variable(name) => {
                    if let Some((prev_alias, prev_col)) = first_occurrence.get(name) {
                        wheres.push(format!("{alias}.graph_id = {prev_alias}.{prev_col}"));
                    } else {
                        first_occurrence.insert(name.clone(), (alias.clone(), "graph_id"));
                        order.push(name.clone());
                    }
                }
                GraphScope::Default => {}
            }
        }

        let mut select_cols = Vec::new();
        let mut term_joins = Vec::new();
        for var in &order {
            let (alias, column) = &first_occurrence[var];
            let term_alias = format!("{alias}_{column}_term");
            select_cols.push(format!("{alias}.{column} AS {var}__uuid"));
            select_cols.push(format!("{term_alias}.lexical AS {var}__lexical"));
            select_cols.push(format!("{term_alias}.kind AS {var}__kind"));
            select_cols.push(format!("{term_alias}.datatype AS {var}__datatype"));
            select_cols.push(format!("{term_alias}.language AS {var}__language"));
            term_joins.push(format!("LEFT JOIN {term} {term_alias} ON {term_alias}.uuid = {alias}.{column}"));
        }

        let sql = format!(
            "SELECT {} FROM {} {} WHERE {}",
            select_cols.join(", "),
            froms.join(", "),
            term_joins.join(" "),
            if wheres.is_empty() { "true".to_string() } else { wheres.join(" AND ") }
        );
        Ok((sql, order))
    }

    fn wrap(&self, sql: &str) -> (String, String) {
        let alias = self.next_alias();
        (format!("({sql}) {alias}"), alias)
    }

    fn translate_join(
        &self,
        left: &Algebra,
        right: &Algebra,
        binds: &mut Binds,
        graph: &GraphScope,
        is_left_join: bool,
        extra_cond: Option<&crate::sparql::expr::Expr>,
    ) -> Result<(String, Vec<String>)> {
        let (left_sql, left_vars) = self.translate_algebra(left, binds, graph)?;
        let (right_sql, right_vars) = self.translate_algebra(right, binds, graph)?;
        let (left_from, left_alias) = self.wrap(&left_sql);
        let (right_from, right_alias) = self.wrap(&right_sql);

        let shared: Vec<&String> = left_vars.iter().filter(|v| right_vars.contains(v)).collect();
        let mut on_clauses: Vec<String> = shared
            .iter()
            .map(|v| format!("{left_alias}.{v}__uuid = {right_alias}.{v}__uuid"))
            .collect();

        let kind = if is_left_join { "LEFT OUTER JOIN" } else { "INNER JOIN" };
        let mut all_vars = left_vars.clone();
        for v in &right_vars {
            if !all_vars.contains(v) {
                all_vars.push(v.clone());
            }
        }

        let resolver = JoinScope::new(&left_vars, &left_alias, &right_vars, &right_alias, self);
        if let Some(cond) = extra_cond {
            on_clauses.push(translate_expr(cond, &resolver, binds)?);
        }
        if on_clauses.is_empty() {
            on_clauses.push("true".to_string());
        }

        let select_cols = select_columns_for_merge(&all_vars, &left_vars, &left_alias, &right_vars, &right_alias);
        let sql = format!(
            "SELECT {select_cols} FROM {left_from} {kind} {right_from} ON {}",
            on_clauses.join(" AND ")
        );
        Ok((sql, all_vars))
    }

    fn translate_union(&self, left: &Algebra, right: &Algebra, binds: &mut Binds, graph: &GraphScope) -> Result<(String, Vec<String>)> {
        let (left_sql, left_vars) = self.translate_algebra(left, binds, graph)?;
        let (right_sql, right_vars) = self.translate_algebra(right, binds, graph)?;
        let mut all_vars = left_vars.clone();
        for v in &right_vars {
            if !all_vars.contains(v) {
                all_vars.push(v.clone());
            }
        }
        let left_cols = union_branch_columns(&all_vars, &left_vars);
        let right_cols = union_branch_columns(&all_vars, &right_vars);
        let sql = format!(
            "SELECT {left_cols} FROM ({left_sql}) AS union_l UNION ALL SELECT {right_cols} FROM ({right_sql}) AS union_r"
        );
        Ok((sql, all_vars))
    }

    fn translate_minus(&self, left: &Algebra, right: &Algebra, binds: &mut Binds, graph: &GraphScope) -> Result<(String, Vec<String>)> {
        let (left_sql, left_vars) = self.translate_algebra(left, binds, graph)?;
        let (right_sql, right_vars) = self.translate_algebra(right, binds, graph)?;
        let (left_from, left_alias) = self.wrap(&left_sql);

        let shared: Vec<&String> = left_vars.iter().filter(|v| right_vars.contains(v)).collect();
        if shared.is_empty() {
            // No shared variables: MINUS is a no-op, the left side passes through.
            return Ok((format!("SELECT * FROM {left_from}"), left_vars));
        }
        let (right_from, right_alias) = self.wrap(&right_sql);
        let conds: Vec<String> = shared
            .iter()
            .map(|v| format!("{right_alias}.{v}__uuid = {left_alias}.{v}__uuid"))
            .collect();
        let sql = format!(
            "SELECT * FROM {left_from} WHERE NOT EXISTS (SELECT 1 FROM {right_from} WHERE {})",
            conds.join(" AND ")
        );
        Ok((sql, left_vars))
    }

    fn translate_filter(&self, inner: &Algebra, expr: &crate::sparql::expr::Expr, binds: &mut Binds, graph: &GraphScope) -> Result<(String, Vec<String>)> {
        let (inner_sql, vars) = self.translate_algebra(inner, binds, graph)?;
        let (from, alias) = self.wrap(&inner_sql);
        let resolver = SingleScope { alias: &alias, vars: &vars, translator: self };
        let cond = translate_expr(expr, &resolver, binds)?;
        Ok((format!("SELECT * FROM {from} WHERE {cond}"), vars))
    }

    fn translate_extend(&self, inner: &Algebra, name: &str, expr: &crate::sparql::expr::Expr, binds: &mut Binds, graph: &GraphScope) -> Result<(String, Vec<String>)> {
        let (inner_sql, vars) = self.translate_algebra(inner, binds, graph)?;
        let (from, alias) = self.wrap(&inner_sql);
        let resolver = SingleScope { alias: &alias, vars: &vars, translator: self };
        let value = translate_expr(expr, &resolver, binds)?;
        let mut new_vars = vars.clone();
        new_vars.push(name.to_string());
        let sql = format!(
            "SELECT {alias}.*, NULL::uuid AS {name}__uuid, ({value}) AS {name}__lexical, 2::smallint AS {name}__kind, NULL::text AS {name}__datatype, NULL::text AS {name}__language FROM {from}"
        );
        Ok((sql, new_vars))
    }

    fn translate_project(&self, inner: &Algebra, vars: &[String], binds: &mut Binds, graph: &GraphScope) -> Result<(String, Vec<String>)> {
        let (inner_sql, bound_vars) = self.translate_algebra(inner, binds, graph)?;
        for v in vars {
            if !bound_vars.contains(v) {
                return Err(EngineError::sparql(format!("PROJECT references unbound variable ?{v}")));
            }
        }
        let (from, alias) = self.wrap(&inner_sql);
        let columns = vars
            .iter()
            .flat_map(|v| {
                ["uuid", "lexical", "kind", "datatype", "language"]
                    .iter()
                    .map(move |suffix| format!("{alias}.{v}__{suffix} AS {v}__{suffix}"))
            })
            .collect::<Vec<_>>()
            .join(", ");
        Ok((format!("SELECT {columns} FROM {from}"), vars.to_vec()))
    }

    fn translate_modifier(&self, inner: &Algebra, binds: &mut Binds, graph: &GraphScope, modifier: &str) -> Result<(String, Vec<String>)> {
        let (inner_sql, vars) = self.translate_algebra(inner, binds, graph)?;
        Ok((format!("SELECT {modifier} * FROM ({inner_sql}) AS distinct_source"), vars))
    }

    fn translate_slice(&self, inner: &Algebra, offset: Option<u64>, limit: Option<u64>, binds: &mut Binds, graph: &GraphScope) -> Result<(String, Vec<String>)> {
        let (inner_sql, vars) = self.translate_algebra(inner, binds, graph)?;
        let mut sql = format!("SELECT * FROM ({inner_sql}) AS slice_source");
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
        Ok((sql, vars))
    }

    fn translate_order_by(&self, inner: &Algebra, keys: &[OrderKey], binds: &mut Binds, graph: &GraphScope) -> Result<(String, Vec<String>)> {
        let (inner_sql, vars) = self.translate_algebra(inner, binds, graph)?;
        let (from, alias) = self.wrap(&inner_sql);
        let resolver = SingleScope { alias: &alias, vars: &vars, translator: self };
        let mut order_parts = Vec::new();
        for key in keys {
            let expr_sql = translate_expr(&key.expr, &resolver, binds)?;
            let dir = match key.direction {
                SortDirection::Asc => "ASC",
                SortDirection::Desc => "DESC",
            };
            order_parts.push(format!("{expr_sql} {dir}"));
        }
        Ok((format!("SELECT * FROM {from} ORDER BY {}", order_parts.join(", ")), vars))
    }

    fn translate_group(
        &self,
        inner: &Algebra,
        keys: &[String],
        aggregates: &[(String, crate::sparql::algebra::AggregateCall)],
        binds: &mut Binds,
        graph: &GraphScope,
    ) -> Result<(String, Vec<String>)> {
        let (inner_sql, vars) = self.translate_algebra(inner, binds, graph)?;
        let (from, alias) = self.wrap(&inner_sql);
        let resolver = SingleScope { alias: &alias, vars: &vars, translator: self };

        let mut select_cols = Vec::new();
        let mut group_cols = Vec::new();
        for key in keys {
            select_cols.push(format!(
                "{alias}.{key}__uuid AS {key}__uuid, {alias}.{key}__lexical AS {key}__lexical, {alias}.{key}__kind AS {key}__kind, {alias}.{key}__datatype AS {key}__datatype, {alias}.{key}__language AS {key}__language"
            ));
            group_cols.push(format!("{alias}.{key}__uuid"));
        }
        let mut out_vars = keys.to_vec();
        for (name, call) in aggregates {
            let agg_sql = translate_aggregate(call, &resolver, binds)?;
            select_cols.push(format!(
                "NULL::uuid AS {name}__uuid, ({agg_sql})::text AS {name}__lexical, 2::smallint AS {name}__kind, NULL::text AS {name}__datatype, NULL::text AS {name}__language"
            ));
            out_vars.push(name.clone());
        }
        let group_by = if group_cols.is_empty() { String::new() } else { format!(" GROUP BY {}", group_cols.join(", ")) };
        let sql = format!("SELECT {} FROM {from}{group_by}", select_cols.join(", "));
        Ok((sql, out_vars))
    }

    fn translate_values(&self, vars: &[String], rows: &[crate::sparql::algebra::ValuesRow], binds: &mut Binds) -> Result<(String, Vec<String>)> {
        if rows.is_empty() {
            let cols = vars
                .iter()
                .flat_map(|v| {
                    ["uuid", "lexical", "kind", "datatype", "language"]
                        .iter()
                        .map(move |s| format!("NULL AS {v}__{s}"))
                })
                .collect::<Vec<_>>()
                .join(", ");
            return Ok((format!("SELECT {cols} WHERE false"), vars.to_vec()));
        }
        let mut row_selects = Vec::new();
        for row in rows {
            let mut cols = Vec::new();
            for (i, var) in vars.iter().enumerate() {
                match row.get(i).and_then(|v| v.as_ref()) {
                    Some(term) => {
                        let uuid_ph = binds.push(Binding::Uuid(self.resolve_constant(term)));
                        let lex_ph = binds.push(Binding::Text(term.lexical.clone()));
                        cols.push(format!(
                            "{uuid_ph}::uuid AS {var}__uuid, {lex_ph} AS {var}__lexical, {}::smallint AS {var}__kind, NULL::text AS {var}__datatype, NULL::text AS {var}__language",
                            term.kind as i16
                        ));
                    }
                    None => cols.push(format!(
                        "NULL::uuid AS {var}__uuid, NULL::text AS {var}__lexical, NULL::smallint AS {var}__kind, NULL::text AS {var}__datatype, NULL::text AS {var}__language"
                    )),
                }
            }
            row_selects.push(format!("SELECT {}", cols.join(", ")));
        }
        Ok((row_selects.join(" UNION ALL "), vars.to_vec()))
    }

    fn translate_graph(&self, inner: &Algebra, scope: &TermOrVar, binds: &mut Binds) -> Result<(String, Vec<String>)> {
        let graph_scope = match scope {
            TermOrVar::Term(t) => GraphScope::Constant(self.resolve_constant(t)),
            TermOrVar::Var(name) => GraphScope::Variable(name.clone()),
        };
        self.translate_algebra(inner, binds, &graph_scope)
    }
}

fn select_columns_for_merge(all_vars: &[String], left_vars: &[String], left_alias: &str, right_vars: &[String], right_alias: &str) -> String {
    all_vars
        .iter()
        .flat_map(|v| {
            ["uuid", "lexical", "kind", "datatype", "language"].iter().map(move |suffix| {
                if left_vars.contains(v) {
                    format!("{left_alias}.{v}__{suffix} AS {v}__{suffix}")
                } else if right_vars.contains(v) {
                    format!("{right_alias}.{v}__{suffix} AS {v}__{suffix}")
                } else {
                    format!("NULL AS {v}__{suffix}")
                }
            })
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn union_branch_columns(all_vars: &[String], branch_vars: &[String]) -> String {
    all_vars
        .iter()
        .flat_map(|v| {
            ["uuid", "lexical", "kind", "datatype", "language"].iter().map(move |suffix| {
                if branch_vars.contains(v) {
                    format!("{v}__{suffix}")
                } else {
                    format!("NULL AS {v}__{suffix}")
                }
            })
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Correlates an `EXISTS`/`NOT EXISTS` subquery's translated relation
/// back to an enclosing scope, joining on every variable name the two
/// sides share. `alias_for` maps a shared variable to the outer
/// relation alias it is actually bound on (distinct aliases for a
/// `Join`'s left/right sides).
fn correlate_subquery(
    translator: &Translator,
    algebra: &Algebra,
    binds: &mut Binds,
    outer_vars: &[String],
    alias_for: impl Fn(&str) -> &str,
) -> Result<String> {
    let (sub_sql, sub_vars) = translator.translate_algebra(algebra, binds, &GraphScope::Default)?;
    let shared: Vec<&String> = sub_vars.iter().filter(|v| outer_vars.contains(v)).collect();
    if shared.is_empty() {
        return Ok(format!("SELECT 1 FROM ({sub_sql}) AS exists_sub"));
    }
    let conds: Vec<String> = shared
        .iter()
        .map(|v| format!("exists_sub.{v}__uuid = {}.{v}__uuid", alias_for(v)))
        .collect();
    Ok(format!("SELECT 1 FROM ({sub_sql}) AS exists_sub WHERE {}", conds.join(" AND ")))
}

/// A [`VarResolver`] over a single already-wrapped relation alias —
/// the common case for `Filter`/`Extend`/`OrderBy`/`Group`.
struct SingleScope<'a> {
    alias: &'a str,
    vars: &'a [String],
    translator: &'a Translator,
}

impl<'a> SingleScope<'a> {
    fn check(&self, var: &str) -> Result<()> {
        if self.vars.iter().any(|v| v == var) {
            Ok(())
        } else {
            Err(EngineError::sparql(format!("reference to unbound variable ?{var}")))
        }
    }
}

impl<'a> VarResolver for SingleScope<'a> {
    fn uuid_col(&self, var: &str) -> Result<String> {
        self.check(var)?;
        Ok(format!("{}.{var}__uuid", self.alias))
    }
    fn lexical_col(&self, var: &str) -> Result<String> {
        self.check(var)?;
        Ok(format!("{}.{var}__lexical", self.alias))
    }
    fn kind_col(&self, var: &str) -> Result<String> {
        self.check(var)?;
        Ok(format!("{}.{var}__kind", self.alias))
    }
    fn datatype_col(&self, var: &str) -> Result<String> {
        self.check(var)?;
        Ok(format!("{}.{var}__datatype", self.alias))
    }
    fn language_col(&self, var: &str) -> Result<String> {
        self.check(var)?;
        Ok(format!("{}.{var}__language", self.alias))
    }
    fn translate_subquery(&self, algebra: &Algebra, binds: &mut Binds) -> Result<String> {
        correlate_subquery(self.translator, algebra, binds, self.vars, |_| self.alias)
    }
}

/// A [`VarResolver`] across two freshly-joined relation aliases, used
/// while building a `Join`/`LeftJoin`'s ON clause.
struct JoinScope<'a> {
    left_vars: &'a [String],
    left_alias: &'a str,
    right_vars: &'a [String],
    right_alias: &'a str,
    translator: &'a Translator,
}

impl<'a> JoinScope<'a> {
    fn new(
        left_vars: &'a [String],
        left_alias: &'a str,
        right_vars: &'a [String],
        right_alias: &'a str,
        translator: &'a Translator,
    ) -> Self {
        Self { left_vars, left_alias, right_vars, right_alias, translator }
    }

    fn side(&self, var: &str) -> Result<&str> {
        if self.left_vars.iter().any(|v| v == var) {
            Ok(self.left_alias)
        } else if self.right_vars.iter().any(|v| v == var) {
            Ok(self.right_alias)
        } else {
            Err(EngineError::sparql(format!("reference to unbound variable ?{var}")))
        }
    }

    fn all_vars(&self) -> Vec<String> {
        let mut all = self.left_vars.to_vec();
        for v in self.right_vars {
            if !all.contains(v) {
                all.push(v.clone());
            }
        }
        all
    }
}

impl<'a> VarResolver for JoinScope<'a> {
    fn uuid_col(&self, var: &str) -> Result<String> {
        Ok(format!("{}.{var}__uuid", self.side(var)?))
    }
    fn lexical_col(&self, var: &str) -> Result<String> {
        Ok(format!("{}.{var}__lexical", self.side(var)?))
    }
    fn kind_col(&self, var: &str) -> Result<String> {
        Ok(format!("{}.{var}__kind", self.side(var)?))
    }
    fn datatype_col(&self, var: &str) -> Result<String> {
        Ok(format!("{}.{var}__datatype", self.side(var)?))
    }
    fn language_col(&self, var: &str) -> Result<String> {
        Ok(format!("{}.{var}__language", self.side(var)?))
    }
    fn translate_subquery(&self, algebra: &Algebra, binds: &mut Binds) -> Result<String> {
        let all_vars = self.all_vars();
        correlate_subquery(self.translator, algebra, binds, &all_vars, |v| {
            self.side(v).unwrap_or(self.left_alias)
        })
    }
}

#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub sql: String,
    pub binds: Vec<Binding>,
    pub vars: Vec<String>,
}

/// Executes a compiled SELECT/ASK query against `pool`, binding each
/// accumulated value in order.
pub async fn execute_select(pool: &PgPool, query: &CompiledQuery) -> Result<Vec<HashMap<String, Option<String>>>> {
    let mut q = sqlx::query(&query.sql);
    for bind in &query.binds {
        q = match bind {
            Binding::Text(s) => q.bind(s.clone()),
            Binding::Uuid(u) => q.bind(*u),
            Binding::Int(i) => q.bind(*i),
            Binding::Float(f) => q.bind(*f),
            Binding::Bool(b) => q.bind(*b),
        };
    }
    let rows = q.fetch_all(pool).await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let mut record = HashMap::new();
        for var in &query.vars {
            let value: Option<String> = row.try_get::<Option<String>, _>(var.as_str()).unwrap_or(None);
            record.insert(var.clone(), value);
        }
        out.push(record);
    }
    Ok(out)
}

/// One variable's full bound-term columns, as projected by
/// [`Translator::compile_select_full`]. `kind` is the raw
/// [`TermKind`] discriminant (see [`TermKind::try_from`]); `None`
/// across all four fields means the variable was unbound in that row.
#[derive(Debug, Clone, Default)]
pub struct BoundTermColumns {
    pub lexical: Option<String>,
    pub kind: Option<i16>,
    pub datatype: Option<String>,
    pub language: Option<String>,
}

/// Executes a query compiled by [`Translator::compile_select_full`],
/// returning each row's variables as their full bound-term columns
/// rather than bare lexical strings.
pub async fn execute_select_full(pool: &PgPool, query: &CompiledQuery) -> Result<Vec<HashMap<String, BoundTermColumns>>> {
    let mut q = sqlx::query(&query.sql);
    for bind in &query.binds {
        q = match bind {
            Binding::Text(s) => q.bind(s.clone()),
            Binding::Uuid(u) => q.bind(*u),
            Binding::Int(i) => q.bind(*i),
            Binding::Float(f) => q.bind(*f),
            Binding::Bool(b) => q.bind(*b),
        };
    }
    let rows = q.fetch_all(pool).await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let mut record = HashMap::new();
        for var in &query.vars {
            let lexical: Option<String> = row.try_get::<Option<String>, _>(format!("{var}__lexical").as_str()).unwrap_or(None);
            let kind: Option<i16> = row.try_get::<Option<i16>, _>(format!("{var}__kind").as_str()).unwrap_or(None);
            let datatype: Option<String> = row.try_get::<Option<String>, _>(format!("{var}__datatype").as_str()).unwrap_or(None);
            let language: Option<String> = row.try_get::<Option<String>, _>(format!("{var}__language").as_str()).unwrap_or(None);
            record.insert(var.clone(), BoundTermColumns { lexical, kind, datatype, language });
        }
        out.push(record);
    }
    Ok(out)
}

/// Runs an ASK query, returning whether any row matched.
pub async fn execute_ask(pool: &PgPool, query: &CompiledQuery) -> Result<bool> {
    let mut q = sqlx::query(&query.sql);
    for bind in &query.binds {
        q = match bind {
            Binding::Text(s) => q.bind(s.clone()),
            Binding::Uuid(u) => q.bind(*u),
            Binding::Int(i) => q.bind(*i),
            Binding::Float(f) => q.bind(*f),
            Binding::Bool(b) => q.bind(*b),
        };
    }
    let row = q.fetch_optional(pool).await?;
    Ok(row.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparql::algebra::PredicateOrPath;
    use crate::term::Term;

    fn translator() -> Translator {
        Translator::new("vg", "s1", Arc::new(TermCache::new(64)))
    }

    fn var(name: &str) -> TermOrVar {
        TermOrVar::Var(name.to_string())
    }

    fn term(t: Term) -> TermOrVar {
        TermOrVar::Term(t)
    }

    #[test]
    fn single_pattern_bgp_joins_term_table_for_every_variable() {
        let t = translator();
        let mut binds = Binds::default();
        let patterns = vec![TriplePattern {
            subject: var("s"),
            predicate: PredicateOrPath::Plain(term(Term::uri("http://ex/p"))),
            object: var("o"),
        }];
        let (sql, vars) = t.translate_bgp(&patterns, &mut binds, &GraphScope::Default).unwrap();
        assert_eq!(vars, vec!["s".to_string(), "o".to_string()]);
        assert!(sql.contains("s__lexical"));
        assert!(sql.contains("o__lexical"));
        assert!(sql.contains("q0.predicate_id = $1"));
        assert_eq!(binds.0.len(), 1);
    }

    #[test]
    fn shared_variable_across_two_patterns_becomes_a_self_join_condition() {
        let t = translator();
        let mut binds = Binds::default();
        let patterns = vec![
            TriplePattern { subject: var("x"), predicate: PredicateOrPath::Plain(term(Term::uri("http://ex/p1"))), object: var("y") },
            TriplePattern { subject: var("y"), predicate: PredicateOrPath::Plain(term(Term::uri("http://ex/p2"))), object: var("z") },
        ];
        let (sql, vars) = t.translate_bgp(&patterns, &mut binds, &GraphScope::Default).unwrap();
        assert_eq!(vars, vec!["x".to_string(), "y".to_string(), "z".to_string()]);
        assert!(sql.contains("q1.subject_id = q0.object_id"));
    }

    #[test]
    fn select_rejects_projecting_an_unbound_variable() {
        let t = translator();
        let form = QueryForm::Select {
            vars: vec!["missing".to_string()],
            algebra: Algebra::Bgp(vec![TriplePattern {
                subject: var("s"),
                predicate: PredicateOrPath::Plain(term(Term::uri("http://ex/p"))),
                object: var("o"),
            }]),
        };
        assert!(t.compile(&form).is_err());
    }

    #[test]
    fn ask_wraps_the_algebra_in_a_limit_one_existence_check() {
        let t = translator();
        let form = QueryForm::Ask {
            algebra: Algebra::Bgp(vec![TriplePattern {
                subject: var("s"),
                predicate: PredicateOrPath::Plain(term(Term::uri("http://ex/p"))),
                object: var("o"),
            }]),
        };
        let compiled = t.compile(&form).unwrap();
        assert!(compiled.sql.contains("LIMIT 1"));
    }

    #[test]
    fn minus_with_no_shared_variables_is_a_no_op() {
        let t = translator();
        let mut binds = Binds::default();
        let left = Algebra::Bgp(vec![TriplePattern {
            subject: var("s"),
            predicate: PredicateOrPath::Plain(term(Term::uri("http://ex/p"))),
            object: var("o"),
        }]);
        let right = Algebra::Bgp(vec![TriplePattern {
            subject: var("a"),
            predicate: PredicateOrPath::Plain(term(Term::uri("http://ex/q"))),
            object: var("b"),
        }]);
        let (sql, vars) = t.translate_minus(&left, &right, &mut binds, &GraphScope::Default).unwrap();
        assert!(!sql.contains("NOT EXISTS"));
        assert_eq!(vars, vec!["s".to_string(), "o".to_string()]);
    }
}
