//! Schema Manager (C3) — table and index naming, creation, and teardown.
//!
//! The teacher kept its table layout as a compile-time `table!` macro
//! block (`attribute`, `quad`, `collection_item`, `queue_item`); here the
//! per-space tables are parameterized by install prefix and space id, so
//! table names are computed rather than fixed, and DDL is issued through
//! `sqlx` against whichever space is named.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{EngineError, Result};

/// The schema version this build of the engine expects an installation's
/// `install` row to carry. Bumped whenever a change to the install-level
/// or per-space DDL is not purely additive; `init_install_tables` fails
/// fast on an installation stamped with any other version rather than
/// attempting to run against a schema it doesn't understand.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Maximum length of a space identifier, chosen so that
/// `{prefix}__{space_id}__{logical_name}` never exceeds Postgres's
/// 63-byte identifier limit even for the longest logical name
/// (`namespace`, 9 bytes) and a generous prefix.
pub const MAX_SPACE_ID_LEN: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalTable {
    Term,
    RdfQuad,
    Namespace,
}

impl LogicalTable {
    fn name(&self) -> &'static str {
        match self {
            LogicalTable::Term => "term",
            LogicalTable::RdfQuad => "rdf_quad",
            LogicalTable::Namespace => "namespace",
        }
    }
}

/// Computes `{install_prefix}__{space_id}__{logical_name}`.
pub fn table_name(prefix: &str, space_id: &str, table: LogicalTable) -> String {
    format!("{prefix}__{space_id}__{}", table.name())
}

/// Installation-level table names, not scoped to any space.
pub fn install_table(prefix: &str, name: &str) -> String {
    format!("{prefix}_{name}")
}

#[derive(Debug, Clone, Copy)]
pub struct SpaceTableOptions {
    /// Use `UNLOGGED` tables for bulk-load throughput, at the cost of
    /// crash safety; converted to logged once the load finishes.
    pub unlogged: bool,
    pub concurrent_indexes: bool,
}

impl Default for SpaceTableOptions {
    fn default() -> Self {
        Self {
            unlogged: false,
            concurrent_indexes: true,
        }
    }
}

/// The canonical index set on the quad table, named deterministically
/// from table + column set so they can be dropped/recreated without a
/// catalog round trip.
fn quad_indexes(quad_table: &str) -> Vec<(String, String)> {
    vec![
        (format!("{quad_table}_s_idx"), format!("CREATE INDEX {{name}} ON {quad_table} (subject_id)")),
        (format!("{quad_table}_p_idx"), format!("CREATE INDEX {{name}} ON {quad_table} (predicate_id)")),
        (format!("{quad_table}_o_idx"), format!("CREATE INDEX {{name}} ON {quad_table} (object_id)")),
        (format!("{quad_table}_g_idx"), format!("CREATE INDEX {{name}} ON {quad_table} (graph_id)")),
        (format!("{quad_table}_po_idx"), format!("CREATE INDEX {{name}} ON {quad_table} (predicate_id, object_id)")),
        (format!("{quad_table}_sp_idx"), format!("CREATE INDEX {{name}} ON {quad_table} (subject_id, predicate_id)")),
        (format!("{quad_table}_gspo_idx"), format!("CREATE INDEX {{name}} ON {quad_table} (graph_id, subject_id, predicate_id, object_id)")),
    ]
}

fn render(index_name: &str, sql_with_placeholder: &str) -> String {
    sql_with_placeholder.replace("{name}", index_name)
}

pub struct SchemaManager {
    pool: PgPool,
    prefix: String,
}

impl SchemaManager {
    pub fn new(pool: PgPool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
        }
    }

    pub fn validate_space_id(space_id: &str) -> Result<()> {
        if space_id.is_empty() || space_id.len() > MAX_SPACE_ID_LEN {
            return Err(EngineError::schema(format!(
                "space id `{space_id}` must be 1..={MAX_SPACE_ID_LEN} characters"
            )));
        }
        if !space_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(EngineError::schema(format!(
                "space id `{space_id}` may only contain ascii alphanumerics and underscores"
            )));
        }
        Ok(())
    }

    /// Creates the installation-level tables (`install`, `space`,
    /// `graph`, `user`) if they do not already exist, then registers (or
    /// verifies) this installation's row keyed by `install_id`. A fresh
    /// `install_id` is stamped with [`CURRENT_SCHEMA_VERSION`]; an
    /// existing one whose stamped version differs fails fast with a
    /// `Schema` error rather than running against a DDL generation this
    /// build doesn't understand. Idempotent.
    pub async fn init_install_tables(&self, install_id: Uuid) -> Result<()> {
        let install = install_table(&self.prefix, "install");
        let space = install_table(&self.prefix, "space");
        let graph = install_table(&self.prefix, "graph");
        let user = install_table(&self.prefix, "user");

        // `pgcrypto` backs the SHA/MD5 SPARQL built-ins' `digest()` call
        // (`sparql::expr::digest_call`) and `gen_random_uuid()` used by
        // `BNODE`/`UUID`/`STRUUID`; `pg_trgm` backs the per-space term
        // table's trigram index (`{term}_lex_idx`) that accelerates
        // REGEX/CONTAINS scans over the lexical column. Both are
        // installation-wide, so they're created once here rather than
        // per-space.
        sqlx::query("CREATE EXTENSION IF NOT EXISTS pgcrypto")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE EXTENSION IF NOT EXISTS pg_trgm")
            .execute(&self.pool)
            .await?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {install} (
                id UUID PRIMARY KEY,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                table_prefix TEXT NOT NULL,
                schema_version INTEGER NOT NULL DEFAULT 1
            )"
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {space} (
                space_id TEXT PRIMARY KEY,
                install_id UUID NOT NULL REFERENCES {install}(id),
                name TEXT NOT NULL,
                description TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )"
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {graph} (
                id UUID PRIMARY KEY,
                space_id TEXT NOT NULL REFERENCES {space}(space_id),
                uri TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )"
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {user} (
                id UUID PRIMARY KEY,
                install_id UUID NOT NULL REFERENCES {install}(id),
                username TEXT NOT NULL,
                email TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )"
        ))
        .execute(&self.pool)
        .await?;

        let existing_version: Option<i32> =
            sqlx::query_scalar(&format!("SELECT schema_version FROM {install} WHERE id = $1"))
                .bind(install_id)
                .fetch_optional(&self.pool)
                .await?;

        match existing_version {
            Some(v) if v != CURRENT_SCHEMA_VERSION => {
                return Err(EngineError::schema(format!(
                    "installation `{install_id}` is stamped schema version {v}, but this build expects version {CURRENT_SCHEMA_VERSION}"
                )));
            }
            Some(_) => {}
            None => {
                sqlx::query(&format!(
                    "INSERT INTO {install} (id, table_prefix, schema_version) VALUES ($1, $2, $3)"
                ))
                .bind(install_id)
                .bind(&self.prefix)
                .bind(CURRENT_SCHEMA_VERSION)
                .execute(&self.pool)
                .await?;
            }
        }

        Ok(())
    }

    /// Idempotently creates the per-space `term`, `rdf_quad`, and
    /// `namespace` tables and their indexes, guarded by an existence
    /// check so a retry after a partial failure does not error.
    pub async fn create_space_tables(&self, space_id: &str, options: SpaceTableOptions) -> Result<()> {
        Self::validate_space_id(space_id)?;
        let term = table_name(&self.prefix, space_id, LogicalTable::Term);
        let quad = table_name(&self.prefix, space_id, LogicalTable::RdfQuad);
        let ns = table_name(&self.prefix, space_id, LogicalTable::Namespace);
        let logged = if options.unlogged { "UNLOGGED" } else { "" };

        sqlx::query(&format!(
            "CREATE {logged} TABLE IF NOT EXISTS {term} (
                uuid UUID PRIMARY KEY,
                kind SMALLINT NOT NULL,
                lexical TEXT NOT NULL,
                datatype TEXT,
                language TEXT
            )"
        ))
        .execute(&self.pool)
        .await?;

        // `gin_trgm_ops` (from `pg_trgm`, enabled in `init_install_tables`)
        // rather than a plain B-tree, since the expressions it backs are
        // `~`/`~*` (REGEX) and `position()` (CONTAINS) over `lexical`,
        // neither of which a B-tree can use.
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {term}_lex_idx ON {term} USING gin (lexical gin_trgm_ops)"
        ))
        .execute(&self.pool)
        .await?;

        // Partial expression index backing isLITERAL/isNUMERIC/DATATYPE
        // filters, which restrict by kind before touching lexical form.
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {term}_literal_kind_idx ON {term} (datatype) WHERE kind = 2"
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE {logged} TABLE IF NOT EXISTS {quad} (
                subject_id UUID NOT NULL REFERENCES {term}(uuid),
                predicate_id UUID NOT NULL REFERENCES {term}(uuid),
                object_id UUID NOT NULL REFERENCES {term}(uuid),
                graph_id UUID NOT NULL REFERENCES {term}(uuid),
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (subject_id, predicate_id, object_id, graph_id)
            )"
        ))
        .execute(&self.pool)
        .await?;

        for (name, sql) in quad_indexes(&quad) {
            let stmt = render(&name, &sql);
            let concurrently = if options.concurrent_indexes { " CONCURRENTLY" } else { "" };
            let stmt = stmt.replacen("CREATE INDEX", &format!("CREATE INDEX{concurrently} IF NOT EXISTS"), 1);
            sqlx::query(&stmt).execute(&self.pool).await?;
        }

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {ns} (
                prefix TEXT PRIMARY KEY,
                uri TEXT NOT NULL
            )"
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Drops all per-space tables in one transaction.
    pub async fn drop_space_tables(&self, space_id: &str) -> Result<()> {
        Self::validate_space_id(space_id)?;
        let term = table_name(&self.prefix, space_id, LogicalTable::Term);
        let quad = table_name(&self.prefix, space_id, LogicalTable::RdfQuad);
        let ns = table_name(&self.prefix, space_id, LogicalTable::Namespace);

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {quad} CASCADE")).execute(&mut *tx).await?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {term} CASCADE")).execute(&mut *tx).await?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {ns} CASCADE")).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Drops the quad-table indexes ahead of a bulk load. The term
    /// table's lexical index is left intact since the loader still
    /// needs efficient upsert-by-lexical-form during the load.
    pub async fn drop_indexes_for_bulk_load(&self, space_id: &str) -> Result<()> {
        Self::validate_space_id(space_id)?;
        let quad = table_name(&self.prefix, space_id, LogicalTable::RdfQuad);
        for (name, _) in quad_indexes(&quad) {
            sqlx::query(&format!("DROP INDEX IF EXISTS {name}"))
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    pub async fn recreate_indexes_after_bulk_load(&self, space_id: &str, concurrent: bool) -> Result<()> {
        Self::validate_space_id(space_id)?;
        let quad = table_name(&self.prefix, space_id, LogicalTable::RdfQuad);
        for (name, sql) in quad_indexes(&quad) {
            let stmt = render(&name, &sql);
            let concurrently = if concurrent { " CONCURRENTLY" } else { "" };
            let stmt = stmt.replacen("CREATE INDEX", &format!("CREATE INDEX{concurrently} IF NOT EXISTS"), 1);
            sqlx::query(&stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Converts the quad table from `UNLOGGED` to `LOGGED`, restoring
    /// crash recovery after an unlogged bulk load.
    pub async fn make_quad_table_logged(&self, space_id: &str) -> Result<()> {
        Self::validate_space_id(space_id)?;
        let quad = table_name(&self.prefix, space_id, LogicalTable::RdfQuad);
        sqlx::query(&format!("ALTER TABLE {quad} SET LOGGED"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT table_name FROM information_schema.tables WHERE table_schema = 'public' AND table_name LIKE $1"
        )
        .bind(format!("{}%", self.prefix))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(n,)| n).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_follow_the_documented_pattern() {
        assert_eq!(table_name("vg", "s1", LogicalTable::Term), "vg__s1__term");
        assert_eq!(table_name("vg", "s1", LogicalTable::RdfQuad), "vg__s1__rdf_quad");
        assert_eq!(table_name("vg", "s1", LogicalTable::Namespace), "vg__s1__namespace");
    }

    #[test]
    fn space_id_validation_rejects_long_or_invalid_ids() {
        assert!(SchemaManager::validate_space_id("ok_space1").is_ok());
        assert!(SchemaManager::validate_space_id("").is_err());
        assert!(SchemaManager::validate_space_id(&"x".repeat(MAX_SPACE_ID_LEN + 1)).is_err());
        assert!(SchemaManager::validate_space_id("bad space").is_err());
    }

    #[test]
    fn quad_index_names_are_deterministic() {
        let idx = quad_indexes("vg__s1__rdf_quad");
        let names: Vec<_> = idx.iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(
            names,
            vec![
                "vg__s1__rdf_quad_s_idx",
                "vg__s1__rdf_quad_p_idx",
                "vg__s1__rdf_quad_o_idx",
                "vg__s1__rdf_quad_g_idx",
                "vg__s1__rdf_quad_po_idx",
                "vg__s1__rdf_quad_sp_idx",
                "vg__s1__rdf_quad_gspo_idx",
            ]
        );
    }
}
