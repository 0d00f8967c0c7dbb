//! Space Manager (C10) — creates, lists, and tears down the per-tenant
//! "spaces" a single installation hosts, each backed by its own term/quad
//! table set (C3).
//!
//! Generalizes the teacher's implicit single-database assumption into an
//! explicit catalog row per space, stored in the install-level `space`
//! table `SchemaManager::init_install_tables` creates.

use chrono::Utc;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::notify::{ChangeEvent, ChangeKind, Channel, Notifier};
use crate::schema::{install_table, SchemaManager, SpaceTableOptions};
use crate::term::TermCache;

#[derive(Debug, Clone)]
pub struct SpaceInfo {
    pub space_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: chrono::DateTime<Utc>,
}

pub struct SpaceManager {
    pool: PgPool,
    prefix: String,
    schema: SchemaManager,
    notifier: Arc<dyn Notifier>,
    cache: Arc<TermCache>,
    install_id: Uuid,
}

impl SpaceManager {
    pub fn new(pool: PgPool, prefix: impl Into<String>, install_id: Uuid, notifier: Arc<dyn Notifier>, cache: Arc<TermCache>) -> Self {
        let prefix = prefix.into();
        let schema = SchemaManager::new(pool.clone(), prefix.clone());
        Self { pool, prefix, schema, notifier, cache, install_id }
    }

    /// Creates a new space: a catalog row plus its term/quad/namespace
    /// tables, then fires a `Channel::Spaces` creation event. Rejects a
    /// duplicate `space_id` rather than silently reusing the row, since a
    /// caller reusing an id almost always means a bug upstream.
    pub async fn create(&self, space_id: &str, name: &str, description: Option<&str>) -> Result<SpaceInfo> {
        SchemaManager::validate_space_id(space_id)?;
        let space_table = install_table(&self.prefix, "space");

        if self.exists(space_id).await? {
            return Err(EngineError::schema(format!("space `{space_id}` already exists")));
        }

        self.schema.create_space_tables(space_id, SpaceTableOptions::default()).await?;

        let created_at = Utc::now();
        sqlx::query(&format!(
            "INSERT INTO {space_table} (space_id, install_id, name, description, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $5)"
        ))
        .bind(space_id)
        .bind(self.install_id)
        .bind(name)
        .bind(description)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        let _ = self
            .notifier
            .notify(
                Channel::Spaces,
                ChangeEvent {
                    space_id: space_id.to_string(),
                    kind: ChangeKind::Created,
                    subject: space_id.to_string(),
                    occurred_at: created_at,
                },
            )
            .await;

        Ok(SpaceInfo {
            space_id: space_id.to_string(),
            name: name.to_string(),
            description: description.map(str::to_string),
            created_at,
        })
    }

    /// Deletes a space: drops its per-space tables, removes the catalog
    /// row, invalidates cached blank-node entries for it (their UUIDs are
    /// scoped per space and must not leak into a later space reusing the
    /// same id), and fires a deletion event. Rejects an unknown space
    /// rather than treating delete-of-nothing as a silent success.
    pub async fn delete(&self, space_id: &str) -> Result<()> {
        if !self.exists(space_id).await? {
            return Err(EngineError::schema(format!("space `{space_id}` does not exist")));
        }

        self.schema.drop_space_tables(space_id).await?;

        let space_table = install_table(&self.prefix, "space");
        sqlx::query(&format!("DELETE FROM {space_table} WHERE space_id = $1"))
            .bind(space_id)
            .execute(&self.pool)
            .await?;

        self.cache.invalidate_space_blank_nodes(space_id);

        let _ = self
            .notifier
            .notify(
                Channel::Spaces,
                ChangeEvent {
                    space_id: space_id.to_string(),
                    kind: ChangeKind::Deleted,
                    subject: space_id.to_string(),
                    occurred_at: Utc::now(),
                },
            )
            .await;

        Ok(())
    }

    pub async fn exists(&self, space_id: &str) -> Result<bool> {
        let space_table = install_table(&self.prefix, "space");
        let row = sqlx::query(&format!("SELECT 1 FROM {space_table} WHERE space_id = $1"))
            .bind(space_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn list(&self) -> Result<Vec<SpaceInfo>> {
        let space_table = install_table(&self.prefix, "space");
        let rows = sqlx::query(&format!(
            "SELECT space_id, name, description, created_at FROM {space_table} ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| SpaceInfo {
                space_id: row.get("space_id"),
                name: row.get("name"),
                description: row.get("description"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    pub async fn get_quad_count(&self, space_id: &str) -> Result<i64> {
        if !self.exists(space_id).await? {
            return Err(EngineError::schema(format!("space `{space_id}` does not exist")));
        }
        let quad_table = crate::schema::table_name(&self.prefix, space_id, crate::schema::LogicalTable::RdfQuad);
        let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {quad_table}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n"))
    }
}

#[cfg(test)]
mod tests {
    // `SpaceManager` is exercised end-to-end against a live Postgres in
    // the scenario-level integration tests; the pieces safe to unit-test
    // without a database (id validation) are already covered in
    // `schema.rs`.
}
