//! VitalGraph Engine — RDF quad store storage-and-query engine over a
//! relational database.
//!
//! A single installation hosts one or more tenant "spaces" ([`space`]),
//! each with its own term/quad table set ([`schema`]) behind a shared
//! connection [`pool`]. Writes flow through scoped [`txn::Txn`]s; term
//! identity ([`term`]) is content-addressed so inserts are idempotent.
//! Bulk ingestion ([`loader`], orchestrated by [`import`]) and the
//! SPARQL engine ([`sparql`]) both sit on top of [`quad::QuadApi`].
//! Downstream consumers subscribe to committed changes through
//! [`notify`].

pub mod config;
pub mod error;
pub mod import;
pub mod loader;
pub mod notify;
pub mod pool;
pub mod quad;
pub mod schema;
pub mod space;
pub mod sparql;
pub mod term;
pub mod txn;

pub use config::EngineOptions;
pub use error::{EngineError, Result};
pub use pool::PoolSet;
pub use quad::QuadApi;
pub use space::SpaceManager;
pub use term::{Term, TermCache, TermKind};
pub use txn::{Txn, TransactionManager};

use std::sync::Arc;
use uuid::Uuid;

use crate::notify::{InProcessNotifier, Notifier};
use crate::schema::SchemaManager;

/// Wires the connection pools, schema manager, transaction manager,
/// term cache, quad API, space manager, and notifier into one handle —
/// the engine's single entry point for a calling process.
pub struct Engine {
    pub pools: PoolSet,
    pub schema: SchemaManager,
    pub txn_manager: TransactionManager,
    pub term_cache: Arc<TermCache>,
    pub quads: QuadApi,
    pub spaces: SpaceManager,
    pub notifier: Arc<dyn Notifier>,
}

impl Engine {
    /// Connects the pool set, runs the install-level schema bootstrap,
    /// and returns a fully wired `Engine`. `install_id` identifies this
    /// installation's row in the install table; callers that don't
    /// already have one should generate a fresh `Uuid::new_v4()`.
    pub async fn connect(options: &EngineOptions, install_id: Uuid) -> Result<Self> {
        let pools = PoolSet::connect(&options.database, &options.pools).await?;
        let schema = SchemaManager::new(pools.admin().clone(), options.database.table_prefix.clone());
        schema.init_install_tables(install_id).await?;

        let term_cache = Arc::new(TermCache::new(options.term_cache.capacity));
        let txn_manager = TransactionManager::new(pools.dedicated_write().clone());
        let quads = QuadApi::new(pools.shared_read().clone(), options.database.table_prefix.clone(), term_cache.clone());

        let notifier: Arc<dyn Notifier> = Arc::new(InProcessNotifier::new());
        let spaces = SpaceManager::new(
            pools.admin().clone(),
            options.database.table_prefix.clone(),
            install_id,
            notifier.clone(),
            term_cache.clone(),
        );

        Ok(Self {
            pools,
            schema,
            txn_manager,
            term_cache,
            quads,
            spaces,
            notifier,
        })
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.txn_manager.rollback_all().await?;
        self.pools.close().await;
        Ok(())
    }
}
