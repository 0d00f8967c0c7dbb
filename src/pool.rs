//! Connection Pool Set (C4) — three `sqlx::PgPool`s sharing one database
//! but separate contention classes: admin (DDL/metadata, serialized),
//! shared-read (the query workload), and dedicated-write (bulk loads,
//! one connection held per transaction for the load's duration).
//!
//! The teacher opened a single hand-rolled `Connection` per
//! `CellarConnection::connect`; this generalizes that single connection
//! into three differently-sized pools over the same database.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

use crate::config::{DatabaseOptions, PoolOptions};
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default)]
pub struct PoolCounts {
    pub size: u32,
    pub idle: usize,
}

/// Holds the three logical pools. All three point at the same database;
/// only their sizing and intended usage differ.
pub struct PoolSet {
    admin: PgPool,
    shared_read: PgPool,
    dedicated_write: PgPool,
}

impl PoolSet {
    /// Connects all three pools concurrently rather than one after
    /// another — they're independent connections to the same database,
    /// so there's no reason to pay three sequential round trips to the
    /// server on startup.
    pub async fn connect(db: &DatabaseOptions, opts: &PoolOptions) -> Result<Self> {
        let timeout = Duration::from_secs(opts.acquire_timeout_secs);

        let admin_fut = PgPoolOptions::new()
            .max_connections(opts.admin_max_connections)
            .acquire_timeout(timeout)
            .connect(&db.url);

        let shared_read_fut = PgPoolOptions::new()
            .max_connections(opts.shared_read_max_connections)
            .acquire_timeout(timeout)
            .connect(&db.url);

        let dedicated_write_fut = PgPoolOptions::new()
            .max_connections(opts.dedicated_write_max_connections)
            .acquire_timeout(timeout)
            .connect(&db.url);

        let (admin, shared_read, dedicated_write) =
            futures::try_join!(admin_fut, shared_read_fut, dedicated_write_fut)?;

        Ok(Self {
            admin,
            shared_read,
            dedicated_write,
        })
    }

    pub fn admin(&self) -> &PgPool {
        &self.admin
    }

    pub fn shared_read(&self) -> &PgPool {
        &self.shared_read
    }

    pub fn dedicated_write(&self) -> &PgPool {
        &self.dedicated_write
    }

    /// Per-pool live/idle counts, for observability.
    pub fn report(&self) -> [(&'static str, PoolCounts); 3] {
        [
            ("admin", PoolCounts { size: self.admin.size(), idle: self.admin.num_idle() }),
            ("shared_read", PoolCounts { size: self.shared_read.size(), idle: self.shared_read.num_idle() }),
            ("dedicated_write", PoolCounts { size: self.dedicated_write.size(), idle: self.dedicated_write.num_idle() }),
        ]
    }

    pub async fn close(&self) {
        self.admin.close().await;
        self.shared_read.close().await;
        self.dedicated_write.close().await;
    }
}
