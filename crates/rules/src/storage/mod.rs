//! Storage contract the engine needs, with PostgreSQL and in-memory backends.

mod memory;
mod postgres;

use std::collections::HashSet;

use async_trait::async_trait;
use uuid::Uuid;

use crate::predicate::Predicate;
use crate::record::{NewRadarResult, Radar, Run};

pub use memory::MemoryStorage;
pub use postgres::PgStorage;

/// Errors from a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("in-memory {0} lock poisoned")]
    Poisoned(&'static str),
}

/// The minimal query capability the scan job and interpreter rely on.
#[async_trait]
pub trait RadarStorage: Send + Sync {
    /// All radars, in storage order.
    async fn list_radars(&self) -> Result<Vec<Radar>, StoreError>;

    /// Up to `limit` runs of the radar's project matching `scope` that have
    /// no result for this radar yet, oldest first.
    async fn fetch_unscored_runs(
        &self,
        radar: &Radar,
        scope: &Predicate,
        limit: u32,
    ) -> Result<Vec<Run>, StoreError>;

    /// Whether `run` satisfies `predicate`.
    async fn run_matches(&self, run: &Run, predicate: &Predicate) -> Result<bool, StoreError>;

    /// The subset of `run_ids` whose runs satisfy `predicate`, in one query.
    async fn matching_run_ids(
        &self,
        run_ids: &[Uuid],
        predicate: &Predicate,
    ) -> Result<HashSet<Uuid>, StoreError>;

    async fn insert_result(&self, result: &NewRadarResult) -> Result<(), StoreError>;
}
