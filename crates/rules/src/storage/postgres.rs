//! PostgreSQL backend.
//!
//! Predicates are pushed into SQL through [`Predicate::push_sql`]; the query
//! builders are free functions so their SQL can be checked without a database.

use std::collections::HashSet;

use async_trait::async_trait;
use radar_core::config::PostgresConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::info;
use uuid::Uuid;

use crate::predicate::Predicate;
use crate::record::{NewRadarResult, Radar, Run};

use super::{RadarStorage, StoreError};

pub(crate) const RUN_COLUMNS: &str = "r.id, r.project_id, r.type, r.name, r.status, r.input, \
     r.output, r.tags, r.metadata, r.prompt_tokens, r.completion_tokens, r.cost, \
     r.external_user_id, r.created_at, r.ended_at";

pub(crate) const RADAR_COLUMNS: &str =
    "id, project_id, owner_id, description, view, checks, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    /// Open a pool against the configured database and apply migrations.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url())
            .await?;
        info!(host = %config.host, database = %config.database, "PostgreSQL connected");

        sqlx::migrate!("../../migrations").run(&pool).await?;
        info!("Database migrations applied successfully");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Oldest unscored runs of `project_id` inside `scope`.
pub fn unscored_runs_query(
    project_id: Uuid,
    radar_id: Uuid,
    scope: &Predicate,
    limit: u32,
) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT ");
    qb.push(RUN_COLUMNS);
    qb.push(" FROM run r WHERE r.project_id = ");
    qb.push_bind(project_id);
    qb.push(" AND ");
    scope.push_sql(&mut qb);
    qb.push(" AND NOT EXISTS (SELECT 1 FROM radar_result rr WHERE rr.radar_id = ");
    qb.push_bind(radar_id);
    qb.push(" AND rr.run_id = r.id) ORDER BY r.created_at ASC LIMIT ");
    qb.push_bind(i64::from(limit));
    qb
}

/// Whether the single run `run_id` satisfies `predicate`.
pub fn run_matches_query(run_id: Uuid, predicate: &Predicate) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT EXISTS (SELECT 1 FROM run r WHERE r.id = ");
    qb.push_bind(run_id);
    qb.push(" AND ");
    predicate.push_sql(&mut qb);
    qb.push(")");
    qb
}

/// Ids among `run_ids` whose runs satisfy `predicate`.
pub fn matching_ids_query(run_ids: &[Uuid], predicate: &Predicate) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT r.id FROM run r WHERE r.id = ANY(");
    qb.push_bind(run_ids.to_vec());
    qb.push(") AND ");
    predicate.push_sql(&mut qb);
    qb
}

#[async_trait]
impl RadarStorage for PgStorage {
    async fn list_radars(&self) -> Result<Vec<Radar>, StoreError> {
        let sql = format!("SELECT {RADAR_COLUMNS} FROM radar ORDER BY created_at ASC");
        let radars = sqlx::query_as::<_, Radar>(&sql).fetch_all(&self.pool).await?;
        Ok(radars)
    }

    async fn fetch_unscored_runs(
        &self,
        radar: &Radar,
        scope: &Predicate,
        limit: u32,
    ) -> Result<Vec<Run>, StoreError> {
        let mut qb = unscored_runs_query(radar.project_id, radar.id, scope, limit);
        let runs = qb.build_query_as::<Run>().fetch_all(&self.pool).await?;
        Ok(runs)
    }

    async fn run_matches(&self, run: &Run, predicate: &Predicate) -> Result<bool, StoreError> {
        let mut qb = run_matches_query(run.id, predicate);
        let exists = qb.build_query_scalar::<bool>().fetch_one(&self.pool).await?;
        Ok(exists)
    }

    async fn matching_run_ids(
        &self,
        run_ids: &[Uuid],
        predicate: &Predicate,
    ) -> Result<HashSet<Uuid>, StoreError> {
        if run_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let mut qb = matching_ids_query(run_ids, predicate);
        let ids = qb.build_query_scalar::<Uuid>().fetch_all(&self.pool).await?;
        Ok(ids.into_iter().collect())
    }

    async fn insert_result(&self, result: &NewRadarResult) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO radar_result (radar_id, run_id, passed, results)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(result.radar_id)
        .bind(result.run_id)
        .bind(result.passed)
        .bind(Json(&result.results))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
