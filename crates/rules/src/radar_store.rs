//! CRUD and statistics for the `radar` PostgreSQL table.
//!
//! [`RadarStore`] is a stateless unit struct with async methods that take a
//! `&PgPool`. Every operation is scoped to a project. `view` and `checks`
//! are parsed before they are written, so stored trees are well-formed.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::logic::{LogicError, LogicNode};
use crate::record::Radar;

// ── Request types ────────────────────────────────────────────────────

/// Request body for creating a radar.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateRadar {
    pub description: Option<String>,
    pub view: Value,
    pub checks: Value,
}

/// Request body for updating a radar (all fields optional).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRadar {
    pub description: Option<String>,
    pub view: Option<Value>,
    pub checks: Option<Value>,
}

// ── Response types ───────────────────────────────────────────────────

/// A radar with the number of passing and failing results recorded for it.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RadarSummary {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub radar: Radar,
    pub passed: i64,
    pub failed: i64,
}

/// Passed/failed result counts for one day.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ChartPoint {
    pub day: NaiveDate,
    pub passed: i64,
    pub failed: i64,
}

// ── Error type ───────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum RadarStoreError {
    #[error("invalid {tree}: {source}")]
    InvalidLogic {
        tree: &'static str,
        #[source]
        source: LogicError,
    },

    #[error("radar not found: {0}")]
    NotFound(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn check_tree(tree: &'static str, value: &Value) -> Result<(), RadarStoreError> {
    LogicNode::from_value(value)
        .map(drop)
        .map_err(|source| RadarStoreError::InvalidLogic { tree, source })
}

impl CreateRadar {
    pub fn validate(&self) -> Result<(), RadarStoreError> {
        check_tree("view", &self.view)?;
        check_tree("checks", &self.checks)
    }
}

impl UpdateRadar {
    pub fn validate(&self) -> Result<(), RadarStoreError> {
        if let Some(view) = &self.view {
            check_tree("view", view)?;
        }
        if let Some(checks) = &self.checks {
            check_tree("checks", checks)?;
        }
        Ok(())
    }
}

// ── Defaults ─────────────────────────────────────────────────────────

/// Radars offered to every new project.
pub fn default_radars() -> Vec<CreateRadar> {
    let llm_runs = json!(["AND", {"id": "type", "params": {"type": "llm"}}]);
    vec![
        CreateRadar {
            description: Some("Failed or slow LLM calls".to_string()),
            view: llm_runs.clone(),
            checks: json!([
                "OR",
                {"id": "status", "params": {"status": "error"}},
                {"id": "duration", "params": {"operator": "gt", "duration": 30000}}
            ]),
        },
        CreateRadar {
            description: Some("Answer contains PII (Personal Identifiable Information)".to_string()),
            view: llm_runs,
            checks: json!([
                "OR",
                {"id": "email", "params": {"field": "output", "type": "contains"}},
                {"id": "cc", "params": {"field": "output", "type": "contains"}},
                {"id": "phone", "params": {"field": "output", "type": "contains"}}
            ]),
        },
    ]
}

// ── Store ────────────────────────────────────────────────────────────

const SUMMARY_SELECT: &str = "SELECT r.id, r.project_id, r.owner_id, r.description, r.view, r.checks,
            r.created_at, r.updated_at,
            COUNT(rr.id) FILTER (WHERE rr.passed) AS passed,
            COUNT(rr.id) FILTER (WHERE NOT rr.passed) AS failed
     FROM radar r
     LEFT JOIN radar_result rr ON rr.radar_id = r.id";

/// Stateless CRUD store for `radar`.
pub struct RadarStore;

impl RadarStore {
    /// All radars of a project with their result counts, newest first.
    pub async fn list(pool: &PgPool, project_id: Uuid) -> Result<Vec<RadarSummary>, RadarStoreError> {
        let sql = format!(
            "{SUMMARY_SELECT}
             WHERE r.project_id = $1
             GROUP BY r.id
             ORDER BY r.created_at DESC"
        );
        let rows = sqlx::query_as::<_, RadarSummary>(&sql)
            .bind(project_id)
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }

    pub async fn get(
        pool: &PgPool,
        project_id: Uuid,
        id: Uuid,
    ) -> Result<Option<RadarSummary>, RadarStoreError> {
        let sql = format!(
            "{SUMMARY_SELECT}
             WHERE r.id = $1 AND r.project_id = $2
             GROUP BY r.id"
        );
        let row = sqlx::query_as::<_, RadarSummary>(&sql)
            .bind(id)
            .bind(project_id)
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }

    pub async fn create(
        pool: &PgPool,
        project_id: Uuid,
        owner_id: Option<Uuid>,
        req: CreateRadar,
    ) -> Result<Radar, RadarStoreError> {
        req.validate()?;

        let row = sqlx::query_as::<_, Radar>(
            "INSERT INTO radar (project_id, owner_id, description, view, checks)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, project_id, owner_id, description, view, checks, created_at, updated_at",
        )
        .bind(project_id)
        .bind(owner_id)
        .bind(&req.description)
        .bind(&req.view)
        .bind(&req.checks)
        .fetch_one(pool)
        .await?;

        info!(radar_id = %row.id, %project_id, "radar created");
        Ok(row)
    }

    /// Partial update; `COALESCE` keeps fields that were not provided.
    pub async fn update(
        pool: &PgPool,
        project_id: Uuid,
        id: Uuid,
        req: UpdateRadar,
    ) -> Result<Radar, RadarStoreError> {
        req.validate()?;

        let row = sqlx::query_as::<_, Radar>(
            "UPDATE radar SET
                description = COALESCE($3, description),
                view = COALESCE($4, view),
                checks = COALESCE($5, checks),
                updated_at = now()
             WHERE id = $1 AND project_id = $2
             RETURNING id, project_id, owner_id, description, view, checks, created_at, updated_at",
        )
        .bind(id)
        .bind(project_id)
        .bind(&req.description)
        .bind(&req.view)
        .bind(&req.checks)
        .fetch_optional(pool)
        .await?;

        row.ok_or(RadarStoreError::NotFound(id))
    }

    /// Delete a radar; its results go with it.
    pub async fn delete(pool: &PgPool, project_id: Uuid, id: Uuid) -> Result<(), RadarStoreError> {
        let result = sqlx::query("DELETE FROM radar WHERE id = $1 AND project_id = $2")
            .bind(id)
            .bind(project_id)
            .execute(pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RadarStoreError::NotFound(id));
        }
        Ok(())
    }

    /// Per-day passed/failed counts over the last seven days, by run creation
    /// day. Days without results are reported as zero.
    pub async fn chart(
        pool: &PgPool,
        project_id: Uuid,
        id: Uuid,
    ) -> Result<Vec<ChartPoint>, RadarStoreError> {
        let rows = sqlx::query_as::<_, ChartPoint>(
            "WITH days AS (
                SELECT generate_series((current_date - 6)::timestamp, current_date::timestamp, interval '1 day')::date AS day
             )
             SELECT d.day,
                    COUNT(rr.id) FILTER (WHERE rr.passed) AS passed,
                    COUNT(rr.id) FILTER (WHERE NOT rr.passed) AS failed
             FROM days d
             LEFT JOIN (
                SELECT rr.id, rr.passed, r.created_at AS run_created_at
                FROM radar_result rr
                JOIN run r ON r.id = rr.run_id
                WHERE rr.radar_id = $1 AND r.project_id = $2
             ) rr ON rr.run_created_at::date = d.day
             GROUP BY d.day
             ORDER BY d.day ASC",
        )
        .bind(id)
        .bind(project_id)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    /// Insert [`default_radars`] for a project.
    pub async fn seed_defaults(
        pool: &PgPool,
        project_id: Uuid,
        owner_id: Option<Uuid>,
    ) -> Result<Vec<Radar>, RadarStoreError> {
        let mut created = Vec::new();
        for req in default_radars() {
            created.push(Self::create(pool, project_id, owner_id, req).await?);
        }
        Ok(created)
    }
}
