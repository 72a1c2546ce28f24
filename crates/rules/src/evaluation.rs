//! Checks against runs that were never stored, such as prompt evaluations.
//!
//! Pushdown leaves cannot be asked of the database here, so they are
//! answered in process by [`Predicate::matches`](crate::predicate::Predicate::matches).

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::interpreter::{EvalError, Interpreter};
use crate::logic::LogicNode;
use crate::record::Run;
use crate::registry::FilterRegistry;
use crate::scan::{run_checks, ChecksOutcome};
use crate::storage::MemoryStorage;

/// An LLM call assembled in memory.
#[derive(Debug, Clone, Default)]
pub struct VirtualRun {
    pub model: Option<String>,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub prompt_tokens: Option<i32>,
    pub completion_tokens: Option<i32>,
    pub cost: Option<f64>,
    pub duration_ms: Option<i64>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<Value>,
}

impl VirtualRun {
    /// A successful `llm` run with nil ids, created at `at`.
    pub fn into_run(self, at: DateTime<Utc>) -> Run {
        Run {
            id: Uuid::nil(),
            project_id: Uuid::nil(),
            run_type: "llm".to_string(),
            name: self.model,
            status: Some("success".to_string()),
            input: self.input,
            output: self.output,
            tags: self.tags,
            metadata: self.metadata,
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            cost: self.cost,
            external_user_id: None,
            created_at: at,
            ended_at: self.duration_ms.map(|ms| at + Duration::milliseconds(ms)),
        }
    }
}

/// Evaluate `checks` against `run` with the scan job's top-level semantics.
pub async fn evaluate_checks(
    run: &Run,
    checks: &LogicNode,
    registry: &FilterRegistry,
) -> Result<ChecksOutcome, EvalError> {
    let storage = MemoryStorage::new();
    let interp = Interpreter::new(registry, &storage);
    run_checks(&interp, run, checks).await
}
