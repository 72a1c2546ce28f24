//! Shared fixtures for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::record::Run;
use crate::registry::{EvaluatorError, ParamReader, RunEvaluator, Verdict};

/// A finished `llm` run with a one-second duration.
pub(crate) fn run() -> Run {
    let created = Utc::now();
    Run {
        id: Uuid::new_v4(),
        project_id: Uuid::new_v4(),
        run_type: "llm".to_string(),
        name: Some("gpt-4o".to_string()),
        status: Some("success".to_string()),
        input: Some(json!([{"role": "user", "content": "hello"}])),
        output: Some(json!({"role": "assistant", "content": "hi there"})),
        tags: None,
        metadata: None,
        prompt_tokens: Some(10),
        completion_tokens: Some(5),
        cost: None,
        external_user_id: None,
        created_at: created,
        ended_at: Some(created + Duration::seconds(1)),
    }
}

/// Evaluator with a fixed verdict that counts its invocations.
pub(crate) struct Fixed {
    passed: bool,
    calls: AtomicUsize,
}

impl Fixed {
    pub(crate) fn new(passed: bool) -> Arc<Self> {
        Arc::new(Self {
            passed,
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RunEvaluator for Fixed {
    async fn evaluate(&self, _run: &Run, _params: &ParamReader<'_>) -> Result<Verdict, EvaluatorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Verdict {
            passed: self.passed,
            details: None,
        })
    }
}

/// Evaluator that always errors.
pub(crate) struct Broken;

#[async_trait]
impl RunEvaluator for Broken {
    async fn evaluate(&self, _run: &Run, params: &ParamReader<'_>) -> Result<Verdict, EvaluatorError> {
        Err(EvaluatorError::Failed {
            filter: params.filter().to_string(),
            reason: "scorer unavailable".to_string(),
        })
    }
}
