//! Row types the engine reads and writes: runs, radars, and radar results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::logic::{LogicError, LogicNode};

// ── Run ─────────────────────────────────────────────────────────────

/// A captured LLM call. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: Uuid,
    pub project_id: Uuid,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub run_type: String,
    /// Model name for `llm` runs.
    pub name: Option<String>,
    pub status: Option<String>,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<Value>,
    pub prompt_tokens: Option<i32>,
    pub completion_tokens: Option<i32>,
    pub cost: Option<f64>,
    pub external_user_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Which free-text side of a run a filter inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextField {
    Input,
    Output,
}

impl TextField {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "input" => Some(Self::Input),
            "output" => Some(Self::Output),
            _ => None,
        }
    }
}

impl Run {
    /// Wall-clock duration in milliseconds, if the run has ended.
    pub fn duration_ms(&self) -> Option<f64> {
        self.ended_at
            .map(|end| end.signed_duration_since(self.created_at).num_milliseconds() as f64)
    }

    /// Prompt plus completion tokens, missing counts treated as zero.
    pub fn total_tokens(&self) -> i64 {
        i64::from(self.prompt_tokens.unwrap_or(0)) + i64::from(self.completion_tokens.unwrap_or(0))
    }

    /// Flatten the input or output payload to plain text.
    ///
    /// Chat message arrays are joined by their `content` fields; any other
    /// structured payload falls back to its compact JSON form.
    pub fn text(&self, field: TextField) -> Option<String> {
        let value = match field {
            TextField::Input => self.input.as_ref(),
            TextField::Output => self.output.as_ref(),
        }?;
        payload_text(value)
    }
}

fn payload_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(payload_text).collect();
            Some(parts.join("\n"))
        }
        Value::Object(map) => match map.get("content") {
            Some(Value::String(s)) => Some(s.clone()),
            _ => Some(value.to_string()),
        },
        other => Some(other.to_string()),
    }
}

// ── Radar ───────────────────────────────────────────────────────────

/// A stored rule: a scope (`view`) plus a pass/fail condition (`checks`).
///
/// Both trees are kept as raw JSON so one malformed radar cannot fail the
/// whole listing; they are parsed per scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Radar {
    pub id: Uuid,
    pub project_id: Uuid,
    pub owner_id: Option<Uuid>,
    pub description: Option<String>,
    pub view: Value,
    pub checks: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Radar {
    pub fn view_logic(&self) -> Result<LogicNode, LogicError> {
        LogicNode::from_value(&self.view)
    }

    pub fn checks_logic(&self) -> Result<LogicNode, LogicError> {
        LogicNode::from_value(&self.checks)
    }
}

// ── Results ─────────────────────────────────────────────────────────

/// Outcome of evaluating one node of a checks tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckOutcome {
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<OutcomeDetails>,
}

/// Per-node detail: child outcomes for combinators, free-form JSON for evaluators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutcomeDetails {
    Operands(Vec<CheckOutcome>),
    Evaluator(Value),
}

impl CheckOutcome {
    pub fn pass() -> Self {
        Self::bare(true)
    }

    pub fn fail() -> Self {
        Self::bare(false)
    }

    fn bare(passed: bool) -> Self {
        Self {
            passed,
            filter_id: None,
            details: None,
        }
    }

    /// Outcome of a resolved leaf filter.
    pub fn leaf(filter_id: &str, passed: bool) -> Self {
        Self {
            passed,
            filter_id: Some(filter_id.to_string()),
            details: None,
        }
    }

    /// Outcome of a combinator carrying its operands' outcomes.
    pub fn combined(passed: bool, operands: Vec<CheckOutcome>) -> Self {
        Self {
            passed,
            filter_id: None,
            details: Some(OutcomeDetails::Operands(operands)),
        }
    }
}

/// A result row about to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRadarResult {
    pub radar_id: Uuid,
    pub run_id: Uuid,
    pub passed: bool,
    pub results: Vec<CheckOutcome>,
}

/// A persisted result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadarResult {
    pub id: Uuid,
    pub radar_id: Uuid,
    pub run_id: Uuid,
    pub passed: bool,
    pub results: Vec<CheckOutcome>,
    pub created_at: DateTime<Utc>,
}
