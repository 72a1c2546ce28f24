//! Storage pushdown predicates.
//!
//! A [`Predicate`] is the compiled form of a pushdown-only logic tree. It has
//! two interpretations that agree on every field the filter catalog exposes:
//! - [`Predicate::push_sql`] renders it into a PostgreSQL `WHERE` fragment
//!   with bound parameters.
//! - [`Predicate::matches`] evaluates it in process against a [`Run`].

mod sql;

use serde_json::Value;

use crate::record::{Run, TextField};

/// A literal compared against a run field.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Text(String),
    Number(f64),
    Integer(i64),
}

/// A run field addressable by a predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Type,
    Name,
    Status,
    ExternalUserId,
    DurationMs,
    Cost,
    TotalTokens,
    Tags,
    Metadata(String),
    Input,
    Output,
}

/// Comparison operator used by numeric and equality filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    /// Accepted spellings in filter params.
    pub const NAMES: &'static [&'static str] = &["eq", "neq", "gt", "gte", "lt", "lte"];

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "eq" => Some(Self::Eq),
            "neq" => Some(Self::Neq),
            "gt" => Some(Self::Gt),
            "gte" => Some(Self::Gte),
            "lt" => Some(Self::Lt),
            "lte" => Some(Self::Lte),
            _ => None,
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Neq => "<>",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }

    /// Apply the operator to two numbers.
    pub fn compare_f64(self, left: f64, right: f64) -> bool {
        match self {
            Self::Eq => left == right,
            Self::Neq => left != right,
            Self::Gt => left > right,
            Self::Gte => left >= right,
            Self::Lt => left < right,
            Self::Lte => left <= right,
        }
    }

    fn compare_ord(self, ord: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Self::Eq => ord == Equal,
            Self::Neq => ord != Equal,
            Self::Gt => ord == Greater,
            Self::Gte => ord != Less,
            Self::Lt => ord == Less,
            Self::Lte => ord != Greater,
        }
    }
}

/// Boolean predicate over run fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    True,
    False,
    /// Conjunction; empty is `true`.
    And(Vec<Predicate>),
    /// Disjunction; empty is `false`.
    Or(Vec<Predicate>),
    Compare {
        field: Field,
        op: CompareOp,
        value: Scalar,
    },
    /// Field equals one of the values; an empty list matches nothing.
    In { field: Field, values: Vec<Scalar> },
    /// Array field shares at least one element with `values`.
    Overlaps { field: Field, values: Vec<String> },
    /// Case-insensitive substring match against any of `fields`. On the
    /// JSON payload fields this searches every string value at any depth;
    /// object keys are not searched.
    Contains { fields: Vec<Field>, needle: String },
}

/// A field value resolved from a run. `None` plays the role of SQL `NULL`.
#[derive(Debug, Clone, PartialEq)]
enum FieldValue {
    Text(String),
    Number(f64),
}

impl Predicate {
    /// Evaluate in process. Comparisons against a missing field are false,
    /// mirroring SQL `NULL` semantics.
    pub fn matches(&self, run: &Run) -> bool {
        match self {
            Predicate::True => true,
            Predicate::False => false,
            Predicate::And(parts) => parts.iter().all(|p| p.matches(run)),
            Predicate::Or(parts) => parts.iter().any(|p| p.matches(run)),
            Predicate::Compare { field, op, value } => match resolve(run, field) {
                Some(actual) => compare(&actual, *op, value),
                None => false,
            },
            Predicate::In { field, values } => match resolve(run, field) {
                Some(actual) => values.iter().any(|v| compare(&actual, CompareOp::Eq, v)),
                None => false,
            },
            Predicate::Overlaps { field, values } => match field {
                Field::Tags => run
                    .tags
                    .as_ref()
                    .is_some_and(|tags| tags.iter().any(|t| values.contains(t))),
                _ => false,
            },
            Predicate::Contains { fields, needle } => {
                let needle = needle.to_lowercase();
                fields.iter().any(|field| match field {
                    Field::Input => run.input.as_ref().is_some_and(|v| any_string_contains(v, &needle)),
                    Field::Output => run.output.as_ref().is_some_and(|v| any_string_contains(v, &needle)),
                    other => resolve_text(run, other)
                        .is_some_and(|text| text.to_lowercase().contains(&needle)),
                })
            }
        }
    }
}

fn resolve(run: &Run, field: &Field) -> Option<FieldValue> {
    match field {
        Field::Type => Some(FieldValue::Text(run.run_type.clone())),
        Field::Name => run.name.clone().map(FieldValue::Text),
        Field::Status => run.status.clone().map(FieldValue::Text),
        Field::ExternalUserId => run.external_user_id.map(|id| FieldValue::Number(id as f64)),
        Field::DurationMs => run.duration_ms().map(FieldValue::Number),
        Field::Cost => run.cost.map(FieldValue::Number),
        Field::TotalTokens => Some(FieldValue::Number(run.total_tokens() as f64)),
        Field::Tags => None,
        Field::Metadata(key) => {
            let value = run.metadata.as_ref()?.get(key)?;
            match value {
                Value::Null => None,
                Value::String(s) => Some(FieldValue::Text(s.clone())),
                other => Some(FieldValue::Text(other.to_string())),
            }
        }
        Field::Input | Field::Output => resolve_text(run, field).map(FieldValue::Text),
    }
}

fn resolve_text(run: &Run, field: &Field) -> Option<String> {
    match field {
        Field::Input => run.text(TextField::Input),
        Field::Output => run.text(TextField::Output),
        other => match resolve(run, other)? {
            FieldValue::Text(s) => Some(s),
            FieldValue::Number(n) => Some(n.to_string()),
        },
    }
}

/// Whether any string inside `value` contains the lowercase `needle`.
fn any_string_contains(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(s) => s.to_lowercase().contains(needle),
        Value::Array(items) => items.iter().any(|v| any_string_contains(v, needle)),
        Value::Object(map) => map.values().any(|v| any_string_contains(v, needle)),
        _ => false,
    }
}

fn compare(actual: &FieldValue, op: CompareOp, expected: &Scalar) -> bool {
    match (actual, expected) {
        (FieldValue::Number(a), Scalar::Number(b)) => op.compare_f64(*a, *b),
        (FieldValue::Number(a), Scalar::Integer(b)) => op.compare_f64(*a, *b as f64),
        (FieldValue::Text(a), Scalar::Text(b)) => op.compare_ord(a.as_str().cmp(b.as_str())),
        (FieldValue::Text(a), Scalar::Number(b)) => a
            .parse::<f64>()
            .is_ok_and(|a| op.compare_f64(a, *b)),
        (FieldValue::Text(a), Scalar::Integer(b)) => a
            .parse::<f64>()
            .is_ok_and(|a| op.compare_f64(a, *b as f64)),
        (FieldValue::Number(a), Scalar::Text(b)) => b
            .parse::<f64>()
            .is_ok_and(|b| op.compare_f64(*a, b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use serde_json::json;
    use uuid::Uuid;

    fn run() -> Run {
        let created = Utc::now();
        Run {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            run_type: "llm".to_string(),
            name: Some("gpt-4o".to_string()),
            status: Some("error".to_string()),
            input: Some(json!("What is the Capital of France?")),
            output: None,
            tags: Some(vec!["prod".to_string(), "beta".to_string()]),
            metadata: Some(json!({"env": "staging", "attempt": 2})),
            prompt_tokens: Some(100),
            completion_tokens: Some(20),
            cost: Some(0.004),
            external_user_id: Some(42),
            created_at: created,
            ended_at: Some(created + Duration::milliseconds(500)),
        }
    }

    fn cmp(field: Field, op: CompareOp, value: Scalar) -> Predicate {
        Predicate::Compare { field, op, value }
    }

    #[test]
    fn empty_combinators_follow_identities() {
        assert!(Predicate::And(vec![]).matches(&run()));
        assert!(!Predicate::Or(vec![]).matches(&run()));
    }

    #[test]
    fn numeric_comparisons() {
        let r = run();
        assert!(cmp(Field::DurationMs, CompareOp::Lt, Scalar::Number(30000.0)).matches(&r));
        assert!(!cmp(Field::DurationMs, CompareOp::Gt, Scalar::Number(30000.0)).matches(&r));
        assert!(cmp(Field::TotalTokens, CompareOp::Eq, Scalar::Integer(120)).matches(&r));
        assert!(cmp(Field::Cost, CompareOp::Gte, Scalar::Number(0.004)).matches(&r));
    }

    #[test]
    fn missing_field_never_matches() {
        let r = Run { status: None, ended_at: None, ..run() };
        assert!(!cmp(Field::Status, CompareOp::Neq, Scalar::Text("error".into())).matches(&r));
        assert!(!cmp(Field::DurationMs, CompareOp::Lt, Scalar::Number(1.0)).matches(&r));
    }

    #[test]
    fn in_and_overlaps() {
        let r = run();
        let models = Predicate::In {
            field: Field::Name,
            values: vec![Scalar::Text("claude".into()), Scalar::Text("gpt-4o".into())],
        };
        assert!(models.matches(&r));
        assert!(!Predicate::In { field: Field::Name, values: vec![] }.matches(&r));

        let users = Predicate::In { field: Field::ExternalUserId, values: vec![Scalar::Integer(42)] };
        assert!(users.matches(&r));

        let tags = Predicate::Overlaps { field: Field::Tags, values: vec!["beta".into()] };
        assert!(tags.matches(&r));
        let none = Predicate::Overlaps { field: Field::Tags, values: vec!["dev".into()] };
        assert!(!none.matches(&r));
    }

    #[test]
    fn metadata_values_compare_as_text() {
        let r = run();
        assert!(cmp(Field::Metadata("env".into()), CompareOp::Eq, Scalar::Text("staging".into())).matches(&r));
        assert!(cmp(Field::Metadata("attempt".into()), CompareOp::Eq, Scalar::Text("2".into())).matches(&r));
        assert!(!cmp(Field::Metadata("absent".into()), CompareOp::Eq, Scalar::Text("x".into())).matches(&r));
    }

    #[test]
    fn contains_is_case_insensitive() {
        let p = Predicate::Contains {
            fields: vec![Field::Input, Field::Output],
            needle: "capital OF".into(),
        };
        assert!(p.matches(&run()));
    }

    #[test]
    fn contains_searches_string_values_not_keys() {
        let r = Run {
            input: Some(json!([{"role": "user", "content": "Where is Lyon?"}])),
            output: Some(json!({"role": "assistant", "content": "Hi there", "score": 7})),
            ..run()
        };
        let search = |needle: &str| Predicate::Contains {
            fields: vec![Field::Input, Field::Output],
            needle: needle.into(),
        };
        assert!(search("HI THERE").matches(&r));
        assert!(search("assistant").matches(&r));
        assert!(search("lyon").matches(&r));
        assert!(!search("content").matches(&r));
        assert!(!search("role").matches(&r));
        assert!(!search("7").matches(&r));

        let empty = Run { input: None, output: None, ..run() };
        assert!(!search("hi").matches(&empty));
    }
}
