//! Built-in filters that compile to storage predicates.

use serde_json::Value;

use crate::predicate::{CompareOp, Field, Predicate, Scalar};

use super::params::{ParamError, ParamKind, ParamReader, ParamSpec};
use super::FilterDefinition;

const RUN_TYPES: &[&str] = &[
    "llm", "chain", "agent", "tool", "thread", "chat", "embed", "retriever",
];
const RUN_STATUSES: &[&str] = &["started", "success", "error"];

pub(super) fn definitions() -> Vec<FilterDefinition> {
    vec![
        FilterDefinition::pushdown(
            "type",
            vec![ParamSpec::required("type", ParamKind::Select(RUN_TYPES))],
            run_type,
        ),
        FilterDefinition::pushdown(
            "models",
            vec![ParamSpec::required("models", ParamKind::List)],
            models,
        ),
        FilterDefinition::pushdown(
            "tags",
            vec![ParamSpec::required("tags", ParamKind::List)],
            tags,
        ),
        FilterDefinition::pushdown(
            "status",
            vec![ParamSpec::required("status", ParamKind::Select(RUN_STATUSES))],
            status,
        ),
        FilterDefinition::pushdown(
            "users",
            vec![ParamSpec::required("users", ParamKind::List)],
            users,
        ),
        FilterDefinition::pushdown("duration", numeric_schema("duration"), duration),
        FilterDefinition::pushdown("cost", numeric_schema("cost"), cost),
        FilterDefinition::pushdown("tokens", numeric_schema("tokens"), tokens),
        FilterDefinition::pushdown(
            "metadata",
            vec![
                ParamSpec::required("key", ParamKind::Text),
                ParamSpec::required("value", ParamKind::Text),
            ],
            metadata,
        ),
        FilterDefinition::pushdown(
            "search",
            vec![ParamSpec::required("query", ParamKind::Text)],
            search,
        ),
    ]
}

fn numeric_schema(value: &'static str) -> Vec<ParamSpec> {
    vec![
        ParamSpec::required("operator", ParamKind::Select(CompareOp::NAMES)),
        ParamSpec::required(value, ParamKind::Number),
    ]
}

fn run_type(p: &ParamReader<'_>) -> Result<Predicate, ParamError> {
    Ok(equals(Field::Type, p.select("type", RUN_TYPES)?))
}

fn status(p: &ParamReader<'_>) -> Result<Predicate, ParamError> {
    Ok(equals(Field::Status, p.select("status", RUN_STATUSES)?))
}

fn models(p: &ParamReader<'_>) -> Result<Predicate, ParamError> {
    let values = p.list("models")?.iter().map(text_scalar).collect();
    Ok(Predicate::In { field: Field::Name, values })
}

fn tags(p: &ParamReader<'_>) -> Result<Predicate, ParamError> {
    let values = p.list("tags")?.iter().map(value_text).collect();
    Ok(Predicate::Overlaps { field: Field::Tags, values })
}

fn users(p: &ParamReader<'_>) -> Result<Predicate, ParamError> {
    let values = p
        .list("users")?
        .iter()
        .map(|v| {
            integer(v).map(Scalar::Integer).ok_or_else(|| ParamError::WrongType {
                filter: p.filter().to_string(),
                param: "users".to_string(),
                expected: "an array of user ids",
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Predicate::In { field: Field::ExternalUserId, values })
}

fn duration(p: &ParamReader<'_>) -> Result<Predicate, ParamError> {
    numeric(p, Field::DurationMs, "duration")
}

fn cost(p: &ParamReader<'_>) -> Result<Predicate, ParamError> {
    numeric(p, Field::Cost, "cost")
}

fn tokens(p: &ParamReader<'_>) -> Result<Predicate, ParamError> {
    numeric(p, Field::TotalTokens, "tokens")
}

fn metadata(p: &ParamReader<'_>) -> Result<Predicate, ParamError> {
    let key = p.text("key")?;
    Ok(equals(Field::Metadata(key.to_string()), p.text("value")?))
}

fn search(p: &ParamReader<'_>) -> Result<Predicate, ParamError> {
    Ok(Predicate::Contains {
        fields: vec![Field::Input, Field::Output],
        needle: p.text("query")?.to_string(),
    })
}

// ── Helpers ─────────────────────────────────────────────────────────

fn equals(field: Field, value: &str) -> Predicate {
    Predicate::Compare {
        field,
        op: CompareOp::Eq,
        value: Scalar::Text(value.to_string()),
    }
}

fn numeric(p: &ParamReader<'_>, field: Field, param: &str) -> Result<Predicate, ParamError> {
    let name = p.select("operator", CompareOp::NAMES)?;
    let op = CompareOp::parse(name).ok_or_else(|| ParamError::NotAnOption {
        filter: p.filter().to_string(),
        param: "operator".to_string(),
        value: name.to_string(),
        options: CompareOp::NAMES,
    })?;
    Ok(Predicate::Compare {
        field,
        op,
        value: Scalar::Number(p.number(param)?),
    })
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn text_scalar(v: &Value) -> Scalar {
    Scalar::Text(value_text(v))
}

fn integer(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
