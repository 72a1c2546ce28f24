//! Built-in filters evaluated in process against a single run.
//!
//! These scan unstructured text (PII patterns, user regexes, length, JSON
//! shape), which has no faithful storage-predicate form.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use crate::predicate::CompareOp;
use crate::record::{Run, TextField};

use super::params::{ParamError, ParamKind, ParamReader, ParamSpec};
use super::{EvaluatorError, FilterDefinition, RegistryError, RunEvaluator, Verdict};

const FIELDS: &[&str] = &["input", "output"];
const MATCH_TYPES: &[&str] = &["contains", "not_contains"];
const JSON_TYPES: &[&str] = &["valid", "invalid"];

const EMAIL_PATTERN: &str = r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b";
const PHONE_PATTERN: &str =
    r"(?:\+\d{1,3}[\s.-]?)?(?:\(\d{2,4}\)[\s.-]?|\b\d{2,4}[\s.-])\d{3,4}[\s.-]?\d{3,4}\b";
const CARD_PATTERN: &str = r"\b(?:\d[ -]?){12,18}\d\b";

pub(super) fn definitions() -> Result<Vec<FilterDefinition>, RegistryError> {
    let scan_schema = || {
        vec![
            ParamSpec::required("field", ParamKind::Select(FIELDS)),
            ParamSpec::optional("type", ParamKind::Select(MATCH_TYPES)),
        ]
    };

    Ok(vec![
        FilterDefinition::evaluator(
            "email",
            scan_schema(),
            Arc::new(PiiScanner::new(PiiKind::Email)?),
        ),
        FilterDefinition::evaluator(
            "phone",
            scan_schema(),
            Arc::new(PiiScanner::new(PiiKind::Phone)?),
        ),
        FilterDefinition::evaluator(
            "cc",
            scan_schema(),
            Arc::new(PiiScanner::new(PiiKind::CreditCard)?),
        ),
        FilterDefinition::evaluator(
            "regex",
            vec![
                ParamSpec::required("field", ParamKind::Select(FIELDS)),
                ParamSpec::required("pattern", ParamKind::Text),
                ParamSpec::optional("type", ParamKind::Select(MATCH_TYPES)),
            ],
            Arc::new(PatternMatcher),
        ),
        FilterDefinition::evaluator(
            "length",
            vec![
                ParamSpec::required("field", ParamKind::Select(FIELDS)),
                ParamSpec::required("operator", ParamKind::Select(CompareOp::NAMES)),
                ParamSpec::required("length", ParamKind::Number),
            ],
            Arc::new(LengthCheck),
        ),
        FilterDefinition::evaluator(
            "json",
            vec![
                ParamSpec::required("field", ParamKind::Select(FIELDS)),
                ParamSpec::optional("type", ParamKind::Select(JSON_TYPES)),
            ],
            Arc::new(JsonShape),
        ),
    ])
}

fn text_field(p: &ParamReader<'_>) -> Result<TextField, ParamError> {
    let name = p.select("field", FIELDS)?;
    TextField::parse(name).ok_or_else(|| ParamError::NotAnOption {
        filter: p.filter().to_string(),
        param: "field".to_string(),
        value: name.to_string(),
        options: FIELDS,
    })
}

/// `true` when the filter wants the pattern present, `false` for `not_contains`.
fn wants_match(p: &ParamReader<'_>) -> Result<bool, ParamError> {
    Ok(p.select_or("type", MATCH_TYPES, "contains")? == "contains")
}

fn match_verdict(wanted: bool, matches: Vec<String>) -> Verdict {
    let found = !matches.is_empty();
    Verdict {
        passed: found == wanted,
        details: Some(json!({ "matches": matches })),
    }
}

// ── PII ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PiiKind {
    Email,
    Phone,
    CreditCard,
}

struct PiiScanner {
    kind: PiiKind,
    pattern: Regex,
}

impl PiiScanner {
    fn new(kind: PiiKind) -> Result<Self, RegistryError> {
        let source = match kind {
            PiiKind::Email => EMAIL_PATTERN,
            PiiKind::Phone => PHONE_PATTERN,
            PiiKind::CreditCard => CARD_PATTERN,
        };
        let pattern = Regex::new(source).map_err(|e| RegistryError::InvalidPattern {
            pattern: source.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { kind, pattern })
    }

    fn scan(&self, text: &str) -> Vec<String> {
        self.pattern
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .filter(|m| self.kind != PiiKind::CreditCard || luhn_valid(m))
            .collect()
    }
}

#[async_trait]
impl RunEvaluator for PiiScanner {
    async fn evaluate(&self, run: &Run, params: &ParamReader<'_>) -> Result<Verdict, EvaluatorError> {
        let field = text_field(params)?;
        let wanted = wants_match(params)?;
        let matches = run
            .text(field)
            .map(|text| self.scan(&text))
            .unwrap_or_default();
        Ok(match_verdict(wanted, matches))
    }
}

/// Luhn checksum over the digits of a candidate card number.
fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if !(13..=19).contains(&digits.len()) {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

// ── User regex ──────────────────────────────────────────────────────

struct PatternMatcher;

#[async_trait]
impl RunEvaluator for PatternMatcher {
    async fn evaluate(&self, run: &Run, params: &ParamReader<'_>) -> Result<Verdict, EvaluatorError> {
        let field = text_field(params)?;
        let wanted = wants_match(params)?;
        let source = params.text("pattern")?;
        let pattern = Regex::new(source).map_err(|e| ParamError::InvalidPattern {
            filter: params.filter().to_string(),
            pattern: source.to_string(),
            reason: e.to_string(),
        })?;
        let matches = run
            .text(field)
            .map(|text| {
                pattern
                    .find_iter(&text)
                    .map(|m| m.as_str().to_string())
                    .collect()
            })
            .unwrap_or_default();
        Ok(match_verdict(wanted, matches))
    }
}

// ── Length ──────────────────────────────────────────────────────────

struct LengthCheck;

#[async_trait]
impl RunEvaluator for LengthCheck {
    async fn evaluate(&self, run: &Run, params: &ParamReader<'_>) -> Result<Verdict, EvaluatorError> {
        let field = text_field(params)?;
        let name = params.select("operator", CompareOp::NAMES)?;
        let op = CompareOp::parse(name).ok_or_else(|| ParamError::NotAnOption {
            filter: params.filter().to_string(),
            param: "operator".to_string(),
            value: name.to_string(),
            options: CompareOp::NAMES,
        })?;
        let limit = params.number("length")?;
        let length = run.text(field).map(|t| t.chars().count()).unwrap_or(0);
        Ok(Verdict {
            passed: op.compare_f64(length as f64, limit),
            details: Some(json!({ "length": length })),
        })
    }
}

// ── JSON shape ──────────────────────────────────────────────────────

struct JsonShape;

#[async_trait]
impl RunEvaluator for JsonShape {
    async fn evaluate(&self, run: &Run, params: &ParamReader<'_>) -> Result<Verdict, EvaluatorError> {
        let field = text_field(params)?;
        let want_valid = params.select_or("type", JSON_TYPES, "valid")? == "valid";
        let valid = run
            .text(field)
            .and_then(|text| serde_json::from_str::<Value>(text.trim()).ok())
            .is_some_and(|v| v.is_object() || v.is_array());
        Ok(Verdict {
            passed: valid == want_valid,
            details: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::params::Params;
    use chrono::Utc;
    use uuid::Uuid;

    fn run_with_output(output: &str) -> Run {
        Run {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            run_type: "llm".to_string(),
            name: None,
            status: Some("success".to_string()),
            input: None,
            output: Some(json!({"role": "assistant", "content": output})),
            tags: None,
            metadata: None,
            prompt_tokens: None,
            completion_tokens: None,
            cost: None,
            external_user_id: None,
            created_at: Utc::now(),
            ended_at: None,
        }
    }

    fn params(v: Value) -> Params {
        serde_json::from_value(v).unwrap()
    }

    async fn eval(evaluator: &dyn RunEvaluator, run: &Run, p: Value) -> Result<Verdict, EvaluatorError> {
        let p = params(p);
        evaluator.evaluate(run, &ParamReader::new("test", &p)).await
    }

    #[tokio::test]
    async fn email_scanner_finds_addresses() {
        let scanner = PiiScanner::new(PiiKind::Email).unwrap();
        let run = run_with_output("reach me at a@b.com or ops@example.org");
        let verdict = eval(&scanner, &run, json!({"field": "output", "type": "contains"}))
            .await
            .unwrap();
        assert!(verdict.passed);
        assert_eq!(
            verdict.details,
            Some(json!({"matches": ["a@b.com", "ops@example.org"]}))
        );

        let verdict = eval(&scanner, &run, json!({"field": "output", "type": "not_contains"}))
            .await
            .unwrap();
        assert!(!verdict.passed);
    }

    #[tokio::test]
    async fn phone_scanner_handles_common_formats() {
        let scanner = PiiScanner::new(PiiKind::Phone).unwrap();
        for text in ["call +1 415-555-0132", "call (415) 555-0132"] {
            let verdict = eval(&scanner, &run_with_output(text), json!({"field": "output"}))
                .await
                .unwrap();
            assert!(verdict.passed, "expected a phone number in {text:?}");
        }
        let verdict = eval(&scanner, &run_with_output("no digits here"), json!({"field": "output"}))
            .await
            .unwrap();
        assert!(!verdict.passed);
    }

    #[tokio::test]
    async fn card_scanner_requires_luhn() {
        let scanner = PiiScanner::new(PiiKind::CreditCard).unwrap();
        let valid = eval(&scanner, &run_with_output("card 4111 1111 1111 1111"), json!({"field": "output"}))
            .await
            .unwrap();
        assert!(valid.passed);

        let invalid = eval(&scanner, &run_with_output("order 4111 1111 1111 1112"), json!({"field": "output"}))
            .await
            .unwrap();
        assert!(!invalid.passed);
    }

    #[tokio::test]
    async fn missing_text_counts_as_no_match() {
        let scanner = PiiScanner::new(PiiKind::Email).unwrap();
        let run = Run { output: None, ..run_with_output("") };
        let verdict = eval(&scanner, &run, json!({"field": "output"})).await.unwrap();
        assert!(!verdict.passed);
    }

    #[tokio::test]
    async fn user_regex_reports_invalid_pattern() {
        let run = run_with_output("abc");
        let err = eval(&PatternMatcher, &run, json!({"field": "output", "pattern": "("}))
            .await
            .unwrap_err();
        assert!(matches!(err, EvaluatorError::Params(ParamError::InvalidPattern { .. })));

        let ok = eval(&PatternMatcher, &run, json!({"field": "output", "pattern": "^a.c$"}))
            .await
            .unwrap();
        assert!(ok.passed);
    }

    #[tokio::test]
    async fn length_and_json_checks() {
        let run = run_with_output("{\"answer\": 42}");
        let long = eval(&LengthCheck, &run, json!({"field": "output", "operator": "gt", "length": 5}))
            .await
            .unwrap();
        assert!(long.passed);

        let json_ok = eval(&JsonShape, &run, json!({"field": "output"})).await.unwrap();
        assert!(json_ok.passed);

        let prose = run_with_output("plain words");
        let invalid = eval(&JsonShape, &prose, json!({"field": "output", "type": "invalid"}))
            .await
            .unwrap();
        assert!(invalid.passed);
    }

    #[test]
    fn luhn_examples() {
        assert!(luhn_valid("4111111111111111"));
        assert!(luhn_valid("5500-0000-0000-0004"));
        assert!(!luhn_valid("1234567812345678"));
        assert!(!luhn_valid("4111"));
    }
}
