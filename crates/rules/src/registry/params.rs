//! Structural validation of leaf params.
//!
//! Each filter declares the params it reads as a list of [`ParamSpec`]s.
//! Params are checked against that list before a leaf is compiled or
//! evaluated; unknown keys are ignored.

use serde_json::{Map, Value};

/// Raw params object of a leaf invocation.
pub type Params = Map<String, Value>;

/// Expected shape of a single param.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Text,
    /// A JSON number, or a string that parses as one.
    Number,
    /// A string restricted to the listed options.
    Select(&'static [&'static str]),
    /// An array of strings or numbers.
    List,
}

impl ParamKind {
    fn describe(&self) -> &'static str {
        match self {
            ParamKind::Text => "a string",
            ParamKind::Number => "a number",
            ParamKind::Select(_) => "a string",
            ParamKind::List => "an array of strings or numbers",
        }
    }
}

/// Declaration of one param a filter reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
}

impl ParamSpec {
    pub const fn required(name: &'static str, kind: ParamKind) -> Self {
        Self { name, kind, required: true }
    }

    pub const fn optional(name: &'static str, kind: ParamKind) -> Self {
        Self { name, kind, required: false }
    }
}

/// A leaf's params do not fit its filter's declaration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParamError {
    #[error("filter `{filter}`: missing required param `{param}`")]
    Missing { filter: String, param: String },

    #[error("filter `{filter}`: param `{param}` must be {expected}")]
    WrongType {
        filter: String,
        param: String,
        expected: &'static str,
    },

    #[error("filter `{filter}`: param `{param}` must be one of {options:?}, got `{value}`")]
    NotAnOption {
        filter: String,
        param: String,
        value: String,
        options: &'static [&'static str],
    },

    #[error("filter `{filter}`: invalid pattern `{pattern}`: {reason}")]
    InvalidPattern {
        filter: String,
        pattern: String,
        reason: String,
    },
}

/// Check `params` against `schema`.
pub fn validate(filter: &str, schema: &[ParamSpec], params: &Params) -> Result<(), ParamError> {
    let reader = ParamReader::new(filter, params);
    for spec in schema {
        match params.get(spec.name) {
            None | Some(Value::Null) => {
                if spec.required {
                    return Err(reader.missing(spec.name));
                }
            }
            Some(_) => match spec.kind {
                ParamKind::Text => {
                    reader.text(spec.name)?;
                }
                ParamKind::Number => {
                    reader.number(spec.name)?;
                }
                ParamKind::Select(options) => {
                    reader.select(spec.name, options)?;
                }
                ParamKind::List => {
                    reader.list(spec.name)?;
                }
            },
        }
    }
    Ok(())
}

/// Typed accessors over a leaf's params, reporting errors against the filter id.
#[derive(Debug, Clone, Copy)]
pub struct ParamReader<'a> {
    filter: &'a str,
    params: &'a Params,
}

impl<'a> ParamReader<'a> {
    pub fn new(filter: &'a str, params: &'a Params) -> Self {
        Self { filter, params }
    }

    pub fn filter(&self) -> &'a str {
        self.filter
    }

    fn missing(&self, param: &str) -> ParamError {
        ParamError::Missing {
            filter: self.filter.to_string(),
            param: param.to_string(),
        }
    }

    fn wrong_type(&self, param: &str, kind: ParamKind) -> ParamError {
        ParamError::WrongType {
            filter: self.filter.to_string(),
            param: param.to_string(),
            expected: kind.describe(),
        }
    }

    fn get(&self, name: &str) -> Option<&'a Value> {
        self.params.get(name).filter(|v| !v.is_null())
    }

    pub fn text(&self, name: &str) -> Result<&'a str, ParamError> {
        match self.get(name) {
            Some(Value::String(s)) => Ok(s.as_str()),
            Some(_) => Err(self.wrong_type(name, ParamKind::Text)),
            None => Err(self.missing(name)),
        }
    }

    pub fn number(&self, name: &str) -> Result<f64, ParamError> {
        match self.get(name) {
            Some(Value::Number(n)) => n
                .as_f64()
                .ok_or_else(|| self.wrong_type(name, ParamKind::Number)),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map_err(|_| self.wrong_type(name, ParamKind::Number)),
            Some(_) => Err(self.wrong_type(name, ParamKind::Number)),
            None => Err(self.missing(name)),
        }
    }

    pub fn select(
        &self,
        name: &str,
        options: &'static [&'static str],
    ) -> Result<&'a str, ParamError> {
        let value = self.text(name)?;
        if options.contains(&value) {
            Ok(value)
        } else {
            Err(ParamError::NotAnOption {
                filter: self.filter.to_string(),
                param: name.to_string(),
                value: value.to_string(),
                options,
            })
        }
    }

    /// Like [`select`](Self::select) but falls back to `default` when absent.
    pub fn select_or(
        &self,
        name: &str,
        options: &'static [&'static str],
        default: &'static str,
    ) -> Result<&'a str, ParamError> {
        match self.get(name) {
            None => Ok(default),
            Some(_) => self.select(name, options),
        }
    }

    pub fn list(&self, name: &str) -> Result<&'a [Value], ParamError> {
        match self.get(name) {
            Some(Value::Array(items))
                if items.iter().all(|v| v.is_string() || v.is_number()) =>
            {
                Ok(items.as_slice())
            }
            Some(_) => Err(self.wrong_type(name, ParamKind::List)),
            None => Err(self.missing(name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(v: Value) -> Params {
        match v {
            Value::Object(map) => map,
            _ => panic!("params must be an object"),
        }
    }

    const SCHEMA: &[ParamSpec] = &[
        ParamSpec::required("operator", ParamKind::Select(&["gt", "lt"])),
        ParamSpec::required("duration", ParamKind::Number),
        ParamSpec::optional("tags", ParamKind::List),
    ];

    #[test]
    fn accepts_well_formed_params() {
        let p = params(json!({"operator": "gt", "duration": 30000, "extra": true}));
        assert!(validate("duration", SCHEMA, &p).is_ok());

        let p = params(json!({"operator": "lt", "duration": "1.5"}));
        assert!(validate("duration", SCHEMA, &p).is_ok());
        assert_eq!(ParamReader::new("duration", &p).number("duration").unwrap(), 1.5);
    }

    #[test]
    fn reports_missing_required() {
        let p = params(json!({"operator": "gt"}));
        let err = validate("duration", SCHEMA, &p).unwrap_err();
        assert_eq!(
            err,
            ParamError::Missing { filter: "duration".into(), param: "duration".into() }
        );
    }

    #[test]
    fn reports_bad_option_and_type() {
        let p = params(json!({"operator": "between", "duration": 1}));
        assert!(matches!(
            validate("duration", SCHEMA, &p),
            Err(ParamError::NotAnOption { .. })
        ));

        let p = params(json!({"operator": "gt", "duration": 1, "tags": [{"a": 1}]}));
        assert!(matches!(
            validate("duration", SCHEMA, &p),
            Err(ParamError::WrongType { expected: "an array of strings or numbers", .. })
        ));
    }

    #[test]
    fn select_or_defaults_when_absent() {
        let p = params(json!({}));
        let reader = ParamReader::new("email", &p);
        assert_eq!(
            reader.select_or("type", &["contains", "not_contains"], "contains").unwrap(),
            "contains"
        );
    }
}
