//! JSON form of logic trees.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use super::{FilterLeaf, LogicError, LogicNode, LogicOp};

impl LogicNode {
    /// Parse the JSON form.
    pub fn from_value(value: &Value) -> Result<Self, LogicError> {
        match value {
            Value::String(s) => LogicOp::parse(s)
                .map(LogicNode::Identity)
                .ok_or_else(|| LogicError::UnknownOperator(s.clone())),
            Value::Array(items) => {
                let (head, rest) = items.split_first().ok_or(LogicError::EmptyCombinator)?;
                let op = match head {
                    Value::String(s) => {
                        LogicOp::parse(s).ok_or_else(|| LogicError::UnknownOperator(s.clone()))?
                    }
                    other => return Err(LogicError::MissingOperator(other.to_string())),
                };
                let operands = rest
                    .iter()
                    .map(LogicNode::from_value)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(LogicNode::Combinator { op, operands })
            }
            Value::Object(map) => parse_leaf(map).map(LogicNode::Leaf),
            other => Err(LogicError::UnexpectedValue(other.to_string())),
        }
    }

    /// Render the JSON form.
    pub fn to_value(&self) -> Value {
        match self {
            LogicNode::Identity(op) => Value::String(op.as_str().to_string()),
            LogicNode::Combinator { op, operands } => {
                let mut items = Vec::with_capacity(operands.len() + 1);
                items.push(Value::String(op.as_str().to_string()));
                items.extend(operands.iter().map(LogicNode::to_value));
                Value::Array(items)
            }
            LogicNode::Leaf(leaf) => {
                let mut map = Map::new();
                map.insert("id".to_string(), Value::String(leaf.id.clone()));
                map.insert("params".to_string(), Value::Object(leaf.params.clone()));
                Value::Object(map)
            }
        }
    }
}

fn parse_leaf(map: &Map<String, Value>) -> Result<FilterLeaf, LogicError> {
    let id = match map.get("id") {
        Some(Value::String(id)) if !id.is_empty() => id.clone(),
        Some(other) => {
            return Err(LogicError::InvalidLeaf(format!("`id` must be a non-empty string, got {other}")))
        }
        None => return Err(LogicError::InvalidLeaf("missing `id`".to_string())),
    };
    let params = match map.get("params") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(params)) => params.clone(),
        Some(other) => {
            return Err(LogicError::InvalidLeaf(format!(
                "`params` of `{id}` must be an object, got {other}"
            )))
        }
    };
    Ok(FilterLeaf { id, params })
}

impl Serialize for LogicNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for LogicNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        LogicNode::from_value(&value).map_err(D::Error::custom)
    }
}
