//! Boolean logic trees over leaf filters.
//!
//! A tree is the shared grammar of a radar's scope (`view`) and its pass/fail
//! condition (`checks`). On the wire it is JSON:
//! - `["AND", op, ...]` / `["OR", op, ...]`: combinator with operands
//! - `{"id": "status", "params": {...}}`: leaf filter invocation
//! - `"AND"` / `"OR"`: bare identity element (`true` / `false`)

mod json;
mod wire;


use serde_json::Value;

use crate::registry::{FilterRegistry, Params};

pub use wire::{deserialize, deserialize_or_default, serialize};

/// Boolean combinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicOp {
    And,
    Or,
}

impl LogicOp {
    pub fn as_str(self) -> &'static str {
        match self {
            LogicOp::And => "AND",
            LogicOp::Or => "OR",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "AND" => Some(LogicOp::And),
            "OR" => Some(LogicOp::Or),
            _ => None,
        }
    }

    /// Value of the combinator over zero operands.
    pub fn identity(self) -> bool {
        matches!(self, LogicOp::And)
    }
}

/// A leaf invocation of a registered filter.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterLeaf {
    pub id: String,
    pub params: Params,
}

/// A node of a logic tree. Compared structurally.
#[derive(Debug, Clone, PartialEq)]
pub enum LogicNode {
    Combinator { op: LogicOp, operands: Vec<LogicNode> },
    Leaf(FilterLeaf),
    Identity(LogicOp),
}

/// A logic tree could not be parsed.
#[derive(Debug, thiserror::Error)]
pub enum LogicError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown combinator `{0}` (expected AND or OR)")]
    UnknownOperator(String),

    #[error("combinator array is empty")]
    EmptyCombinator,

    #[error("combinator array must start with AND or OR, found {0}")]
    MissingOperator(String),

    #[error("invalid leaf: {0}")]
    InvalidLeaf(String),

    #[error("unexpected value in logic tree: {0}")]
    UnexpectedValue(String),

    #[error("serialized logic is not a single encoded value")]
    Encoding,
}

impl LogicNode {
    pub fn and(operands: Vec<LogicNode>) -> Self {
        LogicNode::Combinator { op: LogicOp::And, operands }
    }

    pub fn or(operands: Vec<LogicNode>) -> Self {
        LogicNode::Combinator { op: LogicOp::Or, operands }
    }

    /// Leaf with `params` given as a JSON object; any other value means no params.
    pub fn leaf(id: impl Into<String>, params: Value) -> Self {
        let params = match params {
            Value::Object(map) => map,
            _ => Params::new(),
        };
        LogicNode::Leaf(FilterLeaf { id: id.into(), params })
    }

    /// Whether any leaf resolves to a filter without a pushdown form.
    ///
    /// Unknown ids and identity nodes never count: they compile to constants.
    pub fn has_non_pushdown_leaf(&self, registry: &FilterRegistry) -> bool {
        match self {
            LogicNode::Identity(_) => false,
            LogicNode::Combinator { operands, .. } => {
                operands.iter().any(|op| op.has_non_pushdown_leaf(registry))
            }
            LogicNode::Leaf(leaf) => registry
                .lookup(&leaf.id)
                .is_some_and(|def| !def.is_pushdown()),
        }
    }

    /// Leaves in depth-first, left-to-right order.
    pub fn leaves(&self) -> Vec<&FilterLeaf> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a FilterLeaf>) {
        match self {
            LogicNode::Leaf(leaf) => out.push(leaf),
            LogicNode::Combinator { operands, .. } => {
                for op in operands {
                    op.collect_leaves(out);
                }
            }
            LogicNode::Identity(_) => {}
        }
    }
}

impl Default for LogicNode {
    /// Empty `AND`: selects everything.
    fn default() -> Self {
        LogicNode::and(Vec::new())
    }
}
