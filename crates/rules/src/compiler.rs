//! Compile pushdown-only logic trees into storage predicates.

use crate::logic::{LogicNode, LogicOp};
use crate::predicate::Predicate;
use crate::registry::{FilterRegistry, ParamError};

/// A tree could not be translated to a single storage predicate.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("filter `{0}` has no pushdown form and needs per-run evaluation")]
    NotPushdown(String),

    #[error(transparent)]
    Params(#[from] ParamError),
}

/// Translate `node` into a [`Predicate`].
///
/// Defined for trees where [`LogicNode::has_non_pushdown_leaf`] is `false`;
/// any evaluator-only leaf yields [`CompileError::NotPushdown`]. Unknown
/// filter ids compile to `true`.
pub fn compile(node: &LogicNode, registry: &FilterRegistry) -> Result<Predicate, CompileError> {
    match node {
        LogicNode::Identity(op) => Ok(constant(op.identity())),
        LogicNode::Combinator { op, operands } => {
            let parts = operands
                .iter()
                .map(|operand| compile(operand, registry))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(match op {
                LogicOp::And => Predicate::And(parts),
                LogicOp::Or => Predicate::Or(parts),
            })
        }
        LogicNode::Leaf(leaf) => match registry.lookup(&leaf.id) {
            None => Ok(Predicate::True),
            Some(def) => match def.build_predicate(&leaf.params) {
                Some(predicate) => Ok(predicate?),
                None => Err(CompileError::NotPushdown(leaf.id.clone())),
            },
        },
    }
}

fn constant(value: bool) -> Predicate {
    if value { Predicate::True } else { Predicate::False }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::{CompareOp, Field, Scalar};
    use serde_json::json;

    fn registry() -> FilterRegistry {
        FilterRegistry::builtin().unwrap()
    }

    fn tree(v: serde_json::Value) -> LogicNode {
        LogicNode::from_value(&v).unwrap()
    }

    #[test]
    fn compiles_nested_pushdown_tree() {
        let node = tree(json!([
            "AND",
            {"id": "type", "params": {"type": "llm"}},
            ["OR",
                {"id": "status", "params": {"status": "error"}},
                {"id": "duration", "params": {"operator": "gt", "duration": 30000}}]
        ]));

        let predicate = compile(&node, &registry()).unwrap();
        assert_eq!(
            predicate,
            Predicate::And(vec![
                Predicate::Compare {
                    field: Field::Type,
                    op: CompareOp::Eq,
                    value: Scalar::Text("llm".into()),
                },
                Predicate::Or(vec![
                    Predicate::Compare {
                        field: Field::Status,
                        op: CompareOp::Eq,
                        value: Scalar::Text("error".into()),
                    },
                    Predicate::Compare {
                        field: Field::DurationMs,
                        op: CompareOp::Gt,
                        value: Scalar::Number(30000.0),
                    },
                ]),
            ])
        );
    }

    #[test]
    fn identities_and_unknown_leaves() {
        let r = registry();
        assert_eq!(compile(&tree(json!("AND")), &r).unwrap(), Predicate::True);
        assert_eq!(compile(&tree(json!("OR")), &r).unwrap(), Predicate::False);
        assert_eq!(compile(&tree(json!(["AND"])), &r).unwrap(), Predicate::And(vec![]));
        assert_eq!(compile(&tree(json!(["OR"])), &r).unwrap(), Predicate::Or(vec![]));
        assert_eq!(compile(&tree(json!({"id": "nonexistent"})), &r).unwrap(), Predicate::True);
    }

    #[test]
    fn evaluator_leaf_is_outside_the_domain() {
        let node = tree(json!(["OR", {"id": "status", "params": {"status": "error"}},
                                     {"id": "email", "params": {"field": "output"}}]));
        assert!(node.has_non_pushdown_leaf(&registry()));
        assert!(matches!(
            compile(&node, &registry()),
            Err(CompileError::NotPushdown(id)) if id == "email"
        ));
    }

    #[test]
    fn invalid_params_surface_as_errors() {
        let node = tree(json!({"id": "duration", "params": {"operator": "soon", "duration": 1}}));
        assert!(matches!(compile(&node, &registry()), Err(CompileError::Params(_))));
    }
}
