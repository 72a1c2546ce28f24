//! Recursive evaluation of a logic tree against a single run.
//!
//! Pushdown leaves are answered by the storage backend; evaluator leaves
//! run in process. Mixed trees are supported at any depth.

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;

use crate::logic::{FilterLeaf, LogicNode, LogicOp};
use crate::record::{CheckOutcome, OutcomeDetails, Run};
use crate::registry::{EvaluatorError, FilterRegistry, ParamError, ParamReader};
use crate::storage::{RadarStorage, StoreError};

/// Evaluation of a tree failed; the run should be left unscored.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error(transparent)]
    Params(#[from] ParamError),

    #[error(transparent)]
    Evaluator(#[from] EvaluatorError),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Evaluates logic trees with a registry and a storage backend.
#[derive(Clone, Copy)]
pub struct Interpreter<'a> {
    registry: &'a FilterRegistry,
    storage: &'a dyn RadarStorage,
}

impl<'a> Interpreter<'a> {
    pub fn new(registry: &'a FilterRegistry, storage: &'a dyn RadarStorage) -> Self {
        Self { registry, storage }
    }

    pub fn registry(&self) -> &'a FilterRegistry {
        self.registry
    }

    pub fn storage(&self) -> &'a dyn RadarStorage {
        self.storage
    }

    /// Evaluate `node` against `run`.
    ///
    /// `OR` evaluates operands in order and stops at the first pass; its
    /// details then hold only that outcome, otherwise one bare failure per
    /// operand. `AND` evaluates all operands concurrently and keeps every
    /// outcome in operand order; an evaluator error fails the node only after
    /// every operand has finished. Unknown filter ids pass.
    pub fn evaluate<'s>(
        &'s self,
        run: &'s Run,
        node: &'s LogicNode,
    ) -> BoxFuture<'s, Result<CheckOutcome, EvalError>> {
        async move {
            match node {
                LogicNode::Identity(op) => Ok(if op.identity() {
                    CheckOutcome::pass()
                } else {
                    CheckOutcome::fail()
                }),
                LogicNode::Combinator { op: LogicOp::Or, operands } => {
                    for operand in operands {
                        let outcome = self.evaluate(run, operand).await?;
                        if outcome.passed {
                            return Ok(CheckOutcome::combined(true, vec![outcome]));
                        }
                    }
                    let failures = operands.iter().map(|_| CheckOutcome::fail()).collect();
                    Ok(CheckOutcome::combined(false, failures))
                }
                LogicNode::Combinator { op: LogicOp::And, operands } => {
                    // Every started operand runs to completion, even after a sibling errors.
                    let outcomes = join_all(operands.iter().map(|operand| self.evaluate(run, operand)))
                        .await
                        .into_iter()
                        .collect::<Result<Vec<_>, _>>()?;
                    let passed = outcomes.iter().all(|o| o.passed);
                    Ok(CheckOutcome::combined(passed, outcomes))
                }
                LogicNode::Leaf(leaf) => self.evaluate_leaf(run, leaf).await,
            }
        }
        .boxed()
    }

    async fn evaluate_leaf(&self, run: &Run, leaf: &FilterLeaf) -> Result<CheckOutcome, EvalError> {
        let Some(def) = self.registry.lookup(&leaf.id) else {
            return Ok(CheckOutcome::pass());
        };

        if let Some(predicate) = def.build_predicate(&leaf.params) {
            let matched = self.storage.run_matches(run, &predicate?).await?;
            return Ok(CheckOutcome::leaf(&leaf.id, matched));
        }

        let Some(evaluator) = def.run_evaluator() else {
            return Ok(CheckOutcome::pass());
        };
        def.validate(&leaf.params)?;
        let verdict = evaluator
            .evaluate(run, &ParamReader::new(&leaf.id, &leaf.params))
            .await?;
        Ok(CheckOutcome {
            passed: verdict.passed,
            filter_id: Some(leaf.id.clone()),
            details: verdict.details.map(OutcomeDetails::Evaluator),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{FilterDefinition, RunEvaluator, Verdict};
    use crate::storage::MemoryStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use crate::testing::{self, Broken, Fixed};
    use serde_json::json;

    fn registry_with(evaluators: Vec<(&str, Arc<Fixed>)>) -> FilterRegistry {
        let mut builder = FilterRegistry::builder().with_builtins().unwrap();
        for (id, eval) in evaluators {
            builder = builder.register(FilterDefinition::evaluator(id, vec![], eval));
        }
        builder.build()
    }

    #[tokio::test]
    async fn or_stops_at_first_pass() {
        let (a, b, c) = (Fixed::new(false), Fixed::new(true), Fixed::new(false));
        let registry = registry_with(vec![("a", a.clone()), ("b", b.clone()), ("c", c.clone())]);
        let storage = MemoryStorage::new();
        let interp = Interpreter::new(&registry, &storage);

        let tree = LogicNode::or(vec![
            LogicNode::leaf("a", json!({})),
            LogicNode::leaf("b", json!({})),
            LogicNode::leaf("c", json!({})),
        ]);
        let outcome = interp.evaluate(&testing::run(), &tree).await.unwrap();

        assert!(outcome.passed);
        assert_eq!(
            outcome.details,
            Some(OutcomeDetails::Operands(vec![CheckOutcome::leaf("b", true)]))
        );
        assert_eq!((a.calls(), b.calls(), c.calls()), (1, 1, 0));
    }

    #[tokio::test]
    async fn failing_or_reports_one_placeholder_per_operand() {
        let registry = registry_with(vec![("a", Fixed::new(false)), ("b", Fixed::new(false))]);
        let storage = MemoryStorage::new();
        let interp = Interpreter::new(&registry, &storage);

        let tree = LogicNode::or(vec![LogicNode::leaf("a", json!({})), LogicNode::leaf("b", json!({}))]);
        let outcome = interp.evaluate(&testing::run(), &tree).await.unwrap();

        assert!(!outcome.passed);
        assert_eq!(
            outcome.details,
            Some(OutcomeDetails::Operands(vec![CheckOutcome::fail(), CheckOutcome::fail()]))
        );
    }

    #[tokio::test]
    async fn and_keeps_every_outcome() {
        let (a, b, c) = (Fixed::new(true), Fixed::new(false), Fixed::new(true));
        let registry = registry_with(vec![("a", a.clone()), ("b", b.clone()), ("c", c.clone())]);
        let storage = MemoryStorage::new();
        let interp = Interpreter::new(&registry, &storage);

        let tree = LogicNode::and(vec![
            LogicNode::leaf("a", json!({})),
            LogicNode::leaf("b", json!({})),
            LogicNode::leaf("c", json!({})),
        ]);
        let outcome = interp.evaluate(&testing::run(), &tree).await.unwrap();

        assert!(!outcome.passed);
        assert_eq!(
            outcome.details,
            Some(OutcomeDetails::Operands(vec![
                CheckOutcome::leaf("a", true),
                CheckOutcome::leaf("b", false),
                CheckOutcome::leaf("c", true),
            ]))
        );
        assert_eq!((a.calls(), b.calls(), c.calls()), (1, 1, 1));
    }

    #[tokio::test]
    async fn identities_and_unknown_filters() {
        let registry = FilterRegistry::builtin().unwrap();
        let storage = MemoryStorage::new();
        let interp = Interpreter::new(&registry, &storage);
        let run = testing::run();

        let empty_and = interp.evaluate(&run, &LogicNode::and(vec![])).await.unwrap();
        assert!(empty_and.passed);
        let empty_or = interp.evaluate(&run, &LogicNode::or(vec![])).await.unwrap();
        assert!(!empty_or.passed);
        assert!(interp.evaluate(&run, &LogicNode::Identity(LogicOp::And)).await.unwrap().passed);
        assert!(!interp.evaluate(&run, &LogicNode::Identity(LogicOp::Or)).await.unwrap().passed);

        let unknown = interp
            .evaluate(&run, &LogicNode::leaf("nonexistent", json!({})))
            .await
            .unwrap();
        assert_eq!(unknown, CheckOutcome::pass());
    }

    #[tokio::test]
    async fn pushdown_leaf_asks_storage() {
        let registry = FilterRegistry::builtin().unwrap();
        let storage = MemoryStorage::new();
        let interp = Interpreter::new(&registry, &storage);
        let run = testing::run();

        let success = LogicNode::leaf("status", json!({"status": "success"}));
        let error = LogicNode::leaf("status", json!({"status": "error"}));
        assert_eq!(
            interp.evaluate(&run, &success).await.unwrap(),
            CheckOutcome::leaf("status", true)
        );
        assert_eq!(
            interp.evaluate(&run, &error).await.unwrap(),
            CheckOutcome::leaf("status", false)
        );
    }

    #[tokio::test]
    async fn evaluator_details_are_tagged() {
        let registry = FilterRegistry::builtin().unwrap();
        let storage = MemoryStorage::new();
        let interp = Interpreter::new(&registry, &storage);
        let run = Run {
            output: Some(json!("write to a@b.com")),
            ..testing::run()
        };

        let outcome = interp
            .evaluate(&run, &LogicNode::leaf("email", json!({"field": "output"})))
            .await
            .unwrap();
        assert!(outcome.passed);
        assert_eq!(outcome.filter_id.as_deref(), Some("email"));
        assert_eq!(
            outcome.details,
            Some(OutcomeDetails::Evaluator(json!({"matches": ["a@b.com"]})))
        );
    }

    /// Sleeps before passing and records that it finished.
    struct Slow {
        finished: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl RunEvaluator for Slow {
        async fn evaluate(&self, _run: &Run, _params: &ParamReader<'_>) -> Result<Verdict, EvaluatorError> {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(Verdict { passed: true, details: None })
        }
    }

    #[tokio::test]
    async fn and_lets_siblings_finish_when_one_errors() {
        let slow = Arc::new(Slow { finished: AtomicUsize::new(0) });
        let registry = FilterRegistry::builder()
            .register(FilterDefinition::evaluator("slow", vec![], slow.clone()))
            .register(FilterDefinition::evaluator("broken", vec![], Arc::new(Broken)))
            .build();
        let storage = MemoryStorage::new();
        let interp = Interpreter::new(&registry, &storage);

        let tree = LogicNode::and(vec![
            LogicNode::leaf("slow", json!({})),
            LogicNode::leaf("broken", json!({})),
        ]);
        let result = interp.evaluate(&testing::run(), &tree).await;

        assert!(matches!(result, Err(EvalError::Evaluator(_))));
        assert_eq!(slow.finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn errors_propagate() {
        let registry = FilterRegistry::builder()
            .with_builtins()
            .unwrap()
            .register(FilterDefinition::evaluator("broken", vec![], Arc::new(Broken)))
            .build();
        let storage = MemoryStorage::new();
        let interp = Interpreter::new(&registry, &storage);
        let run = testing::run();

        let broken = LogicNode::and(vec![LogicNode::leaf("broken", json!({}))]);
        assert!(matches!(
            interp.evaluate(&run, &broken).await,
            Err(EvalError::Evaluator(EvaluatorError::Failed { .. }))
        ));

        let bad_params = LogicNode::leaf("duration", json!({"operator": "gt"}));
        assert!(matches!(
            interp.evaluate(&run, &bad_params).await,
            Err(EvalError::Params(ParamError::Missing { .. }))
        ));
    }
}
