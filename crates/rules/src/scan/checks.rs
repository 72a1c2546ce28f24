//! Top-level evaluation of a radar's checks for the scan job.
//!
//! Unlike the recursive interpreter, the top level runs operands one at a
//! time and stops early in both directions: `OR` at the first pass, `AND`
//! at the first failure. Nested nodes go through [`Interpreter::evaluate`].

use crate::interpreter::{EvalError, Interpreter};
use crate::logic::{LogicNode, LogicOp};
use crate::record::{CheckOutcome, Run};

/// Verdict for one run plus the outcomes of the operands actually evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct ChecksOutcome {
    pub passed: bool,
    pub results: Vec<CheckOutcome>,
}

/// Evaluate `checks` against `run`, stopping at the first decisive operand.
///
/// A bare leaf is treated as a single-operand `AND`. An identity node yields
/// its identity value with no results.
pub async fn run_checks(
    interp: &Interpreter<'_>,
    run: &Run,
    checks: &LogicNode,
) -> Result<ChecksOutcome, EvalError> {
    let (op, operands) = match checks {
        LogicNode::Identity(op) => {
            return Ok(ChecksOutcome {
                passed: op.identity(),
                results: Vec::new(),
            })
        }
        LogicNode::Combinator { op, operands } => (*op, operands.as_slice()),
        LogicNode::Leaf(_) => (LogicOp::And, std::slice::from_ref(checks)),
    };

    let mut results = Vec::with_capacity(operands.len());
    let mut passed = op.identity();
    for operand in operands {
        let outcome = interp.evaluate(run, operand).await?;
        let decisive = match op {
            LogicOp::Or => outcome.passed,
            LogicOp::And => !outcome.passed,
        };
        results.push(outcome);
        if decisive {
            passed = !op.identity();
            break;
        }
    }
    Ok(ChecksOutcome { passed, results })
}
