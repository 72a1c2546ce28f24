//! Radar rule engine for captured LLM runs.
//!
//! This crate provides:
//! - A catalog of leaf filters with storage pushdown and in-process forms
//! - Boolean logic trees over those filters, with a stable wire encoding
//! - Compilation of pushdown-only trees to SQL predicates
//! - A recursive interpreter for mixed trees
//! - The periodic scan job that scores unscored runs per radar
//! - CRUD and statistics for stored radars

pub mod compiler;
pub mod evaluation;
pub mod interpreter;
pub mod logic;
pub mod predicate;
pub mod radar_store;
pub mod record;
pub mod registry;
pub mod scan;
pub mod storage;

#[cfg(test)]
mod testing;

pub use compiler::{compile, CompileError};
pub use interpreter::{EvalError, Interpreter};
pub use logic::{LogicError, LogicNode, LogicOp};
pub use record::{CheckOutcome, Radar, RadarResult, Run};
pub use registry::FilterRegistry;
pub use scan::{RadarScanner, ScanError, ScanReport, ScanStats};
pub use storage::{MemoryStorage, PgStorage, RadarStorage, StoreError};
