//! Filter registry: the catalog of leaf filters a logic tree may reference.
//!
//! Each [`FilterDefinition`] is either a storage pushdown builder, an
//! in-process evaluator, or both. The registry is assembled once at startup
//! and is immutable afterwards; lookups of unknown ids return `None`, which
//! the compiler and interpreter treat as an always-passing leaf.

mod evaluators;
pub mod params;
mod pushdown;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::predicate::Predicate;
use crate::record::Run;

pub use params::{ParamError, ParamKind, ParamReader, ParamSpec, Params};

/// Pure translation of a leaf's params into a storage predicate.
pub type PushdownBuilder = fn(&ParamReader<'_>) -> Result<Predicate, ParamError>;

/// Result of an in-process evaluator.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub passed: bool,
    pub details: Option<Value>,
}

/// A leaf evaluator failed; the run stays unscored for this pass.
#[derive(Debug, thiserror::Error)]
pub enum EvaluatorError {
    #[error(transparent)]
    Params(#[from] ParamError),

    #[error("filter `{filter}` failed: {reason}")]
    Failed { filter: String, reason: String },
}

/// Out-of-store evaluation of a filter against one run.
///
/// Implementations may perform I/O (e.g. a scoring model) and own their
/// timeouts; they must not mutate the run.
#[async_trait]
pub trait RunEvaluator: Send + Sync {
    async fn evaluate(&self, run: &Run, params: &ParamReader<'_>) -> Result<Verdict, EvaluatorError>;
}

/// Errors while assembling the registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("built-in pattern `{pattern}` does not compile: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Execution capabilities of a filter.
#[derive(Clone)]
pub enum FilterKind {
    Pushdown(PushdownBuilder),
    Evaluator(Arc<dyn RunEvaluator>),
    /// Both forms available; pushdown is preferred.
    Hybrid {
        pushdown: PushdownBuilder,
        evaluator: Arc<dyn RunEvaluator>,
    },
}

/// A named filter and the params it accepts.
#[derive(Clone)]
pub struct FilterDefinition {
    id: String,
    params: Vec<ParamSpec>,
    kind: FilterKind,
}

impl FilterDefinition {
    pub fn pushdown(id: impl Into<String>, params: Vec<ParamSpec>, builder: PushdownBuilder) -> Self {
        Self {
            id: id.into(),
            params,
            kind: FilterKind::Pushdown(builder),
        }
    }

    pub fn evaluator(
        id: impl Into<String>,
        params: Vec<ParamSpec>,
        evaluator: Arc<dyn RunEvaluator>,
    ) -> Self {
        Self {
            id: id.into(),
            params,
            kind: FilterKind::Evaluator(evaluator),
        }
    }

    pub fn hybrid(
        id: impl Into<String>,
        params: Vec<ParamSpec>,
        pushdown: PushdownBuilder,
        evaluator: Arc<dyn RunEvaluator>,
    ) -> Self {
        Self {
            id: id.into(),
            params,
            kind: FilterKind::Hybrid { pushdown, evaluator },
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn kind(&self) -> &FilterKind {
        &self.kind
    }

    pub fn pushdown_builder(&self) -> Option<PushdownBuilder> {
        match &self.kind {
            FilterKind::Pushdown(builder) | FilterKind::Hybrid { pushdown: builder, .. } => {
                Some(*builder)
            }
            FilterKind::Evaluator(_) => None,
        }
    }

    pub fn run_evaluator(&self) -> Option<&Arc<dyn RunEvaluator>> {
        match &self.kind {
            FilterKind::Evaluator(evaluator) | FilterKind::Hybrid { evaluator, .. } => {
                Some(evaluator)
            }
            FilterKind::Pushdown(_) => None,
        }
    }

    pub fn is_pushdown(&self) -> bool {
        self.pushdown_builder().is_some()
    }

    /// Check `params` against this filter's declaration.
    pub fn validate(&self, params: &Params) -> Result<(), ParamError> {
        params::validate(&self.id, &self.params, params)
    }

    /// Validate and build the pushdown predicate, if this filter has one.
    pub fn build_predicate(&self, params: &Params) -> Option<Result<Predicate, ParamError>> {
        let builder = self.pushdown_builder()?;
        Some(
            self.validate(params)
                .and_then(|()| builder(&ParamReader::new(&self.id, params))),
        )
    }
}

impl fmt::Debug for FilterDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            FilterKind::Pushdown(_) => "pushdown",
            FilterKind::Evaluator(_) => "evaluator",
            FilterKind::Hybrid { .. } => "hybrid",
        };
        f.debug_struct("FilterDefinition")
            .field("id", &self.id)
            .field("kind", &kind)
            .field("params", &self.params)
            .finish()
    }
}

// ── Registry ────────────────────────────────────────────────────────

/// Ordered, immutable mapping from filter id to definition.
#[derive(Debug, Clone, Default)]
pub struct FilterRegistry {
    filters: Vec<FilterDefinition>,
    index: HashMap<String, usize>,
}

impl FilterRegistry {
    /// The built-in catalog.
    pub fn builtin() -> Result<Self, RegistryError> {
        Ok(Self::builder().with_builtins()?.build())
    }

    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn lookup(&self, id: &str) -> Option<&FilterDefinition> {
        self.index.get(id).map(|&i| &self.filters[i])
    }

    /// Filter ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.filters.iter().map(|f| f.id())
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

/// Assembles a [`FilterRegistry`]. Registering an id twice replaces the
/// earlier definition in place.
#[derive(Default)]
pub struct RegistryBuilder {
    filters: Vec<FilterDefinition>,
}

impl RegistryBuilder {
    pub fn with_builtins(mut self) -> Result<Self, RegistryError> {
        for def in pushdown::definitions() {
            self = self.register(def);
        }
        for def in evaluators::definitions()? {
            self = self.register(def);
        }
        Ok(self)
    }

    pub fn register(mut self, def: FilterDefinition) -> Self {
        match self.filters.iter().position(|f| f.id == def.id) {
            Some(i) => self.filters[i] = def,
            None => self.filters.push(def),
        }
        self
    }

    pub fn build(self) -> FilterRegistry {
        let index = self
            .filters
            .iter()
            .enumerate()
            .map(|(i, f)| (f.id.clone(), i))
            .collect();
        FilterRegistry {
            filters: self.filters,
            index,
        }
    }
}
