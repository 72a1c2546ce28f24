//! The periodic rule scan.
//!
//! For every radar, fetch a batch of unscored runs inside its scope and
//! persist one result per run. Fully pushdown checks are decided with a
//! single storage query per batch; anything else is evaluated run by run.
//!
//! Failures are contained: a failing run stays unscored and is retried on
//! the next pass, a malformed radar is skipped, and only a failure to list
//! radars ends the pass early.

mod checks;
mod single_flight;

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use radar_core::config::ScanConfig;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::compiler::{compile, CompileError};
use crate::interpreter::{EvalError, Interpreter};
use crate::logic::{LogicError, LogicNode};
use crate::predicate::Predicate;
use crate::record::{NewRadarResult, Radar, Run};
use crate::registry::FilterRegistry;
use crate::storage::{RadarStorage, StoreError};

pub use checks::{run_checks, ChecksOutcome};
pub use single_flight::{FlightPermit, SingleFlight};

/// A scan pass, or one radar's part of it, failed.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("radar {radar_id} has malformed {tree}: {source}")]
    MalformedRadar {
        radar_id: Uuid,
        tree: &'static str,
        #[source]
        source: LogicError,
    },

    #[error("radar {radar_id} scope cannot be pushed to storage: {source}")]
    Scope {
        radar_id: Uuid,
        #[source]
        source: CompileError,
    },

    #[error("radar {radar_id} checks cannot be compiled: {source}")]
    Checks {
        radar_id: Uuid,
        #[source]
        source: CompileError,
    },

    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Counters for one completed pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub radars: usize,
    pub radars_failed: usize,
    pub runs_fetched: usize,
    /// Runs with a stored result this pass.
    pub runs_scored: usize,
    /// Scored runs whose verdict was `passed = true`.
    pub runs_passed: usize,
    /// Scored runs whose verdict was `passed = false`.
    pub runs_not_passed: usize,
    /// Runs left unscored because evaluation or the insert errored.
    pub runs_errored: usize,
}

impl ScanStats {
    fn absorb(&mut self, radar: RadarStats) {
        self.runs_fetched += radar.fetched;
        self.runs_scored += radar.scored;
        self.runs_passed += radar.passed;
        self.runs_not_passed += radar.scored - radar.passed;
        self.runs_errored += radar.errored;
    }
}

#[derive(Debug, Default)]
struct RadarStats {
    fetched: usize,
    scored: usize,
    passed: usize,
    errored: usize,
}

impl RadarStats {
    fn record(&mut self, passed: bool) {
        self.scored += 1;
        if passed {
            self.passed += 1;
        }
    }
}

/// What a call to [`RadarScanner::scan`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanReport {
    /// Another pass in this process held the guard.
    Skipped,
    Completed(ScanStats),
}

/// Runs scan passes over every radar.
pub struct RadarScanner {
    storage: Arc<dyn RadarStorage>,
    registry: Arc<FilterRegistry>,
    batch_size: u32,
    flight: SingleFlight,
}

impl RadarScanner {
    pub fn new(
        storage: Arc<dyn RadarStorage>,
        registry: Arc<FilterRegistry>,
        config: &ScanConfig,
    ) -> Self {
        Self {
            storage,
            registry,
            batch_size: config.batch_size,
            flight: SingleFlight::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.flight.is_running()
    }

    /// Fire-and-forget entry point for the scheduler: runs one pass and logs
    /// its outcome.
    pub async fn tick(&self) {
        match self.scan().await {
            Ok(ScanReport::Skipped) => {}
            Ok(ScanReport::Completed(stats)) => debug!(?stats, "radar scan finished"),
            Err(e) => error!(error = %e, "radar scan failed"),
        }
    }

    /// Tick every `period` until `shutdown` resolves, then wait for every
    /// spawned pass to finish.
    ///
    /// Passes run on their own tasks so a slow pass never delays the next
    /// tick; overlapping ticks are skipped by the single-flight guard.
    pub async fn run_until(self: Arc<Self>, period: Duration, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut passes = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let scanner = self.clone();
                    passes.spawn(async move { scanner.tick().await });
                }
            }
            while let Some(joined) = passes.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "radar scan task failed");
                }
            }
        }

        if !passes.is_empty() {
            info!(pending = passes.len(), "waiting for running scans to finish");
        }
        while let Some(joined) = passes.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "radar scan task failed");
            }
        }
    }

    /// Run one pass, or return [`ScanReport::Skipped`] if one is in progress.
    pub async fn scan(&self) -> Result<ScanReport, ScanError> {
        let Some(_permit) = self.flight.try_acquire() else {
            warn!("radar scan already running, skipping");
            return Ok(ScanReport::Skipped);
        };

        let started = Instant::now();
        let radars = self.storage.list_radars().await?;
        let mut stats = ScanStats {
            radars: radars.len(),
            ..ScanStats::default()
        };

        for radar in &radars {
            match self.scan_radar(radar).await {
                Ok(radar_stats) => stats.absorb(radar_stats),
                Err(e) => {
                    stats.radars_failed += 1;
                    error!(radar_id = %radar.id, error = %e, "radar scan aborted");
                }
            }
        }

        info!(
            radars = stats.radars,
            radars_failed = stats.radars_failed,
            runs_scored = stats.runs_scored,
            runs_passed = stats.runs_passed,
            runs_not_passed = stats.runs_not_passed,
            runs_errored = stats.runs_errored,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "radar scan complete"
        );
        Ok(ScanReport::Completed(stats))
    }

    async fn scan_radar(&self, radar: &Radar) -> Result<RadarStats, ScanError> {
        let view = radar.view_logic().map_err(|source| ScanError::MalformedRadar {
            radar_id: radar.id,
            tree: "view",
            source,
        })?;
        let checks = radar.checks_logic().map_err(|source| ScanError::MalformedRadar {
            radar_id: radar.id,
            tree: "checks",
            source,
        })?;
        let scope = compile(&view, &self.registry).map_err(|source| ScanError::Scope {
            radar_id: radar.id,
            source,
        })?;

        let runs = self
            .storage
            .fetch_unscored_runs(radar, &scope, self.batch_size)
            .await?;
        info!(radar_id = %radar.id, runs = runs.len(), "analyzing runs for radar");

        let mut stats = RadarStats {
            fetched: runs.len(),
            ..RadarStats::default()
        };
        if runs.is_empty() {
            return Ok(stats);
        }

        if checks.has_non_pushdown_leaf(&self.registry) {
            self.score_each(radar, &checks, &runs, &mut stats).await;
        } else {
            let predicate = compile(&checks, &self.registry).map_err(|source| {
                ScanError::Checks {
                    radar_id: radar.id,
                    source,
                }
            })?;
            self.score_batch(radar, &predicate, &runs, &mut stats).await?;
        }
        Ok(stats)
    }

    /// Pure-storage checks: one query decides the whole batch.
    async fn score_batch(
        &self,
        radar: &Radar,
        predicate: &Predicate,
        runs: &[Run],
        stats: &mut RadarStats,
    ) -> Result<(), ScanError> {
        let ids: Vec<Uuid> = runs.iter().map(|run| run.id).collect();
        let matched = self.storage.matching_run_ids(&ids, predicate).await?;

        for run in runs {
            let result = NewRadarResult {
                radar_id: radar.id,
                run_id: run.id,
                passed: matched.contains(&run.id),
                results: Vec::new(),
            };
            match self.storage.insert_result(&result).await {
                Ok(()) => {
                    debug!(run_id = %run.id, passed = result.passed, "run scored");
                    stats.record(result.passed);
                }
                Err(e) => {
                    stats.errored += 1;
                    error!(radar_id = %radar.id, run_id = %run.id, error = %e, "failed to store radar result");
                }
            }
        }
        Ok(())
    }

    async fn score_each(&self, radar: &Radar, checks: &LogicNode, runs: &[Run], stats: &mut RadarStats) {
        let interp = Interpreter::new(&self.registry, self.storage.as_ref());
        for run in runs {
            match self.score_run(&interp, radar, checks, run).await {
                Ok(passed) => {
                    debug!(run_id = %run.id, passed, "run scored");
                    stats.record(passed);
                }
                Err(e) => {
                    stats.errored += 1;
                    error!(radar_id = %radar.id, run_id = %run.id, error = %e, "failed to score run");
                }
            }
        }
    }

    async fn score_run(
        &self,
        interp: &Interpreter<'_>,
        radar: &Radar,
        checks: &LogicNode,
        run: &Run,
    ) -> Result<bool, RunError> {
        let outcome = run_checks(interp, run, checks).await?;
        self.storage
            .insert_result(&NewRadarResult {
                radar_id: radar.id,
                run_id: run.id,
                passed: outcome.passed,
                results: outcome.results,
            })
            .await?;
        Ok(outcome.passed)
    }
}

/// Failure scoring a single run; logged and skipped.
#[derive(Debug, thiserror::Error)]
enum RunError {
    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Storage(#[from] StoreError),
}
