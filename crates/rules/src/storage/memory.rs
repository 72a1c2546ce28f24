//! In-process storage backed by vectors.
//!
//! Predicates are evaluated with [`Predicate::matches`]. Used to evaluate
//! runs that were never persisted and as the test backend.

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::predicate::Predicate;
use crate::record::{NewRadarResult, Radar, RadarResult, Run};

use super::{RadarStorage, StoreError};

#[derive(Debug, Default)]
pub struct MemoryStorage {
    radars: RwLock<Vec<Radar>>,
    runs: RwLock<Vec<Run>>,
    results: RwLock<Vec<RadarResult>>,
}

fn read<'a, T>(lock: &'a RwLock<T>, name: &'static str) -> Result<RwLockReadGuard<'a, T>, StoreError> {
    lock.read().map_err(|_| StoreError::Poisoned(name))
}

fn write<'a, T>(lock: &'a RwLock<T>, name: &'static str) -> Result<RwLockWriteGuard<'a, T>, StoreError> {
    lock.write().map_err(|_| StoreError::Poisoned(name))
}

// Seeding and inspection helpers recover from poisoning: every write is a
// single push, so the vectors are never left half-updated.
impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_radar(&self, radar: Radar) {
        self.radars
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(radar);
    }

    pub fn insert_run(&self, run: Run) {
        self.runs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(run);
    }

    /// Snapshot of all stored results, in insertion order.
    pub fn results(&self) -> Vec<RadarResult> {
        self.results
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn results_for(&self, radar_id: Uuid) -> Vec<RadarResult> {
        self.results()
            .into_iter()
            .filter(|r| r.radar_id == radar_id)
            .collect()
    }
}

#[async_trait]
impl RadarStorage for MemoryStorage {
    async fn list_radars(&self) -> Result<Vec<Radar>, StoreError> {
        Ok(read(&self.radars, "radars")?.clone())
    }

    async fn fetch_unscored_runs(
        &self,
        radar: &Radar,
        scope: &Predicate,
        limit: u32,
    ) -> Result<Vec<Run>, StoreError> {
        let scored: HashSet<Uuid> = read(&self.results, "results")?
            .iter()
            .filter(|r| r.radar_id == radar.id)
            .map(|r| r.run_id)
            .collect();

        let mut runs: Vec<Run> = read(&self.runs, "runs")?
            .iter()
            .filter(|run| run.project_id == radar.project_id)
            .filter(|run| !scored.contains(&run.id))
            .filter(|run| scope.matches(run))
            .cloned()
            .collect();
        runs.sort_by_key(|run| run.created_at);
        runs.truncate(limit as usize);
        Ok(runs)
    }

    async fn run_matches(&self, run: &Run, predicate: &Predicate) -> Result<bool, StoreError> {
        Ok(predicate.matches(run))
    }

    async fn matching_run_ids(
        &self,
        run_ids: &[Uuid],
        predicate: &Predicate,
    ) -> Result<HashSet<Uuid>, StoreError> {
        let wanted: HashSet<&Uuid> = run_ids.iter().collect();
        Ok(read(&self.runs, "runs")?
            .iter()
            .filter(|run| wanted.contains(&run.id) && predicate.matches(run))
            .map(|run| run.id)
            .collect())
    }

    async fn insert_result(&self, result: &NewRadarResult) -> Result<(), StoreError> {
        write(&self.results, "results")?.push(RadarResult {
            id: Uuid::new_v4(),
            radar_id: result.radar_id,
            run_id: result.run_id,
            passed: result.passed,
            results: result.results.clone(),
            created_at: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use std::sync::Arc;

    #[tokio::test]
    async fn poisoned_lock_is_a_store_error() {
        let storage = Arc::new(MemoryStorage::new());
        let holder = storage.clone();
        let _ = std::thread::spawn(move || {
            let _guard = holder.results.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();

        let result = NewRadarResult {
            radar_id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            passed: true,
            results: vec![],
        };
        assert!(matches!(
            storage.insert_result(&result).await,
            Err(StoreError::Poisoned("results"))
        ));
        assert!(storage.list_radars().await.unwrap().is_empty());
        assert!(storage.results().is_empty());
    }

    #[tokio::test]
    async fn unscored_runs_skip_scored_ones() {
        let storage = MemoryStorage::new();
        let run = testing::run();
        let radar = Radar {
            id: Uuid::new_v4(),
            project_id: run.project_id,
            owner_id: None,
            description: None,
            view: serde_json::json!(["AND"]),
            checks: serde_json::json!(["AND"]),
            created_at: Utc::now(),
            updated_at: None,
        };
        storage.insert_run(run.clone());

        let fetched = storage.fetch_unscored_runs(&radar, &Predicate::True, 10).await.unwrap();
        assert_eq!(fetched.len(), 1);

        storage
            .insert_result(&NewRadarResult {
                radar_id: radar.id,
                run_id: run.id,
                passed: false,
                results: vec![],
            })
            .await
            .unwrap();
        let fetched = storage.fetch_unscored_runs(&radar, &Predicate::True, 10).await.unwrap();
        assert!(fetched.is_empty());
    }
}
