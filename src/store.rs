//! In-memory storage of completed predictions.
//!
//! The request path only ever adds results; a background sweeper removes the
//! ones older than the retention window.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    codec::ImageMetadata,
    error::{ClassifierError, Result},
    labels::ClassificationResult,
    registry::ModelInfo,
};

const ID_BYTES: usize = 16;

/// Shortest period the sweeper timer accepts; `tokio::time::interval` panics on zero.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// A completed prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub id: String,
    /// Highest probability first.
    pub predictions: Vec<ClassificationResult>,
    pub metadata: ImageMetadata,
    pub processed_at: DateTime<Utc>,
    pub process_time_ms: f64,
    pub model_info: ModelInfo,
}

impl PredictionResult {
    pub fn top_prediction(&self) -> Option<&ClassificationResult> {
        self.predictions.first()
    }

    /// Predictions whose confidence is at least `threshold`.
    pub fn predictions_above(&self, threshold: f64) -> Vec<&ClassificationResult> {
        self.predictions
            .iter()
            .filter(|p| p.confidence >= threshold)
            .collect()
    }
}

/// Generates a random 128-bit result ID, hex encoded.
pub fn generate_id() -> String {
    let mut bytes = [0u8; ID_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Thread-safe map from result ID to [`PredictionResult`].
#[derive(Debug, Default)]
pub struct ResultStore {
    results: RwLock<HashMap<String, PredictionResult>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, result: PredictionResult) {
        let id = result.id.clone();
        if self.results.write().insert(id.clone(), result).is_some() {
            debug!(result_id = %id, "replaced existing result");
        }
    }

    pub fn get(&self, id: &str) -> Result<PredictionResult> {
        self.results
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| ClassifierError::ResultNotFound(id.to_string()))
    }

    pub fn count(&self) -> usize {
        self.results.read().len()
    }

    /// Removes every result processed more than `max_age` ago and returns how
    /// many were removed.
    ///
    /// Expired IDs are collected under the read lock; the write lock is only
    /// taken for the removals.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let age = TimeDelta::from_std(max_age).unwrap_or(TimeDelta::MAX);
        let Some(cutoff) = Utc::now().checked_sub_signed(age) else {
            return 0;
        };

        let expired: Vec<String> = self
            .results
            .read()
            .iter()
            .filter(|(_, r)| r.processed_at < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        if expired.is_empty() {
            return 0;
        }

        let mut results = self.results.write();
        let mut removed = 0;
        for id in expired {
            if results.get(&id).is_some_and(|r| r.processed_at < cutoff) {
                results.remove(&id);
                removed += 1;
            }
        }
        let remaining = results.len();
        drop(results);

        debug!(removed, remaining, "swept expired prediction results");
        removed
    }
}

/// Handle to a running background sweeper.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signals the sweeper to stop and waits for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "result sweeper task failed");
        }
    }
}

/// Spawns a task that sweeps `store` every `interval`, removing results older
/// than `max_age`. Must be called from within a Tokio runtime.
///
/// A zero `interval` is raised to one millisecond.
pub fn spawn_sweeper(
    store: Arc<ResultStore>,
    interval: Duration,
    max_age: Duration,
) -> SweeperHandle {
    let (shutdown_tx, mut rx) = watch::channel(false);
    if interval < MIN_SWEEP_INTERVAL {
        warn!(interval_ms = interval.as_millis() as u64, "sweep interval too short, clamping");
    }
    let interval = interval.max(MIN_SWEEP_INTERVAL);

    let handle = tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        // The first tick completes immediately.
        timer.tick().await;
        info!(interval_secs = interval.as_secs_f64(), "result sweeper started");

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let removed = store.sweep(max_age);
                    if removed > 0 {
                        info!(removed, remaining = store.count(), "removed expired results");
                    }
                }
                changed = rx.changed() => {
                    if changed.is_err() || *rx.borrow() {
                        info!("result sweeper shutting down");
                        break;
                    }
                }
            }
        }
    });

    SweeperHandle {
        shutdown_tx,
        handle,
    }
}
