//! Batch runner: many trials, one run id, one calibration snapshot.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::{Entry, HashMap};
use uuid::Uuid;

use crate::scoring::{ScoreReport, ScoreRequest, ScoringEngine};
use crate::tables::CalibrationStore;

/// A trial whose run failed; the rest of the batch is unaffected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFailure {
    /// Position in the request list.
    pub index: usize,
    pub trial_id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub run_id: Uuid,
    pub snapshot_version: u64,
    /// Successful reports, in request order.
    pub reports: Vec<ScoreReport>,
    pub failures: Vec<BatchFailure>,
}

/// Score `requests` in parallel.
///
/// The snapshot is taken once up front, so a publish during the batch does
/// not mix calibrations within one run. A trial id seen earlier in the list
/// is reported as a failure instead of being scored twice under one run id.
pub fn score_batch(
    engine: &ScoringEngine,
    store: &CalibrationStore,
    requests: &[ScoreRequest],
    now: DateTime<Utc>,
) -> BatchOutcome {
    let run_id = Uuid::new_v4();
    let snapshot = store.current();
    tracing::info!(
        target: "batch",
        run = %run_id,
        trials = requests.len(),
        snapshot_version = snapshot.version,
        "batch started"
    );

    // One score per (trial, run): repeats of a trial id are not scored.
    let mut first_seen: HashMap<&str, usize> = HashMap::new();
    let mut unique = Vec::with_capacity(requests.len());
    let mut failures = Vec::new();
    for (index, req) in requests.iter().enumerate() {
        match first_seen.entry(req.card.trial_id.as_str()) {
            Entry::Vacant(slot) => {
                slot.insert(index);
                unique.push((index, req));
            }
            Entry::Occupied(first) => {
                tracing::warn!(
                    target: "batch",
                    run = %run_id,
                    trial = %req.card.trial_id,
                    index,
                    first = *first.get(),
                    "duplicate trial id skipped"
                );
                failures.push(BatchFailure {
                    index,
                    trial_id: req.card.trial_id.clone(),
                    error: format!("duplicate trial id; first seen at index {}", first.get()),
                });
            }
        }
    }

    let results: Vec<_> = unique
        .par_iter()
        .map(|(_, req)| engine.score(req, &snapshot, run_id, now))
        .collect();

    let mut reports = Vec::with_capacity(results.len());
    for ((index, req), res) in unique.into_iter().zip(results) {
        match res {
            Ok(report) => reports.push(report),
            Err(e) => failures.push(BatchFailure {
                index,
                trial_id: req.card.trial_id.clone(),
                error: e.to_string(),
            }),
        }
    }
    failures.sort_by_key(|f| f.index);
    tracing::info!(
        target: "batch",
        run = %run_id,
        scored = reports.len(),
        failed = failures.len(),
        "batch finished"
    );
    BatchOutcome {
        run_id,
        snapshot_version: snapshot.version,
        reports,
        failures,
    }
}
