//! ledger.rs — append-only in-memory score history keyed by (trial, run).

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, PoisonError};

use uuid::Uuid;

use crate::error::LedgerError;
use crate::scoring::Score;

#[derive(Debug, Default)]
struct State {
    by_trial: BTreeMap<String, Vec<Score>>,
    seen: HashSet<(String, Uuid)>,
}

#[derive(Debug, Default)]
pub struct ScoreLedger {
    inner: Mutex<State>,
}

impl ScoreLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a score. A second write for the same (trial, run) is rejected.
    pub fn record(&self, score: Score) -> Result<(), LedgerError> {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (score.trial_id.clone(), score.run_id);
        if !state.seen.insert(key) {
            return Err(LedgerError::DuplicateRun {
                trial_id: score.trial_id,
                run_id: score.run_id,
            });
        }
        state
            .by_trial
            .entry(score.trial_id.clone())
            .or_default()
            .push(score);
        Ok(())
    }

    /// Scores for a trial in insertion order.
    pub fn history(&self, trial_id: &str) -> Vec<Score> {
        let state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state.by_trial.get(trial_id).cloned().unwrap_or_default()
    }

    pub fn latest(&self, trial_id: &str) -> Option<Score> {
        let state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state.by_trial.get(trial_id).and_then(|v| v.last().cloned())
    }

    /// Total number of recorded scores.
    pub fn len(&self) -> usize {
        let state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
