// src/tables/store.rs
//! Copy-on-write calibration state.
//!
//! A [`CalibrationSnapshot`] is immutable once built. Scoring runs take an
//! `Arc` to the current one and keep it for their whole run; publishing swaps
//! in a new snapshot without touching the old one.

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use super::{LrTable, PriorTable};
use crate::error::TableError;

pub const LR_TABLE_FILE: &str = "lr_table.json";
pub const PRIOR_TABLE_FILE: &str = "prior_table.json";

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationSnapshot {
    /// Bumped by the store on every publish.
    pub version: u64,
    pub lr: LrTable,
    pub priors: PriorTable,
    pub lr_digest: String,
    pub prior_digest: String,
}

impl CalibrationSnapshot {
    pub fn new(lr: LrTable, priors: PriorTable) -> Result<Self, TableError> {
        Ok(Self {
            version: 0,
            lr_digest: lr.digest()?,
            prior_digest: priors.digest()?,
            lr,
            priors,
        })
    }

    /// No rows at all; every lookup falls through to configured defaults.
    pub fn empty() -> Self {
        let lr = LrTable::new();
        let priors = PriorTable::new();
        Self {
            version: 0,
            lr_digest: lr.digest().unwrap_or_default(),
            prior_digest: priors.digest().unwrap_or_default(),
            lr,
            priors,
        }
    }

    /// Load both tables from `dir`. A missing file means an empty table.
    pub fn load_dir(dir: &Path) -> Result<Self, TableError> {
        let lr_path = dir.join(LR_TABLE_FILE);
        let prior_path = dir.join(PRIOR_TABLE_FILE);
        let lr = if lr_path.exists() {
            LrTable::load(&lr_path)?
        } else {
            LrTable::new()
        };
        let priors = if prior_path.exists() {
            PriorTable::load(&prior_path)?
        } else {
            PriorTable::new()
        };
        tracing::info!(
            target: "tables",
            dir = %dir.display(),
            lr_rows = lr.len(),
            prior_rows = priors.len(),
            "calibration snapshot loaded"
        );
        Self::new(lr, priors)
    }

    pub fn save_dir(&self, dir: &Path) -> Result<(), TableError> {
        std::fs::create_dir_all(dir).map_err(|source| TableError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        self.lr.save(&dir.join(LR_TABLE_FILE))?;
        self.priors.save(&dir.join(PRIOR_TABLE_FILE))
    }
}

/// Holder of the current snapshot.
#[derive(Debug, Clone)]
pub struct CalibrationStore {
    inner: Arc<RwLock<Arc<CalibrationSnapshot>>>,
}

impl CalibrationStore {
    pub fn new(snapshot: CalibrationSnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(snapshot))),
        }
    }

    /// Snapshot in force right now.
    pub fn current(&self) -> Arc<CalibrationSnapshot> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Activate new tables. Returns the published snapshot.
    pub fn publish(
        &self,
        lr: LrTable,
        priors: PriorTable,
    ) -> Result<Arc<CalibrationSnapshot>, TableError> {
        let mut next = CalibrationSnapshot::new(lr, priors)?;
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        next.version = guard.version + 1;
        let next = Arc::new(next);
        *guard = next.clone();
        tracing::info!(
            target: "tables",
            version = next.version,
            lr_digest = %next.lr_digest,
            prior_digest = %next.prior_digest,
            "calibration published"
        );
        Ok(next)
    }
}

impl Default for CalibrationStore {
    fn default() -> Self {
        Self::new(CalibrationSnapshot::empty())
    }
}
