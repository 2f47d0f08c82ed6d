// src/calibrate/mod.rs
//! Offline calibration of LRs and priors from labeled historical outcomes.
//!
//! Both calibrators share the same estimate shape: a continuity-corrected
//! rate with Jeffreys-style Beta bounds, shrunk toward the configured default
//! by `w = n / (n + smoothing)`. Groups below the minimum sample count yield
//! [`Estimate::NoEstimate`] and leave the published table untouched.

pub mod lr;
pub mod prior;

use serde::{Deserialize, Serialize};
use statrs::distribution::{Beta, ContinuousCDF};
use std::collections::{BTreeMap, BTreeSet};

use crate::category::TrialCategory;
use crate::gates::GateId;
use crate::signals::Severity;

pub use lr::{publish_lr_table, LikelihoodRatioCalibrator, LrCalibrationReport, LrCalibratorConfig, LrEstimate};
pub use prior::{
    publish_prior_table, OrderingAdjustment, PriorCalibrationReport, PriorCalibratorConfig,
    PriorRateCalibrator,
};

/// One labeled trial from history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalOutcome {
    pub trial_id: String,
    /// True when the trial failed its primary endpoint.
    #[serde(alias = "actual_outcome")]
    pub failed: bool,
    #[serde(default)]
    pub gates_fired: BTreeSet<GateId>,
    #[serde(default)]
    pub gate_severities: BTreeMap<GateId, Severity>,
    #[serde(flatten)]
    pub category: TrialCategory,
}

impl HistoricalOutcome {
    /// Severity of a fired gate; `None` if the gate did not fire or has no severity.
    pub fn fired_severity(&self, gate: GateId) -> Option<Severity> {
        if self.gates_fired.contains(&gate) {
            self.gate_severities.get(&gate).copied()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Estimate {
    Estimated {
        /// Shrunk and clamped value, the one that gets published.
        value: f64,
        /// Unshrunk empirical value.
        raw: f64,
        ci_lower: f64,
        ci_upper: f64,
        n: usize,
        failures: usize,
    },
    NoEstimate {
        n: usize,
        reason: String,
    },
}

impl Estimate {
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Estimated { value, .. } => Some(*value),
            Self::NoEstimate { .. } => None,
        }
    }

    pub fn is_estimated(&self) -> bool {
        matches!(self, Self::Estimated { .. })
    }

    pub(crate) fn too_few(n: usize, min: usize) -> Self {
        Self::NoEstimate {
            n,
            reason: format!("{n} sample(s), minimum is {min}"),
        }
    }
}

/// Continuity-corrected failure rate: `(k + 0.5) / (n + 1)`.
pub fn corrected_rate(failures: usize, n: usize) -> f64 {
    (failures as f64 + 0.5) / (n as f64 + 1.0)
}

/// Central `confidence` interval of Beta(k + ½, n − k + ½).
pub fn beta_interval(failures: usize, n: usize, confidence: f64) -> Option<(f64, f64)> {
    let k = failures.min(n) as f64;
    let beta = Beta::new(k + 0.5, n as f64 - k + 0.5).ok()?;
    let tail = (1.0 - confidence) / 2.0;
    let lo = beta.inverse_cdf(tail);
    let hi = beta.inverse_cdf(1.0 - tail);
    (lo.is_finite() && hi.is_finite() && lo <= hi).then_some((lo, hi))
}

/// Weight on the data side of a shrinkage blend.
pub fn shrink_weight(n: usize, smoothing: f64) -> f64 {
    let n = n as f64;
    if n + smoothing <= 0.0 {
        return 1.0;
    }
    n / (n + smoothing)
}
