// src/tables/lr.rs
//! Likelihood-ratio rows, keyed by `(scope, code, severity, universe)`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{EffectiveTable, TableRow};
use crate::category::{normalize_label, WILDCARD_UNIVERSE};
use crate::gates::GateId;
use crate::signals::{Severity, SignalId};

pub type LrTable = EffectiveTable<LrEntry>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LrScope {
    Gate,
    Signal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LrEntry {
    pub scope: LrScope,
    /// `G1`..`G4` or `S1`..`S9`.
    pub code: String,
    pub severity: Severity,
    pub universe: String,
    pub lr: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ci_lower: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ci_upper: Option<f64>,
    pub effective_from: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_to: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_size: Option<u64>,
}

impl LrEntry {
    /// Open-ended gate row without bounds.
    pub fn gate(
        gate: GateId,
        severity: Severity,
        universe: impl Into<String>,
        lr: f64,
        effective_from: NaiveDate,
    ) -> Self {
        Self {
            scope: LrScope::Gate,
            code: gate.code().to_string(),
            severity,
            universe: universe.into(),
            lr,
            ci_lower: None,
            ci_upper: None,
            effective_from,
            effective_to: None,
            sample_size: None,
        }
    }

    /// Open-ended signal row. Scoring reads gate rows only.
    pub fn signal(
        signal: SignalId,
        severity: Severity,
        universe: impl Into<String>,
        lr: f64,
        effective_from: NaiveDate,
    ) -> Self {
        Self {
            scope: LrScope::Signal,
            code: signal.code().to_string(),
            severity,
            universe: universe.into(),
            lr,
            ci_lower: None,
            ci_upper: None,
            effective_from,
            effective_to: None,
            sample_size: None,
        }
    }

    pub fn with_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.ci_lower = Some(lower);
        self.ci_upper = Some(upper);
        self
    }

    pub fn with_sample_size(mut self, n: u64) -> Self {
        self.sample_size = Some(n);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LrKey {
    pub scope: LrScope,
    pub code: String,
    pub severity: Severity,
    pub universe: String,
}

impl fmt::Display for LrKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scope = match self.scope {
            LrScope::Gate => "gate",
            LrScope::Signal => "signal",
        };
        write!(f, "{scope}:{}:{}@{}", self.code, self.severity, self.universe)
    }
}

impl TableRow for LrEntry {
    const KIND: &'static str = "likelihood_ratio";
    type Key = LrKey;

    fn key(&self) -> LrKey {
        LrKey {
            scope: self.scope,
            code: self.code.clone(),
            severity: self.severity,
            universe: self.universe.clone(),
        }
    }

    fn effective_from(&self) -> NaiveDate {
        self.effective_from
    }

    fn effective_to(&self) -> Option<NaiveDate> {
        self.effective_to
    }

    fn close(&mut self, to: NaiveDate) {
        self.effective_to = Some(to);
    }

    fn check(&self) -> Result<(), String> {
        if self.code.trim().is_empty() {
            return Err("code is empty".into());
        }
        if self.universe.is_empty() {
            return Err("universe is empty".into());
        }
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(format!("lr {} must be finite and > 0", self.lr));
        }
        match (self.ci_lower, self.ci_upper) {
            (Some(lo), Some(hi)) if !(lo.is_finite() && hi.is_finite() && 0.0 < lo && lo <= hi) => {
                Err(format!("bounds [{lo}, {hi}] must be finite, positive and ordered"))
            }
            (Some(b), None) | (None, Some(b)) if !(b.is_finite() && b > 0.0) => {
                Err(format!("bound {b} must be finite and > 0"))
            }
            _ => Ok(()),
        }
    }

    fn normalize(&mut self) {
        self.code = self.code.trim().to_ascii_uppercase();
        if self.universe.trim() != WILDCARD_UNIVERSE {
            self.universe = normalize_label(&self.universe);
        } else {
            self.universe = WILDCARD_UNIVERSE.to_string();
        }
    }
}

impl EffectiveTable<LrEntry> {
    /// Active gate row for an exact universe tag (`*` only matches `*` rows).
    pub fn lookup_gate(
        &self,
        gate: GateId,
        severity: Severity,
        universe: &str,
        date: NaiveDate,
    ) -> Option<&LrEntry> {
        self.lookup_by(date, |r| {
            r.scope == LrScope::Gate
                && r.code == gate.code()
                && r.severity == severity
                && r.universe == universe
        })
    }

    /// Active signal row, same universe rules as [`Self::lookup_gate`].
    pub fn lookup_signal(
        &self,
        signal: SignalId,
        severity: Severity,
        universe: &str,
        date: NaiveDate,
    ) -> Option<&LrEntry> {
        self.lookup_by(date, |r| {
            r.scope == LrScope::Signal
                && r.code == signal.code()
                && r.severity == severity
                && r.universe == universe
        })
    }
}
