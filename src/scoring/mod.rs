// src/scoring/mod.rs
//! # Scoring Engine
//! Two phases per run: feature freeze, then fusion.
//!
//! Fusion is Bayesian in log-odds space: the category prior's logit plus the
//! sum of `ln(lr)` over fired gates, clamped, then mapped back through the
//! logistic function. Every numeric safety rule that touches the result is
//! recorded as a [`StopRuleHit`].

pub mod engine;
pub mod freeze;
pub mod fusion;
pub mod stop_rules;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::category::CategoryKey;
use crate::gates::{GateId, GateSet, LrSource};
use crate::signals::{Severity, SignalId, SignalSet};

pub use engine::{ScoreRequest, ScoringEngine};
pub use freeze::{apply_freeze, FreezeDecision};
pub use fusion::{fuse, logit, sigmoid, Fusion};
pub use stop_rules::{OverrideRule, StopRuleHit, StopRuleKind};

/// One immutable score per `(trial, run)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub trial_id: String,
    pub run_id: Uuid,
    pub prior_pi: f64,
    pub logit_prior: f64,
    pub sum_log_lr: f64,
    /// Clamped log-odds. Not rewritten by override rules.
    pub logit_post: f64,
    pub p_fail: f64,
    pub timestamp: DateTime<Utc>,
}

/// Where the prior came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PriorSource {
    Table { effective_from: NaiveDate },
    CategoryDefault,
    GlobalDefault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SignalStatus {
    Fired { severity: Severity },
    NotFired,
    InsufficientData,
}

/// Everything needed to explain a score after the fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditTrail {
    pub evaluation_date: NaiveDate,
    pub universe: String,
    pub category: CategoryKey,
    pub freeze: FreezeDecision,
    pub prior_source: PriorSource,
    pub lr_sources: BTreeMap<GateId, LrSource>,
    pub signal_status: BTreeMap<SignalId, SignalStatus>,
    /// Human-readable record of every fallback taken.
    pub notes: Vec<String>,
    pub snapshot_version: u64,
    pub lr_digest: String,
    pub prior_digest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    pub score: Score,
    pub stop_rules: Vec<StopRuleHit>,
    pub signals: SignalSet,
    pub gates: GateSet,
    pub audit: AuditTrail,
}
