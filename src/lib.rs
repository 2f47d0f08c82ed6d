// src/lib.rs
//! Clinical-trial failure-probability engine.
//!
//! Pipeline: study card → signals (S1–S9) → gates (G1–G4) → score. Offline
//! calibrators re-estimate gate LRs and category priors from labeled history
//! and publish them as effective-dated table snapshots.

pub mod batch;
pub mod calibrate;
pub mod card;
pub mod category;
pub mod config;
pub mod error;
pub mod gates;
pub mod ledger;
pub mod metrics;
pub mod scoring;
pub mod signals;
pub mod tables;

// ---- Re-exports for stable public API ----
pub use crate::batch::{score_batch, BatchFailure, BatchOutcome};
pub use crate::calibrate::{HistoricalOutcome, LikelihoodRatioCalibrator, PriorRateCalibrator};
pub use crate::card::StudyCard;
pub use crate::category::{CategoryKey, TrialCategory};
pub use crate::config::EngineConfig;
pub use crate::error::{ConfigError, EngineError, LedgerError, TableError};
pub use crate::gates::{evaluate_gates, GateEval, GateId, GateSet};
pub use crate::ledger::ScoreLedger;
pub use crate::scoring::{Score, ScoreReport, ScoreRequest, ScoringEngine, StopRuleHit};
pub use crate::signals::{evaluate_all_signals, Severity, SignalId, SignalResult, SignalSet};
pub use crate::tables::{CalibrationSnapshot, CalibrationStore};
