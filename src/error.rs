//! Error kinds surfaced by the engine.
//!
//! Missing evidence and thin calibration data are resolved locally (signal not
//! fired, default kept) and never show up here. What remains is fatal for a
//! single trial's run: a configuration hole, an invalid table row, or a
//! duplicate `(trial, run)` write.

use std::path::PathBuf;

use thiserror::Error;

use crate::gates::GateId;
use crate::signals::Severity;

/// Errors that abort scoring of one trial. A batch keeps going.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(
        "configuration error: no likelihood ratio for {gate} severity {severity} \
         in universe `{universe}` (no table entry and no default)"
    )]
    MissingLikelihoodRatio {
        gate: GateId,
        severity: Severity,
        universe: String,
    },
    #[error("configuration error: no prior for category `{key}` (no table entry and no default)")]
    MissingPrior { key: String },
    #[error("invalid likelihood ratio {value} for {gate}: must be finite and > 0")]
    InvalidLikelihoodRatio { gate: GateId, value: f64 },
}

/// Errors raised while loading or validating the engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config value for {field}: {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors raised by calibration tables and their snapshots.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("invalid {kind} row `{key}`: {message}")]
    InvalidRow {
        kind: &'static str,
        key: String,
        message: String,
    },
    #[error("snapshot kind mismatch: expected {expected}, found {found}")]
    KindMismatch {
        expected: &'static str,
        found: String,
    },
    #[error("snapshot digest mismatch: recorded {recorded}, computed {computed}")]
    DigestMismatch { recorded: String, computed: String },
    #[error("snapshot io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("snapshot encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by the score ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("score for trial `{trial_id}` run {run_id} already recorded")]
    DuplicateRun { trial_id: String, run_id: uuid::Uuid },
}
