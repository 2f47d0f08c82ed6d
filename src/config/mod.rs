// src/config/mod.rs
//! Engine configuration.
//!
//! Resolution order for [`EngineConfig::load`]:
//! 1) `$TRIAL_RISK_CONFIG_PATH` (must exist)
//! 2) `config/engine.toml`
//! 3) built-in defaults (identical to the shipped file)
//!
//! `TRIAL_RISK_FREEZE_DAYS` and `TRIAL_RISK_LOGIT_BOUND` override single knobs
//! afterwards. The result is always validated.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::calibrate::{LrCalibratorConfig, PriorCalibratorConfig};
use crate::category::CategoryKey;
use crate::error::ConfigError;
use crate::gates::LrDefaults;
use crate::scoring::OverrideRule;
use crate::signals::{ReferenceDistribution, Severity, SignalConfig};

pub const ENV_CONFIG_PATH: &str = "TRIAL_RISK_CONFIG_PATH";
pub const ENV_FREEZE_DAYS: &str = "TRIAL_RISK_FREEZE_DAYS";
pub const ENV_LOGIT_BOUND: &str = "TRIAL_RISK_LOGIT_BOUND";
pub const DEFAULT_CONFIG_PATH: &str = "config/engine.toml";

/// Largest accepted logit bound; `sigmoid(±36.7)` already rounds to 0/1 in f64.
pub const MAX_LOGIT_BOUND: f64 = 35.0;
/// Ten years; keeps the freeze boundary well inside the calendar.
pub const MAX_LOOKBACK_DAYS: i64 = 3650;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreezeConfig {
    /// Days before primary completion at which new evidence stops counting.
    pub lookback_days: i64,
}

impl Default for FreezeConfig {
    fn default() -> Self {
        Self { lookback_days: 14 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Symmetric clamp on `logit_post`.
    pub logit_bound: f64,
    /// Priors are clamped into `[prior_floor, 1 - prior_floor]`.
    pub prior_floor: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            logit_bound: 30.0,
            prior_floor: 1e-6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorDefaults {
    /// Used when neither the table nor `categories` has an entry.
    pub global: Option<f64>,
    pub categories: BTreeMap<CategoryKey, f64>,
}

impl Default for PriorDefaults {
    fn default() -> Self {
        Self {
            global: Some(0.40),
            categories: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub default_lr: LrDefaults,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub lr: LrCalibratorConfig,
    pub prior: PriorCalibratorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub freeze: FreezeConfig,
    pub fusion: FusionConfig,
    pub priors: PriorDefaults,
    pub gates: GateConfig,
    pub overrides: Vec<OverrideRule>,
    pub signals: SignalConfig,
    pub calibration: CalibrationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            freeze: FreezeConfig::default(),
            fusion: FusionConfig::default(),
            priors: PriorDefaults::default(),
            gates: GateConfig::default(),
            overrides: vec![OverrideRule::meltdown_with_p_hacking()],
            signals: SignalConfig::default(),
            calibration: CalibrationConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate. No environment overrides.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: EngineConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read `path`, apply environment overrides, validate.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut cfg: EngineConfig = toml::from_str(&content)?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        tracing::info!(target: "config", path = %path.display(), "engine config loaded");
        Ok(cfg)
    }

    /// Resolve the config source (env path, default file, built-ins).
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(ConfigError::invalid(
                    ENV_CONFIG_PATH,
                    format!("{} does not exist", pb.display()),
                ));
            }
            return Self::load_from(&pb);
        }
        let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default_path.exists() {
            return Self::load_from(&default_path);
        }
        tracing::info!(target: "config", "no config file found; using built-in defaults");
        let mut cfg = Self::default();
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply `TRIAL_RISK_FREEZE_DAYS` and `TRIAL_RISK_LOGIT_BOUND` when set.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(raw) = std::env::var(ENV_FREEZE_DAYS) {
            self.freeze.lookback_days = raw.trim().parse().map_err(|_| {
                ConfigError::invalid(ENV_FREEZE_DAYS, format!("`{raw}` is not an integer"))
            })?;
        }
        if let Ok(raw) = std::env::var(ENV_LOGIT_BOUND) {
            self.fusion.logit_bound = raw.trim().parse().map_err(|_| {
                ConfigError::invalid(ENV_LOGIT_BOUND, format!("`{raw}` is not a number"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let lookback = self.freeze.lookback_days;
        if !(0..=MAX_LOOKBACK_DAYS).contains(&lookback) {
            return Err(ConfigError::invalid(
                "freeze.lookback_days",
                format!("{lookback} must lie in [0, {MAX_LOOKBACK_DAYS}]"),
            ));
        }

        let bound = self.fusion.logit_bound;
        if !(bound.is_finite() && bound > 0.0 && bound <= MAX_LOGIT_BOUND) {
            return Err(ConfigError::invalid(
                "fusion.logit_bound",
                format!("{bound} must lie in (0, {MAX_LOGIT_BOUND}]"),
            ));
        }
        let floor = self.fusion.prior_floor;
        if !(floor.is_finite() && floor > 0.0 && floor < 0.5) {
            return Err(ConfigError::invalid("fusion.prior_floor", "must lie in (0, 0.5)"));
        }

        if let Some(g) = self.priors.global {
            unit_open("priors.global", g)?;
        }
        for (k, p) in &self.priors.categories {
            unit_open(&format!("priors.categories.{k}"), *p)?;
        }

        for (gate, sev, lr) in self.gates.default_lr.iter() {
            if !(lr.is_finite() && lr > 0.0) {
                return Err(ConfigError::invalid(
                    format!("gates.default_lr.{gate}.{sev}"),
                    format!("{lr} must be finite and > 0"),
                ));
            }
        }

        let mut names = std::collections::BTreeSet::new();
        for rule in &self.overrides {
            let field = format!("overrides.{}", rule.name);
            if rule.name.trim().is_empty() {
                return Err(ConfigError::invalid("overrides.name", "must not be empty"));
            }
            if !names.insert(rule.name.as_str()) {
                return Err(ConfigError::invalid(field, "duplicate rule name"));
            }
            if rule.gates.is_empty() {
                return Err(ConfigError::invalid(field, "lists no gates"));
            }
            if !(rule.p_fail.is_finite() && rule.p_fail > 0.0 && rule.p_fail < 1.0) {
                return Err(ConfigError::invalid(field, "p_fail must lie in (0,1)"));
            }
        }

        self.validate_signals()?;
        self.calibration.lr.validate()?;
        self.calibration.prior.validate()?;
        Ok(())
    }

    fn validate_signals(&self) -> Result<(), ConfigError> {
        let s = &self.signals;
        unit_open("signals.power.threshold", s.power.threshold)?;
        unit_open("signals.power.high_below", s.power.high_below)?;
        unit_open("signals.power.medium_below", s.power.medium_below)?;
        if !(s.power.high_below <= s.power.medium_below && s.power.medium_below <= s.power.threshold) {
            return Err(ConfigError::invalid(
                "signals.power",
                "expected high_below <= medium_below <= threshold",
            ));
        }
        unit_open("signals.subgroup.high_p_below", s.subgroup.high_p_below)?;
        unit_open("signals.population.dropout_asymmetry", s.population.dropout_asymmetry)?;
        unit_open(
            "signals.population.high_dropout_asymmetry",
            s.population.high_dropout_asymmetry,
        )?;
        for (field, r) in [
            ("signals.effect.ratio", s.effect.ratio),
            ("signals.effect.standardized_difference", s.effect.standardized_difference),
            ("signals.effect.risk_difference", s.effect.risk_difference),
        ] {
            reference(field, r)?;
        }
        if !(s.effect.z_threshold.is_finite() && s.effect.z_threshold <= s.effect.high_z) {
            return Err(ConfigError::invalid(
                "signals.effect",
                "expected finite z_threshold <= high_z",
            ));
        }
        let cusp = &s.cusp;
        if !(0.0 <= cusp.lower && cusp.lower <= cusp.upper && cusp.upper <= 1.0) {
            return Err(ConfigError::invalid(
                "signals.cusp",
                format!("band [{}, {}] must be ordered inside [0,1]", cusp.lower, cusp.upper),
            ));
        }
        let band = s.survival.neutral_band;
        if !(band.is_finite() && (0.0..1.0).contains(&band)) {
            return Err(ConfigError::invalid("signals.survival.neutral_band", "must lie in [0,1)"));
        }
        Ok(())
    }

    /// Per-category default, then global default.
    pub fn default_prior(&self, key: &CategoryKey) -> Option<(f64, PriorDefaultKind)> {
        if let Some(p) = self.priors.categories.get(key) {
            return Some((*p, PriorDefaultKind::Category));
        }
        self.priors.global.map(|p| (p, PriorDefaultKind::Global))
    }

    /// Configured fallback LR for a gate.
    pub fn default_lr(&self, gate: crate::gates::GateId, severity: Severity) -> Option<f64> {
        self.gates.default_lr.get(gate, severity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorDefaultKind {
    Category,
    Global,
}

fn unit_open(field: &str, v: f64) -> Result<(), ConfigError> {
    if v.is_finite() && v > 0.0 && v < 1.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{v} must lie in (0,1)")))
    }
}

fn reference(field: &str, r: ReferenceDistribution) -> Result<(), ConfigError> {
    if r.mean.is_finite() && r.sd.is_finite() && r.sd > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, "mean must be finite and sd > 0"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gates::GateId;

    #[test]
    fn defaults_validate() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn shipped_file_matches_defaults() {
        let shipped = include_str!("../../config/engine.toml");
        let cfg = EngineConfig::from_toml_str(shipped).unwrap();
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let cfg = EngineConfig::from_toml_str(
            r#"
[fusion]
logit_bound = 20.0

[gates.default_lr.G2]
H = 4.0
M = 2.5
L = 1.2

[priors.categories]
"pivotal|oncology|phase3|novice" = 0.55
"#,
        )
        .unwrap();
        assert_eq!(cfg.fusion.logit_bound, 20.0);
        assert_eq!(cfg.freeze.lookback_days, 14);
        assert_eq!(cfg.default_lr(GateId::G2, Severity::High), Some(4.0));
        // Listing one gate replaces the whole default map.
        assert_eq!(cfg.default_lr(GateId::G1, Severity::High), None);
        let key: CategoryKey = "pivotal|oncology|phase3|novice".parse().unwrap();
        assert_eq!(cfg.default_prior(&key), Some((0.55, PriorDefaultKind::Category)));
        assert_eq!(
            cfg.default_prior(&key.counterpart()),
            Some((0.40, PriorDefaultKind::Global))
        );
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        for (toml, field) in [
            ("[fusion]\nlogit_bound = 40.0", "fusion.logit_bound"),
            ("[fusion]\nlogit_bound = 0.0", "fusion.logit_bound"),
            ("[priors]\nglobal = 1.0", "priors.global"),
            ("[freeze]\nlookback_days = -1", "freeze.lookback_days"),
            ("[freeze]\nlookback_days = 3651", "freeze.lookback_days"),
            ("[freeze]\nlookback_days = 9223372036854775807", "freeze.lookback_days"),
            ("[signals.cusp]\nlower = 0.06\nupper = 0.05", "signals.cusp"),
            ("[gates.default_lr.G1]\nH = 0.0", "gates.default_lr.G1.H"),
        ] {
            match EngineConfig::from_toml_str(toml) {
                Err(ConfigError::Invalid { field: f, .. }) => assert_eq!(f, field, "{toml}"),
                other => panic!("expected invalid {field}, got {other:?}"),
            }
        }
    }

    #[test]
    fn ten_year_lookback_is_the_limit() {
        let cfg = EngineConfig::from_toml_str("[freeze]\nlookback_days = 3650").unwrap();
        assert_eq!(cfg.freeze.lookback_days, MAX_LOOKBACK_DAYS);
    }

    #[test]
    fn unknown_gate_code_fails_to_parse() {
        let err = EngineConfig::from_toml_str("[gates.default_lr.G7]\nH = 2.0").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn override_rules_are_checked() {
        let err = EngineConfig::from_toml_str(
            r#"
[[overrides]]
name = "empty"
gates = []
min_severity = "H"
p_fail = 0.9
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("overrides.empty"));
    }
}
