// src/calibrate/lr.rs
//! Empirical likelihood ratios per `(gate, severity)`.
//!
//! `lr = rate(failures | gate fired at severity) / rate(failures overall)`,
//! both continuity-corrected. The log of the raw ratio is blended with the log
//! of the configured default, then clamped into `[min_lr, max_lr]`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{beta_interval, corrected_rate, shrink_weight, Estimate, HistoricalOutcome};
use crate::category::WILDCARD_UNIVERSE;
use crate::error::{ConfigError, TableError};
use crate::gates::{GateId, LrDefaults};
use crate::signals::Severity;
use crate::tables::{LrEntry, LrTable};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LrCalibratorConfig {
    pub min_samples: usize,
    pub smoothing: f64,
    pub min_lr: f64,
    pub max_lr: f64,
    pub confidence: f64,
    /// Universe tag written on published rows.
    pub universe: String,
}

impl Default for LrCalibratorConfig {
    fn default() -> Self {
        Self {
            min_samples: 10,
            smoothing: 20.0,
            min_lr: 1.0,
            max_lr: 100.0,
            confidence: 0.95,
            universe: WILDCARD_UNIVERSE.to_string(),
        }
    }
}

impl LrCalibratorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_samples == 0 {
            return Err(ConfigError::invalid("calibration.lr.min_samples", "must be >= 1"));
        }
        if !(self.smoothing.is_finite() && self.smoothing >= 0.0) {
            return Err(ConfigError::invalid("calibration.lr.smoothing", "must be >= 0"));
        }
        if !(self.min_lr.is_finite() && self.min_lr > 0.0 && self.min_lr <= self.max_lr)
            || !self.max_lr.is_finite()
        {
            return Err(ConfigError::invalid(
                "calibration.lr",
                "expected finite 0 < min_lr <= max_lr",
            ));
        }
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return Err(ConfigError::invalid("calibration.lr.confidence", "must lie in (0,1)"));
        }
        if self.universe.trim().is_empty() {
            return Err(ConfigError::invalid("calibration.lr.universe", "must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupCount {
    pub n: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LrEstimate {
    pub gate: GateId,
    pub severity: Severity,
    #[serde(flatten)]
    pub estimate: Estimate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LrCalibrationReport {
    pub total: usize,
    pub failures: usize,
    pub baseline_rate: f64,
    /// Outcome counts per exact fired-gate set, e.g. `G1+G4` or `none`.
    pub gate_sets: BTreeMap<String, GroupCount>,
    pub estimates: Vec<LrEstimate>,
    /// Fired gates recorded without a severity; not estimable.
    pub missing_severity: usize,
    pub universe: String,
}

#[derive(Debug, Clone)]
pub struct LikelihoodRatioCalibrator {
    config: LrCalibratorConfig,
    defaults: LrDefaults,
}

impl LikelihoodRatioCalibrator {
    pub fn new(config: LrCalibratorConfig, defaults: LrDefaults) -> Self {
        Self { config, defaults }
    }

    pub fn calibrate(&self, history: &[HistoricalOutcome]) -> LrCalibrationReport {
        let cfg = &self.config;
        let total = history.len();
        let failures = history.iter().filter(|o| o.failed).count();
        let baseline = corrected_rate(failures, total);

        let mut gate_sets: BTreeMap<String, GroupCount> = BTreeMap::new();
        let mut pairs: BTreeMap<(GateId, Severity), GroupCount> = BTreeMap::new();
        let mut missing_severity = 0;
        for o in history {
            let set_key = if o.gates_fired.is_empty() {
                "none".to_string()
            } else {
                o.gates_fired
                    .iter()
                    .map(GateId::code)
                    .collect::<Vec<_>>()
                    .join("+")
            };
            let g = gate_sets.entry(set_key).or_default();
            g.n += 1;
            g.failures += usize::from(o.failed);

            for gate in &o.gates_fired {
                let Some(sev) = o.fired_severity(*gate) else {
                    missing_severity += 1;
                    continue;
                };
                let c = pairs.entry((*gate, sev)).or_default();
                c.n += 1;
                c.failures += usize::from(o.failed);
            }
        }

        let estimates = pairs
            .into_iter()
            .map(|((gate, severity), count)| LrEstimate {
                gate,
                severity,
                estimate: self.estimate(gate, severity, count, baseline),
            })
            .collect::<Vec<_>>();
        for e in &estimates {
            if let Estimate::NoEstimate { n, reason } = &e.estimate {
                tracing::warn!(
                    target: "calibrate",
                    gate = %e.gate,
                    severity = %e.severity,
                    n,
                    reason = %reason,
                    "no LR estimate; default kept"
                );
            }
        }
        tracing::info!(
            target: "calibrate",
            total,
            failures,
            baseline,
            estimated = estimates.iter().filter(|e| e.estimate.is_estimated()).count(),
            "LR calibration finished"
        );

        LrCalibrationReport {
            total,
            failures,
            baseline_rate: baseline,
            gate_sets,
            estimates,
            missing_severity,
            universe: cfg.universe.clone(),
        }
    }

    fn estimate(&self, gate: GateId, severity: Severity, count: GroupCount, baseline: f64) -> Estimate {
        let cfg = &self.config;
        if count.n < cfg.min_samples {
            return Estimate::too_few(count.n, cfg.min_samples);
        }
        let raw = corrected_rate(count.failures, count.n) / baseline;
        let default = self
            .defaults
            .get(gate, severity)
            .filter(|d| d.is_finite() && *d > 0.0)
            .unwrap_or(1.0);
        let w = shrink_weight(count.n, cfg.smoothing);
        let blended = (w * raw.ln() + (1.0 - w) * default.ln()).exp();
        let clamp = |x: f64| x.clamp(cfg.min_lr, cfg.max_lr);

        let (ci_lower, ci_upper) = beta_interval(count.failures, count.n, cfg.confidence)
            .map(|(lo, hi)| (clamp(lo / baseline), clamp(hi / baseline)))
            .unwrap_or((cfg.min_lr, cfg.max_lr));
        Estimate::Estimated {
            value: clamp(blended),
            raw,
            ci_lower,
            ci_upper,
            n: count.n,
            failures: count.failures,
        }
    }
}

/// New table with every estimated pair appended as of `effective_from`.
pub fn publish_lr_table(
    table: &LrTable,
    report: &LrCalibrationReport,
    effective_from: NaiveDate,
) -> Result<LrTable, TableError> {
    let mut next = table.clone();
    for e in &report.estimates {
        let Estimate::Estimated {
            value,
            ci_lower,
            ci_upper,
            n,
            ..
        } = e.estimate
        else {
            continue;
        };
        next.append(
            LrEntry::gate(e.gate, e.severity, report.universe.clone(), value, effective_from)
                .with_bounds(ci_lower, ci_upper)
                .with_sample_size(n as u64),
        )?;
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::{Phase, SponsorExperience, TrialCategory};
    use std::collections::{BTreeMap, BTreeSet};

    fn outcome(i: usize, failed: bool, gate: Option<(GateId, Severity)>) -> HistoricalOutcome {
        HistoricalOutcome {
            trial_id: format!("NCT{i:04}"),
            failed,
            gates_fired: gate.map(|(g, _)| g).into_iter().collect::<BTreeSet<_>>(),
            gate_severities: gate.into_iter().collect::<BTreeMap<_, _>>(),
            category: TrialCategory {
                pivotal: true,
                indication: "oncology".into(),
                phase: Phase::Phase3,
                sponsor_experience: SponsorExperience::Experienced,
            },
        }
    }

    fn calibrator() -> LikelihoodRatioCalibrator {
        LikelihoodRatioCalibrator::new(LrCalibratorConfig::default(), LrDefaults::default())
    }

    #[test]
    fn too_few_samples_yield_no_estimate() {
        let g = Some((GateId::G1, Severity::High));
        let history: Vec<_> = (0..9).map(|i| outcome(i, true, g)).collect();
        let report = calibrator().calibrate(&history);
        assert_eq!(report.estimates.len(), 1);
        assert!(matches!(report.estimates[0].estimate, Estimate::NoEstimate { n: 9, .. }));

        let table = publish_lr_table(&LrTable::new(), &report, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap())
            .unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn risky_gate_gets_lr_above_one_and_publishes() {
        let g = Some((GateId::G2, Severity::Medium));
        let mut history: Vec<_> = (0..30).map(|i| outcome(i, i % 10 != 0, g)).collect();
        history.extend((30..130).map(|i| outcome(i, i % 4 == 0, None)));
        let report = calibrator().calibrate(&history);
        assert_eq!(report.total, 130);
        assert_eq!(report.gate_sets["G2"].n, 30);
        assert_eq!(report.gate_sets["none"].n, 100);

        let est = &report.estimates[0];
        let Estimate::Estimated { value, raw, ci_lower, ci_upper, .. } = est.estimate else {
            panic!("expected an estimate");
        };
        assert!(raw > 1.0);
        // Shrunk toward the G2/M default of 2.2 in log space.
        assert!((1.0..=100.0).contains(&value));
        assert!(ci_lower <= ci_upper);

        let date = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();
        let table = publish_lr_table(&LrTable::new(), &report, date).unwrap();
        let row = table.lookup_gate(GateId::G2, Severity::Medium, "*", date).unwrap();
        assert_eq!(row.lr, value);
        assert_eq!(row.sample_size, Some(30));
    }

    #[test]
    fn protective_gate_is_clamped_to_one() {
        let g = Some((GateId::G3, Severity::Low));
        let mut history: Vec<_> = (0..40).map(|i| outcome(i, false, g)).collect();
        history.extend((40..80).map(|i| outcome(i, true, None)));
        let report = calibrator().calibrate(&history);
        assert_eq!(report.estimates[0].estimate.value(), Some(1.0));
    }

    #[test]
    fn missing_severity_is_counted_not_estimated() {
        let mut o = outcome(0, true, Some((GateId::G4, Severity::High)));
        o.gate_severities.clear();
        let report = calibrator().calibrate(&[o]);
        assert_eq!(report.missing_severity, 1);
        assert!(report.estimates.is_empty());
    }
}
