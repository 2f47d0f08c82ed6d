// src/calibrate/prior.rs
//! Empirical prior failure rate per trial category.
//!
//! Shrinkage runs in logit space toward the configured default. Afterwards a
//! pivotal category is kept strictly above its non-pivotal counterpart by at
//! least `ordering_gap`. Pairs estimated together are pulled apart around
//! their midpoint. When only one side has an estimate, the other side's
//! effective prior (active base-table row, then category default, then
//! global default) is held fixed and the estimated side is clamped.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::{beta_interval, corrected_rate, shrink_weight, Estimate, HistoricalOutcome};
use crate::category::CategoryKey;
use crate::config::PriorDefaults;
use crate::error::{ConfigError, TableError};
use crate::scoring::{logit, sigmoid};
use crate::tables::{PriorEntry, PriorTable};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorCalibratorConfig {
    pub min_samples: usize,
    pub smoothing: f64,
    pub floor: f64,
    pub ceiling: f64,
    pub ordering_gap: f64,
    pub confidence: f64,
}

impl Default for PriorCalibratorConfig {
    fn default() -> Self {
        Self {
            min_samples: 10,
            smoothing: 20.0,
            floor: 0.01,
            ceiling: 0.99,
            ordering_gap: 0.01,
            confidence: 0.95,
        }
    }
}

impl PriorCalibratorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_samples == 0 {
            return Err(ConfigError::invalid("calibration.prior.min_samples", "must be >= 1"));
        }
        if !(self.smoothing.is_finite() && self.smoothing >= 0.0) {
            return Err(ConfigError::invalid("calibration.prior.smoothing", "must be >= 0"));
        }
        if !(0.0 < self.floor && self.floor < self.ceiling && self.ceiling < 1.0) {
            return Err(ConfigError::invalid(
                "calibration.prior",
                "expected 0 < floor < ceiling < 1",
            ));
        }
        if !(self.ordering_gap >= 0.0 && self.ordering_gap < self.ceiling - self.floor) {
            return Err(ConfigError::invalid(
                "calibration.prior.ordering_gap",
                "must be >= 0 and smaller than ceiling - floor",
            ));
        }
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return Err(ConfigError::invalid("calibration.prior.confidence", "must lie in (0,1)"));
        }
        Ok(())
    }
}

/// A pivotal/non-pivotal pair moved apart to restore ordering.
///
/// Values are `(pivotal, non_pivotal)`. A side listed in `held` was not
/// estimated in this run; its effective prior appears unchanged in both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderingAdjustment {
    pub pivotal: CategoryKey,
    pub non_pivotal: CategoryKey,
    pub before: (f64, f64),
    pub after: (f64, f64),
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub held: Option<CategoryKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorCalibrationReport {
    pub total: usize,
    pub estimates: BTreeMap<CategoryKey, Estimate>,
    pub adjustments: Vec<OrderingAdjustment>,
}

#[derive(Debug, Clone)]
pub struct PriorRateCalibrator {
    config: PriorCalibratorConfig,
    defaults: PriorDefaults,
}

impl PriorRateCalibrator {
    pub fn new(config: PriorCalibratorConfig, defaults: PriorDefaults) -> Self {
        Self { config, defaults }
    }

    /// Estimate every category in `history`. `base` is the table the result
    /// will be published onto as of `as_of`; it supplies the effective prior
    /// of categories this run cannot estimate.
    pub fn calibrate(
        &self,
        history: &[HistoricalOutcome],
        base: &PriorTable,
        as_of: NaiveDate,
    ) -> PriorCalibrationReport {
        let mut counts: BTreeMap<CategoryKey, (usize, usize)> = BTreeMap::new();
        for o in history {
            let c = counts.entry(o.category.key()).or_default();
            c.0 += 1;
            c.1 += usize::from(o.failed);
        }

        let mut estimates: BTreeMap<CategoryKey, Estimate> = counts
            .into_iter()
            .map(|(key, (n, k))| {
                let est = self.estimate(&key, n, k);
                if let Estimate::NoEstimate { reason, .. } = &est {
                    tracing::warn!(target: "calibrate", category = %key, n, reason = %reason, "no prior estimate; default kept");
                }
                (key, est)
            })
            .collect();
        let adjustments = self.restore_ordering(&mut estimates, base, as_of);
        for a in &adjustments {
            tracing::warn!(
                target: "calibrate",
                pivotal = %a.pivotal,
                held = ?a.held,
                before = ?a.before,
                after = ?a.after,
                "inverted pivotal/non-pivotal priors adjusted"
            );
        }
        tracing::info!(
            target: "calibrate",
            total = history.len(),
            categories = estimates.len(),
            adjusted = adjustments.len(),
            "prior calibration finished"
        );

        PriorCalibrationReport {
            total: history.len(),
            estimates,
            adjustments,
        }
    }

    fn estimate(&self, key: &CategoryKey, n: usize, failures: usize) -> Estimate {
        let cfg = &self.config;
        if n < cfg.min_samples {
            return Estimate::too_few(n, cfg.min_samples);
        }
        let raw = corrected_rate(failures, n);
        let default = self
            .defaults
            .categories
            .get(key)
            .copied()
            .or(self.defaults.global)
            .filter(|p| p.is_finite() && *p > 0.0 && *p < 1.0);
        let value = match default {
            Some(d) => {
                let w = shrink_weight(n, cfg.smoothing);
                sigmoid(w * logit(raw) + (1.0 - w) * logit(d))
            }
            None => raw,
        };
        let (ci_lower, ci_upper) =
            beta_interval(failures, n, cfg.confidence).unwrap_or((0.0, 1.0));
        Estimate::Estimated {
            value: value.clamp(cfg.floor, cfg.ceiling),
            raw,
            ci_lower,
            ci_upper,
            n,
            failures,
        }
    }

    /// Prior a category would score with if this run published nothing for it.
    fn effective_prior(
        &self,
        key: &CategoryKey,
        base: &PriorTable,
        as_of: NaiveDate,
    ) -> Option<f64> {
        base.lookup_prior(key, as_of)
            .map(|row| row.prior)
            .or_else(|| self.defaults.categories.get(key).copied())
            .or(self.defaults.global)
    }

    fn restore_ordering(
        &self,
        estimates: &mut BTreeMap<CategoryKey, Estimate>,
        base: &PriorTable,
        as_of: NaiveDate,
    ) -> Vec<OrderingAdjustment> {
        let cfg = &self.config;
        let gap = cfg.ordering_gap;
        let pairs: BTreeSet<CategoryKey> = estimates
            .iter()
            .filter(|(_, est)| est.is_estimated())
            .map(|(k, _)| if k.pivotal { k.clone() } else { k.counterpart() })
            .collect();

        let mut out = Vec::new();
        for pk in pairs {
            let nk = pk.counterpart();
            let p_est = estimates.get(&pk).and_then(Estimate::value);
            let np_est = estimates.get(&nk).and_then(Estimate::value);
            let (p, np, held) = match (p_est, np_est) {
                (Some(p), Some(np)) => (p, np, None),
                (Some(p), None) => match self.effective_prior(&nk, base, as_of) {
                    Some(np) => (p, np, Some(nk.clone())),
                    None => continue,
                },
                (None, Some(np)) => match self.effective_prior(&pk, base, as_of) {
                    Some(p) => (p, np, Some(pk.clone())),
                    None => continue,
                },
                (None, None) => continue,
            };
            if p >= np + gap {
                continue;
            }

            let (p2, np2) = match &held {
                None => {
                    let mid = (p + np) / 2.0;
                    let (mut p2, mut np2) = (mid + gap / 2.0, mid - gap / 2.0);
                    if p2 > cfg.ceiling {
                        p2 = cfg.ceiling;
                        np2 = cfg.ceiling - gap;
                    }
                    if np2 < cfg.floor {
                        np2 = cfg.floor;
                        p2 = cfg.floor + gap;
                    }
                    set_value(estimates, &pk, p2);
                    set_value(estimates, &nk, np2);
                    (p2, np2)
                }
                Some(h) if *h == nk => {
                    let p2 = (np + gap).clamp(cfg.floor, cfg.ceiling);
                    set_value(estimates, &pk, p2);
                    (p2, np)
                }
                Some(_) => {
                    let np2 = (p - gap).clamp(cfg.floor, cfg.ceiling);
                    set_value(estimates, &nk, np2);
                    (p, np2)
                }
            };
            if p2 + 1e-12 < np2 + gap {
                tracing::warn!(
                    target: "calibrate",
                    pivotal = %pk,
                    pivotal_prior = p2,
                    non_pivotal_prior = np2,
                    "held prior leaves no room inside [floor, ceiling]; ordering gap not met"
                );
            }
            out.push(OrderingAdjustment {
                pivotal: pk,
                non_pivotal: nk,
                before: (p, np),
                after: (p2, np2),
                held,
            });
        }
        out
    }
}

fn set_value(estimates: &mut BTreeMap<CategoryKey, Estimate>, key: &CategoryKey, v: f64) {
    if let Some(Estimate::Estimated { value, .. }) = estimates.get_mut(key) {
        *value = v;
    }
}

/// New table with every estimated category appended as of `effective_from`.
pub fn publish_prior_table(
    table: &PriorTable,
    report: &PriorCalibrationReport,
    effective_from: NaiveDate,
) -> Result<PriorTable, TableError> {
    let mut next = table.clone();
    for (key, est) in &report.estimates {
        let Estimate::Estimated {
            value,
            ci_lower,
            ci_upper,
            n,
            ..
        } = *est
        else {
            continue;
        };
        next.append(
            PriorEntry::new(key.clone(), value, effective_from)
                .with_bounds(ci_lower, ci_upper)
                .with_sample_size(n as u64),
        )?;
    }
    Ok(next)
}
