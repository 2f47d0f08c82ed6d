//! S5 — observed effect implausibly large against a historical reference.
//!
//! The reference is a normal distribution over effect magnitude per measure
//! family: `|ln ratio|` for hazard/odds/risk ratios, the raw magnitude for
//! standardized mean and risk differences. Unscaled mean differences cannot be
//! compared across trials and resolve to insufficient data.

use serde::{Deserialize, Serialize};

use super::{finite, EvidenceRef, Severity, SignalId, SignalResult};
use crate::card::{EffectMeasure, StudyCard};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceDistribution {
    pub mean: f64,
    pub sd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectConfig {
    pub ratio: ReferenceDistribution,
    pub standardized_difference: ReferenceDistribution,
    pub risk_difference: ReferenceDistribution,
    /// Fires above this z-score.
    pub z_threshold: f64,
    pub high_z: f64,
}

impl Default for EffectConfig {
    fn default() -> Self {
        Self {
            ratio: ReferenceDistribution { mean: 0.22, sd: 0.18 },
            standardized_difference: ReferenceDistribution { mean: 0.30, sd: 0.20 },
            risk_difference: ReferenceDistribution { mean: 0.08, sd: 0.06 },
            z_threshold: 3.0,
            high_z: 4.0,
        }
    }
}

pub fn evaluate(card: &StudyCard, cfg: &EffectConfig) -> SignalResult {
    let id = SignalId::S5;
    let Some((idx, result)) = card.primary_result() else {
        return SignalResult::insufficient(id, "no primary result");
    };
    let Some(estimate) = finite(result.estimate) else {
        return SignalResult::insufficient(id, "no finite point estimate");
    };
    let Some(measure) = result.measure else {
        return SignalResult::insufficient(id, "effect measure not stated");
    };

    let (magnitude, reference) = match measure {
        EffectMeasure::HazardRatio | EffectMeasure::OddsRatio | EffectMeasure::RiskRatio => {
            if estimate <= 0.0 {
                return SignalResult::insufficient(id, format!("ratio estimate {estimate} <= 0"));
            }
            (estimate.ln().abs(), cfg.ratio)
        }
        EffectMeasure::StandardizedMeanDifference => {
            (estimate.abs(), cfg.standardized_difference)
        }
        EffectMeasure::RiskDifference => (estimate.abs(), cfg.risk_difference),
        EffectMeasure::MeanDifference => {
            return SignalResult::insufficient(id, "unscaled mean difference has no reference")
        }
    };
    if !(reference.sd.is_finite() && reference.sd > 0.0 && reference.mean.is_finite()) {
        return SignalResult::insufficient(id, "reference distribution is degenerate");
    }

    let z = (magnitude - reference.mean) / reference.sd;
    if z <= cfg.z_threshold {
        return SignalResult::clear(
            id,
            Some(z),
            format!("effect z-score {z:.2} within reference (<= {:.1})", cfg.z_threshold),
        );
    }
    let severity = if z > cfg.high_z {
        Severity::High
    } else {
        Severity::Medium
    };
    SignalResult::fired(
        id,
        severity,
        Some(z),
        format!(
            "observed {measure:?} {estimate} sits {z:.2} sd above the historical reference"
        ),
        vec![EvidenceRef::at(format!("primary_results[{idx}]"), &result.evidence)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::{Population, PopulationResult};

    fn card(estimate: f64, measure: Option<EffectMeasure>) -> StudyCard {
        let mut c = StudyCard::new("T");
        c.primary_results.push(PopulationResult {
            population: Population::Itt,
            p_value: Some(0.001),
            estimate: Some(estimate),
            ci_lower: None,
            ci_upper: None,
            measure,
            evidence: vec![],
        });
        c
    }

    #[test]
    fn typical_hazard_ratio_is_plausible() {
        let r = evaluate(&card(0.75, Some(EffectMeasure::HazardRatio)), &EffectConfig::default());
        assert!(!r.fired);
    }

    #[test]
    fn extreme_hazard_ratio_fires() {
        // |ln 0.30| = 1.20 → z ≈ 5.4
        let r = evaluate(&card(0.30, Some(EffectMeasure::HazardRatio)), &EffectConfig::default());
        assert!(r.fired);
        assert_eq!(r.severity, Some(Severity::High));
        // |ln 0.45| = 0.80 → z ≈ 3.2
        let r = evaluate(&card(0.45, Some(EffectMeasure::HazardRatio)), &EffectConfig::default());
        assert_eq!(r.severity, Some(Severity::Medium));
    }

    #[test]
    fn ratio_direction_does_not_matter() {
        let cfg = EffectConfig::default();
        let a = evaluate(&card(0.30, Some(EffectMeasure::OddsRatio)), &cfg);
        let b = evaluate(&card(1.0 / 0.30, Some(EffectMeasure::OddsRatio)), &cfg);
        assert!((a.value.unwrap() - b.value.unwrap()).abs() < 1e-9);
    }

    #[test]
    fn unusable_inputs_are_insufficient() {
        let cfg = EffectConfig::default();
        assert!(evaluate(&card(0.5, None), &cfg).insufficient_data);
        assert!(evaluate(&card(-1.0, Some(EffectMeasure::HazardRatio)), &cfg).insufficient_data);
        assert!(evaluate(&card(f64::INFINITY, Some(EffectMeasure::RiskRatio)), &cfg).insufficient_data);
        assert!(evaluate(&card(12.0, Some(EffectMeasure::MeanDifference)), &cfg).insufficient_data);
    }
}
