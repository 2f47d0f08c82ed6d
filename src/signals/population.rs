//! S4 — primary analysis moved off ITT, or lopsided attrition between arms.

use serde::{Deserialize, Serialize};

use super::{EvidenceRef, Severity, SignalId, SignalResult};
use crate::card::{ArmRole, Population, StudyCard};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
    /// Absolute dropout difference between arms that fires the signal.
    pub dropout_asymmetry: f64,
    /// Asymmetry above this is high severity on its own.
    pub high_dropout_asymmetry: f64,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            dropout_asymmetry: 0.10,
            high_dropout_asymmetry: 0.20,
        }
    }
}

pub fn evaluate(card: &StudyCard, cfg: &PopulationConfig) -> SignalResult {
    let id = SignalId::S4;
    let plan = card.analysis_plan.as_ref();

    let itt_defined = plan.and_then(|p| p.itt_defined) == Some(true)
        || card.result_for(Population::Itt).is_some();
    let declared = plan.and_then(|p| p.primary_population);
    let shift = match declared {
        Some(pop) if itt_defined => Some(pop != Population::Itt),
        Some(_) => Some(false),
        None => None,
    };

    let asymmetry = match (
        role_dropout(card, ArmRole::Treatment),
        role_dropout(card, ArmRole::Control),
    ) {
        (Some(t), Some(c)) => Some((t - c).abs()),
        _ => None,
    };

    if shift.is_none() && asymmetry.is_none() {
        return SignalResult::insufficient(id, "no declared primary population and no paired dropout rates");
    }

    let shifted = shift == Some(true);
    let asymmetric = asymmetry.is_some_and(|a| a > cfg.dropout_asymmetry);
    if !shifted && !asymmetric {
        return SignalResult::clear(
            id,
            asymmetry,
            match asymmetry {
                Some(a) => format!("primary population consistent with ITT; dropout gap {a:.2}"),
                None => "primary population consistent with ITT".to_string(),
            },
        );
    }

    let severe_gap = asymmetry.is_some_and(|a| a > cfg.high_dropout_asymmetry);
    let severity = if (shifted && asymmetric) || severe_gap {
        Severity::High
    } else {
        Severity::Medium
    };

    let mut evidence = Vec::new();
    let mut parts = Vec::new();
    if shifted {
        let pop = declared.map(|p| p.name()).unwrap_or("?");
        parts.push(format!("primary analysis on {pop} although ITT is defined"));
        if let Some(plan) = plan {
            evidence.push(EvidenceRef::at("analysis_plan", &plan.evidence));
        }
        if let Some((i, r)) = declared.and_then(|p| card.result_for(p)) {
            evidence.push(EvidenceRef::at(format!("primary_results[{i}]"), &r.evidence));
        }
    }
    if asymmetric {
        let gap = asymmetry.unwrap_or_default();
        parts.push(format!(
            "dropout gap {gap:.2} exceeds {:.2}",
            cfg.dropout_asymmetry
        ));
        evidence.extend(
            card.arms
                .iter()
                .enumerate()
                .map(|(i, a)| EvidenceRef::at(format!("arms[{i}]"), &a.evidence)),
        );
    }
    if evidence.is_empty() {
        evidence.push(EvidenceRef::at("analysis_plan", &[]));
    }
    SignalResult::fired(id, severity, asymmetry, parts.join("; "), evidence)
}

/// Enrollment-weighted dropout for one arm role. Arms without a usable rate
/// are skipped; arms without enrollment weigh 1.
fn role_dropout(card: &StudyCard, role: ArmRole) -> Option<f64> {
    let mut num = 0.0;
    let mut den = 0.0;
    for (_, arm) in card.arms_with_role(role) {
        let Some(d) = arm
            .dropout_rate
            .filter(|d| d.is_finite() && (0.0..=1.0).contains(d))
        else {
            continue;
        };
        let w = match arm.enrolled {
            Some(n) if n > 0 => n as f64,
            _ => 1.0,
        };
        num += d * w;
        den += w;
    }
    (den > 0.0).then(|| num / den)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::{AnalysisPlan, Arm, PopulationResult};

    fn arm(role: ArmRole, dropout: f64) -> Arm {
        Arm {
            name: "a".into(),
            role,
            enrolled: Some(100),
            dropout_rate: Some(dropout),
            evidence: vec![],
        }
    }

    fn itt_result() -> PopulationResult {
        PopulationResult {
            population: Population::Itt,
            p_value: Some(0.2),
            estimate: None,
            ci_lower: None,
            ci_upper: None,
            measure: None,
            evidence: vec![],
        }
    }

    #[test]
    fn per_protocol_primary_with_itt_defined_fires() {
        let mut c = StudyCard::new("T");
        c.primary_results.push(itt_result());
        c.analysis_plan = Some(AnalysisPlan {
            primary_population: Some(Population::PerProtocol),
            ..Default::default()
        });
        let r = evaluate(&c, &PopulationConfig::default());
        assert!(r.fired);
        assert_eq!(r.severity, Some(Severity::Medium));
    }

    #[test]
    fn per_protocol_without_itt_is_fine() {
        let mut c = StudyCard::new("T");
        c.analysis_plan = Some(AnalysisPlan {
            primary_population: Some(Population::PerProtocol),
            itt_defined: Some(false),
            ..Default::default()
        });
        assert!(!evaluate(&c, &PopulationConfig::default()).fired);
    }

    #[test]
    fn dropout_gap_fires_and_escalates() {
        let mut c = StudyCard::new("T");
        c.arms = vec![arm(ArmRole::Treatment, 0.25), arm(ArmRole::Control, 0.10)];
        let r = evaluate(&c, &PopulationConfig::default());
        assert!(r.fired);
        assert_eq!(r.severity, Some(Severity::Medium));
        assert!((r.value.unwrap() - 0.15).abs() < 1e-12);

        c.arms[0].dropout_rate = Some(0.40);
        assert_eq!(
            evaluate(&c, &PopulationConfig::default()).severity,
            Some(Severity::High)
        );
    }

    #[test]
    fn balanced_itt_trial_is_clear() {
        let mut c = StudyCard::new("T");
        c.primary_results.push(itt_result());
        c.arms = vec![arm(ArmRole::Treatment, 0.10), arm(ArmRole::Control, 0.08)];
        c.analysis_plan = Some(AnalysisPlan {
            primary_population: Some(Population::Itt),
            ..Default::default()
        });
        let r = evaluate(&c, &PopulationConfig::default());
        assert!(!r.fired);
        assert!(!r.insufficient_data);
    }

    #[test]
    fn nothing_to_assess_is_insufficient() {
        let mut c = StudyCard::new("T");
        c.arms = vec![arm(ArmRole::Treatment, f64::NAN)];
        assert!(evaluate(&c, &PopulationConfig::default()).insufficient_data);
    }
}
