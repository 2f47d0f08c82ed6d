//! S7 — single-arm design in a therapeutic area where randomized comparators
//! are the accepted standard.

use serde::{Deserialize, Serialize};

use super::{EvidenceRef, Severity, SignalId, SignalResult};
use crate::card::{ArmRole, StudyCard};
use crate::category::normalize_label;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesignConfig {
    /// Therapeutic areas where a single-arm efficacy claim is out of line.
    pub randomized_standard_areas: Vec<String>,
}

impl Default for DesignConfig {
    fn default() -> Self {
        Self {
            randomized_standard_areas: [
                "cardiovascular",
                "metabolic",
                "neurology",
                "psychiatry",
                "respiratory",
                "infectious disease",
                "immunology",
                "dermatology",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

pub fn evaluate(card: &StudyCard, cfg: &DesignConfig) -> SignalResult {
    let id = SignalId::S7;
    let design = card.design.as_ref();

    let single_arm = match design.and_then(|d| d.single_arm) {
        Some(flag) => Some(flag),
        None if design.and_then(|d| d.randomized) == Some(true) => Some(false),
        None if card.arms.is_empty() => None,
        None => Some(card.arms_with_role(ArmRole::Control).next().is_none()),
    };
    let Some(single_arm) = single_arm else {
        return SignalResult::insufficient(id, "design and arms not stated");
    };
    if !single_arm {
        return SignalResult::clear(id, None, "controlled design");
    }

    let Some(area) = design
        .and_then(|d| d.therapeutic_area.as_deref())
        .map(normalize_label)
        .filter(|a| !a.is_empty())
    else {
        return SignalResult::insufficient(id, "therapeutic area not stated");
    };
    let standard = cfg
        .randomized_standard_areas
        .iter()
        .any(|a| normalize_label(a) == area);
    if !standard {
        return SignalResult::clear(
            id,
            None,
            format!("single-arm design accepted in `{area}`"),
        );
    }

    let registrational = design.and_then(|d| d.registrational) == Some(true);
    let severity = if registrational {
        Severity::High
    } else {
        Severity::Medium
    };
    let mut evidence = vec![EvidenceRef::at(
        "design",
        design.map(|d| d.evidence.as_slice()).unwrap_or_default(),
    )];
    evidence.extend(
        card.arms
            .iter()
            .enumerate()
            .map(|(i, a)| EvidenceRef::at(format!("arms[{i}]"), &a.evidence)),
    );
    SignalResult::fired(
        id,
        severity,
        None,
        format!("single-arm design in `{area}`, where randomized comparators are standard"),
        evidence,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::{Arm, DesignInfo};

    fn card(single_arm: Option<bool>, area: Option<&str>, registrational: bool) -> StudyCard {
        let mut c = StudyCard::new("T");
        c.design = Some(DesignInfo {
            single_arm,
            randomized: None,
            therapeutic_area: area.map(str::to_string),
            registrational: Some(registrational),
            evidence: vec![],
        });
        c
    }

    #[test]
    fn single_arm_cardiology_fires() {
        let r = evaluate(&card(Some(true), Some("Cardiovascular"), false), &DesignConfig::default());
        assert!(r.fired);
        assert_eq!(r.severity, Some(Severity::Medium));
        let r = evaluate(&card(Some(true), Some("cardiovascular"), true), &DesignConfig::default());
        assert_eq!(r.severity, Some(Severity::High));
    }

    #[test]
    fn single_arm_oncology_is_accepted() {
        let r = evaluate(&card(Some(true), Some("oncology"), true), &DesignConfig::default());
        assert!(!r.fired);
        assert!(!r.insufficient_data);
    }

    #[test]
    fn arms_without_control_count_as_single_arm() {
        let mut c = card(None, Some("infectious-disease"), false);
        c.arms.push(Arm {
            name: "drug".into(),
            role: ArmRole::Treatment,
            enrolled: Some(40),
            dropout_rate: None,
            evidence: vec![],
        });
        assert!(evaluate(&c, &DesignConfig::default()).fired);
    }

    #[test]
    fn missing_area_or_design_is_insufficient() {
        assert!(evaluate(&card(Some(true), None, false), &DesignConfig::default()).insufficient_data);
        assert!(evaluate(&StudyCard::new("T"), &DesignConfig::default()).insufficient_data);
    }
}
