// src/card.rs
//! Study card: the normalized evidentiary record for one trial-document pair.
//!
//! Produced upstream by the extraction pipeline and treated as read-only by the
//! engine. Every field below the trial id is optional or defaults to empty, so
//! a sparse card still deserializes; signals decide what "insufficient data"
//! means for them.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Default significance level when the plan does not declare a usable alpha.
pub const DEFAULT_ALPHA: f64 = 0.05;

/// A span in a source document backing one fact on the card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Where the fact was read (e.g. "10-K 2024 §7.2 p.41").
    pub locator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    /// When the fact became publicly known. Used by the feature freeze.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<DateTime<Utc>>,
}

impl Evidence {
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            excerpt: None,
            recorded_at: None,
        }
    }

    pub fn excerpt(mut self, text: impl Into<String>) -> Self {
        self.excerpt = Some(text.into());
        self
    }

    pub fn recorded_at(mut self, ts: DateTime<Utc>) -> Self {
        self.recorded_at = Some(ts);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudyCard {
    pub trial_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub arms: Vec<Arm>,
    #[serde(default)]
    pub analysis_plan: Option<AnalysisPlan>,
    /// Primary-endpoint results keyed by analysis population.
    #[serde(default)]
    pub primary_results: Vec<PopulationResult>,
    #[serde(default)]
    pub subgroups: Vec<SubgroupAnalysis>,
    #[serde(default)]
    pub protocol_changes: Vec<ProtocolChange>,
    #[serde(default)]
    pub design: Option<DesignInfo>,
    #[serde(default)]
    pub survival: Option<SurvivalReadouts>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub kind: EndpointKind,
    pub name: String,
    #[serde(default)]
    pub definition: Option<String>,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArmRole {
    Treatment,
    Control,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arm {
    pub name: String,
    pub role: ArmRole,
    /// Signed on purpose: upstream occasionally emits negative placeholders.
    #[serde(default)]
    pub enrolled: Option<i64>,
    /// Fraction in [0,1].
    #[serde(default)]
    pub dropout_rate: Option<f64>,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sidedness {
    OneSided,
    TwoSided,
}

/// Analysis population of a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Population {
    #[serde(alias = "ITT", alias = "intention_to_treat")]
    Itt,
    #[serde(alias = "mITT")]
    ModifiedItt,
    #[serde(alias = "PP")]
    PerProtocol,
    AsTreated,
    #[serde(other)]
    Other,
}

impl Population {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Itt => "ITT",
            Self::ModifiedItt => "mITT",
            Self::PerProtocol => "per-protocol",
            Self::AsTreated => "as-treated",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisPlan {
    #[serde(default)]
    pub alpha: Option<f64>,
    #[serde(default)]
    pub sidedness: Option<Sidedness>,
    #[serde(default)]
    pub planned_interims: Option<u32>,
    #[serde(default)]
    pub alpha_spending: Option<String>,
    #[serde(default)]
    pub assumed_control_rate: Option<f64>,
    /// Absolute risk difference when a control rate is given, otherwise a
    /// standardized mean difference.
    #[serde(default)]
    pub assumed_effect_size: Option<f64>,
    #[serde(default)]
    pub reported_power: Option<f64>,
    #[serde(default)]
    pub primary_population: Option<Population>,
    #[serde(default)]
    pub itt_defined: Option<bool>,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

/// How the point estimate of a result is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectMeasure {
    HazardRatio,
    OddsRatio,
    RiskRatio,
    StandardizedMeanDifference,
    RiskDifference,
    MeanDifference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationResult {
    pub population: Population,
    #[serde(default)]
    pub p_value: Option<f64>,
    #[serde(default)]
    pub estimate: Option<f64>,
    #[serde(default)]
    pub ci_lower: Option<f64>,
    #[serde(default)]
    pub ci_upper: Option<f64>,
    #[serde(default)]
    pub measure: Option<EffectMeasure>,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubgroupAnalysis {
    pub name: String,
    #[serde(default)]
    pub n: Option<i64>,
    #[serde(default)]
    pub p_value: Option<f64>,
    #[serde(default)]
    pub estimate: Option<f64>,
    #[serde(default)]
    pub multiplicity_adjusted: Option<bool>,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolChange {
    pub description: String,
    #[serde(default)]
    pub change_date: Option<NaiveDate>,
    #[serde(default)]
    pub after_last_patient_randomized: Option<bool>,
    #[serde(default)]
    pub touches_primary_endpoint: Option<bool>,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesignInfo {
    #[serde(default)]
    pub single_arm: Option<bool>,
    #[serde(default)]
    pub randomized: Option<bool>,
    #[serde(default)]
    pub therapeutic_area: Option<String>,
    /// Intended to support a marketing application.
    #[serde(default)]
    pub registrational: Option<bool>,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SurvivalReadouts {
    #[serde(default)]
    pub overall_survival: Option<HazardReadout>,
    #[serde(default)]
    pub progression_free_survival: Option<HazardReadout>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HazardReadout {
    #[serde(default)]
    pub hazard_ratio: Option<f64>,
    #[serde(default)]
    pub ci_lower: Option<f64>,
    #[serde(default)]
    pub ci_upper: Option<f64>,
    #[serde(default)]
    pub p_value: Option<f64>,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

impl StudyCard {
    pub fn new(trial_id: impl Into<String>) -> Self {
        Self {
            trial_id: trial_id.into(),
            ..Default::default()
        }
    }

    /// Significance level from the plan, or 0.05 when absent or unusable.
    pub fn significance_level(&self) -> f64 {
        self.analysis_plan
            .as_ref()
            .and_then(|p| p.alpha)
            .filter(|a| a.is_finite() && *a > 0.0 && *a < 1.0)
            .unwrap_or(DEFAULT_ALPHA)
    }

    /// Result for the primary analysis.
    ///
    /// Resolution order: the plan's declared primary population, then ITT,
    /// then the first listed result. Returns the index for evidence paths.
    pub fn primary_result(&self) -> Option<(usize, &PopulationResult)> {
        let declared = self.analysis_plan.as_ref().and_then(|p| p.primary_population);
        if let Some(pop) = declared {
            if let Some(hit) = self.result_for(pop) {
                return Some(hit);
            }
        }
        self.result_for(Population::Itt)
            .or_else(|| self.primary_results.first().map(|r| (0, r)))
    }

    pub fn result_for(&self, population: Population) -> Option<(usize, &PopulationResult)> {
        self.primary_results
            .iter()
            .enumerate()
            .find(|(_, r)| r.population == population)
    }

    /// Arms with the given role, paired with their index on the card.
    pub fn arms_with_role(&self, role: ArmRole) -> impl Iterator<Item = (usize, &Arm)> {
        self.arms.iter().enumerate().filter(move |(_, a)| a.role == role)
    }
}

/// Facts on the card that carry their own evidence spans.
pub(crate) trait HasEvidence {
    fn evidence(&self) -> &[Evidence];
    fn evidence_mut(&mut self) -> &mut Vec<Evidence>;
}

macro_rules! impl_has_evidence {
    ($($ty:ty),* $(,)?) => {
        $(impl HasEvidence for $ty {
            fn evidence(&self) -> &[Evidence] {
                &self.evidence
            }
            fn evidence_mut(&mut self) -> &mut Vec<Evidence> {
                &mut self.evidence
            }
        })*
    };
}

impl_has_evidence!(
    Endpoint,
    Arm,
    AnalysisPlan,
    PopulationResult,
    SubgroupAnalysis,
    ProtocolChange,
    DesignInfo,
    HazardReadout,
);

#[cfg(test)]
mod tests {
    use super::*;

    fn result(pop: Population, p: f64) -> PopulationResult {
        PopulationResult {
            population: pop,
            p_value: Some(p),
            estimate: None,
            ci_lower: None,
            ci_upper: None,
            measure: None,
            evidence: vec![],
        }
    }

    #[test]
    fn primary_result_prefers_declared_population() {
        let mut card = StudyCard::new("NCT000");
        card.primary_results = vec![
            result(Population::Itt, 0.20),
            result(Population::PerProtocol, 0.03),
        ];
        card.analysis_plan = Some(AnalysisPlan {
            primary_population: Some(Population::PerProtocol),
            ..Default::default()
        });
        let (idx, r) = card.primary_result().unwrap();
        assert_eq!(idx, 1);
        assert_eq!(r.p_value, Some(0.03));
    }

    #[test]
    fn primary_result_falls_back_to_itt_then_first() {
        let mut card = StudyCard::new("NCT001");
        card.primary_results = vec![
            result(Population::PerProtocol, 0.03),
            result(Population::Itt, 0.20),
        ];
        assert_eq!(card.primary_result().unwrap().0, 1);

        card.primary_results.remove(1);
        assert_eq!(card.primary_result().unwrap().0, 0);
    }

    #[test]
    fn significance_level_ignores_garbage_alpha() {
        let mut card = StudyCard::new("NCT002");
        assert_eq!(card.significance_level(), DEFAULT_ALPHA);
        card.analysis_plan = Some(AnalysisPlan {
            alpha: Some(f64::NAN),
            ..Default::default()
        });
        assert_eq!(card.significance_level(), DEFAULT_ALPHA);
        card.analysis_plan.as_mut().unwrap().alpha = Some(0.025);
        assert_eq!(card.significance_level(), 0.025);
    }

    #[test]
    fn sparse_card_deserializes() {
        let card: StudyCard = serde_json::from_str(r#"{"trial_id":"NCT003"}"#).unwrap();
        assert!(card.arms.is_empty());
        assert!(card.analysis_plan.is_none());
    }

    #[test]
    fn population_aliases_parse() {
        let p: Population = serde_json::from_str(r#""ITT""#).unwrap();
        assert_eq!(p, Population::Itt);
        let p: Population = serde_json::from_str(r#""something_else""#).unwrap();
        assert_eq!(p, Population::Other);
    }
}
