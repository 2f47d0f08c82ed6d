// src/signals/mod.rs
//! Signal evaluators S1–S9.
//!
//! Each evaluator is a total function over a (possibly sparse) study card. A
//! missing or non-finite input never raises: it resolves to a result that is
//! not fired and is flagged `insufficient_data`, so downstream code can tell a
//! true negative from a data hole.

pub mod cusp;
pub mod design;
pub mod effect;
pub mod interim;
pub mod population;
pub mod power;
pub mod protocol;
pub mod subgroup;
pub mod survival;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::card::{Evidence, StudyCard};

pub use cusp::CuspConfig;
pub use design::DesignConfig;
pub use effect::{EffectConfig, ReferenceDistribution};
pub use interim::InterimConfig;
pub use population::PopulationConfig;
pub use power::PowerConfig;
pub use subgroup::SubgroupConfig;
pub use survival::SurvivalConfig;

pub const INSUFFICIENT_DATA: &str = "insufficient data";

/// Closed set of risk detectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SignalId {
    S1,
    S2,
    S3,
    S4,
    S5,
    S6,
    S7,
    S8,
    S9,
}

impl SignalId {
    pub const ALL: [SignalId; 9] = [
        Self::S1,
        Self::S2,
        Self::S3,
        Self::S4,
        Self::S5,
        Self::S6,
        Self::S7,
        Self::S8,
        Self::S9,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Self::S1 => "S1",
            Self::S2 => "S2",
            Self::S3 => "S3",
            Self::S4 => "S4",
            Self::S5 => "S5",
            Self::S6 => "S6",
            Self::S7 => "S7",
            Self::S8 => "S8",
            Self::S9 => "S9",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::S1 => "post-LPR protocol change",
            Self::S2 => "underpowered primary analysis",
            Self::S3 => "unadjusted subgroup rescue",
            Self::S4 => "population shift or attrition asymmetry",
            Self::S5 => "implausible effect size",
            Self::S6 => "interims without alpha spending",
            Self::S7 => "single-arm where randomization is standard",
            Self::S8 => "p-value cusp",
            Self::S9 => "OS/PFS contradiction",
        }
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// H/M/L severity. Ordered so `max()` picks the most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    #[serde(rename = "L", alias = "low")]
    Low,
    #[serde(rename = "M", alias = "medium")]
    Medium,
    #[serde(rename = "H", alias = "high")]
    High,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Self::High, Self::Medium, Self::Low];

    pub fn code(&self) -> &'static str {
        match self {
            Self::Low => "L",
            Self::Medium => "M",
            Self::High => "H",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Pointer into the study card, plus the source span if the card had one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRef {
    /// Path into the card, e.g. `protocol_changes[2]`.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Evidence>,
}

impl EvidenceRef {
    pub fn at(path: impl Into<String>, evidence: &[Evidence]) -> Self {
        Self {
            path: path.into(),
            source: evidence.first().cloned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalResult {
    pub id: SignalId,
    pub fired: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    pub reason: String,
    #[serde(default)]
    pub evidence: Vec<EvidenceRef>,
    #[serde(default)]
    pub insufficient_data: bool,
}

impl SignalResult {
    /// Fired result. A fired signal always points at something on the card.
    pub fn fired(
        id: SignalId,
        severity: Severity,
        value: Option<f64>,
        reason: impl Into<String>,
        evidence: Vec<EvidenceRef>,
    ) -> Self {
        debug_assert!(!evidence.is_empty(), "{id} fired without evidence");
        Self {
            id,
            fired: true,
            severity: Some(severity),
            value,
            reason: reason.into(),
            evidence,
            insufficient_data: false,
        }
    }

    /// Data was present and the signal did not fire.
    pub fn clear(id: SignalId, value: Option<f64>, reason: impl Into<String>) -> Self {
        Self {
            id,
            fired: false,
            severity: None,
            value,
            reason: reason.into(),
            evidence: Vec::new(),
            insufficient_data: false,
        }
    }

    /// Required data was missing or non-finite.
    pub fn insufficient(id: SignalId, detail: impl AsRef<str>) -> Self {
        Self {
            id,
            fired: false,
            severity: None,
            value: None,
            reason: format!("{INSUFFICIENT_DATA}: {}", detail.as_ref()),
            evidence: Vec::new(),
            insufficient_data: true,
        }
    }
}

/// Evidence a signal contributes to a gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvidence {
    pub signal: SignalId,
    pub span: EvidenceRef,
    pub severity: Severity,
}

/// Signal id → evidence items, as handed to the gate evaluator.
pub type EvidenceMap = BTreeMap<SignalId, Vec<SignalEvidence>>;

/// Results of one evaluation pass, one entry per signal id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalSet(BTreeMap<SignalId, SignalResult>);

impl SignalSet {
    pub fn from_results(results: impl IntoIterator<Item = SignalResult>) -> Self {
        Self(results.into_iter().map(|r| (r.id, r)).collect())
    }

    pub fn get(&self, id: SignalId) -> Option<&SignalResult> {
        self.0.get(&id)
    }

    pub fn is_fired(&self, id: SignalId) -> bool {
        self.get(id).is_some_and(|r| r.fired)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SignalResult> {
        self.0.values()
    }

    pub fn fired(&self) -> impl Iterator<Item = &SignalResult> {
        self.iter().filter(|r| r.fired)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Evidence map built from fired results.
    pub fn evidence_map(&self) -> EvidenceMap {
        let mut map = EvidenceMap::new();
        for r in self.fired() {
            let Some(severity) = r.severity else { continue };
            let items = r
                .evidence
                .iter()
                .map(|span| SignalEvidence {
                    signal: r.id,
                    span: span.clone(),
                    severity,
                })
                .collect();
            map.insert(r.id, items);
        }
        map
    }
}

/// Thresholds for every evaluator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub power: PowerConfig,
    pub subgroup: SubgroupConfig,
    pub population: PopulationConfig,
    pub effect: EffectConfig,
    pub interim: InterimConfig,
    pub design: DesignConfig,
    pub cusp: CuspConfig,
    pub survival: SurvivalConfig,
}

/// Run a single evaluator.
pub fn evaluate_signal(id: SignalId, card: &StudyCard, cfg: &SignalConfig) -> SignalResult {
    match id {
        SignalId::S1 => protocol::evaluate(card),
        SignalId::S2 => power::evaluate(card, &cfg.power),
        SignalId::S3 => subgroup::evaluate(card, &cfg.subgroup),
        SignalId::S4 => population::evaluate(card, &cfg.population),
        SignalId::S5 => effect::evaluate(card, &cfg.effect),
        SignalId::S6 => interim::evaluate(card, &cfg.interim),
        SignalId::S7 => design::evaluate(card, &cfg.design),
        SignalId::S8 => cusp::evaluate(card, &cfg.cusp),
        SignalId::S9 => survival::evaluate(card, &cfg.survival),
    }
}

/// Run all nine evaluators. Order-independent; same card, same output.
pub fn evaluate_all_signals(card: &StudyCard, cfg: &SignalConfig) -> SignalSet {
    let set = SignalSet::from_results(SignalId::ALL.iter().map(|&id| {
        let r = evaluate_signal(id, card, cfg);
        tracing::debug!(
            target: "signals",
            trial = %card.trial_id,
            signal = %id,
            fired = r.fired,
            insufficient = r.insufficient_data,
            reason = %r.reason
        );
        r
    }));
    crate::metrics::record_signals(&set);
    set
}

/// `Some(x)` only for finite values.
pub(crate) fn finite(x: Option<f64>) -> Option<f64> {
    x.filter(|v| v.is_finite())
}

/// `Some(p)` only for finite values inside [0,1].
pub(crate) fn probability(x: Option<f64>) -> Option<f64> {
    finite(x).filter(|p| (0.0..=1.0).contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::{ProtocolChange, StudyCard};

    #[test]
    fn empty_card_is_total_and_quiet() {
        let card = StudyCard::new("NCT-EMPTY");
        let set = evaluate_all_signals(&card, &SignalConfig::default());
        assert_eq!(set.len(), 9);
        assert_eq!(set.fired().count(), 0);
        // Most evaluators have nothing to look at.
        assert!(set.get(SignalId::S2).unwrap().insufficient_data);
        assert!(set.get(SignalId::S8).unwrap().insufficient_data);
    }

    #[test]
    fn evidence_map_only_holds_fired_signals() {
        let mut card = StudyCard::new("NCT-EV");
        card.protocol_changes.push(ProtocolChange {
            description: "primary endpoint redefined".into(),
            change_date: None,
            after_last_patient_randomized: Some(true),
            touches_primary_endpoint: Some(true),
            evidence: vec![Evidence::new("8-K p.3")],
        });
        let set = evaluate_all_signals(&card, &SignalConfig::default());
        let map = set.evidence_map();
        assert_eq!(map.len(), 1);
        let items = &map[&SignalId::S1];
        assert_eq!(items[0].severity, Severity::High);
        assert_eq!(items[0].span.path, "protocol_changes[0]");
    }

    #[test]
    fn severity_orders_high_last() {
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(
            [Severity::Low, Severity::High, Severity::Medium].iter().max(),
            Some(&Severity::High)
        );
    }

    #[test]
    fn severity_serializes_as_letter() {
        assert_eq!(serde_json::to_string(&Severity::High).unwrap(), "\"H\"");
        let s: Severity = serde_json::from_str("\"medium\"").unwrap();
        assert_eq!(s, Severity::Medium);
    }

    #[test]
    fn probability_filter_rejects_out_of_range() {
        assert_eq!(probability(Some(0.5)), Some(0.5));
        assert_eq!(probability(Some(1.5)), None);
        assert_eq!(probability(Some(f64::NAN)), None);
        assert_eq!(probability(Some(f64::INFINITY)), None);
        assert_eq!(probability(None), None);
    }
}
