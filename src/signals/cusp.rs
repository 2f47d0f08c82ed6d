//! S8 — primary p-value sitting just under the significance threshold.
//!
//! Membership is a closed interval: both band edges fire.

use serde::{Deserialize, Serialize};

use super::{probability, EvidenceRef, Severity, SignalId, SignalResult};
use crate::card::StudyCard;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CuspConfig {
    pub lower: f64,
    pub upper: f64,
}

impl Default for CuspConfig {
    fn default() -> Self {
        Self {
            lower: 0.045,
            upper: 0.050,
        }
    }
}

impl CuspConfig {
    pub fn contains(&self, p: f64) -> bool {
        self.lower <= p && p <= self.upper
    }
}

pub fn evaluate(card: &StudyCard, cfg: &CuspConfig) -> SignalResult {
    let id = SignalId::S8;
    let Some((idx, result)) = card.primary_result() else {
        return SignalResult::insufficient(id, "no primary result");
    };
    let Some(p) = probability(result.p_value) else {
        return SignalResult::insufficient(id, "primary p-value missing or outside [0,1]");
    };
    if !cfg.contains(p) {
        return SignalResult::clear(
            id,
            Some(p),
            format!("primary p={p} outside [{}, {}]", cfg.lower, cfg.upper),
        );
    }
    SignalResult::fired(
        id,
        Severity::Medium,
        Some(p),
        format!("primary p={p} inside cusp band [{}, {}]", cfg.lower, cfg.upper),
        vec![EvidenceRef::at(format!("primary_results[{idx}]"), &result.evidence)],
    )
}
