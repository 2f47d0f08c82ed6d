//! S6 — repeated interim looks without an alpha-spending function.

use serde::{Deserialize, Serialize};

use super::{EvidenceRef, Severity, SignalId, SignalResult};
use crate::card::StudyCard;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterimConfig {
    /// Fires when planned interims exceed this count.
    pub max_interims_without_spending: u32,
    /// More interims than this is high severity.
    pub high_above: u32,
}

impl Default for InterimConfig {
    fn default() -> Self {
        Self {
            max_interims_without_spending: 1,
            high_above: 3,
        }
    }
}

pub fn evaluate(card: &StudyCard, cfg: &InterimConfig) -> SignalResult {
    let id = SignalId::S6;
    let Some(plan) = card.analysis_plan.as_ref() else {
        return SignalResult::insufficient(id, "no analysis plan");
    };
    let Some(interims) = plan.planned_interims else {
        return SignalResult::insufficient(id, "planned interim count not stated");
    };

    let spending = plan
        .alpha_spending
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("none"));
    if let Some(method) = spending {
        return SignalResult::clear(
            id,
            Some(interims as f64),
            format!("{interims} interim(s) with alpha spending `{method}`"),
        );
    }
    if interims <= cfg.max_interims_without_spending {
        return SignalResult::clear(
            id,
            Some(interims as f64),
            format!("{interims} interim(s), within limit without alpha spending"),
        );
    }

    let severity = if interims > cfg.high_above {
        Severity::High
    } else {
        Severity::Medium
    };
    SignalResult::fired(
        id,
        severity,
        Some(interims as f64),
        format!("{interims} planned interims with no alpha-spending function"),
        vec![EvidenceRef::at("analysis_plan", &plan.evidence)],
    )
}
