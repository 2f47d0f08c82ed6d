//! S3 — significant subgroup claim on top of a non-significant primary.

use serde::{Deserialize, Serialize};

use super::{probability, EvidenceRef, Severity, SignalId, SignalResult};
use crate::card::StudyCard;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubgroupConfig {
    /// Any offending subgroup below this p-value makes the signal high.
    pub high_p_below: f64,
    /// This many offending subgroups make the signal high.
    pub high_count: usize,
}

impl Default for SubgroupConfig {
    fn default() -> Self {
        Self {
            high_p_below: 0.01,
            high_count: 2,
        }
    }
}

pub fn evaluate(card: &StudyCard, cfg: &SubgroupConfig) -> SignalResult {
    let id = SignalId::S3;
    let alpha = card.significance_level();

    let Some((idx, primary)) = card.primary_result() else {
        return SignalResult::insufficient(id, "no primary result");
    };
    let Some(primary_p) = probability(primary.p_value) else {
        return SignalResult::insufficient(id, "primary p-value missing or invalid");
    };
    if card.subgroups.is_empty() {
        return SignalResult::clear(id, Some(0.0), "no subgroup analyses");
    }
    if primary_p < alpha {
        return SignalResult::clear(
            id,
            Some(0.0),
            format!("primary significant (p={primary_p:.4} < {alpha})"),
        );
    }

    // Unknown adjustment status counts as unadjusted.
    let offending: Vec<_> = card
        .subgroups
        .iter()
        .enumerate()
        .filter_map(|(i, s)| {
            let p = probability(s.p_value)?;
            (p < alpha && s.multiplicity_adjusted != Some(true)).then_some((i, s, p))
        })
        .collect();
    if offending.is_empty() {
        return SignalResult::clear(
            id,
            Some(0.0),
            "no unadjusted significant subgroup".to_string(),
        );
    }

    let min_p = offending
        .iter()
        .map(|(_, _, p)| *p)
        .fold(f64::INFINITY, f64::min);
    let severity = if offending.len() >= cfg.high_count || min_p < cfg.high_p_below {
        Severity::High
    } else {
        Severity::Medium
    };
    let mut evidence = vec![EvidenceRef::at(
        format!("primary_results[{idx}]"),
        &primary.evidence,
    )];
    evidence.extend(
        offending
            .iter()
            .map(|(i, s, _)| EvidenceRef::at(format!("subgroups[{i}]"), &s.evidence)),
    );
    let names: Vec<&str> = offending.iter().map(|(_, s, _)| s.name.as_str()).collect();
    SignalResult::fired(
        id,
        severity,
        Some(offending.len() as f64),
        format!(
            "primary not significant (p={primary_p:.4}) but unadjusted subgroup(s) {} reach p<{alpha}",
            names.join(", ")
        ),
        evidence,
    )
}
