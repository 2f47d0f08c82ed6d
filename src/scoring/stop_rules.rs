// src/scoring/stop_rules.rs
//! Numeric safety rules and configured overrides.

use serde::{Deserialize, Serialize};

use crate::gates::{GateId, GateSet};
use crate::signals::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopRuleKind {
    /// Prior clamped into `[floor, 1 - floor]`.
    PriorBounds,
    /// `logit_post` clamped to `±logit_bound`.
    LogitClamp,
    /// `p_fail` forced by an override rule.
    Override,
}

/// Which rule fired and what it replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopRuleHit {
    pub rule: String,
    pub kind: StopRuleKind,
    pub original: f64,
    pub applied: f64,
    pub detail: String,
}

impl StopRuleHit {
    pub(crate) fn prior_bounds(original: f64, applied: f64, floor: f64) -> Self {
        Self {
            rule: "prior_bounds".into(),
            kind: StopRuleKind::PriorBounds,
            original,
            applied,
            detail: format!("prior {original} clamped into [{floor}, {}]", 1.0 - floor),
        }
    }

    pub(crate) fn logit_clamp(original: f64, applied: f64, bound: f64) -> Self {
        Self {
            rule: "logit_clamp".into(),
            kind: StopRuleKind::LogitClamp,
            original,
            applied,
            detail: format!("logit_post {original} clamped to ±{bound}"),
        }
    }
}

/// Forces `p_fail` when every listed gate fired at or above `min_severity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideRule {
    pub name: String,
    pub gates: Vec<GateId>,
    pub min_severity: Severity,
    pub p_fail: f64,
}

impl OverrideRule {
    pub fn meltdown_with_p_hacking() -> Self {
        Self {
            name: "meltdown_with_p_hacking".into(),
            gates: vec![GateId::G1, GateId::G4],
            min_severity: Severity::High,
            p_fail: 0.97,
        }
    }

    pub fn matches(&self, gates: &GateSet) -> bool {
        !self.gates.is_empty()
            && self.gates.iter().all(|g| {
                gates
                    .get(*g)
                    .is_some_and(|e| e.fired && e.severity.is_some_and(|s| s >= self.min_severity))
            })
    }
}

/// Pick the winning override, if any, and apply it to `p_fail`.
///
/// Highest forced value wins; ties go to the lexicographically smallest name.
pub fn apply_overrides(
    rules: &[OverrideRule],
    gates: &GateSet,
    p_fail: f64,
) -> Option<(f64, StopRuleHit)> {
    let winner = rules
        .iter()
        .filter(|r| r.matches(gates))
        .max_by(|a, b| {
            a.p_fail
                .total_cmp(&b.p_fail)
                .then_with(|| b.name.cmp(&a.name))
        })?;
    let hit = StopRuleHit {
        rule: winner.name.clone(),
        kind: StopRuleKind::Override,
        original: p_fail,
        applied: winner.p_fail,
        detail: format!(
            "{} fired at >= {}; p_fail forced to {}",
            winner
                .gates
                .iter()
                .map(GateId::code)
                .collect::<Vec<_>>()
                .join("+"),
            winner.min_severity,
            winner.p_fail
        ),
    };
    Some((winner.p_fail, hit))
}
