// src/scoring/freeze.rs
//! Feature freeze.
//!
//! Once "now" passes `primary_completion - lookback`, evidence recorded after
//! that boundary no longer counts. Evidence without a timestamp is kept. A
//! fact whose every evidence item was dropped is removed from the card.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

use crate::card::{HasEvidence, StudyCard};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreezeDecision {
    /// False when the trial has no primary completion date.
    pub applicable: bool,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boundary: Option<DateTime<Utc>>,
    pub excluded_evidence: usize,
    pub removed_facts: usize,
}

impl FreezeDecision {
    fn not_applicable() -> Self {
        Self {
            applicable: false,
            active: false,
            boundary: None,
            excluded_evidence: 0,
            removed_facts: 0,
        }
    }
}

/// Midnight UTC of `completion` minus `lookback_days`. Saturates at the
/// earliest representable instant; configs cap the lookback well short of it.
pub fn freeze_boundary(completion: NaiveDate, lookback_days: i64) -> DateTime<Utc> {
    let start = completion.and_time(NaiveTime::MIN).and_utc();
    TimeDelta::try_days(lookback_days)
        .and_then(|d| start.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Apply the freeze. Borrows the card unchanged when nothing is dropped.
pub fn apply_freeze(
    card: &StudyCard,
    primary_completion: Option<NaiveDate>,
    lookback_days: i64,
    now: DateTime<Utc>,
) -> (Cow<'_, StudyCard>, FreezeDecision) {
    let Some(completion) = primary_completion else {
        return (Cow::Borrowed(card), FreezeDecision::not_applicable());
    };
    let boundary = freeze_boundary(completion, lookback_days);
    let mut decision = FreezeDecision {
        applicable: true,
        active: now > boundary,
        boundary: Some(boundary),
        excluded_evidence: 0,
        removed_facts: 0,
    };
    if !decision.active {
        return (Cow::Borrowed(card), decision);
    }

    let mut frozen = card.clone();
    let mut f = Filter {
        boundary,
        decision: &mut decision,
    };
    f.vec(&mut frozen.endpoints);
    f.vec(&mut frozen.arms);
    f.opt(&mut frozen.analysis_plan);
    f.vec(&mut frozen.primary_results);
    f.vec(&mut frozen.subgroups);
    f.vec(&mut frozen.protocol_changes);
    f.opt(&mut frozen.design);
    if let Some(surv) = frozen.survival.as_mut() {
        f.opt(&mut surv.overall_survival);
        f.opt(&mut surv.progression_free_survival);
    }

    if decision.excluded_evidence == 0 {
        return (Cow::Borrowed(card), decision);
    }
    tracing::info!(
        target: "scoring",
        trial = %card.trial_id,
        boundary = %boundary,
        excluded = decision.excluded_evidence,
        removed = decision.removed_facts,
        "feature freeze excluded late evidence"
    );
    (Cow::Owned(frozen), decision)
}

struct Filter<'a> {
    boundary: DateTime<Utc>,
    decision: &'a mut FreezeDecision,
}

impl Filter<'_> {
    /// Drop late evidence; returns whether the fact survives.
    fn keep<T: HasEvidence>(&mut self, fact: &mut T) -> bool {
        let boundary = self.boundary;
        let ev = fact.evidence_mut();
        let before = ev.len();
        ev.retain(|e| e.recorded_at.map_or(true, |ts| ts <= boundary));
        self.decision.excluded_evidence += before - ev.len();
        let survives = before == 0 || !ev.is_empty();
        if !survives {
            self.decision.removed_facts += 1;
        }
        survives
    }

    fn vec<T: HasEvidence>(&mut self, facts: &mut Vec<T>) {
        facts.retain_mut(|fact| self.keep(fact));
    }

    fn opt<T: HasEvidence>(&mut self, fact: &mut Option<T>) {
        if let Some(inner) = fact.as_mut() {
            if !self.keep(inner) {
                *fact = None;
            }
        }
    }
}
