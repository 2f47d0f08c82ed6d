//! S1 — protocol changes made after the last patient was randomized.

use super::{EvidenceRef, Severity, SignalId, SignalResult};
use crate::card::StudyCard;

pub fn evaluate(card: &StudyCard) -> SignalResult {
    let id = SignalId::S1;
    if card.protocol_changes.is_empty() {
        return SignalResult::clear(id, Some(0.0), "no protocol changes recorded");
    }

    let known = card
        .protocol_changes
        .iter()
        .filter(|c| c.after_last_patient_randomized.is_some())
        .count();
    if known == 0 {
        return SignalResult::insufficient(id, "no protocol change carries an LPR flag");
    }

    let late: Vec<_> = card
        .protocol_changes
        .iter()
        .enumerate()
        .filter(|(_, c)| c.after_last_patient_randomized == Some(true))
        .collect();
    if late.is_empty() {
        return SignalResult::clear(
            id,
            Some(0.0),
            format!("{known} protocol change(s), none after last patient randomized"),
        );
    }

    let touches_primary = late
        .iter()
        .any(|(_, c)| c.touches_primary_endpoint == Some(true));
    let severity = if touches_primary {
        Severity::High
    } else {
        Severity::Medium
    };
    let evidence = late
        .iter()
        .map(|(i, c)| EvidenceRef::at(format!("protocol_changes[{i}]"), &c.evidence))
        .collect();
    let first = &late[0].1.description;
    let reason = if touches_primary {
        format!(
            "{} change(s) after last patient randomized, touching the primary endpoint (e.g. \"{first}\")",
            late.len()
        )
    } else {
        format!(
            "{} change(s) after last patient randomized (e.g. \"{first}\")",
            late.len()
        )
    };
    SignalResult::fired(id, severity, Some(late.len() as f64), reason, evidence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::ProtocolChange;

    fn change(after: Option<bool>, primary: Option<bool>) -> ProtocolChange {
        ProtocolChange {
            description: "amended".into(),
            change_date: None,
            after_last_patient_randomized: after,
            touches_primary_endpoint: primary,
            evidence: vec![],
        }
    }

    #[test]
    fn no_changes_is_a_clean_negative() {
        let r = evaluate(&StudyCard::new("T"));
        assert!(!r.fired);
        assert!(!r.insufficient_data);
    }

    #[test]
    fn unknown_flags_are_insufficient() {
        let mut card = StudyCard::new("T");
        card.protocol_changes.push(change(None, Some(true)));
        let r = evaluate(&card);
        assert!(!r.fired);
        assert!(r.insufficient_data);
    }

    #[test]
    fn pre_lpr_changes_do_not_fire() {
        let mut card = StudyCard::new("T");
        card.protocol_changes.push(change(Some(false), Some(true)));
        assert!(!evaluate(&card).fired);
    }

    #[test]
    fn severity_depends_on_primary_endpoint() {
        let mut card = StudyCard::new("T");
        card.protocol_changes.push(change(Some(true), Some(false)));
        let r = evaluate(&card);
        assert!(r.fired);
        assert_eq!(r.severity, Some(Severity::Medium));

        card.protocol_changes.push(change(Some(true), Some(true)));
        let r = evaluate(&card);
        assert_eq!(r.severity, Some(Severity::High));
        assert_eq!(r.value, Some(2.0));
        assert_eq!(r.evidence.len(), 2);
        assert_eq!(r.evidence[1].path, "protocol_changes[1]");
    }
}
