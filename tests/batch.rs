// tests/batch.rs
//
// Batch runs: ordering, isolation of failures, one run id, ledger writes.

use chrono::{TimeZone, Utc};

use trial_risk_engine::card::{AnalysisPlan, Evidence, ProtocolChange};
use trial_risk_engine::category::{Phase, SponsorExperience};
use trial_risk_engine::tables::{LrEntry, LrTable, PriorTable};
use trial_risk_engine::{
    score_batch, CalibrationSnapshot, CalibrationStore, EngineConfig, GateId, LedgerError,
    ScoreLedger, ScoreRequest, ScoringEngine, Severity, StudyCard, TrialCategory,
};

fn category(indication: &str) -> TrialCategory {
    TrialCategory {
        pivotal: true,
        indication: indication.into(),
        phase: Phase::Phase3,
        sponsor_experience: SponsorExperience::Novice,
    }
}

fn risky_card(id: &str) -> StudyCard {
    let mut card = StudyCard::new(id);
    card.protocol_changes.push(ProtocolChange {
        description: "analysis population narrowed".into(),
        change_date: None,
        after_last_patient_randomized: Some(true),
        touches_primary_endpoint: Some(false),
        evidence: vec![Evidence::new("amendment 7")],
    });
    card.analysis_plan = Some(AnalysisPlan {
        reported_power: Some(0.65),
        evidence: vec![Evidence::new("SAP")],
        ..Default::default()
    });
    card
}

fn requests() -> Vec<ScoreRequest> {
    (0..24)
        .map(|i| {
            let id = format!("NCT{i:03}");
            let card = if i % 3 == 0 {
                risky_card(&id)
            } else {
                StudyCard::new(id)
            };
            // Every fifth trial sits in a category with no prior anywhere.
            let indication = if i % 5 == 4 { "dermatology" } else { "oncology" };
            ScoreRequest {
                card,
                category: category(indication),
                primary_completion: None,
            }
        })
        .collect()
}

fn engine() -> ScoringEngine {
    let mut cfg = EngineConfig::default();
    cfg.priors.global = None;
    cfg.priors
        .categories
        .insert(category("oncology").key(), 0.45);
    ScoringEngine::new(cfg)
}

#[test]
fn failures_are_isolated_and_order_is_kept() {
    let reqs = requests();
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
    let outcome = score_batch(&engine(), &CalibrationStore::default(), &reqs, now);

    let failed: Vec<_> = outcome.failures.iter().map(|f| f.index).collect();
    assert_eq!(failed, vec![4, 9, 14, 19]);
    assert!(outcome
        .failures
        .iter()
        .all(|f| f.error.contains("no prior for category")));
    assert_eq!(outcome.failures[0].trial_id, "NCT004");

    let expected: Vec<_> = reqs
        .iter()
        .enumerate()
        .filter(|(i, _)| i % 5 != 4)
        .map(|(_, r)| r.card.trial_id.clone())
        .collect();
    let got: Vec<_> = outcome
        .reports
        .iter()
        .map(|r| r.score.trial_id.clone())
        .collect();
    assert_eq!(got, expected);

    assert!(outcome.reports.iter().all(|r| r.score.run_id == outcome.run_id));
    assert!(outcome.reports.iter().all(|r| r.score.timestamp == now));
    assert!(outcome
        .reports
        .iter()
        .filter(|r| r.gates.is_fired(GateId::G1))
        .all(|r| r.gates.get(GateId::G1).unwrap().severity == Some(Severity::Medium)));
}

#[test]
fn batch_matches_sequential_scoring() {
    let reqs = requests();
    let engine = engine();
    let store = CalibrationStore::default();
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
    let outcome = score_batch(&engine, &store, &reqs, now);

    let snapshot = store.current();
    let sequential: Vec<_> = reqs
        .iter()
        .filter_map(|r| engine.score(r, &snapshot, outcome.run_id, now).ok())
        .collect();
    assert_eq!(outcome.reports, sequential);
}

#[test]
fn batch_pins_the_snapshot_it_started_with() {
    let mut lr = LrTable::new();
    lr.append(LrEntry::gate(
        GateId::G1,
        Severity::Medium,
        "*",
        2.0,
        chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
    ))
    .unwrap();
    let store = CalibrationStore::new(CalibrationSnapshot::new(lr, PriorTable::new()).unwrap());
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
    let first = score_batch(&engine(), &store, &requests(), now);
    assert_eq!(first.snapshot_version, 0);

    store.publish(LrTable::new(), PriorTable::new()).unwrap();
    let second = score_batch(&engine(), &store, &requests(), now);
    assert_eq!(second.snapshot_version, 1);
    assert_ne!(first.run_id, second.run_id);

    let g1 = |o: &trial_risk_engine::BatchOutcome| {
        o.reports
            .iter()
            .find(|r| r.gates.is_fired(GateId::G1))
            .map(|r| r.score.sum_log_lr)
            .unwrap()
    };
    assert!((g1(&first) - 2.0f64.ln()).abs() < 1e-12);
    assert!((g1(&second) - 3.0f64.ln()).abs() < 1e-12);
}

#[test]
fn ledger_keeps_one_score_per_trial_and_run() {
    let reqs = requests();
    let engine = engine();
    let store = CalibrationStore::default();
    let ledger = ScoreLedger::new();

    let day1 = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
    let day2 = Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap();
    let run1 = score_batch(&engine, &store, &reqs, day1);
    let run2 = score_batch(&engine, &store, &reqs, day2);
    for report in run1.reports.iter().chain(&run2.reports) {
        ledger.record(report.score.clone()).unwrap();
    }
    assert_eq!(ledger.len(), run1.reports.len() + run2.reports.len());

    let history = ledger.history("NCT000");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].run_id, run1.run_id);
    assert_eq!(ledger.latest("NCT000").unwrap().timestamp, day2);
    assert!(ledger.history("NCT004").is_empty());

    let again = ledger.record(run1.reports[0].score.clone()).unwrap_err();
    assert!(matches!(again, LedgerError::DuplicateRun { .. }));
}

#[test]
fn repeated_trial_ids_are_scored_once_per_run() {
    let reqs: Vec<_> = ["NCT-DUP", "NCT-ONE", "NCT-DUP", "NCT-DUP"]
        .into_iter()
        .map(|id| ScoreRequest {
            card: risky_card(id),
            category: category("oncology"),
            primary_completion: None,
        })
        .collect();
    let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
    let outcome = score_batch(&engine(), &CalibrationStore::default(), &reqs, now);

    let scored: Vec<_> = outcome
        .reports
        .iter()
        .map(|r| r.score.trial_id.as_str())
        .collect();
    assert_eq!(scored, vec!["NCT-DUP", "NCT-ONE"]);
    let skipped: Vec<_> = outcome.failures.iter().map(|f| f.index).collect();
    assert_eq!(skipped, vec![2, 3]);
    assert!(outcome
        .failures
        .iter()
        .all(|f| f.trial_id == "NCT-DUP" && f.error.contains("index 0")));

    // Every report from the run fits in a ledger.
    let ledger = ScoreLedger::new();
    for report in &outcome.reports {
        ledger.record(report.score.clone()).unwrap();
    }
    assert_eq!(ledger.history("NCT-DUP").len(), 1);
}
