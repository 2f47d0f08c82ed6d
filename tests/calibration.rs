// tests/calibration.rs
//
// Labeled history → calibrators → published tables → scoring.

use chrono::{NaiveDate, TimeZone, Utc};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use trial_risk_engine::calibrate::{
    publish_lr_table, publish_prior_table, Estimate, LrCalibratorConfig, PriorCalibratorConfig,
};
use trial_risk_engine::card::{AnalysisPlan, Evidence, ProtocolChange};
use trial_risk_engine::category::{Phase, SponsorExperience};
use trial_risk_engine::config::PriorDefaults;
use trial_risk_engine::gates::{LrDefaults, LrSource};
use trial_risk_engine::scoring::PriorSource;
use trial_risk_engine::tables::{PriorEntry, PriorTable};
use trial_risk_engine::{
    CalibrationSnapshot, CalibrationStore, GateId, HistoricalOutcome, LikelihoodRatioCalibrator,
    PriorRateCalibrator, ScoreRequest, ScoringEngine, Severity, StudyCard, TrialCategory,
};

fn category(pivotal: bool) -> TrialCategory {
    TrialCategory {
        pivotal,
        indication: "oncology".into(),
        phase: Phase::Phase3,
        sponsor_experience: SponsorExperience::Experienced,
    }
}

fn outcome(i: usize, pivotal: bool, failed: bool, g1: Option<Severity>) -> HistoricalOutcome {
    HistoricalOutcome {
        trial_id: format!("NCT{i:05}"),
        failed,
        gates_fired: g1.map(|_| GateId::G1).into_iter().collect::<BTreeSet<_>>(),
        gate_severities: g1
            .map(|s| (GateId::G1, s))
            .into_iter()
            .collect::<BTreeMap<_, _>>(),
        category: category(pivotal),
    }
}

fn effective() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 7, 1).unwrap()
}

fn lr_calibrator() -> LikelihoodRatioCalibrator {
    LikelihoodRatioCalibrator::new(LrCalibratorConfig::default(), LrDefaults::default())
}

fn prior_calibrator() -> PriorRateCalibrator {
    PriorRateCalibrator::new(PriorCalibratorConfig::default(), PriorDefaults::default())
}

#[test]
fn small_groups_publish_nothing() {
    let history: Vec<_> = (0..9)
        .map(|i| outcome(i, true, i % 2 == 0, Some(Severity::High)))
        .collect();

    let lr = lr_calibrator().calibrate(&history);
    assert_eq!(lr.estimates.len(), 1);
    assert!(matches!(
        lr.estimates[0].estimate,
        Estimate::NoEstimate { n: 9, .. }
    ));
    let store = CalibrationStore::default();
    let base = store.current();
    let priors = prior_calibrator().calibrate(&history, &base.priors, effective());
    assert!(priors.estimates.values().all(|e| !e.is_estimated()));
    let published = store
        .publish(
            publish_lr_table(&base.lr, &lr, effective()).unwrap(),
            publish_prior_table(&base.priors, &priors, effective()).unwrap(),
        )
        .unwrap();
    assert!(published.lr.is_empty());
    assert!(published.priors.is_empty());
    assert_eq!(published.lr_digest, base.lr_digest);

    // Scoring still resolves through the configured defaults.
    let mut card = StudyCard::new("NCT-AFTER");
    card.protocol_changes.push(ProtocolChange {
        description: "primary endpoint window shortened".into(),
        change_date: None,
        after_last_patient_randomized: Some(true),
        touches_primary_endpoint: Some(true),
        evidence: vec![Evidence::new("amendment 4")],
    });
    card.analysis_plan = Some(AnalysisPlan {
        reported_power: Some(0.5),
        evidence: vec![Evidence::new("SAP")],
        ..Default::default()
    });
    let req = ScoreRequest {
        card,
        category: category(true),
        primary_completion: None,
    };
    let now = Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap();
    let report = ScoringEngine::default()
        .score(&req, &published, Uuid::new_v4(), now)
        .unwrap();
    assert_eq!(report.audit.lr_sources[&GateId::G1], LrSource::Default);
    assert_eq!(report.audit.prior_source, PriorSource::GlobalDefault);
}

#[test]
fn published_estimates_drive_later_scores() {
    // 40 G1/H trials, 36 failed; 160 quiet trials, 40 failed.
    let mut history: Vec<_> = (0..40)
        .map(|i| outcome(i, true, i < 36, Some(Severity::High)))
        .collect();
    history.extend((40..200).map(|i| outcome(i, i % 2 == 0, i % 4 == 0, None)));

    let lr = lr_calibrator().calibrate(&history);
    let g1h = lr
        .estimates
        .iter()
        .find(|e| e.gate == GateId::G1 && e.severity == Severity::High)
        .unwrap();
    let calibrated = g1h.estimate.value().unwrap();
    assert!(calibrated > 1.0 && calibrated <= 100.0);

    let store = CalibrationStore::default();
    let before = store.current();
    let priors = prior_calibrator().calibrate(&history, &before.priors, effective());
    let pivotal = priors.estimates[&category(true).key()].value().unwrap();
    let non_pivotal = priors.estimates[&category(false).key()].value().unwrap();
    assert!(pivotal >= non_pivotal);
    let published = store
        .publish(
            publish_lr_table(&before.lr, &lr, effective()).unwrap(),
            publish_prior_table(&before.priors, &priors, effective()).unwrap(),
        )
        .unwrap();
    assert_eq!(published.version, before.version + 1);
    assert_ne!(published.lr_digest, before.lr_digest);
    // Readers holding the old snapshot keep it.
    assert!(before.lr.is_empty());

    let row = published
        .lr
        .lookup_gate(GateId::G1, Severity::High, "*", effective())
        .unwrap();
    assert_eq!(row.universe, "*");
    assert_eq!(row.lr, calibrated);
    assert_eq!(row.sample_size, Some(40));

    let mut card = StudyCard::new("NCT-NEXT");
    card.protocol_changes.push(ProtocolChange {
        description: "co-primary dropped".into(),
        change_date: None,
        after_last_patient_randomized: Some(true),
        touches_primary_endpoint: Some(true),
        evidence: vec![Evidence::new("CSR §3")],
    });
    card.analysis_plan = Some(AnalysisPlan {
        reported_power: Some(0.5),
        evidence: vec![Evidence::new("SAP")],
        ..Default::default()
    });
    let req = ScoreRequest {
        card,
        category: category(true),
        primary_completion: None,
    };

    // Before the effective date the published rows are not yet active.
    let early = Utc.with_ymd_and_hms(2025, 6, 15, 0, 0, 0).unwrap();
    let report = ScoringEngine::default()
        .score(&req, &published, Uuid::new_v4(), early)
        .unwrap();
    assert_eq!(report.audit.lr_sources[&GateId::G1], LrSource::Default);

    let later = Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap();
    let report = ScoringEngine::default()
        .score(&req, &published, Uuid::new_v4(), later)
        .unwrap();
    assert_eq!(
        report.audit.lr_sources[&GateId::G1],
        LrSource::Table {
            universe: "*".into(),
            effective_from: effective(),
        }
    );
    assert!((report.score.sum_log_lr - calibrated.ln()).abs() < 1e-12);
    assert_eq!(report.score.prior_pi, pivotal);
    assert_eq!(report.audit.snapshot_version, published.version);
}

#[test]
fn one_sided_recalibration_keeps_pivotal_above_non_pivotal() {
    // Pivotal history too thin to estimate; non-pivotal trials fail 90%.
    let history: Vec<_> = (0..5)
        .map(|i| outcome(i, true, false, None))
        .chain((5..65).map(|i| outcome(i, false, i % 10 != 0, None)))
        .collect();
    let engine = ScoringEngine::default();
    let later = effective().succ_opt().unwrap();

    // Counterpart held at the global default.
    let store = CalibrationStore::default();
    let base = store.current();
    let priors = prior_calibrator().calibrate(&history, &base.priors, effective());
    assert_eq!(priors.adjustments.len(), 1);
    let published = store
        .publish(
            base.lr.clone(),
            publish_prior_table(&base.priors, &priors, effective()).unwrap(),
        )
        .unwrap();
    let (piv, piv_source) = engine
        .resolve_prior(&category(true).key(), &published, later)
        .unwrap();
    let (non, non_source) = engine
        .resolve_prior(&category(false).key(), &published, later)
        .unwrap();
    assert_eq!(piv_source, PriorSource::GlobalDefault);
    assert!(matches!(non_source, PriorSource::Table { .. }));
    assert!(piv >= non + 0.01 - 1e-12, "pivotal {piv} non-pivotal {non}");

    // Counterpart held at an older pivotal row.
    let mut older = PriorTable::new();
    older
        .append(PriorEntry::new(
            category(true).key(),
            0.20,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        ))
        .unwrap();
    let priors = prior_calibrator().calibrate(&history, &older, effective());
    let table = publish_prior_table(&older, &priors, effective()).unwrap();
    let snapshot = CalibrationSnapshot::new(Default::default(), table).unwrap();
    let (piv, _) = engine
        .resolve_prior(&category(true).key(), &snapshot, later)
        .unwrap();
    let (non, _) = engine
        .resolve_prior(&category(false).key(), &snapshot, later)
        .unwrap();
    assert_eq!(piv, 0.20);
    assert!(piv >= non + 0.01 - 1e-12, "pivotal {piv} non-pivotal {non}");
}

#[test]
fn recalibration_supersedes_the_previous_row() {
    let history: Vec<_> = (0..30)
        .map(|i| outcome(i, true, i < 20, Some(Severity::Medium)))
        .chain((30..90).map(|i| outcome(i, true, i % 3 == 0, None)))
        .collect();
    let lr = lr_calibrator().calibrate(&history);

    let first = publish_lr_table(&Default::default(), &lr, effective()).unwrap();
    let later = NaiveDate::from_ymd_opt(2025, 10, 1).unwrap();
    let second = publish_lr_table(&first, &lr, later).unwrap();

    assert_eq!(second.len(), 2);
    assert_eq!(second.rows()[0].effective_to, Some(later));
    assert!(second.rows()[1].effective_to.is_none());
    // Publishing again on the same date is a backdated supersession.
    assert!(publish_lr_table(&second, &lr, later).is_err());
}

#[test]
fn outcomes_parse_from_flat_json() {
    let raw = r#"[
        {"trial_id":"NCT1","actual_outcome":true,"gates_fired":["G1","G4"],
         "gate_severities":{"G1":"H","G4":"M"},
         "pivotal":true,"indication":"Oncology","phase":"phase3","sponsor_experience":"novice"},
        {"trial_id":"NCT2","failed":false,
         "pivotal":false,"indication":"oncology","phase":"phase_3","sponsor_experience":"experienced"}
    ]"#;
    let rows: Vec<HistoricalOutcome> = serde_json::from_str(raw).unwrap();
    assert!(rows[0].failed);
    assert_eq!(rows[0].fired_severity(GateId::G4), Some(Severity::Medium));
    assert_eq!(rows[0].fired_severity(GateId::G2), None);
    assert!(rows[1].gates_fired.is_empty());
    assert_eq!(rows[1].category.key().to_string(), "non_pivotal|oncology|phase3|experienced");
}
