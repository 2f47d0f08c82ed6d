// src/scoring/engine.rs
//! One trial, one run: card → signals → gates → score.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::{
    apply_freeze, fuse, stop_rules::apply_overrides, AuditTrail, PriorSource, Score, ScoreReport,
    SignalStatus,
};
use crate::card::StudyCard;
use crate::category::{CategoryKey, TrialCategory};
use crate::config::{EngineConfig, PriorDefaultKind};
use crate::error::EngineError;
use crate::gates::{evaluate_gates, LrSource};
use crate::signals::evaluate_all_signals;
use crate::tables::CalibrationSnapshot;

/// Input for one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRequest {
    pub card: StudyCard,
    pub category: TrialCategory,
    /// Estimated primary completion; drives the feature freeze.
    #[serde(default)]
    pub primary_completion: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct ScoringEngine {
    config: EngineConfig,
}

impl ScoringEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Prior for `key` as of `date`.
    ///
    /// Lookup order: table row, per-category default, global default.
    pub fn resolve_prior(
        &self,
        key: &CategoryKey,
        snapshot: &CalibrationSnapshot,
        date: NaiveDate,
    ) -> Result<(f64, PriorSource), EngineError> {
        if let Some(row) = snapshot.priors.lookup_prior(key, date) {
            return Ok((
                row.prior,
                PriorSource::Table {
                    effective_from: row.effective_from,
                },
            ));
        }
        let Some((prior, kind)) = self.config.default_prior(key) else {
            return Err(EngineError::MissingPrior {
                key: key.to_string(),
            });
        };
        let (source, label) = match kind {
            PriorDefaultKind::Category => (PriorSource::CategoryDefault, "category_default"),
            PriorDefaultKind::Global => (PriorSource::GlobalDefault, "global_default"),
        };
        tracing::warn!(
            target: "scoring",
            category = %key,
            prior,
            source = label,
            "no active prior row; using configured default"
        );
        crate::metrics::record_prior_fallback(label);
        Ok((prior, source))
    }

    /// Score one trial against one calibration snapshot.
    ///
    /// A configuration hole (no LR or prior at all) fails this trial only.
    pub fn score(
        &self,
        request: &ScoreRequest,
        snapshot: &CalibrationSnapshot,
        run_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ScoreReport, EngineError> {
        let trial_id = request.card.trial_id.as_str();
        match self.score_inner(request, snapshot, run_id, now) {
            Ok(report) => {
                tracing::info!(
                    target: "scoring",
                    trial = trial_id,
                    run = %run_id,
                    p_fail = report.score.p_fail,
                    gates_fired = report.gates.fired().count(),
                    stop_rules = report.stop_rules.len(),
                    "trial scored"
                );
                crate::metrics::record_score(report.score.p_fail, &report.stop_rules);
                Ok(report)
            }
            Err(e) => {
                tracing::error!(target: "scoring", trial = trial_id, run = %run_id, error = %e, "scoring failed");
                crate::metrics::record_failure();
                Err(e)
            }
        }
    }

    fn score_inner(
        &self,
        request: &ScoreRequest,
        snapshot: &CalibrationSnapshot,
        run_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ScoreReport, EngineError> {
        let cfg = &self.config;
        let date = now.date_naive();
        let universe = request.category.universe();
        let category = request.category.key();
        let mut notes = Vec::new();

        // Phase 1: feature freeze.
        let (card, freeze) = apply_freeze(
            &request.card,
            request.primary_completion,
            cfg.freeze.lookback_days,
            now,
        );
        if !freeze.applicable {
            notes.push("feature freeze not applicable: no primary completion date".to_string());
        } else if freeze.excluded_evidence > 0 {
            notes.push(format!(
                "feature freeze excluded {} evidence item(s), removed {} fact(s)",
                freeze.excluded_evidence, freeze.removed_facts
            ));
        }

        // Phase 2: fusion.
        let signals = evaluate_all_signals(&card, &cfg.signals);
        let evidence = signals.evidence_map();
        let gates = evaluate_gates(
            &signals,
            &evidence,
            &snapshot.lr,
            &cfg.gates.default_lr,
            &universe,
            date,
        )?;
        let (prior, prior_source) = self.resolve_prior(&category, snapshot, date)?;
        match prior_source {
            PriorSource::CategoryDefault => {
                notes.push(format!("prior for {category} from per-category default"))
            }
            PriorSource::GlobalDefault => {
                notes.push(format!("prior for {category} from global default"))
            }
            PriorSource::Table { .. } => {}
        }

        let mut lr_sources = BTreeMap::new();
        for g in gates.fired() {
            if let Some(lr) = &g.likelihood_ratio {
                if lr.source == LrSource::Default {
                    notes.push(format!(
                        "{} LR {} from configured default",
                        g.id, lr.value
                    ));
                }
                lr_sources.insert(g.id, lr.source.clone());
            }
        }

        let fusion = fuse(prior, &gates, &cfg.fusion);
        let mut stop_rules = fusion.hits;
        let mut p_fail = fusion.p_fail;
        if let Some((forced, hit)) = apply_overrides(&cfg.overrides, &gates, p_fail) {
            p_fail = forced;
            stop_rules.push(hit);
        }
        for hit in &stop_rules {
            tracing::warn!(
                target: "scoring",
                trial = %request.card.trial_id,
                rule = %hit.rule,
                original = hit.original,
                applied = hit.applied,
                "stop rule applied"
            );
            notes.push(hit.detail.clone());
        }

        let signal_status = signals
            .iter()
            .map(|r| {
                let status = match (r.fired, r.severity, r.insufficient_data) {
                    (true, Some(severity), _) => SignalStatus::Fired { severity },
                    (_, _, true) => SignalStatus::InsufficientData,
                    _ => SignalStatus::NotFired,
                };
                (r.id, status)
            })
            .collect();

        let score = Score {
            trial_id: request.card.trial_id.clone(),
            run_id,
            prior_pi: fusion.prior_pi,
            logit_prior: fusion.logit_prior,
            sum_log_lr: fusion.sum_log_lr,
            logit_post: fusion.logit_post,
            p_fail,
            timestamp: now,
        };
        let audit = AuditTrail {
            evaluation_date: date,
            universe,
            category,
            freeze,
            prior_source,
            lr_sources,
            signal_status,
            notes,
            snapshot_version: snapshot.version,
            lr_digest: snapshot.lr_digest.clone(),
            prior_digest: snapshot.prior_digest.clone(),
        };
        Ok(ScoreReport {
            score,
            stop_rules,
            signals,
            gates,
            audit,
        })
    }
}

impl Default for ScoringEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
