// src/metrics.rs
//! Counters and histograms for the scoring pipeline.
//!
//! The library only records through the `metrics` facade. A recorder is
//! installed by the binary (see [`install_prometheus`]); without one every call
//! here is a no-op.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

use crate::gates::GateSet;
use crate::scoring::StopRuleHit;
use crate::signals::SignalSet;

/// One-time metrics registration (so series show up in the exposition).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(describe_all);
}

fn describe_all() {
    describe_counter!("trial_signals_fired_total", "Signals fired, by signal id.");
    describe_counter!(
        "trial_signals_insufficient_total",
        "Signals resolved to insufficient data, by signal id."
    );
    describe_counter!(
        "trial_gates_fired_total",
        "Gates fired, by gate id and severity."
    );
    describe_counter!(
        "trial_lr_fallbacks_total",
        "Gate LR lookups served by the configured default."
    );
    describe_counter!(
        "trial_prior_fallbacks_total",
        "Prior lookups served by a configured default."
    );
    describe_counter!("trial_stop_rule_hits_total", "Stop rules applied, by rule.");
    describe_counter!("trial_scores_total", "Scores produced.");
    describe_counter!(
        "trial_score_failures_total",
        "Trials whose scoring failed with a configuration error."
    );
    describe_histogram!("trial_p_fail", "Posterior failure probability per score.");
}

pub(crate) fn record_signals(set: &SignalSet) {
    ensure_metrics_described();
    for r in set.iter() {
        if r.fired {
            counter!("trial_signals_fired_total", "signal" => r.id.code()).increment(1);
        } else if r.insufficient_data {
            counter!("trial_signals_insufficient_total", "signal" => r.id.code()).increment(1);
        }
    }
}

pub(crate) fn record_gates(set: &GateSet) {
    ensure_metrics_described();
    for g in set.fired() {
        let severity = g.severity.map(|s| s.code()).unwrap_or("-");
        counter!("trial_gates_fired_total", "gate" => g.id.code(), "severity" => severity)
            .increment(1);
    }
}

pub(crate) fn record_lr_fallback(gate: &'static str) {
    ensure_metrics_described();
    counter!("trial_lr_fallbacks_total", "gate" => gate).increment(1);
}

pub(crate) fn record_prior_fallback(source: &'static str) {
    ensure_metrics_described();
    counter!("trial_prior_fallbacks_total", "source" => source).increment(1);
}

pub(crate) fn record_score(p_fail: f64, hits: &[StopRuleHit]) {
    ensure_metrics_described();
    counter!("trial_scores_total").increment(1);
    histogram!("trial_p_fail").record(p_fail);
    for hit in hits {
        counter!("trial_stop_rule_hits_total", "rule" => hit.rule.clone()).increment(1);
    }
}

pub(crate) fn record_failure() {
    ensure_metrics_described();
    counter!("trial_score_failures_total").increment(1);
}

/// Install the Prometheus recorder globally and return the render handle.
pub fn install_prometheus() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    // Descriptions recorded before install went to the no-op recorder.
    describe_all();
    Ok(handle)
}
