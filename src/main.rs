//! trial-risk — command-line entrypoint.
//!
//!   trial-risk score <requests.json> [<snapshot-dir>]
//!   trial-risk calibrate <outcomes.json> <snapshot-dir> <effective-date>

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use std::path::Path;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use trial_risk_engine::calibrate::{publish_lr_table, publish_prior_table};
use trial_risk_engine::{
    score_batch, CalibrationSnapshot, CalibrationStore, EngineConfig, HistoricalOutcome,
    LikelihoodRatioCalibrator, PriorRateCalibrator, ScoreRequest, ScoringEngine,
};

const USAGE: &str = "usage:
  trial-risk score <requests.json> [<snapshot-dir>]
  trial-risk calibrate <outcomes.json> <snapshot-dir> <effective-date YYYY-MM-DD>";

/// Logs go to stderr so stdout stays machine-readable.
/// `TRIAL_RISK_LOG_JSON=1` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("TRIAL_RISK_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1");
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes =
        std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
}

fn cmd_score(config: EngineConfig, requests: &Path, snapshot_dir: Option<&Path>) -> Result<()> {
    let requests: Vec<ScoreRequest> = read_json(requests)?;
    let snapshot = match snapshot_dir {
        Some(dir) => CalibrationSnapshot::load_dir(dir)
            .with_context(|| format!("loading snapshot from {}", dir.display()))?,
        None => CalibrationSnapshot::empty(),
    };
    let store = CalibrationStore::new(snapshot);
    let engine = ScoringEngine::new(config);

    let outcome = score_batch(&engine, &store, &requests, Utc::now());
    for f in &outcome.failures {
        tracing::error!(trial = %f.trial_id, index = f.index, error = %f.error, "trial not scored");
    }
    println!("{}", serde_json::to_string_pretty(&outcome.reports)?);
    if !outcome.failures.is_empty() {
        bail!(
            "{} of {} trial(s) failed to score",
            outcome.failures.len(),
            requests.len()
        );
    }
    Ok(())
}

fn cmd_calibrate(
    config: EngineConfig,
    outcomes: &Path,
    snapshot_dir: &Path,
    effective: &str,
) -> Result<()> {
    let effective = NaiveDate::parse_from_str(effective, "%Y-%m-%d")
        .with_context(|| format!("effective date `{effective}` is not YYYY-MM-DD"))?;
    let history: Vec<HistoricalOutcome> = read_json(outcomes)?;
    let current = CalibrationSnapshot::load_dir(snapshot_dir)
        .with_context(|| format!("loading snapshot from {}", snapshot_dir.display()))?;

    let lr_report = LikelihoodRatioCalibrator::new(
        config.calibration.lr.clone(),
        config.gates.default_lr.clone(),
    )
    .calibrate(&history);
    let store = CalibrationStore::new(current);
    let base = store.current();
    let prior_report =
        PriorRateCalibrator::new(config.calibration.prior.clone(), config.priors.clone())
            .calibrate(&history, &base.priors, effective);

    let published = store.publish(
        publish_lr_table(&base.lr, &lr_report, effective)?,
        publish_prior_table(&base.priors, &prior_report, effective)?,
    )?;
    published
        .save_dir(snapshot_dir)
        .with_context(|| format!("saving snapshot to {}", snapshot_dir.display()))?;

    let summary = serde_json::json!({
        "effective_from": effective,
        "lr": lr_report,
        "priors": prior_report,
        "lr_digest": published.lr_digest,
        "prior_digest": published.prior_digest,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let metrics = if std::env::var("TRIAL_RISK_METRICS").ok().as_deref() == Some("1") {
        Some(trial_risk_engine::metrics::install_prometheus().context("installing metrics recorder")?)
    } else {
        None
    };

    let config = EngineConfig::load().context("loading engine config")?;
    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["score", requests] => cmd_score(config, Path::new(requests), None),
        ["score", requests, dir] => cmd_score(config, Path::new(requests), Some(Path::new(dir))),
        ["calibrate", outcomes, dir, date] => {
            cmd_calibrate(config, Path::new(outcomes), Path::new(dir), date)
        }
        _ => bail!("{USAGE}"),
    };

    if let Some(handle) = metrics {
        eprintln!("{}", handle.render());
    }
    result
}
