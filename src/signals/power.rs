//! S2 — underpowered primary analysis.
//!
//! Power is calculated from the card when the inputs exist and the plan's
//! reported power is used otherwise. Two approximations:
//!
//! * binary endpoint (control rate `p_c`, absolute difference `d`):
//!   `Φ(|d| / sqrt(p_c(1-p_c)/n_c + p_t(1-p_t)/n_t) - z)` with `p_t = p_c + d`
//! * continuous endpoint (standardized difference `d`, no control rate):
//!   `Φ(|d| / sqrt(1/n_t + 1/n_c) - z)`
//!
//! `z` is the critical value for `alpha/2` (two-sided, the default) or `alpha`.
//! Effective n per arm role is `Σ enrolled × (1 - dropout)`.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use super::{finite, probability, EvidenceRef, Severity, SignalId, SignalResult};
use crate::card::{ArmRole, Sidedness, StudyCard};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    /// Fires below this power.
    pub threshold: f64,
    pub high_below: f64,
    pub medium_below: f64,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            threshold: 0.80,
            high_below: 0.60,
            medium_below: 0.70,
        }
    }
}

/// Where the power figure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PowerSource {
    Calculated,
    Reported,
}

pub fn evaluate(card: &StudyCard, cfg: &PowerConfig) -> SignalResult {
    let id = SignalId::S2;
    let Some(plan) = card.analysis_plan.as_ref() else {
        return SignalResult::insufficient(id, "no analysis plan");
    };

    let calculated = calculated_power(card);
    let (power, source) = match (calculated, probability(plan.reported_power)) {
        (Ok(p), _) => (p, PowerSource::Calculated),
        (Err(_), Some(p)) => (p, PowerSource::Reported),
        (Err(why), None) => return SignalResult::insufficient(id, why),
    };

    let label = match source {
        PowerSource::Calculated => "calculated",
        PowerSource::Reported => "reported",
    };
    if power >= cfg.threshold {
        return SignalResult::clear(
            id,
            Some(power),
            format!("{label} power {power:.2} >= {:.2}", cfg.threshold),
        );
    }

    let severity = if power < cfg.high_below {
        Severity::High
    } else if power < cfg.medium_below {
        Severity::Medium
    } else {
        Severity::Low
    };
    let mut evidence = vec![EvidenceRef::at("analysis_plan", &plan.evidence)];
    if source == PowerSource::Calculated {
        evidence.extend(
            card.arms
                .iter()
                .enumerate()
                .map(|(i, a)| EvidenceRef::at(format!("arms[{i}]"), &a.evidence)),
        );
    }
    SignalResult::fired(
        id,
        severity,
        Some(power),
        format!("{label} power {power:.2} < {:.2}", cfg.threshold),
        evidence,
    )
}

/// Power from enrolled counts, dropout and the plan's assumptions.
fn calculated_power(card: &StudyCard) -> Result<f64, String> {
    let plan = card
        .analysis_plan
        .as_ref()
        .ok_or_else(|| "no analysis plan".to_string())?;
    let effect = finite(plan.assumed_effect_size)
        .ok_or_else(|| "no assumed effect size".to_string())?;
    let n_t = effective_n(card, ArmRole::Treatment)?;
    let n_c = effective_n(card, ArmRole::Control)?;

    let alpha = card.significance_level();
    let tails = match plan.sidedness {
        Some(Sidedness::OneSided) => 1.0,
        _ => 2.0,
    };
    let normal = Normal::new(0.0, 1.0).map_err(|e| e.to_string())?;
    let z = normal.inverse_cdf(1.0 - alpha / tails);

    let se = match probability(plan.assumed_control_rate) {
        Some(p_c) if p_c > 0.0 && p_c < 1.0 => {
            let p_t = p_c + effect;
            if !(p_t > 0.0 && p_t < 1.0) {
                return Err(format!("implied treatment rate {p_t:.3} outside (0,1)"));
            }
            (p_c * (1.0 - p_c) / n_c + p_t * (1.0 - p_t) / n_t).sqrt()
        }
        Some(_) => return Err("assumed control rate must lie strictly inside (0,1)".into()),
        None => (1.0 / n_t + 1.0 / n_c).sqrt(),
    };
    if !(se.is_finite() && se > 0.0) {
        return Err("degenerate standard error".into());
    }

    let power = normal.cdf(effect.abs() / se - z);
    if power.is_finite() {
        Ok(power.clamp(0.0, 1.0))
    } else {
        Err("power is not finite".into())
    }
}

fn effective_n(card: &StudyCard, role: ArmRole) -> Result<f64, String> {
    let role_name = match role {
        ArmRole::Treatment => "treatment",
        ArmRole::Control => "control",
    };
    let mut total = 0.0;
    let mut arms = 0usize;
    for (_, arm) in card.arms_with_role(role) {
        arms += 1;
        let enrolled = match arm.enrolled {
            Some(n) if n > 0 => n as f64,
            Some(n) => return Err(format!("{role_name} arm `{}` enrolled {n}", arm.name)),
            None => return Err(format!("{role_name} arm `{}` has no enrollment", arm.name)),
        };
        // A missing dropout rate counts as no dropout.
        let dropout = match arm.dropout_rate {
            None => 0.0,
            Some(d) if d.is_finite() && (0.0..1.0).contains(&d) => d,
            Some(d) => return Err(format!("{role_name} arm `{}` dropout {d}", arm.name)),
        };
        total += enrolled * (1.0 - dropout);
    }
    if arms == 0 {
        return Err(format!("no {role_name} arm"));
    }
    if total > 0.0 {
        Ok(total)
    } else {
        Err(format!("no effective {role_name} sample"))
    }
}
