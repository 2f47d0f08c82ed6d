//! S9 — overall survival and progression-free survival point opposite ways.

use serde::{Deserialize, Serialize};

use super::{finite, EvidenceRef, Severity, SignalId, SignalResult};
use crate::card::StudyCard;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurvivalConfig {
    /// Hazard ratios within `1 ± neutral_band` carry no direction.
    pub neutral_band: f64,
}

impl Default for SurvivalConfig {
    fn default() -> Self {
        Self { neutral_band: 0.05 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Benefit,
    Neutral,
    Harm,
}

fn direction(hr: f64, band: f64) -> Direction {
    if hr < 1.0 - band {
        Direction::Benefit
    } else if hr > 1.0 + band {
        Direction::Harm
    } else {
        Direction::Neutral
    }
}

pub fn evaluate(card: &StudyCard, cfg: &SurvivalConfig) -> SignalResult {
    let id = SignalId::S9;
    let Some(surv) = card.survival.as_ref() else {
        return SignalResult::insufficient(id, "no survival readouts");
    };
    let (Some(os), Some(pfs)) = (
        surv.overall_survival.as_ref(),
        surv.progression_free_survival.as_ref(),
    ) else {
        return SignalResult::insufficient(id, "OS or PFS readout missing");
    };
    let (Some(os_hr), Some(pfs_hr)) = (
        finite(os.hazard_ratio).filter(|h| *h > 0.0),
        finite(pfs.hazard_ratio).filter(|h| *h > 0.0),
    ) else {
        return SignalResult::insufficient(id, "OS or PFS hazard ratio missing or invalid");
    };

    let os_dir = direction(os_hr, cfg.neutral_band);
    let pfs_dir = direction(pfs_hr, cfg.neutral_band);
    let contradiction = matches!(
        (os_dir, pfs_dir),
        (Direction::Benefit, Direction::Harm) | (Direction::Harm, Direction::Benefit)
    );
    // Value: log-distance between the two readouts.
    let gap = (os_hr.ln() - pfs_hr.ln()).abs();
    if !contradiction {
        return SignalResult::clear(
            id,
            Some(gap),
            format!("OS HR {os_hr} and PFS HR {pfs_hr} agree in direction"),
        );
    }

    let severity = if os_dir == Direction::Harm {
        Severity::High
    } else {
        Severity::Medium
    };
    SignalResult::fired(
        id,
        severity,
        Some(gap),
        format!("OS HR {os_hr} contradicts PFS HR {pfs_hr}"),
        vec![
            EvidenceRef::at("survival.overall_survival", &os.evidence),
            EvidenceRef::at("survival.progression_free_survival", &pfs.evidence),
        ],
    )
}
