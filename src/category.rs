// src/category.rs
//! Trial category: the lookup key for priors and the universe tag for LRs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Universe tag matching every trial.
pub const WILDCARD_UNIVERSE: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[serde(alias = "phase_1", alias = "1")]
    Phase1,
    #[serde(alias = "phase_2", alias = "2")]
    Phase2,
    #[serde(alias = "phase_3", alias = "3")]
    Phase3,
    #[serde(alias = "phase_4", alias = "4")]
    Phase4,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Phase1 => "phase1",
            Self::Phase2 => "phase2",
            Self::Phase3 => "phase3",
            Self::Phase4 => "phase4",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SponsorExperience {
    /// First or second program the sponsor takes this far.
    Novice,
    Experienced,
}

impl SponsorExperience {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Novice => "novice",
            Self::Experienced => "experienced",
        }
    }
}

/// Derived trial metadata, used solely as a lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrialCategory {
    pub pivotal: bool,
    pub indication: String,
    pub phase: Phase,
    pub sponsor_experience: SponsorExperience,
}

impl TrialCategory {
    pub fn key(&self) -> CategoryKey {
        CategoryKey {
            pivotal: self.pivotal,
            indication: normalize_label(&self.indication),
            phase: self.phase,
            sponsor_experience: self.sponsor_experience,
        }
    }

    /// Universe tag for LR lookups: the normalized indication.
    pub fn universe(&self) -> String {
        let u = normalize_label(&self.indication);
        if u.is_empty() {
            WILDCARD_UNIVERSE.to_string()
        } else {
            u
        }
    }
}

/// Canonical prior key, rendered as `pivotal|oncology|phase3|experienced`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct CategoryKey {
    pub pivotal: bool,
    pub indication: String,
    pub phase: Phase,
    pub sponsor_experience: SponsorExperience,
}

impl CategoryKey {
    /// Same key with the pivotal flag flipped.
    pub fn counterpart(&self) -> Self {
        Self {
            pivotal: !self.pivotal,
            ..self.clone()
        }
    }
}

impl fmt::Display for CategoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}",
            if self.pivotal { "pivotal" } else { "non_pivotal" },
            self.indication,
            self.phase.name(),
            self.sponsor_experience.name()
        )
    }
}

impl From<CategoryKey> for String {
    fn from(k: CategoryKey) -> Self {
        k.to_string()
    }
}

impl TryFrom<String> for CategoryKey {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl FromStr for CategoryKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('|').map(str::trim).collect();
        let [pivotal, indication, phase, sponsor] = parts.as_slice() else {
            return Err(format!("category key `{s}` must have 4 `|`-separated parts"));
        };
        let pivotal = match *pivotal {
            "pivotal" => true,
            "non_pivotal" => false,
            other => return Err(format!("unknown pivotal flag `{other}`")),
        };
        let phase = match *phase {
            "phase1" => Phase::Phase1,
            "phase2" => Phase::Phase2,
            "phase3" => Phase::Phase3,
            "phase4" => Phase::Phase4,
            other => return Err(format!("unknown phase `{other}`")),
        };
        let sponsor_experience = match *sponsor {
            "novice" => SponsorExperience::Novice,
            "experienced" => SponsorExperience::Experienced,
            other => return Err(format!("unknown sponsor experience `{other}`")),
        };
        Ok(Self {
            pivotal,
            indication: normalize_label(indication),
            phase,
            sponsor_experience,
        })
    }
}

/// Lowercase, turn dashes/underscores/slashes into spaces and collapse runs of
/// whitespace. "Infectious-Disease " and "infectious  disease" compare equal.
pub(crate) fn normalize_label(s: &str) -> String {
    let mut out = s.trim().to_ascii_lowercase();
    for ch in ['—', '–', '-', '_', '/', '\\'] {
        out = out.replace(ch, " ");
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat(pivotal: bool) -> TrialCategory {
        TrialCategory {
            pivotal,
            indication: " Oncology ".into(),
            phase: Phase::Phase3,
            sponsor_experience: SponsorExperience::Experienced,
        }
    }

    #[test]
    fn key_renders_and_parses_back() {
        let key = cat(true).key();
        let s = key.to_string();
        assert_eq!(s, "pivotal|oncology|phase3|experienced");
        let back: CategoryKey = s.parse().unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn counterpart_flips_only_pivotal() {
        let key = cat(true).key();
        let other = key.counterpart();
        assert!(!other.pivotal);
        assert_eq!(other.indication, key.indication);
        assert_eq!(other.counterpart(), key);
    }

    #[test]
    fn bad_keys_are_rejected() {
        assert!("pivotal|oncology|phase3".parse::<CategoryKey>().is_err());
        assert!("maybe|oncology|phase3|novice".parse::<CategoryKey>().is_err());
        assert!("pivotal|oncology|phase9|novice".parse::<CategoryKey>().is_err());
    }

    #[test]
    fn universe_is_normalized_indication() {
        let mut c = cat(false);
        c.indication = "Infectious-Disease".into();
        assert_eq!(c.universe(), "infectious disease");
        c.indication = "   ".into();
        assert_eq!(c.universe(), WILDCARD_UNIVERSE);
    }

    #[test]
    fn key_serializes_as_string() {
        let v = serde_json::to_value(cat(false).key()).unwrap();
        assert_eq!(v, serde_json::json!("non_pivotal|oncology|phase3|experienced"));
    }
}
