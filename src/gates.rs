//! # Gate Evaluator
//! Fuses fired signals into the four named risk patterns G1–G4.
//!
//! Pure: a gate evaluation depends only on the signal set, the evidence map and
//! the LR table handed in. Each gate has a fixed predicate, a list of signals
//! that must all fire plus a list of which at least one must fire. A fired
//! gate carries the maximum severity of its contributing signals and the LR
//! resolved for `(gate, severity, universe, date)`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::category::WILDCARD_UNIVERSE;
use crate::error::EngineError;
use crate::signals::{EvidenceMap, Severity, SignalEvidence, SignalId, SignalSet};
use crate::tables::LrTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GateId {
    G1,
    G2,
    G3,
    G4,
}

impl GateId {
    pub const ALL: [GateId; 4] = [Self::G1, Self::G2, Self::G3, Self::G4];

    pub fn code(&self) -> &'static str {
        match self {
            Self::G1 => "G1",
            Self::G2 => "G2",
            Self::G3 => "G3",
            Self::G4 => "G4",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::G1 => "alpha meltdown",
            Self::G2 => "analysis gaming",
            Self::G3 => "implausible benefit",
            Self::G4 => "p-hacking",
        }
    }

    /// Signals that must all fire.
    pub fn required(&self) -> &'static [SignalId] {
        match self {
            Self::G1 => &[SignalId::S1, SignalId::S2],
            Self::G2 => &[SignalId::S3],
            Self::G3 => &[SignalId::S5],
            Self::G4 => &[SignalId::S8],
        }
    }

    /// At least one of these must fire. Empty means no such clause.
    pub fn any_of(&self) -> &'static [SignalId] {
        match self {
            Self::G1 => &[],
            Self::G2 => &[SignalId::S4, SignalId::S6],
            Self::G3 => &[SignalId::S7, SignalId::S9],
            Self::G4 => &[SignalId::S1, SignalId::S3],
        }
    }
}

impl fmt::Display for GateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for GateId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GateId::ALL
            .into_iter()
            .find(|g| g.code().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown gate `{s}`"))
    }
}

/// Where a gate's LR came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LrSource {
    /// Active table row; `universe` is `*` for a wildcard hit.
    Table {
        universe: String,
        effective_from: NaiveDate,
    },
    /// Configured default, no table row covered the lookup.
    Default,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LrUsed {
    pub value: f64,
    pub source: LrSource,
}

/// Configured H/M/L fallback LRs for one gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SeverityLrs {
    #[serde(rename = "H", default, skip_serializing_if = "Option::is_none")]
    pub high: Option<f64>,
    #[serde(rename = "M", default, skip_serializing_if = "Option::is_none")]
    pub medium: Option<f64>,
    #[serde(rename = "L", default, skip_serializing_if = "Option::is_none")]
    pub low: Option<f64>,
}

impl SeverityLrs {
    pub fn new(high: f64, medium: f64, low: f64) -> Self {
        Self {
            high: Some(high),
            medium: Some(medium),
            low: Some(low),
        }
    }

    pub fn get(&self, severity: Severity) -> Option<f64> {
        match severity {
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
        }
    }
}

/// Default LRs per gate, keyed by gate code in config files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, SeverityLrs>",
    into = "BTreeMap<String, SeverityLrs>"
)]
pub struct LrDefaults(BTreeMap<GateId, SeverityLrs>);

impl LrDefaults {
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, gate: GateId, severity: Severity) -> Option<f64> {
        self.0.get(&gate).and_then(|s| s.get(severity))
    }

    pub fn set(&mut self, gate: GateId, lrs: SeverityLrs) {
        self.0.insert(gate, lrs);
    }

    pub fn remove(&mut self, gate: GateId) {
        self.0.remove(&gate);
    }

    pub fn iter(&self) -> impl Iterator<Item = (GateId, Severity, f64)> + '_ {
        self.0.iter().flat_map(|(g, lrs)| {
            Severity::ALL
                .into_iter()
                .filter_map(move |s| lrs.get(s).map(|v| (*g, s, v)))
        })
    }
}

impl Default for LrDefaults {
    fn default() -> Self {
        Self(BTreeMap::from([
            (GateId::G1, SeverityLrs::new(5.0, 3.0, 1.8)),
            (GateId::G2, SeverityLrs::new(3.5, 2.2, 1.5)),
            (GateId::G3, SeverityLrs::new(4.0, 2.5, 1.6)),
            (GateId::G4, SeverityLrs::new(3.0, 2.0, 1.4)),
        ]))
    }
}

impl TryFrom<BTreeMap<String, SeverityLrs>> for LrDefaults {
    type Error = String;

    fn try_from(raw: BTreeMap<String, SeverityLrs>) -> Result<Self, Self::Error> {
        raw.into_iter()
            .map(|(k, v)| Ok((k.parse::<GateId>()?, v)))
            .collect::<Result<BTreeMap<_, _>, String>>()
            .map(Self)
    }
}

impl From<LrDefaults> for BTreeMap<String, SeverityLrs> {
    fn from(d: LrDefaults) -> Self {
        d.0.into_iter().map(|(k, v)| (k.code().to_string(), v)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateEval {
    pub id: GateId,
    pub fired: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    /// Fired signals among this gate's inputs (also for gates that did not fire).
    pub supporting_signals: BTreeSet<SignalId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub likelihood_ratio: Option<LrUsed>,
    pub rationale: String,
    #[serde(default)]
    pub supporting_evidence: Vec<SignalEvidence>,
}

impl GateEval {
    /// `ln(lr)` for a fired gate, 0 otherwise.
    pub fn log_lr(&self) -> f64 {
        match (&self.likelihood_ratio, self.fired) {
            (Some(lr), true) => lr.value.ln(),
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GateSet(BTreeMap<GateId, GateEval>);

impl GateSet {
    pub fn get(&self, id: GateId) -> Option<&GateEval> {
        self.0.get(&id)
    }

    pub fn is_fired(&self, id: GateId) -> bool {
        self.get(id).is_some_and(|g| g.fired)
    }

    pub fn iter(&self) -> impl Iterator<Item = &GateEval> {
        self.0.values()
    }

    pub fn fired(&self) -> impl Iterator<Item = &GateEval> {
        self.iter().filter(|g| g.fired)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Resolve the LR for a fired gate.
///
/// Lookup order: table row for the exact universe, table row for `*`, then
/// the configured default. No hit at all is a configuration error.
pub fn resolve_lr(
    gate: GateId,
    severity: Severity,
    lr_table: &LrTable,
    defaults: &LrDefaults,
    universe: &str,
    date: NaiveDate,
) -> Result<LrUsed, EngineError> {
    let mut universes = vec![universe];
    if universe != WILDCARD_UNIVERSE {
        universes.push(WILDCARD_UNIVERSE);
    }
    for u in universes {
        if let Some(row) = lr_table.lookup_gate(gate, severity, u, date) {
            return checked(
                gate,
                LrUsed {
                    value: row.lr,
                    source: LrSource::Table {
                        universe: row.universe.clone(),
                        effective_from: row.effective_from,
                    },
                },
            );
        }
    }
    let Some(value) = defaults.get(gate, severity) else {
        return Err(EngineError::MissingLikelihoodRatio {
            gate,
            severity,
            universe: universe.to_string(),
        });
    };
    tracing::warn!(
        target: "gates",
        gate = %gate,
        severity = %severity,
        universe,
        lr = value,
        "no active LR row; using configured default"
    );
    crate::metrics::record_lr_fallback(gate.code());
    checked(
        gate,
        LrUsed {
            value,
            source: LrSource::Default,
        },
    )
}

fn checked(gate: GateId, lr: LrUsed) -> Result<LrUsed, EngineError> {
    if lr.value.is_finite() && lr.value > 0.0 {
        Ok(lr)
    } else {
        Err(EngineError::InvalidLikelihoodRatio {
            gate,
            value: lr.value,
        })
    }
}

fn evaluate_gate(
    gate: GateId,
    signals: &SignalSet,
    evidence: &EvidenceMap,
    lr_table: &LrTable,
    defaults: &LrDefaults,
    universe: &str,
    date: NaiveDate,
) -> Result<GateEval, EngineError> {
    let required = gate.required();
    let any_of = gate.any_of();

    let supporting: BTreeSet<SignalId> = required
        .iter()
        .chain(any_of)
        .copied()
        .filter(|s| signals.is_fired(*s))
        .collect();
    let missing: Vec<SignalId> = required
        .iter()
        .copied()
        .filter(|s| !signals.is_fired(*s))
        .collect();
    let any_ok = any_of.is_empty() || any_of.iter().any(|s| signals.is_fired(*s));

    let not_fired = |rationale: String| GateEval {
        id: gate,
        fired: false,
        severity: None,
        supporting_signals: supporting.clone(),
        likelihood_ratio: None,
        rationale,
        supporting_evidence: Vec::new(),
    };

    if !missing.is_empty() {
        return Ok(not_fired(format!("missing required {}", join(&missing))));
    }
    if !any_ok {
        return Ok(not_fired(format!("none of {} fired", join(any_of))));
    }

    let supporting_evidence: Vec<SignalEvidence> = supporting
        .iter()
        .filter_map(|s| evidence.get(s))
        .flatten()
        .cloned()
        .collect();
    if supporting_evidence.is_empty() {
        return Ok(not_fired(format!(
            "predicate satisfied by {} but no evidence available",
            join_set(&supporting)
        )));
    }

    let Some(severity) = supporting
        .iter()
        .filter_map(|s| signals.get(*s).and_then(|r| r.severity))
        .max()
    else {
        return Ok(not_fired(format!(
            "predicate satisfied by {} but no severity reported",
            join_set(&supporting)
        )));
    };

    let lr = resolve_lr(gate, severity, lr_table, defaults, universe, date)?;
    let rationale = format!(
        "{} ({}): {} fired, severity {severity}, LR {:.3}",
        gate,
        gate.name(),
        join_set(&supporting),
        lr.value
    );
    Ok(GateEval {
        id: gate,
        fired: true,
        severity: Some(severity),
        supporting_signals: supporting,
        likelihood_ratio: Some(lr),
        rationale,
        supporting_evidence,
    })
}

/// Evaluate G1–G4 against one signal set.
pub fn evaluate_gates(
    signals: &SignalSet,
    evidence: &EvidenceMap,
    lr_table: &LrTable,
    defaults: &LrDefaults,
    universe: &str,
    date: NaiveDate,
) -> Result<GateSet, EngineError> {
    let mut out = BTreeMap::new();
    for gate in GateId::ALL {
        let eval = evaluate_gate(gate, signals, evidence, lr_table, defaults, universe, date)?;
        tracing::debug!(
            target: "gates",
            gate = %gate,
            fired = eval.fired,
            severity = ?eval.severity,
            rationale = %eval.rationale
        );
        out.insert(gate, eval);
    }
    let set = GateSet(out);
    crate::metrics::record_gates(&set);
    Ok(set)
}

fn join(ids: &[SignalId]) -> String {
    ids.iter().map(SignalId::code).collect::<Vec<_>>().join("+")
}

fn join_set(ids: &BTreeSet<SignalId>) -> String {
    ids.iter().map(SignalId::code).collect::<Vec<_>>().join("+")
}
