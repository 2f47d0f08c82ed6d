// src/tables/prior.rs
//! Category prior rows, keyed by [`CategoryKey`].

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{EffectiveTable, TableRow};
use crate::category::CategoryKey;

pub type PriorTable = EffectiveTable<PriorEntry>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorEntry {
    pub category: CategoryKey,
    pub prior: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ci_lower: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ci_upper: Option<f64>,
    pub effective_from: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_to: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_size: Option<u64>,
}

impl PriorEntry {
    pub fn new(category: CategoryKey, prior: f64, effective_from: NaiveDate) -> Self {
        Self {
            category,
            prior,
            ci_lower: None,
            ci_upper: None,
            effective_from,
            effective_to: None,
            sample_size: None,
        }
    }

    pub fn with_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.ci_lower = Some(lower);
        self.ci_upper = Some(upper);
        self
    }

    pub fn with_sample_size(mut self, n: u64) -> Self {
        self.sample_size = Some(n);
        self
    }
}

fn open_unit(x: f64) -> bool {
    x.is_finite() && 0.0 < x && x < 1.0
}

impl TableRow for PriorEntry {
    const KIND: &'static str = "category_prior";
    type Key = CategoryKey;

    fn key(&self) -> CategoryKey {
        self.category.clone()
    }

    fn effective_from(&self) -> NaiveDate {
        self.effective_from
    }

    fn effective_to(&self) -> Option<NaiveDate> {
        self.effective_to
    }

    fn close(&mut self, to: NaiveDate) {
        self.effective_to = Some(to);
    }

    fn check(&self) -> Result<(), String> {
        if !open_unit(self.prior) {
            return Err(format!("prior {} must lie in (0,1)", self.prior));
        }
        for b in [self.ci_lower, self.ci_upper].into_iter().flatten() {
            if !(b.is_finite() && (0.0..=1.0).contains(&b)) {
                return Err(format!("bound {b} must lie in [0,1]"));
            }
        }
        if let (Some(lo), Some(hi)) = (self.ci_lower, self.ci_upper) {
            if lo > hi {
                return Err(format!("bounds [{lo}, {hi}] are inverted"));
            }
        }
        Ok(())
    }
}

impl EffectiveTable<PriorEntry> {
    pub fn lookup_prior(&self, key: &CategoryKey, date: NaiveDate) -> Option<&PriorEntry> {
        self.lookup(key, date)
    }
}
