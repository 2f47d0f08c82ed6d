// src/tables/mod.rs
//! Effective-dated calibration tables.
//!
//! Rows are never deleted. Appending a row closes the open row with the same
//! key by setting its end date to the new row's start. A lookup picks the row
//! whose `[from, to)` range covers the date; if several do, the latest start
//! wins, then the latest appended.

pub mod lr;
pub mod prior;
pub mod store;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::{Display, Write as _};
use std::fs;
use std::path::Path;

use crate::error::TableError;

pub use lr::{LrEntry, LrKey, LrScope, LrTable};
pub use prior::{PriorEntry, PriorTable};
pub use store::{CalibrationSnapshot, CalibrationStore};

/// Snapshot format version written by [`EffectiveTable::snapshot`].
pub const SNAPSHOT_VERSION: u32 = 1;

/// A row of an effective-dated table.
pub trait TableRow: Clone + Serialize + DeserializeOwned {
    /// Stable name of the table kind, recorded in snapshots.
    const KIND: &'static str;
    type Key: PartialEq + Display;

    fn key(&self) -> Self::Key;
    fn effective_from(&self) -> NaiveDate;
    fn effective_to(&self) -> Option<NaiveDate>;
    fn close(&mut self, to: NaiveDate);
    /// Field-level checks (finite values, ranges). Date range is checked by the table.
    fn check(&self) -> Result<(), String>;
    /// Canonicalize labels before storage.
    fn normalize(&mut self) {}

    fn covers(&self, date: NaiveDate) -> bool {
        self.effective_from() <= date && self.effective_to().map_or(true, |to| date < to)
    }
}

fn validate<R: TableRow>(row: &R) -> Result<(), TableError> {
    let invalid = |message: String| TableError::InvalidRow {
        kind: R::KIND,
        key: row.key().to_string(),
        message,
    };
    if let Some(to) = row.effective_to() {
        if to <= row.effective_from() {
            return Err(invalid(format!(
                "effective_to {to} must be after effective_from {}",
                row.effective_from()
            )));
        }
    }
    row.check().map_err(invalid)
}

/// Append-only table of effective-dated rows.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveTable<R> {
    rows: Vec<R>,
}

impl<R> Default for EffectiveTable<R> {
    fn default() -> Self {
        Self { rows: Vec::new() }
    }
}

impl<R: TableRow> EffectiveTable<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[R] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Validate and append a row, closing the open row with the same key.
    ///
    /// A new row must start after the open row it supersedes.
    pub fn append(&mut self, mut row: R) -> Result<(), TableError> {
        row.normalize();
        validate(&row)?;
        let key = row.key();
        let from = row.effective_from();
        if let Some(open) = self
            .rows
            .iter_mut()
            .find(|r| r.effective_to().is_none() && r.key() == key)
        {
            if open.effective_from() >= from {
                return Err(TableError::InvalidRow {
                    kind: R::KIND,
                    key: key.to_string(),
                    message: format!(
                        "effective_from {from} does not follow open row starting {}",
                        open.effective_from()
                    ),
                });
            }
            open.close(from);
        }
        self.rows.push(row);
        Ok(())
    }

    /// Active row for `date` among rows matching `pred`.
    pub fn lookup_by(&self, date: NaiveDate, pred: impl Fn(&R) -> bool) -> Option<&R> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, r)| r.covers(date) && pred(r))
            .max_by_key(|(i, r)| (r.effective_from(), *i))
            .map(|(_, r)| r)
    }

    /// Active row for `key` at `date`.
    pub fn lookup(&self, key: &R::Key, date: NaiveDate) -> Option<&R> {
        self.lookup_by(date, |r| &r.key() == key)
    }

    /// SHA-256 over the canonical JSON of the rows, hex-encoded.
    pub fn digest(&self) -> Result<String, TableError> {
        digest_rows(&self.rows)
    }

    pub fn snapshot(&self) -> Result<TableSnapshot<R>, TableError> {
        Ok(TableSnapshot {
            kind: R::KIND.to_string(),
            version: SNAPSHOT_VERSION,
            digest: self.digest()?,
            rows: self.rows.clone(),
        })
    }

    /// Rebuild a table from a snapshot, checking kind, digest and every row.
    pub fn from_snapshot(snapshot: TableSnapshot<R>) -> Result<Self, TableError> {
        if snapshot.kind != R::KIND {
            return Err(TableError::KindMismatch {
                expected: R::KIND,
                found: snapshot.kind,
            });
        }
        let computed = digest_rows(&snapshot.rows)?;
        if computed != snapshot.digest {
            return Err(TableError::DigestMismatch {
                recorded: snapshot.digest,
                computed,
            });
        }
        for row in &snapshot.rows {
            validate(row)?;
        }
        Ok(Self {
            rows: snapshot.rows,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), TableError> {
        let bytes = serde_json::to_vec_pretty(&self.snapshot()?)?;
        fs::write(path, bytes).map_err(|source| TableError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, TableError> {
        let bytes = fs::read(path).map_err(|source| TableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let snapshot: TableSnapshot<R> = serde_json::from_slice(&bytes)?;
        Self::from_snapshot(snapshot)
    }
}

/// Versioned export of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSnapshot<R> {
    pub kind: String,
    pub version: u32,
    pub rows: Vec<R>,
    pub digest: String,
}

fn digest_rows<R: Serialize>(rows: &[R]) -> Result<String, TableError> {
    let canonical = serde_json::to_vec(rows)?;
    let hash = Sha256::digest(&canonical);
    let mut out = String::with_capacity(64);
    for b in hash.iter() {
        let _ = write!(&mut out, "{b:02x}");
    }
    Ok(out)
}
