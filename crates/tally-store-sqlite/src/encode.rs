//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 strings. UUIDs are stored as
//! hyphenated lowercase strings. Counters are plain integers.

use chrono::{DateTime, SecondsFormat, Utc};
use tally_core::subject::SubjectRecord;
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ────────────────────────────────────────────────────────────

/// Fixed nanosecond precision with a `Z` suffix, so encoded values sort in
/// time order as plain strings.
pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Counters ─────────────────────────────────────────────────────────────────

fn decode_counter(column: &str, value: i64) -> Result<u32> {
  u32::try_from(value)
    .map_err(|_| Error::Corrupt(format!("{column} out of range: {value}")))
}

// ─── Raw row ──────────────────────────────────────────────────────────────────

/// Column list matching [`RawRecord::from_row`], for SELECT and RETURNING.
pub const RECORD_COLUMNS: &str = "subject_id, code, classes_held, present, \
                                  absent, required_percent, created_at, updated_at";

/// Raw values read directly from a `subjects` row.
pub struct RawRecord {
  pub subject_id:       String,
  pub code:             String,
  pub classes_held:     i64,
  pub present:          i64,
  pub absent:           i64,
  pub required_percent: f64,
  pub created_at:       String,
  pub updated_at:       String,
}

impl RawRecord {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      subject_id:       row.get(0)?,
      code:             row.get(1)?,
      classes_held:     row.get(2)?,
      present:          row.get(3)?,
      absent:           row.get(4)?,
      required_percent: row.get(5)?,
      created_at:       row.get(6)?,
      updated_at:       row.get(7)?,
    })
  }

  pub fn into_record(self) -> Result<SubjectRecord> {
    Ok(SubjectRecord {
      id:               decode_uuid(&self.subject_id)?,
      code:             self.code,
      classes_held:     decode_counter("classes_held", self.classes_held)?,
      present:          decode_counter("present", self.present)?,
      absent:           decode_counter("absent", self.absent)?,
      required_percent: self.required_percent,
      created_at:       decode_dt(&self.created_at)?,
      updated_at:       decode_dt(&self.updated_at)?,
    })
  }
}
