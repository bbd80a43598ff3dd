//! Subject records — the per-owner documents holding raw attendance counters.
//!
//! Only the counters are stored. Percentage present and safe bunks are derived
//! on read through [`SubjectRecord::view`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{InputError, accounting, event::CounterDelta};

// ─── Owner ───────────────────────────────────────────────────────────────────

/// Identifier of the signed-in user that owns a set of subjects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
  /// Returns `None` for an empty or all-whitespace identifier.
  pub fn new(id: impl Into<String>) -> Option<Self> {
    let id = id.into();
    if id.trim().is_empty() { None } else { Some(Self(id)) }
  }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for OwnerId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

// ─── Record ──────────────────────────────────────────────────────────────────

/// A tracked subject and its raw counters.
///
/// `present + absent == classes_held` holds only while every change came from
/// a mark event. Cancelled and extra sessions adjust `classes_held` alone, so
/// the two are allowed to drift apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectRecord {
  pub id:               Uuid,
  pub code:             String,
  pub classes_held:     u32,
  pub present:          u32,
  pub absent:           u32,
  pub required_percent: f64,
  pub created_at:       DateTime<Utc>,
  pub updated_at:       DateTime<Utc>,
}

impl SubjectRecord {
  pub fn percent_present(&self) -> f64 {
    accounting::percent_present(i64::from(self.present), i64::from(self.classes_held))
  }

  pub fn safe_bunks(&self) -> u32 {
    accounting::safe_bunks(
      self.required_percent,
      i64::from(self.classes_held),
      i64::from(self.absent),
    )
  }

  /// Add `delta` to the counters, saturating at zero.
  pub fn apply(&mut self, delta: CounterDelta) {
    self.classes_held = self.classes_held.saturating_add_signed(delta.classes_held);
    self.present = self.present.saturating_add_signed(delta.present);
    self.absent = self.absent.saturating_add_signed(delta.absent);
  }

  /// Bundle the record with its derived fields.
  pub fn view(&self) -> SubjectView {
    SubjectView {
      percent_present: self.percent_present(),
      safe_bunks:      self.safe_bunks(),
      record:          self.clone(),
    }
  }
}

/// A record together with its derived fields; never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectView {
  #[serde(flatten)]
  pub record:          SubjectRecord,
  pub percent_present: f64,
  pub safe_bunks:      u32,
}

// ─── Creation input ──────────────────────────────────────────────────────────

/// Validated input for creating a subject.
///
/// Build it with [`NewSubject::new`]; stores and the coordinator call
/// [`NewSubject::validate`] again before use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSubject {
  pub code:             String,
  pub classes_held:     u32,
  pub required_percent: f64,
}

impl NewSubject {
  /// Normalise `code` (trimmed, uppercase) and check every field.
  pub fn new(
    code: &str,
    classes_held: i64,
    required_percent: f64,
  ) -> Result<Self, InputError> {
    if classes_held <= 0 {
      return Err(InputError::NonPositiveClasses(classes_held));
    }
    let classes_held = u32::try_from(classes_held)
      .map_err(|_| InputError::NonPositiveClasses(classes_held))?;
    let subject = Self {
      code: normalize_code(code),
      classes_held,
      required_percent,
    };
    subject.validate()?;
    Ok(subject)
  }

  pub fn validate(&self) -> Result<(), InputError> {
    if self.code.trim().is_empty() {
      return Err(InputError::EmptyCode);
    }
    if self.classes_held == 0 {
      return Err(InputError::NonPositiveClasses(0));
    }
    if !(0.0..=100.0).contains(&self.required_percent) {
      return Err(InputError::PercentOutOfRange(self.required_percent));
    }
    Ok(())
  }
}

/// Subject codes are compared and displayed trimmed and uppercased.
pub fn normalize_code(code: &str) -> String { code.trim().to_uppercase() }

#[cfg(test)]
mod tests {
  use super::*;

  fn record(classes_held: u32, present: u32, absent: u32) -> SubjectRecord {
    let now = Utc::now();
    SubjectRecord {
      id: Uuid::new_v4(),
      code: "MATH101".into(),
      classes_held,
      present,
      absent,
      required_percent: 75.0,
      created_at: now,
      updated_at: now,
    }
  }

  #[test]
  fn new_subject_normalizes_code() {
    let s = NewSubject::new("  math101 ", 10, 75.0).unwrap();
    assert_eq!(s.code, "MATH101");
    assert_eq!(s.classes_held, 10);
  }

  #[test]
  fn new_subject_rejects_bad_input() {
    assert_eq!(NewSubject::new("   ", 10, 75.0), Err(InputError::EmptyCode));
    assert_eq!(
      NewSubject::new("CS", 0, 75.0),
      Err(InputError::NonPositiveClasses(0))
    );
    assert_eq!(
      NewSubject::new("CS", -4, 75.0),
      Err(InputError::NonPositiveClasses(-4))
    );
    assert_eq!(
      NewSubject::new("CS", 4, 100.5),
      Err(InputError::PercentOutOfRange(100.5))
    );
    assert!(matches!(
      NewSubject::new("CS", 4, f64::NAN),
      Err(InputError::PercentOutOfRange(_))
    ));
  }

  #[test]
  fn percent_bounds_are_inclusive() {
    assert!(NewSubject::new("CS", 4, 0.0).is_ok());
    assert!(NewSubject::new("CS", 4, 100.0).is_ok());
  }

  #[test]
  fn owner_id_rejects_blank() {
    assert!(OwnerId::new("").is_none());
    assert!(OwnerId::new("  ").is_none());
    assert_eq!(OwnerId::new("alice").unwrap().as_str(), "alice");
  }

  #[test]
  fn view_carries_derived_fields() {
    let view = record(20, 15, 3).view();
    assert_eq!(view.percent_present, 75.0);
    assert_eq!(view.safe_bunks, 2);
  }

  #[test]
  fn view_serializes_flat() {
    let json = serde_json::to_value(record(20, 15, 3).view()).unwrap();
    assert_eq!(json["code"], "MATH101");
    assert_eq!(json["classes_held"], 20);
    assert_eq!(json["safe_bunks"], 2);
  }

  #[test]
  fn apply_saturates_at_zero() {
    let mut r = record(0, 0, 0);
    r.apply(CounterDelta { classes_held: -1, present: 0, absent: 0 });
    assert_eq!(r.classes_held, 0);
  }
}
