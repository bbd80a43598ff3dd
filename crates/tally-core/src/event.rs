//! Attendance events and the counter deltas they translate to.

use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

use crate::subject::SubjectRecord;

// ─── Delta ───────────────────────────────────────────────────────────────────

/// Signed per-field change to a record's counters.
///
/// Stores apply a delta as one all-or-nothing increment.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(default)]
pub struct CounterDelta {
  pub classes_held: i32,
  pub present:      i32,
  pub absent:       i32,
}

impl CounterDelta {
  pub fn inverse(self) -> Self {
    Self {
      classes_held: -self.classes_held,
      present:      -self.present,
      absent:       -self.absent,
    }
  }

  pub fn is_zero(&self) -> bool { *self == Self::default() }

  /// The fields this delta changes.
  pub fn touched(&self) -> FieldSet {
    FieldSet {
      classes_held: self.classes_held != 0,
      present:      self.present != 0,
      absent:       self.absent != 0,
    }
  }
}

impl Add for CounterDelta {
  type Output = Self;

  fn add(self, rhs: Self) -> Self {
    Self {
      classes_held: self.classes_held + rhs.classes_held,
      present:      self.present + rhs.present,
      absent:       self.absent + rhs.absent,
    }
  }
}

impl AddAssign for CounterDelta {
  fn add_assign(&mut self, rhs: Self) { *self = *self + rhs; }
}

/// Which counter fields a set of deltas has touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldSet {
  pub classes_held: bool,
  pub present:      bool,
  pub absent:       bool,
}

impl FieldSet {
  pub fn union(self, other: Self) -> Self {
    Self {
      classes_held: self.classes_held || other.classes_held,
      present:      self.present || other.present,
      absent:       self.absent || other.absent,
    }
  }
}

// ─── Events ──────────────────────────────────────────────────────────────────

/// A user-initiated change to a subject's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceEvent {
  MarkPresent,
  MarkAbsent,
  /// A scheduled session was cancelled.
  NoClass,
  /// An unscheduled session was added.
  ExtraClass,
}

impl AttendanceEvent {
  pub fn delta(self) -> CounterDelta {
    match self {
      Self::MarkPresent => CounterDelta { classes_held: 1, present: 1, absent: 0 },
      Self::MarkAbsent => CounterDelta { classes_held: 1, present: 0, absent: 1 },
      Self::NoClass => CounterDelta { classes_held: -1, present: 0, absent: 0 },
      Self::ExtraClass => CounterDelta { classes_held: 1, present: 0, absent: 0 },
    }
  }

  /// Whether the event may be applied to `record`. A cancelled session can
  /// never drive `classes_held` below zero.
  pub fn applies_to(self, record: &SubjectRecord) -> bool {
    match self {
      Self::NoClass => record.classes_held > 0,
      Self::MarkPresent | Self::MarkAbsent | Self::ExtraClass => true,
    }
  }
}
