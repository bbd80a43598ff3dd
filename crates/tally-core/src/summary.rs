//! Aggregate attendance across every subject an owner tracks.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{accounting, subject::SubjectRecord};

/// Totals across all subjects, plus per-subject derived figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceSummary {
  pub subjects:        usize,
  pub classes_held:    u64,
  pub present:         u64,
  pub absent:          u64,
  /// Overall percentage present, computed from the totals.
  pub percent_present: f64,
  pub per_subject:     Vec<SubjectSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectSummary {
  pub id:              Uuid,
  pub code:            String,
  pub percent_present: f64,
  pub safe_bunks:      u32,
}

impl AttendanceSummary {
  pub fn from_records<'a>(records: impl IntoIterator<Item = &'a SubjectRecord>) -> Self {
    let mut summary = Self {
      subjects:        0,
      classes_held:    0,
      present:         0,
      absent:          0,
      percent_present: 0.0,
      per_subject:     Vec::new(),
    };

    for r in records {
      summary.subjects += 1;
      summary.classes_held += u64::from(r.classes_held);
      summary.present += u64::from(r.present);
      summary.absent += u64::from(r.absent);
      summary.per_subject.push(SubjectSummary {
        id:              r.id,
        code:            r.code.clone(),
        percent_present: r.percent_present(),
        safe_bunks:      r.safe_bunks(),
      });
    }

    summary.percent_present = accounting::percent_present(
      i64::try_from(summary.present).unwrap_or(i64::MAX),
      i64::try_from(summary.classes_held).unwrap_or(i64::MAX),
    );
    summary
  }
}
