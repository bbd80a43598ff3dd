//! The attendance accounting model.
//!
//! Pure functions over raw counters. Nothing here performs I/O or keeps
//! state; derived fields are recomputed whenever the counters change.

/// Percentage of held classes that were attended, rounded to 2 decimals.
///
/// Returns `0.0` when `classes_held <= 0`. A negative `present` is treated as
/// `0`.
pub fn percent_present(present: i64, classes_held: i64) -> f64 {
  if classes_held <= 0 {
    return 0.0;
  }
  let present = present.max(0) as f64;
  round2(present / classes_held as f64 * 100.0)
}

/// How many more classes can be missed while staying at or above
/// `required_percent`, assuming the class total stays at `classes_held`.
///
/// Future growth of `classes_held` is ignored: the term's total is not known
/// in advance. The result is clamped to `0`.
pub fn safe_bunks(required_percent: f64, classes_held: i64, absent: i64) -> u32 {
  if required_percent.is_nan() || required_percent <= 0.0 || classes_held <= 0 {
    return 0;
  }
  let absent = absent.max(0) as f64;
  let slack =
    classes_held as f64 * (100.0 - required_percent) / 100.0 - absent;
  let bunks = slack.floor();
  if bunks <= 0.0 {
    0
  } else {
    bunks.min(f64::from(u32::MAX)) as u32
  }
}

fn round2(value: f64) -> f64 { (value * 100.0).round() / 100.0 }
