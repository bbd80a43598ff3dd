//! Per-record reconciliation between optimistic local deltas and snapshots
//! pushed by the store.
//!
//! | State | Snapshot arrives |
//! |-------|------------------|
//! | `Idle` | overwrite every field |
//! | `PendingLocalDelta` | overwrite untouched fields; touched fields keep the optimistic value |
//! | `Reconciling` | overwrite every field, back to `Idle` |
//!
//! A record enters `PendingLocalDelta` when a local delta is issued and leaves
//! it once every in-flight delta has been acknowledged or rolled back.

use crate::{
  event::{CounterDelta, FieldSet},
  subject::SubjectRecord,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
  /// Local state matches the last snapshot.
  #[default]
  Idle,
  /// At least one delta has been applied locally but not yet settled.
  PendingLocalDelta {
    in_flight: u32,
    /// Whether any delta in this batch has been acknowledged by the store.
    acked:     bool,
    touched:   FieldSet,
  },
  /// Every delta has settled and at least one committed; the next snapshot
  /// is authoritative.
  Reconciling,
}

/// A cached record and its reconciliation state.
#[derive(Debug, Clone)]
pub struct Tracked {
  record: SubjectRecord,
  state:  SyncState,
}

impl Tracked {
  pub fn new(record: SubjectRecord) -> Self {
    Self { record, state: SyncState::Idle }
  }

  pub fn record(&self) -> &SubjectRecord { &self.record }

  pub fn state(&self) -> SyncState { self.state }

  /// Apply `delta` optimistically.
  pub fn begin(&mut self, delta: CounterDelta) {
    self.record.apply(delta);
    self.state = match self.state {
      SyncState::PendingLocalDelta { in_flight, acked, touched } => {
        SyncState::PendingLocalDelta {
          in_flight: in_flight + 1,
          acked,
          touched: touched.union(delta.touched()),
        }
      }
      SyncState::Idle | SyncState::Reconciling => SyncState::PendingLocalDelta {
        in_flight: 1,
        acked:     false,
        touched:   delta.touched(),
      },
    };
  }

  /// The store committed one in-flight delta.
  pub fn acknowledge(&mut self) { self.settle(true); }

  /// The store rejected `delta`; undo it exactly.
  pub fn roll_back(&mut self, delta: CounterDelta) {
    self.record.apply(delta.inverse());
    self.settle(false);
  }

  fn settle(&mut self, committed: bool) {
    if let SyncState::PendingLocalDelta { in_flight, acked, touched } = self.state {
      let acked = acked || committed;
      self.state = match in_flight.saturating_sub(1) {
        0 if acked => SyncState::Reconciling,
        0 => SyncState::Idle,
        in_flight => SyncState::PendingLocalDelta { in_flight, acked, touched },
      };
    }
  }

  /// Merge a snapshot of the same record pushed by the store.
  pub fn merge_snapshot(&mut self, snapshot: SubjectRecord) {
    match self.state {
      SyncState::Idle | SyncState::Reconciling => {
        self.record = snapshot;
        self.state = SyncState::Idle;
      }
      SyncState::PendingLocalDelta { touched, .. } => {
        let local = std::mem::replace(&mut self.record, snapshot);
        if touched.classes_held {
          self.record.classes_held = local.classes_held;
        }
        if touched.present {
          self.record.present = local.present;
        }
        if touched.absent {
          self.record.absent = local.absent;
        }
      }
    }
  }
}
