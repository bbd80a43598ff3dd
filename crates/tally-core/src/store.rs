//! The `RecordStore` trait and the live change feed.
//!
//! The trait is implemented by storage backends (e.g. `tally-store-sqlite`)
//! and by remote adapters (the HTTP client in `tally-cli`). The
//! [`UpdateCoordinator`](crate::coordinator::UpdateCoordinator) and the JSON
//! API depend on this abstraction, not on any concrete backend.

use std::future::Future;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
  event::CounterDelta,
  subject::{NewSubject, OwnerId, SubjectRecord},
};

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a per-owner subject document store.
///
/// Every operation is scoped to an owner; records belonging to one owner are
/// invisible to every other owner.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes (e.g. tokio with `axum`).
pub trait RecordStore: Send + Sync {
  type Error: StoreError;

  /// Create and persist a new record. The store assigns the id and both
  /// timestamps; `present` and `absent` start at zero.
  fn create_record<'a>(
    &'a self,
    owner: &'a OwnerId,
    input: NewSubject,
  ) -> impl Future<Output = Result<SubjectRecord, Self::Error>> + Send + 'a;

  /// Retrieve a record by id. Returns `None` if not found.
  fn get_record<'a>(
    &'a self,
    owner: &'a OwnerId,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<SubjectRecord>, Self::Error>> + Send + 'a;

  /// List every record for `owner`, newest first.
  fn list_records<'a>(
    &'a self,
    owner: &'a OwnerId,
  ) -> impl Future<Output = Result<Vec<SubjectRecord>, Self::Error>> + Send + 'a;

  /// Atomically add each field of `delta` to the record.
  ///
  /// All-or-nothing: returns an error, leaving the record untouched, if the
  /// record does not exist or any counter would become negative.
  fn apply_increment<'a>(
    &'a self,
    owner: &'a OwnerId,
    id: Uuid,
    delta: CounterDelta,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Delete a record. Returns `false` if there was nothing to delete.
  fn delete_record<'a>(
    &'a self,
    owner: &'a OwnerId,
    id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;
}

/// The failures callers react to differently; everything else is `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
  /// The record does not exist for this owner.
  NotFound,
  /// An increment was refused because a counter would have gone negative.
  NegativeCounter,
  Other,
}

/// Error type of a [`RecordStore`], classified by [`StoreErrorKind`].
pub trait StoreError: std::error::Error + Send + Sync + 'static {
  fn kind(&self) -> StoreErrorKind { StoreErrorKind::Other }
}

/// A store that can push changes to subscribers as they happen.
pub trait LiveRecordStore: RecordStore {
  /// Subscribe to changes for `owner`. Dropping the returned
  /// [`Subscription`] unsubscribes.
  fn subscribe(&self, owner: &OwnerId) -> Subscription;
}

// ─── Change feed ─────────────────────────────────────────────────────────────

/// A single change pushed by a [`LiveRecordStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordChange {
  /// The record's latest committed state.
  Upserted(SubjectRecord),
  Deleted(Uuid),
  /// Changes were dropped because the subscriber fell behind; reload.
  Resync,
}

/// A change tagged with the owner it belongs to, as carried on a
/// [`ChangeFeed`].
#[derive(Debug, Clone)]
pub struct OwnedChange {
  pub owner:  OwnerId,
  pub change: RecordChange,
}

/// The sending side of a store's change broadcast.
pub type ChangeFeed = broadcast::Sender<OwnedChange>;

/// Receives the changes for one owner from a [`ChangeFeed`].
#[derive(Debug)]
pub struct Subscription {
  owner: OwnerId,
  rx:    broadcast::Receiver<OwnedChange>,
}

impl Subscription {
  pub fn new(owner: OwnerId, feed: &ChangeFeed) -> Self {
    Self { owner, rx: feed.subscribe() }
  }

  pub fn owner(&self) -> &OwnerId { &self.owner }

  /// Wait for the next change for this owner. Returns `None` once the store
  /// has gone away.
  pub async fn next(&mut self) -> Option<RecordChange> {
    loop {
      match self.rx.recv().await {
        Ok(c) if c.owner == self.owner => return Some(c.change),
        Ok(_) => continue,
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
          tracing::warn!(owner = %self.owner, skipped, "change feed lagged");
          return Some(RecordChange::Resync);
        }
        Err(broadcast::error::RecvError::Closed) => return None,
      }
    }
  }
}
