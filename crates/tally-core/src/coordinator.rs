//! The update coordinator: applies attendance events optimistically against a
//! [`RecordStore`].
//!
//! Every mutation changes the local cache first, then issues one store call.
//! If the call fails the exact inverse is applied locally and the failure is
//! returned as [`Error::RemoteWriteFailed`]. Nothing is retried; the caller
//! re-triggers the action.
//!
//! The cache lock is never held across a store call, so overlapping events on
//! the same record interleave freely. Store increments are commutative, so
//! the store converges regardless of arrival order.

use std::{
  collections::HashSet,
  future::Future,
  sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
  Error, InputError, Result,
  event::AttendanceEvent,
  reconcile::{SyncState, Tracked},
  session::Session,
  store::{RecordChange, RecordStore, Subscription},
  subject::{NewSubject, OwnerId, SubjectRecord, SubjectView},
  summary::AttendanceSummary,
};

#[derive(Debug, Default)]
struct Cache {
  /// The owner the entries belong to; reset on every session transition.
  owner:   Option<OwnerId>,
  /// Newest first.
  entries: Vec<Tracked>,
}

impl Cache {
  fn position(&self, id: Uuid) -> Option<usize> {
    self.entries.iter().position(|t| t.record().id == id)
  }

  fn get_mut(&mut self, id: Uuid) -> Option<&mut Tracked> {
    self.entries.iter_mut().find(|t| t.record().id == id)
  }

  fn insert_front(&mut self, tracked: Tracked) {
    if self.position(tracked.record().id).is_none() {
      self.entries.insert(0, tracked);
    }
  }
}

/// Applies attendance events to a local cache and a [`RecordStore`].
pub struct UpdateCoordinator<S> {
  store:   Arc<S>,
  session: Session,
  cache:   Mutex<Cache>,
}

impl<S: RecordStore> UpdateCoordinator<S> {
  pub fn new(store: Arc<S>, session: Session) -> Self {
    Self { store, session, cache: Mutex::new(Cache::default()) }
  }

  fn cache(&self) -> MutexGuard<'_, Cache> {
    self.cache.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// The current owner. Clears the cache if the identity changed since the
  /// last call.
  fn sync_session(&self) -> Option<OwnerId> {
    let current = self.session.owner();
    let mut cache = self.cache();
    if cache.owner != current {
      if !cache.entries.is_empty() {
        debug!(dropped = cache.entries.len(), "session changed, clearing cache");
      }
      cache.entries.clear();
      cache.owner = current.clone();
    }
    current
  }

  fn require_owner(&self) -> Result<OwnerId> {
    self.sync_session().ok_or(Error::NotAuthenticated)
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  /// Replace the cache with the store's current records.
  ///
  /// Records with a delta still in flight keep their optimistic counters.
  pub async fn load(&self) -> Result<Vec<SubjectView>> {
    let owner = self.require_owner()?;
    let records = self.store.list_records(&owner).await.map_err(Error::read)?;

    let mut cache = self.cache();
    if cache.owner.as_ref() != Some(&owner) {
      // Signed out while the list was in flight.
      return Ok(Vec::new());
    }
    let mut previous = std::mem::take(&mut cache.entries);
    cache.entries = records
      .into_iter()
      .map(|record| {
        match previous.iter().position(|t| t.record().id == record.id) {
          Some(i) => {
            let mut tracked = previous.swap_remove(i);
            tracked.merge_snapshot(record);
            tracked
          }
          None => Tracked::new(record),
        }
      })
      .collect();

    info!(%owner, subjects = cache.entries.len(), "loaded subjects");
    Ok(cache.entries.iter().map(|t| t.record().view()).collect())
  }

  /// The cached subjects, newest first. Empty while signed out.
  pub fn subjects(&self) -> Vec<SubjectView> {
    if self.sync_session().is_none() {
      return Vec::new();
    }
    self.cache().entries.iter().map(|t| t.record().view()).collect()
  }

  pub fn subject(&self, id: Uuid) -> Option<SubjectView> {
    self.sync_session()?;
    let mut cache = self.cache();
    cache.get_mut(id).map(|t| t.record().view())
  }

  pub fn sync_state(&self, id: Uuid) -> Option<SyncState> {
    self.sync_session()?;
    self.cache().get_mut(id).map(|t| t.state())
  }

  pub fn summary(&self) -> AttendanceSummary {
    if self.sync_session().is_none() {
      return AttendanceSummary::from_records(std::iter::empty::<&SubjectRecord>());
    }
    let cache = self.cache();
    AttendanceSummary::from_records(cache.entries.iter().map(Tracked::record))
  }

  // ── Mutations ─────────────────────────────────────────────────────────────

  /// Create a subject. The store assigns its id, so the record is cached
  /// only once the store has accepted it.
  pub async fn create(&self, input: NewSubject) -> Result<SubjectView> {
    input.validate()?;
    let owner = self.require_owner()?;
    let code = input.code.clone();

    let record = self
      .store
      .create_record(&owner, input)
      .await
      .map_err(|e| {
        warn!(%owner, %code, error = %e, "could not create subject");
        Error::write(e)
      })?;

    let view = record.view();
    let mut cache = self.cache();
    if cache.owner.as_ref() == Some(&owner) {
      cache.insert_front(Tracked::new(record));
    }
    info!(%owner, id = %view.record.id, %code, "created subject");
    Ok(view)
  }

  /// Apply an attendance event to one subject.
  ///
  /// A [`AttendanceEvent::NoClass`] on a subject with no classes held is
  /// ignored and returns the unchanged view.
  pub async fn apply(&self, id: Uuid, event: AttendanceEvent) -> Result<SubjectView> {
    let owner = self.require_owner()?;

    let (delta, optimistic) = {
      let mut cache = self.cache();
      let tracked = cache.get_mut(id).ok_or(InputError::UnknownSubject(id))?;
      if !event.applies_to(tracked.record()) {
        debug!(%id, ?event, "event does not apply, ignoring");
        return Ok(tracked.record().view());
      }
      let delta = event.delta();
      tracked.begin(delta);
      (delta, tracked.record().view())
    };
    debug!(%id, ?event, ?delta, "applied optimistically");

    let remote = self.store.apply_increment(&owner, id, delta);
    self
      .settle(
        &owner,
        "increment",
        remote,
        |cache, _| {
          if let Some(t) = cache.get_mut(id) {
            t.acknowledge();
          }
        },
        |cache| {
          if let Some(t) = cache.get_mut(id) {
            t.roll_back(delta);
          }
        },
      )
      .await?;

    Ok(self.subject(id).unwrap_or(optimistic))
  }

  /// Delete one subject. Irreversible once the store accepts it.
  pub async fn delete(&self, id: Uuid) -> Result<()> {
    let owner = self.require_owner()?;

    let (index, removed) = {
      let mut cache = self.cache();
      let index = cache.position(id).ok_or(InputError::UnknownSubject(id))?;
      (index, cache.entries.remove(index))
    };

    let remote = self.store.delete_record(&owner, id);
    let existed = self
      .settle(
        &owner,
        "delete",
        remote,
        |_, _| {},
        move |cache| {
          if cache.position(id).is_none() {
            let index = index.min(cache.entries.len());
            cache.entries.insert(index, removed);
          }
        },
      )
      .await?;

    if !existed {
      debug!(%id, "subject was already gone from the store");
    }
    info!(%owner, %id, "deleted subject");
    Ok(())
  }

  /// Delete every subject the owner has, returning how many the store removed.
  ///
  /// Best-effort: every deletion is attempted. If any fail, only the subjects
  /// that could not be deleted are put back in the cache.
  pub async fn clear_all(&self) -> Result<usize> {
    let owner = self.require_owner()?;
    let removed = std::mem::take(&mut self.cache().entries);

    let ids: Vec<Uuid> = match self.store.list_records(&owner).await {
      Ok(records) => records.into_iter().map(|r| r.id).collect(),
      Err(e) => {
        warn!(%owner, error = %e, "could not list subjects to clear");
        self.restore(&owner, removed, |_| true);
        return Err(Error::write(e));
      }
    };

    let mut deleted = 0;
    let mut failed = HashSet::new();
    let mut first_error = None;
    for id in ids {
      match self.store.delete_record(&owner, id).await {
        Ok(existed) => deleted += usize::from(existed),
        Err(e) => {
          warn!(%owner, %id, error = %e, "could not delete subject");
          failed.insert(id);
          first_error.get_or_insert(e);
        }
      }
    }

    if let Some(e) = first_error {
      self.restore(&owner, removed, |id| failed.contains(&id));
      return Err(Error::write(e));
    }

    info!(%owner, deleted, "cleared all subjects");
    Ok(deleted)
  }

  /// Await `remote`, then settle the cache: `commit` on success, `rollback`
  /// on failure. Both are skipped if the owner changed in the meantime.
  async fn settle<T, E>(
    &self,
    owner: &OwnerId,
    action: &'static str,
    remote: impl Future<Output = Result<T, E>>,
    commit: impl FnOnce(&mut Cache, &T),
    rollback: impl FnOnce(&mut Cache),
  ) -> Result<T>
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    let outcome = remote.await;
    let mut cache = self.cache();
    let current = cache.owner.as_ref() == Some(owner);
    match outcome {
      Ok(value) => {
        if current {
          commit(&mut cache, &value);
        }
        Ok(value)
      }
      Err(e) => {
        warn!(%owner, action, error = %e, "store rejected change, rolling back");
        if current {
          rollback(&mut cache);
        }
        Err(Error::write(e))
      }
    }
  }

  fn restore(&self, owner: &OwnerId, removed: Vec<Tracked>, keep: impl Fn(Uuid) -> bool) {
    let mut cache = self.cache();
    if cache.owner.as_ref() != Some(owner) {
      return;
    }
    for tracked in removed.into_iter().rev().filter(|t| keep(t.record().id)) {
      cache.insert_front(tracked);
    }
  }

  // ── Live updates ──────────────────────────────────────────────────────────

  /// Merge one change pushed by the store. Ignored unless `owner` is the
  /// signed-in owner.
  pub fn apply_change(&self, owner: &OwnerId, change: RecordChange) {
    if self.sync_session().as_ref() != Some(owner) {
      return;
    }
    let mut cache = self.cache();
    match change {
      RecordChange::Upserted(record) => match cache.position(record.id) {
        Some(i) => cache.entries[i].merge_snapshot(record),
        None => cache.insert_front(Tracked::new(record)),
      },
      RecordChange::Deleted(id) => cache.entries.retain(|t| t.record().id != id),
      RecordChange::Resync => debug!("resync requested"),
    }
  }

  /// Merge changes from `subscription` until the store goes away.
  pub async fn follow_changes(&self, mut subscription: Subscription) {
    while let Some(change) = subscription.next().await {
      if matches!(change, RecordChange::Resync) {
        if let Err(e) = self.load().await {
          warn!(error = %e, "could not reload after lag");
        }
        continue;
      }
      self.apply_change(subscription.owner(), change);
    }
  }

  /// React to sign-in/sign-out transitions until the session handle is
  /// dropped: the cache is cleared on every transition and reloaded after a
  /// sign-in.
  pub async fn follow_session(&self) {
    let mut session = self.session.clone();
    while session.changed().await {
      match self.sync_session() {
        Some(owner) => {
          if let Err(e) = self.load().await {
            warn!(%owner, error = %e, "could not load subjects after sign-in");
          }
        }
        None => info!("signed out, cache cleared"),
      }
    }
  }
}
