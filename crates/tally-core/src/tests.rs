//! Coordinator tests against an in-memory store with failure injection.

use std::{
  collections::{HashMap, HashSet},
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
  },
  time::Duration,
};

use chrono::Utc;
use tokio::sync::{Notify, broadcast};
use uuid::Uuid;

use crate::{
  Error, InputError,
  coordinator::UpdateCoordinator,
  event::{AttendanceEvent, CounterDelta},
  reconcile::SyncState,
  session::{self, Session},
  store::{
    ChangeFeed, LiveRecordStore, OwnedChange, RecordChange, RecordStore, StoreError,
    StoreErrorKind, Subscription,
  },
  subject::{NewSubject, OwnerId, SubjectRecord},
};

// ─── In-memory store ─────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
enum MemoryError {
  #[error("store unavailable")]
  Unavailable,
  #[error("no such record: {0}")]
  NotFound(Uuid),
  #[error("counter would become negative")]
  Negative,
}

impl StoreError for MemoryError {
  fn kind(&self) -> StoreErrorKind {
    match self {
      MemoryError::Unavailable => StoreErrorKind::Other,
      MemoryError::NotFound(_) => StoreErrorKind::NotFound,
      MemoryError::Negative => StoreErrorKind::NegativeCounter,
    }
  }
}

struct MemoryStore {
  records:     Mutex<HashMap<(OwnerId, Uuid), SubjectRecord>>,
  fail_writes: AtomicBool,
  fail_ids:    Mutex<HashSet<Uuid>>,
  writes:      AtomicUsize,
  /// When set, increments wait for a notification before committing.
  gate:        Option<Arc<Notify>>,
  feed:        ChangeFeed,
}

impl MemoryStore {
  fn new() -> Self { Self::with_feed_capacity(64) }

  /// A store whose change feed holds only `capacity` unread changes.
  fn with_feed_capacity(capacity: usize) -> Self {
    let (feed, _) = broadcast::channel(capacity);
    Self {
      records: Mutex::new(HashMap::new()),
      fail_writes: AtomicBool::new(false),
      fail_ids: Mutex::new(HashSet::new()),
      writes: AtomicUsize::new(0),
      gate: None,
      feed,
    }
  }

  fn gated(gate: Arc<Notify>) -> Self { Self { gate: Some(gate), ..Self::new() } }

  fn seed(&self, owner: &OwnerId, classes_held: u32) -> SubjectRecord {
    let now = Utc::now();
    let record = SubjectRecord {
      id: Uuid::new_v4(),
      code: "SEED".into(),
      classes_held,
      present: 0,
      absent: 0,
      required_percent: 75.0,
      created_at: now,
      updated_at: now,
    };
    self
      .records
      .lock()
      .unwrap()
      .insert((owner.clone(), record.id), record.clone());
    record
  }

  fn edit(&self, owner: &OwnerId, id: Uuid, f: impl FnOnce(&mut SubjectRecord)) {
    let mut records = self.records.lock().unwrap();
    f(records.get_mut(&(owner.clone(), id)).unwrap());
  }

  fn stored(&self, owner: &OwnerId, id: Uuid) -> Option<SubjectRecord> {
    self.records.lock().unwrap().get(&(owner.clone(), id)).cloned()
  }

  fn check_write(&self, id: Option<Uuid>) -> Result<(), MemoryError> {
    self.writes.fetch_add(1, Ordering::SeqCst);
    let blocked = id.is_some_and(|id| self.fail_ids.lock().unwrap().contains(&id));
    if self.fail_writes.load(Ordering::SeqCst) || blocked {
      return Err(MemoryError::Unavailable);
    }
    Ok(())
  }

  fn publish(&self, owner: &OwnerId, change: RecordChange) {
    let _ = self.feed.send(OwnedChange { owner: owner.clone(), change });
  }
}

impl RecordStore for MemoryStore {
  type Error = MemoryError;

  async fn create_record(
    &self,
    owner: &OwnerId,
    input: NewSubject,
  ) -> Result<SubjectRecord, MemoryError> {
    self.check_write(None)?;
    let now = Utc::now();
    let record = SubjectRecord {
      id: Uuid::new_v4(),
      code: input.code,
      classes_held: input.classes_held,
      present: 0,
      absent: 0,
      required_percent: input.required_percent,
      created_at: now,
      updated_at: now,
    };
    self
      .records
      .lock()
      .unwrap()
      .insert((owner.clone(), record.id), record.clone());
    Ok(record)
  }

  async fn get_record(
    &self,
    owner: &OwnerId,
    id: Uuid,
  ) -> Result<Option<SubjectRecord>, MemoryError> {
    Ok(self.stored(owner, id))
  }

  async fn list_records(&self, owner: &OwnerId) -> Result<Vec<SubjectRecord>, MemoryError> {
    let mut records: Vec<_> = self
      .records
      .lock()
      .unwrap()
      .iter()
      .filter(|((o, _), _)| o == owner)
      .map(|(_, r)| r.clone())
      .collect();
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(records)
  }

  async fn apply_increment(
    &self,
    owner: &OwnerId,
    id: Uuid,
    delta: CounterDelta,
  ) -> Result<(), MemoryError> {
    if let Some(gate) = &self.gate {
      gate.notified().await;
    }
    self.check_write(Some(id))?;
    let updated = {
      let mut records = self.records.lock().unwrap();
      let record = records
        .get_mut(&(owner.clone(), id))
        .ok_or(MemoryError::NotFound(id))?;
      let add = |v: u32, d: i32| v.checked_add_signed(d).ok_or(MemoryError::Negative);
      let next = (
        add(record.classes_held, delta.classes_held)?,
        add(record.present, delta.present)?,
        add(record.absent, delta.absent)?,
      );
      (record.classes_held, record.present, record.absent) = next;
      record.updated_at = Utc::now();
      record.clone()
    };
    self.publish(owner, RecordChange::Upserted(updated));
    Ok(())
  }

  async fn delete_record(&self, owner: &OwnerId, id: Uuid) -> Result<bool, MemoryError> {
    self.check_write(Some(id))?;
    let existed = self.records.lock().unwrap().remove(&(owner.clone(), id)).is_some();
    if existed {
      self.publish(owner, RecordChange::Deleted(id));
    }
    Ok(existed)
  }
}

impl LiveRecordStore for MemoryStore {
  fn subscribe(&self, owner: &OwnerId) -> Subscription {
    Subscription::new(owner.clone(), &self.feed)
  }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn alice() -> OwnerId { OwnerId::new("alice").unwrap() }

fn coordinator(store: &Arc<MemoryStore>) -> UpdateCoordinator<MemoryStore> {
  UpdateCoordinator::new(store.clone(), Session::fixed(alice()))
}

fn counters(c: &UpdateCoordinator<MemoryStore>, id: Uuid) -> (u32, u32, u32) {
  let r = c.subject(id).unwrap().record;
  (r.classes_held, r.present, r.absent)
}

/// Run `c.follow_changes(subscription)` alongside `drive` until `drive`
/// finishes.
async fn following(
  c: &UpdateCoordinator<MemoryStore>,
  subscription: Subscription,
  drive: impl Future<Output = ()>,
) {
  let run = async {
    tokio::select! {
      () = c.follow_changes(subscription) => panic!("change feed closed"),
      () = drive => {}
    }
  };
  tokio::time::timeout(Duration::from_secs(5), run)
    .await
    .expect("follower never caught up");
}

async fn until(mut done: impl FnMut() -> bool) {
  while !done() {
    tokio::task::yield_now().await;
  }
}

// ─── Attendance events ───────────────────────────────────────────────────────

#[tokio::test]
async fn present_and_absent_commute() {
  for order in [
    [AttendanceEvent::MarkPresent, AttendanceEvent::MarkAbsent],
    [AttendanceEvent::MarkAbsent, AttendanceEvent::MarkPresent],
  ] {
    let store = Arc::new(MemoryStore::new());
    let fresh = store.seed(&alice(), 0);
    let c = coordinator(&store);
    c.load().await.unwrap();

    for event in order {
      c.apply(fresh.id, event).await.unwrap();
    }

    assert_eq!(counters(&c, fresh.id), (2, 1, 1));
    let stored = store.stored(&alice(), fresh.id).unwrap();
    assert_eq!((stored.classes_held, stored.present, stored.absent), (2, 1, 1));
  }
}

#[tokio::test]
async fn no_class_at_zero_is_a_noop() {
  let store = Arc::new(MemoryStore::new());
  let fresh = store.seed(&alice(), 0);
  let c = coordinator(&store);
  c.load().await.unwrap();

  let view = c.apply(fresh.id, AttendanceEvent::NoClass).await.unwrap();

  assert_eq!(view.record.classes_held, 0);
  assert_eq!(counters(&c, fresh.id), (0, 0, 0));
  assert_eq!(store.writes.load(Ordering::SeqCst), 0);
  assert_eq!(c.sync_state(fresh.id), Some(SyncState::Idle));
}

#[tokio::test]
async fn no_class_and_extra_class_adjust_classes_only() {
  let store = Arc::new(MemoryStore::new());
  let seeded = store.seed(&alice(), 5);
  let c = coordinator(&store);
  c.load().await.unwrap();

  c.apply(seeded.id, AttendanceEvent::NoClass).await.unwrap();
  assert_eq!(counters(&c, seeded.id), (4, 0, 0));
  c.apply(seeded.id, AttendanceEvent::ExtraClass).await.unwrap();
  c.apply(seeded.id, AttendanceEvent::ExtraClass).await.unwrap();
  assert_eq!(counters(&c, seeded.id), (6, 0, 0));
}

#[tokio::test]
async fn failed_increment_rolls_back_exactly() {
  let store = Arc::new(MemoryStore::new());
  let seeded = store.seed(&alice(), 7);
  let c = coordinator(&store);
  c.load().await.unwrap();
  c.apply(seeded.id, AttendanceEvent::MarkAbsent).await.unwrap();
  let before = counters(&c, seeded.id);

  store.fail_writes.store(true, Ordering::SeqCst);
  let err = c.apply(seeded.id, AttendanceEvent::MarkAbsent).await.unwrap_err();

  assert!(matches!(err, Error::RemoteWriteFailed(_)));
  assert_eq!(counters(&c, seeded.id), before);
  assert_eq!(c.sync_state(seeded.id), Some(SyncState::Idle));
}

#[tokio::test]
async fn optimistic_change_is_visible_before_the_store_answers() {
  let gate = Arc::new(Notify::new());
  let store = Arc::new(MemoryStore::gated(gate.clone()));
  let seeded = store.seed(&alice(), 3);
  let c = coordinator(&store);
  c.load().await.unwrap();

  let inspect = async {
    tokio::task::yield_now().await;
    assert_eq!(counters(&c, seeded.id), (4, 1, 0));
    assert!(matches!(
      c.sync_state(seeded.id),
      Some(SyncState::PendingLocalDelta { in_flight: 1, .. })
    ));
    assert_eq!(store.stored(&alice(), seeded.id).unwrap().present, 0);
    gate.notify_one();
  };
  let (applied, ()) = tokio::join!(c.apply(seeded.id, AttendanceEvent::MarkPresent), inspect);

  assert_eq!(applied.unwrap().record.present, 1);
  assert_eq!(c.sync_state(seeded.id), Some(SyncState::Reconciling));
}

#[tokio::test]
async fn reload_during_pending_increment_keeps_touched_counters() {
  let gate = Arc::new(Notify::new());
  let store = Arc::new(MemoryStore::gated(gate.clone()));
  let seeded = store.seed(&alice(), 3);
  let c = coordinator(&store);
  c.load().await.unwrap();

  let reload = async {
    tokio::task::yield_now().await;
    // Another device records two absences while our increment is held.
    store.edit(&alice(), seeded.id, |r| {
      r.classes_held += 2;
      r.absent += 2;
    });
    c.load().await.unwrap();

    // classes_held and present keep the optimistic value; absent is taken
    // from the snapshot.
    assert_eq!(counters(&c, seeded.id), (4, 1, 2));
    assert!(matches!(
      c.sync_state(seeded.id),
      Some(SyncState::PendingLocalDelta { in_flight: 1, .. })
    ));
    gate.notify_one();
  };
  let (applied, ()) = tokio::join!(c.apply(seeded.id, AttendanceEvent::MarkPresent), reload);
  applied.unwrap();
  assert_eq!(c.sync_state(seeded.id), Some(SyncState::Reconciling));

  c.load().await.unwrap();
  assert_eq!(counters(&c, seeded.id), (6, 1, 2));
  assert_eq!(c.sync_state(seeded.id), Some(SyncState::Idle));
}

#[tokio::test]
async fn overlapping_events_converge() {
  let store = Arc::new(MemoryStore::new());
  let seeded = store.seed(&alice(), 0);
  let c = coordinator(&store);
  c.load().await.unwrap();

  let (a, b, d) = tokio::join!(
    c.apply(seeded.id, AttendanceEvent::MarkPresent),
    c.apply(seeded.id, AttendanceEvent::MarkAbsent),
    c.apply(seeded.id, AttendanceEvent::MarkPresent),
  );
  a.unwrap();
  b.unwrap();
  d.unwrap();

  assert_eq!(counters(&c, seeded.id), (3, 2, 1));
  let stored = store.stored(&alice(), seeded.id).unwrap();
  assert_eq!((stored.classes_held, stored.present, stored.absent), (3, 2, 1));
}

#[tokio::test]
async fn unknown_subject_is_invalid_input() {
  let store = Arc::new(MemoryStore::new());
  let c = coordinator(&store);
  let id = Uuid::new_v4();
  let err = c.apply(id, AttendanceEvent::MarkPresent).await.unwrap_err();
  assert!(matches!(err, Error::InvalidInput(InputError::UnknownSubject(u)) if u == id));
}

// ─── Creation ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_then_mark_absent_twice() {
  let store = Arc::new(MemoryStore::new());
  let c = coordinator(&store);

  let created = c
    .create(NewSubject::new("math101", 10, 75.0).unwrap())
    .await
    .unwrap();
  assert_eq!(created.record.code, "MATH101");
  assert_eq!((created.record.present, created.record.absent), (0, 0));

  c.apply(created.record.id, AttendanceEvent::MarkAbsent).await.unwrap();
  let view = c.apply(created.record.id, AttendanceEvent::MarkAbsent).await.unwrap();

  assert_eq!(
    (view.record.classes_held, view.record.present, view.record.absent),
    (12, 0, 2)
  );
  assert_eq!(view.percent_present, 0.0);
  assert_eq!(view.safe_bunks, 1);
}

#[tokio::test]
async fn invalid_input_never_reaches_the_store() {
  let store = Arc::new(MemoryStore::new());
  let c = coordinator(&store);
  let input = NewSubject { code: "  ".into(), classes_held: 4, required_percent: 75.0 };

  let err = c.create(input).await.unwrap_err();

  assert!(matches!(err, Error::InvalidInput(InputError::EmptyCode)));
  assert_eq!(store.writes.load(Ordering::SeqCst), 0);
  assert!(c.subjects().is_empty());
}

#[tokio::test]
async fn failed_create_leaves_cache_empty() {
  let store = Arc::new(MemoryStore::new());
  store.fail_writes.store(true, Ordering::SeqCst);
  let c = coordinator(&store);

  let err = c.create(NewSubject::new("CS", 4, 50.0).unwrap()).await.unwrap_err();

  assert!(matches!(err, Error::RemoteWriteFailed(_)));
  assert!(c.subjects().is_empty());
}

// ─── Authentication ──────────────────────────────────────────────────────────

#[tokio::test]
async fn signed_out_mutations_are_rejected() {
  let store = Arc::new(MemoryStore::new());
  let (_handle, session) = session::channel(None);
  let c = UpdateCoordinator::new(store.clone(), session);

  let err = c.create(NewSubject::new("CS", 4, 50.0).unwrap()).await.unwrap_err();
  assert!(matches!(err, Error::NotAuthenticated));
  let err = c.clear_all().await.unwrap_err();
  assert!(matches!(err, Error::NotAuthenticated));
  assert_eq!(store.writes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn sign_out_clears_cache_and_sign_in_reloads() {
  let store = Arc::new(MemoryStore::new());
  let seeded = store.seed(&alice(), 2);
  let (handle, session) = session::channel(Some(alice()));
  let c = UpdateCoordinator::new(store.clone(), session);
  c.load().await.unwrap();
  assert_eq!(c.subjects().len(), 1);

  handle.sign_out();
  assert!(c.subjects().is_empty());

  let follow = c.follow_session();
  let drive = async {
    handle.sign_in(alice());
    // Let the follower observe the sign-in and reload.
    for _ in 0..10 {
      tokio::task::yield_now().await;
    }
    assert_eq!(c.subject(seeded.id).unwrap().record.classes_held, 2);
    drop(handle);
  };
  tokio::join!(follow, drive);
}

#[tokio::test]
async fn sync_state_is_hidden_after_sign_out() {
  let store = Arc::new(MemoryStore::new());
  let seeded = store.seed(&alice(), 2);
  let (handle, session) = session::channel(Some(alice()));
  let c = UpdateCoordinator::new(store.clone(), session);
  c.load().await.unwrap();
  assert_eq!(c.sync_state(seeded.id), Some(SyncState::Idle));

  handle.sign_out();

  assert_eq!(c.sync_state(seeded.id), None);
}

#[tokio::test]
async fn owners_do_not_see_each_other() {
  let store = Arc::new(MemoryStore::new());
  store.seed(&alice(), 2);
  let bob = OwnerId::new("bob").unwrap();
  let c = UpdateCoordinator::new(store.clone(), Session::fixed(bob));
  assert!(c.load().await.unwrap().is_empty());
}

// ─── Deletion ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn delete_removes_locally_and_remotely() {
  let store = Arc::new(MemoryStore::new());
  let seeded = store.seed(&alice(), 2);
  let c = coordinator(&store);
  c.load().await.unwrap();

  c.delete(seeded.id).await.unwrap();

  assert!(c.subject(seeded.id).is_none());
  assert!(store.stored(&alice(), seeded.id).is_none());
}

#[tokio::test]
async fn failed_delete_restores_the_subject() {
  let store = Arc::new(MemoryStore::new());
  let seeded = store.seed(&alice(), 2);
  let c = coordinator(&store);
  c.load().await.unwrap();
  store.fail_writes.store(true, Ordering::SeqCst);

  let err = c.delete(seeded.id).await.unwrap_err();

  assert!(matches!(err, Error::RemoteWriteFailed(_)));
  assert!(c.subject(seeded.id).is_some());
}

#[tokio::test]
async fn clear_all_deletes_everything() {
  let store = Arc::new(MemoryStore::new());
  for n in 1..=3 {
    store.seed(&alice(), n);
  }
  let c = coordinator(&store);
  c.load().await.unwrap();

  assert_eq!(c.clear_all().await.unwrap(), 3);
  assert!(c.subjects().is_empty());
  assert!(store.list_records(&alice()).await.unwrap().is_empty());
}

#[tokio::test]
async fn partial_clear_restores_only_the_failures() {
  let store = Arc::new(MemoryStore::new());
  let kept = store.seed(&alice(), 1);
  let gone = store.seed(&alice(), 2);
  store.fail_ids.lock().unwrap().insert(kept.id);
  let c = coordinator(&store);
  c.load().await.unwrap();

  let err = c.clear_all().await.unwrap_err();

  assert!(matches!(err, Error::RemoteWriteFailed(_)));
  let ids: Vec<_> = c.subjects().into_iter().map(|v| v.record.id).collect();
  assert_eq!(ids, vec![kept.id]);
  assert!(store.stored(&alice(), gone.id).is_none());
}

// ─── Live updates ────────────────────────────────────────────────────────────

#[tokio::test]
async fn snapshots_from_another_device_are_merged() {
  let store = Arc::new(MemoryStore::new());
  let seeded = store.seed(&alice(), 4);
  let c = coordinator(&store);
  c.load().await.unwrap();

  // A second coordinator for the same owner acts as another device.
  let other = coordinator(&store);
  other.load().await.unwrap();

  let mut sub = store.subscribe(&alice());
  other.apply(seeded.id, AttendanceEvent::MarkPresent).await.unwrap();
  let change = sub.next().await.unwrap();
  c.apply_change(&alice(), change);

  assert_eq!(counters(&c, seeded.id), (5, 1, 0));
}

#[tokio::test]
async fn followed_changes_reach_the_cache() {
  let store = Arc::new(MemoryStore::new());
  let seeded = store.seed(&alice(), 4);
  let c = coordinator(&store);
  c.load().await.unwrap();
  let other = coordinator(&store);
  other.load().await.unwrap();

  following(&c, store.subscribe(&alice()), async {
    other.apply(seeded.id, AttendanceEvent::MarkPresent).await.unwrap();
    until(|| counters(&c, seeded.id) == (5, 1, 0)).await;
  })
  .await;

  assert_eq!(c.sync_state(seeded.id), Some(SyncState::Idle));
}

#[tokio::test]
async fn lagging_follower_reloads() {
  let store = Arc::new(MemoryStore::with_feed_capacity(1));
  let first = store.seed(&alice(), 4);
  let c = coordinator(&store);
  c.load().await.unwrap();
  let subscription = store.subscribe(&alice());

  // Seeding publishes nothing, so only a full reload can discover this one.
  let second = store.seed(&alice(), 2);
  let other = coordinator(&store);
  other.load().await.unwrap();
  for _ in 0..3 {
    other.apply(first.id, AttendanceEvent::MarkAbsent).await.unwrap();
  }

  following(&c, subscription, until(|| c.subjects().len() == 2)).await;

  assert_eq!(counters(&c, first.id), (7, 0, 3));
  assert_eq!(counters(&c, second.id), (2, 0, 0));
}

#[tokio::test]
async fn snapshot_for_another_owner_is_ignored() {
  let store = Arc::new(MemoryStore::new());
  let c = coordinator(&store);
  let bob = OwnerId::new("bob").unwrap();
  let foreign = store.seed(&bob, 1);

  c.apply_change(&bob, RecordChange::Upserted(foreign.clone()));

  assert!(c.subject(foreign.id).is_none());
}

#[tokio::test]
async fn remote_delete_removes_cached_subject() {
  let store = Arc::new(MemoryStore::new());
  let seeded = store.seed(&alice(), 4);
  let c = coordinator(&store);
  c.load().await.unwrap();

  c.apply_change(&alice(), RecordChange::Deleted(seeded.id));

  assert!(c.subjects().is_empty());
}

#[tokio::test]
async fn summary_reflects_cached_counters() {
  let store = Arc::new(MemoryStore::new());
  let seeded = store.seed(&alice(), 0);
  let c = coordinator(&store);
  c.load().await.unwrap();
  for _ in 0..3 {
    c.apply(seeded.id, AttendanceEvent::MarkPresent).await.unwrap();
  }
  c.apply(seeded.id, AttendanceEvent::MarkAbsent).await.unwrap();

  let summary = c.summary();
  assert_eq!(summary.subjects, 1);
  assert_eq!((summary.classes_held, summary.present, summary.absent), (4, 3, 1));
  assert_eq!(summary.percent_present, 75.0);
}
