//! [`SqliteStore`] — the SQLite implementation of [`RecordStore`].

use std::path::Path;

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use tokio::sync::broadcast;
use uuid::Uuid;

use tally_core::{
  event::CounterDelta,
  store::{ChangeFeed, LiveRecordStore, OwnedChange, RecordChange, RecordStore, Subscription},
  subject::{NewSubject, OwnerId, SubjectRecord},
};

use crate::{
  Error, Result,
  encode::{RECORD_COLUMNS, RawRecord, encode_dt, encode_uuid},
  schema::SCHEMA,
};

/// How many undelivered changes a slow subscriber may fall behind by before
/// it is told to resync.
const FEED_CAPACITY: usize = 256;

/// Outcome of a single increment statement.
enum Increment {
  Applied(RawRecord),
  Missing,
  Negative,
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Tally record store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection and change feed are
/// reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
  feed: ChangeFeed,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn).await
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn).await
  }

  async fn init(conn: tokio_rusqlite::Connection) -> Result<Self> {
    let (feed, _) = broadcast::channel(FEED_CAPACITY);
    let store = Self { conn, feed };
    store
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(store)
  }

  fn publish(&self, owner: &OwnerId, change: RecordChange) {
    // No subscribers is not an error.
    let _ = self.feed.send(OwnedChange { owner: owner.clone(), change });
  }
}

// ─── RecordStore impl ────────────────────────────────────────────────────────

impl RecordStore for SqliteStore {
  type Error = Error;

  async fn create_record(&self, owner: &OwnerId, input: NewSubject) -> Result<SubjectRecord> {
    input.validate()?;

    let now = Utc::now();
    let record = SubjectRecord {
      id:               Uuid::new_v4(),
      code:             input.code,
      classes_held:     input.classes_held,
      present:          0,
      absent:           0,
      required_percent: input.required_percent,
      created_at:       now,
      updated_at:       now,
    };

    let owner_str   = owner.as_str().to_owned();
    let id_str      = encode_uuid(record.id);
    let code        = record.code.clone();
    let classes     = i64::from(record.classes_held);
    let percent     = record.required_percent;
    let at_str      = encode_dt(now);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO subjects (
             owner_id, subject_id, code, classes_held, present, absent,
             required_percent, created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, 0, 0, ?5, ?6, ?6)",
          rusqlite::params![owner_str, id_str, code, classes, percent, at_str],
        )?;
        Ok(())
      })
      .await?;

    self.publish(owner, RecordChange::Upserted(record.clone()));
    Ok(record)
  }

  async fn get_record(&self, owner: &OwnerId, id: Uuid) -> Result<Option<SubjectRecord>> {
    let owner_str = owner.as_str().to_owned();
    let id_str = encode_uuid(id);

    let raw: Option<RawRecord> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {RECORD_COLUMNS} FROM subjects
                 WHERE owner_id = ?1 AND subject_id = ?2"
              ),
              rusqlite::params![owner_str, id_str],
              RawRecord::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawRecord::into_record).transpose()
  }

  async fn list_records(&self, owner: &OwnerId) -> Result<Vec<SubjectRecord>> {
    let owner_str = owner.as_str().to_owned();

    let raws: Vec<RawRecord> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {RECORD_COLUMNS} FROM subjects
           WHERE owner_id = ?1
           ORDER BY created_at DESC, rowid DESC"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![owner_str], RawRecord::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawRecord::into_record).collect()
  }

  async fn apply_increment(&self, owner: &OwnerId, id: Uuid, delta: CounterDelta) -> Result<()> {
    let owner_str = owner.as_str().to_owned();
    let id_str    = encode_uuid(id);
    let at_str    = encode_dt(Utc::now());

    // One UPDATE is atomic; the CHECK constraints reject the whole statement
    // if any counter would go negative.
    let outcome = self
      .conn
      .call(move |conn| {
        let result = conn.query_row(
          &format!(
            "UPDATE subjects
             SET classes_held = classes_held + ?3,
                 present      = present + ?4,
                 absent       = absent + ?5,
                 updated_at   = ?6
             WHERE owner_id = ?1 AND subject_id = ?2
             RETURNING {RECORD_COLUMNS}"
          ),
          rusqlite::params![
            owner_str,
            id_str,
            delta.classes_held,
            delta.present,
            delta.absent,
            at_str,
          ],
          RawRecord::from_row,
        );
        match result {
          Ok(raw) => Ok(Increment::Applied(raw)),
          Err(rusqlite::Error::QueryReturnedNoRows) => Ok(Increment::Missing),
          Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
          {
            Ok(Increment::Negative)
          }
          Err(e) => Err(e.into()),
        }
      })
      .await?;

    match outcome {
      Increment::Applied(raw) => {
        self.publish(owner, RecordChange::Upserted(raw.into_record()?));
        Ok(())
      }
      Increment::Missing => Err(Error::SubjectNotFound(id)),
      Increment::Negative => Err(Error::NegativeCounter(id)),
    }
  }

  async fn delete_record(&self, owner: &OwnerId, id: Uuid) -> Result<bool> {
    let owner_str = owner.as_str().to_owned();
    let id_str = encode_uuid(id);

    let deleted = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM subjects WHERE owner_id = ?1 AND subject_id = ?2",
          rusqlite::params![owner_str, id_str],
        )?)
      })
      .await?;

    if deleted > 0 {
      self.publish(owner, RecordChange::Deleted(id));
    }
    Ok(deleted > 0)
  }
}

impl LiveRecordStore for SqliteStore {
  fn subscribe(&self, owner: &OwnerId) -> Subscription {
    Subscription::new(owner.clone(), &self.feed)
  }
}
