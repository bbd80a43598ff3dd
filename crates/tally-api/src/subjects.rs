//! Handlers for `/subjects` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`    | `/subjects` | Newest first, with derived fields |
//! | `POST`   | `/subjects` | Body: [`CreateBody`]; `422` on invalid input |
//! | `DELETE` | `/subjects` | Deletes every subject; returns `{"deleted": n}` |
//! | `GET`    | `/subjects/:id` | 404 if not found |
//! | `DELETE` | `/subjects/:id` | 204, or 404 if not found |
//! | `PATCH`  | `/subjects/:id/counters` | Body: `CounterDelta`; atomic increment |
//! | `POST`   | `/subjects/:id/events` | Body: `{"event":"mark_present"}` |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use tally_core::{
  event::{AttendanceEvent, CounterDelta},
  store::{RecordStore, StoreError as _, StoreErrorKind},
  subject::{NewSubject, OwnerId, SubjectRecord, SubjectView},
};
use uuid::Uuid;

use crate::{error::ApiError, owner::Owner};

async fn fetch<S: RecordStore>(store: &S, owner: &OwnerId, id: Uuid) -> Result<SubjectRecord, ApiError> {
  store
    .get_record(owner, id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("subject {id} not found")))
}

// ─── List ─────────────────────────────────────────────────────────────────────

/// `GET /subjects`
pub async fn list<S: RecordStore>(
  State(store): State<Arc<S>>,
  Owner(owner): Owner,
) -> Result<Json<Vec<SubjectView>>, ApiError> {
  let records = store.list_records(&owner).await.map_err(ApiError::store)?;
  Ok(Json(records.iter().map(SubjectRecord::view).collect()))
}

// ─── Create ───────────────────────────────────────────────────────────────────

/// Raw creation input; validated by [`NewSubject::new`].
#[derive(Debug, Deserialize)]
pub struct CreateBody {
  pub code:             String,
  pub classes_held:     i64,
  pub required_percent: f64,
}

/// `POST /subjects` — body: `{"code":"MATH101","classes_held":42,"required_percent":75}`
pub async fn create<S: RecordStore>(
  State(store): State<Arc<S>>,
  Owner(owner): Owner,
  Json(body): Json<CreateBody>,
) -> Result<impl IntoResponse, ApiError> {
  let input = NewSubject::new(&body.code, body.classes_held, body.required_percent)?;
  let record = store
    .create_record(&owner, input)
    .await
    .map_err(ApiError::store)?;
  tracing::info!(%owner, id = %record.id, code = %record.code, "created subject");
  Ok((StatusCode::CREATED, Json(record.view())))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /subjects/:id`
pub async fn get_one<S: RecordStore>(
  State(store): State<Arc<S>>,
  Owner(owner): Owner,
  Path(id): Path<Uuid>,
) -> Result<Json<SubjectView>, ApiError> {
  let record = fetch(store.as_ref(), &owner, id).await?;
  Ok(Json(record.view()))
}

// ─── Delete ───────────────────────────────────────────────────────────────────

/// `DELETE /subjects/:id`
pub async fn delete_one<S: RecordStore>(
  State(store): State<Arc<S>>,
  Owner(owner): Owner,
  Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
  let existed = store.delete_record(&owner, id).await.map_err(ApiError::store)?;
  if !existed {
    return Err(ApiError::NotFound(format!("subject {id} not found")));
  }
  tracing::info!(%owner, %id, "deleted subject");
  Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /subjects` — best-effort: every subject is attempted, the first
/// failure is reported after the rest have been tried.
pub async fn clear<S: RecordStore>(
  State(store): State<Arc<S>>,
  Owner(owner): Owner,
) -> Result<Json<serde_json::Value>, ApiError> {
  let records = store.list_records(&owner).await.map_err(ApiError::store)?;

  let mut deleted = 0usize;
  let mut first_error = None;
  for record in records {
    match store.delete_record(&owner, record.id).await {
      Ok(existed) => deleted += usize::from(existed),
      Err(e) => {
        tracing::warn!(%owner, id = %record.id, error = %e, "could not delete subject");
        first_error.get_or_insert(e);
      }
    }
  }
  if let Some(e) = first_error {
    return Err(ApiError::store(e));
  }

  tracing::info!(%owner, deleted, "cleared subjects");
  Ok(Json(json!({ "deleted": deleted })))
}

// ─── Counters ─────────────────────────────────────────────────────────────────

/// `PATCH /subjects/:id/counters` — body: a `CounterDelta`, missing fields
/// default to zero.
pub async fn increment<S: RecordStore>(
  State(store): State<Arc<S>>,
  Owner(owner): Owner,
  Path(id): Path<Uuid>,
  Json(delta): Json<CounterDelta>,
) -> Result<Json<SubjectView>, ApiError> {
  let current = fetch(store.as_ref(), &owner, id).await?;
  let would_go_negative = [
    (current.classes_held, delta.classes_held),
    (current.present, delta.present),
    (current.absent, delta.absent),
  ]
  .into_iter()
  .any(|(value, change)| value.checked_add_signed(change).is_none());
  if would_go_negative {
    return Err(ApiError::Conflict(format!(
      "increment on {id} would make a counter negative"
    )));
  }

  store
    .apply_increment(&owner, id, delta)
    .await
    .map_err(ApiError::store)?;
  let updated = fetch(store.as_ref(), &owner, id).await?;
  Ok(Json(updated.view()))
}

#[derive(Debug, Deserialize)]
pub struct EventBody {
  pub event: AttendanceEvent,
}

/// `POST /subjects/:id/events` — body: `{"event":"mark_present"}`.
///
/// A `no_class` event on a subject with no classes held changes nothing, even
/// when a concurrent writer emptied it between the check and the increment.
pub async fn record_event<S: RecordStore>(
  State(store): State<Arc<S>>,
  Owner(owner): Owner,
  Path(id): Path<Uuid>,
  Json(body): Json<EventBody>,
) -> Result<Json<SubjectView>, ApiError> {
  let current = fetch(store.as_ref(), &owner, id).await?;
  if !body.event.applies_to(&current) {
    tracing::debug!(%owner, %id, event = ?body.event, "event does not apply");
    return Ok(Json(current.view()));
  }

  match store.apply_increment(&owner, id, body.event.delta()).await {
    Ok(()) => {}
    // Another writer took the count to zero after the check above; the
    // event no longer applies.
    Err(e) if e.kind() == StoreErrorKind::NegativeCounter => {
      tracing::debug!(%owner, %id, event = ?body.event, "event no longer applies");
    }
    Err(e) => return Err(ApiError::store(e)),
  }
  let updated = fetch(store.as_ref(), &owner, id).await?;
  tracing::debug!(%owner, %id, event = ?body.event, "recorded event");
  Ok(Json(updated.view()))
}
