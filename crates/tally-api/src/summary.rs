//! Handler for `GET /summary` — attendance totals across every subject.

use std::sync::Arc;

use axum::{Json, extract::State};
use tally_core::{store::RecordStore, summary::AttendanceSummary};

use crate::{error::ApiError, owner::Owner};

/// `GET /summary`
pub async fn handler<S: RecordStore>(
  State(store): State<Arc<S>>,
  Owner(owner): Owner,
) -> Result<Json<AttendanceSummary>, ApiError> {
  let records = store.list_records(&owner).await.map_err(ApiError::store)?;
  Ok(Json(AttendanceSummary::from_records(&records)))
}
