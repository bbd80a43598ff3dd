//! JSON REST API for Tally.
//!
//! Exposes an axum [`Router`] backed by any [`tally_core::store::RecordStore`].
//! Auth, TLS, and transport concerns are the caller's responsibility: every
//! request must carry the signed-in [`OwnerId`](tally_core::subject::OwnerId)
//! as a request extension, or it is rejected with `401`.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", tally_api::api_router(store.clone()))
//! ```

pub mod error;
pub mod owner;
pub mod subjects;
pub mod summary;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, patch, post},
};
use tally_core::store::RecordStore;

pub use error::ApiError;

/// Build a fully-materialised API router for `store`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(store: Arc<S>) -> Router<()>
where
  S: RecordStore + 'static,
{
  Router::new()
    .route(
      "/subjects",
      get(subjects::list::<S>)
        .post(subjects::create::<S>)
        .delete(subjects::clear::<S>),
    )
    .route(
      "/subjects/{id}",
      get(subjects::get_one::<S>).delete(subjects::delete_one::<S>),
    )
    .route("/subjects/{id}/counters", patch(subjects::increment::<S>))
    .route("/subjects/{id}/events", post(subjects::record_event::<S>))
    .route("/summary", get(summary::handler::<S>))
    .with_state(store)
}
