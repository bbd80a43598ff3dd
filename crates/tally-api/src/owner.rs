//! Extractor for the owner identity the caller attached to the request.

use axum::{extract::FromRequestParts, http::request::Parts};
use tally_core::subject::OwnerId;

use crate::error::ApiError;

/// The signed-in owner, read from the request's [`OwnerId`] extension.
///
/// Handlers taking this extractor reject requests without one as
/// `401 Unauthorized`.
pub struct Owner(pub OwnerId);

impl<St> FromRequestParts<St> for Owner
where
  St: Send + Sync,
{
  type Rejection = ApiError;

  async fn from_request_parts(parts: &mut Parts, _state: &St) -> Result<Self, Self::Rejection> {
    parts
      .extensions
      .get::<OwnerId>()
      .cloned()
      .map(Owner)
      .ok_or(ApiError::Unauthorized)
  }
}
