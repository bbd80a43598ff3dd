//! HTTP Basic-auth verification and the middleware that turns a verified
//! username into the request's [`OwnerId`].

use std::sync::Arc;

use argon2::{
  Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
  password_hash::{self, SaltString},
};
use axum::{
  extract::{Request, State},
  http::HeaderMap,
  middleware::Next,
  response::Response,
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use rand_core::OsRng;
use tally_core::subject::OwnerId;

use crate::{UserConfig, error::Error};

/// Credentials accepted as valid for this server instance.
#[derive(Clone, Default)]
pub struct AuthConfig {
  pub users: Vec<UserConfig>,
}

impl AuthConfig {
  fn password_hash(&self, username: &str) -> Option<&str> {
    self
      .users
      .iter()
      .find(|u| u.username == username)
      .map(|u| u.password_hash.as_str())
  }
}

/// Hash `password` with a fresh salt into the PHC string a `[[users]]`
/// entry expects.
pub fn hash_password(password: &str) -> Result<String, password_hash::Error> {
  let salt = SaltString::generate(&mut OsRng);
  let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
  Ok(hash.to_string())
}

/// Verify Basic credentials from headers and return the owner they name.
pub fn verify_auth(headers: &HeaderMap, config: &AuthConfig) -> Result<OwnerId, Error> {
  let header_val = headers
    .get(axum::http::header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .ok_or(Error::Unauthorized)?;

  let encoded = header_val
    .strip_prefix("Basic ")
    .ok_or(Error::Unauthorized)?;

  let decoded = B64.decode(encoded).map_err(|_| Error::Unauthorized)?;
  let creds   = std::str::from_utf8(&decoded).map_err(|_| Error::Unauthorized)?;

  let (username, password) = creds.split_once(':').ok_or(Error::Unauthorized)?;

  let hash = config.password_hash(username).ok_or(Error::Unauthorized)?;
  let parsed_hash = PasswordHash::new(hash).map_err(|_| Error::Unauthorized)?;

  Argon2::default()
    .verify_password(password.as_bytes(), &parsed_hash)
    .map_err(|_| Error::Unauthorized)?;

  OwnerId::new(username).ok_or(Error::Unauthorized)
}

/// Middleware: reject unauthenticated requests, otherwise attach the
/// [`OwnerId`] extension the API handlers scope every query by.
pub async fn require_auth(
  State(auth): State<Arc<AuthConfig>>,
  mut req: Request,
  next: Next,
) -> Result<Response, Error> {
  let owner = verify_auth(req.headers(), &auth).inspect_err(|_| {
    tracing::debug!(path = %req.uri().path(), "rejected unauthenticated request");
  })?;
  req.extensions_mut().insert(owner);
  Ok(next.run(req).await)
}
