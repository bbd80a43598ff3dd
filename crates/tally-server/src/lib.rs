//! HTTP server for Tally.
//!
//! Serves the [`tally_api`] JSON API under `/api`, behind HTTP Basic auth.
//! Each configured user is a separate owner: the authenticated username is
//! attached to the request as its [`OwnerId`](tally_core::subject::OwnerId).

pub mod auth;
pub mod error;

pub use error::{ConfigError, Error};

use std::{
  collections::HashSet,
  path::{Path, PathBuf},
  sync::Arc,
};

use axum::{Router, middleware, routing::get};
use serde::Deserialize;
use tally_core::store::RecordStore;
use tower_http::trace::TraceLayer;

use auth::AuthConfig;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml`.
#[derive(Deserialize, Clone)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:       String,
  #[serde(default = "default_port")]
  pub port:       u16,
  pub store_path: PathBuf,
  #[serde(default)]
  pub users:      Vec<UserConfig>,
}

/// One account allowed to sign in.
#[derive(Deserialize, Clone)]
pub struct UserConfig {
  pub username:      String,
  /// PHC string produced by argon2, e.g. `$argon2id$v=19$…`
  pub password_hash: String,
}

fn default_host() -> String { "127.0.0.1".to_string() }

fn default_port() -> u16 { 5280 }

impl ServerConfig {
  /// Read `path` if it exists, then apply `TALLY_*` environment overrides.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    Self::from_source(config::File::from(path).required(false))
  }

  fn from_source<T>(file: T) -> Result<Self, ConfigError>
  where
    T: config::Source + Send + Sync + 'static,
  {
    let cfg: Self = config::Config::builder()
      .add_source(file)
      .add_source(config::Environment::with_prefix("TALLY"))
      .build()?
      .try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
  }

  fn validate(&self) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for user in &self.users {
      let name = user.username.trim();
      if name.is_empty() {
        return Err(ConfigError::BlankUsername);
      }
      if !seen.insert(name) {
        return Err(ConfigError::DuplicateUser(name.to_owned()));
      }
    }
    Ok(())
  }

  /// `store_path` with a leading `~/` resolved against `$HOME`.
  pub fn resolved_store_path(&self) -> PathBuf {
    let Some(rest) = self.store_path.to_str().and_then(|p| p.strip_prefix("~/")) else {
      return self.store_path.clone();
    };
    match std::env::var_os("HOME") {
      Some(home) => PathBuf::from(home).join(rest),
      None => self.store_path.clone(),
    }
  }
}

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state handed to the router.
#[derive(Clone)]
pub struct AppState<S: RecordStore> {
  pub store: Arc<S>,
  pub auth:  Arc<AuthConfig>,
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the server's axum [`Router`]: `/health` is open, `/api` requires
/// Basic auth.
pub fn router<S>(state: AppState<S>) -> Router
where
  S: RecordStore + 'static,
{
  let api = tally_api::api_router(state.store.clone()).layer(
    middleware::from_fn_with_state(state.auth.clone(), auth::require_auth),
  );

  Router::new()
    .route("/health", get(|| async { "ok" }))
    .nest("/api", api)
    .layer(TraceLayer::new_for_http())
}
