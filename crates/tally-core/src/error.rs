//! Error types for `tally-core`.
//!
//! Every failure the [`UpdateCoordinator`](crate::coordinator::UpdateCoordinator)
//! can surface is one of the [`Error`] kinds below. None of them are fatal;
//! each is recoverable by re-invoking the action.

use thiserror::Error;
use uuid::Uuid;

/// Why a user-supplied value was rejected before reaching the store.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
  #[error("subject code is required")]
  EmptyCode,

  #[error("number of classes must be positive, got {0}")]
  NonPositiveClasses(i64),

  #[error("required percentage must be within 0..=100, got {0}")]
  PercentOutOfRange(f64),

  #[error("unknown subject: {0}")]
  UnknownSubject(Uuid),
}

#[derive(Debug, Error)]
pub enum Error {
  /// A mutation was attempted with no signed-in owner.
  #[error("not signed in")]
  NotAuthenticated,

  /// The store rejected or could not complete a write. Any optimistic local
  /// change has already been rolled back when this is returned.
  #[error("remote write failed: {0}")]
  RemoteWriteFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

  /// The store could not be read; the local cache is left as it was.
  #[error("remote read failed: {0}")]
  RemoteReadFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("invalid input: {0}")]
  InvalidInput(#[from] InputError),
}

impl Error {
  pub(crate) fn write<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::RemoteWriteFailed(Box::new(e))
  }

  pub(crate) fn read<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::RemoteReadFailed(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
