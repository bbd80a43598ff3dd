//! Error type for `tally-store-sqlite`.

use tally_core::store::{StoreError, StoreErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid subject: {0}")]
  Input(#[from] tally_core::InputError),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A stored value does not fit the domain type (e.g. a negative counter).
  #[error("corrupt row: {0}")]
  Corrupt(String),

  #[error("subject not found: {0}")]
  SubjectNotFound(uuid::Uuid),

  /// The increment would have driven a counter below zero; nothing changed.
  #[error("increment on {0} would make a counter negative")]
  NegativeCounter(uuid::Uuid),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl StoreError for Error {
  fn kind(&self) -> StoreErrorKind {
    match self {
      Error::SubjectNotFound(_) => StoreErrorKind::NotFound,
      Error::NegativeCounter(_) => StoreErrorKind::NegativeCounter,
      _ => StoreErrorKind::Other,
    }
  }
}
