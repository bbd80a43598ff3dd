//! [`HttpStore`] — a [`RecordStore`] backed by the tally JSON API.

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tally_core::{
  event::CounterDelta,
  store::{RecordStore, StoreError, StoreErrorKind},
  subject::{NewSubject, OwnerId, SubjectRecord, SubjectView},
};
use thiserror::Error;
use uuid::Uuid;

/// Connection settings for the tally API.
#[derive(Debug, Clone)]
pub struct ApiConfig {
  pub base_url: String,
  pub username: String,
  pub password: String,
}

#[derive(Debug, Error)]
pub enum ClientError {
  #[error("{method} {path} failed: {source}")]
  Request {
    method: Method,
    path:   String,
    #[source]
    source: reqwest::Error,
  },

  #[error("{method} {path} → {status}: {message}")]
  Status {
    method:  Method,
    path:    String,
    status:  StatusCode,
    message: String,
  },

  /// The server scopes every request to the authenticated user; a store call
  /// for anyone else cannot be honoured.
  #[error("signed in as {configured:?}, not {requested:?}")]
  OwnerMismatch { configured: String, requested: String },
}

impl StoreError for ClientError {
  fn kind(&self) -> StoreErrorKind {
    match self {
      ClientError::Status { status: StatusCode::NOT_FOUND, .. } => StoreErrorKind::NotFound,
      ClientError::Status { status: StatusCode::CONFLICT, .. } => {
        StoreErrorKind::NegativeCounter
      }
      _ => StoreErrorKind::Other,
    }
  }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;

/// Async HTTP client for the tally JSON REST API.
///
/// Cheap to clone — the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct HttpStore {
  client: Client,
  config: ApiConfig,
}

impl HttpStore {
  pub fn new(config: ApiConfig) -> reqwest::Result<Self> {
    let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
    Ok(Self { client, config })
  }

  fn url(&self, path: &str) -> String {
    format!(
      "{}/api{}",
      self.config.base_url.trim_end_matches('/'),
      path
    )
  }

  fn request(&self, method: Method, path: &str) -> RequestBuilder {
    let req = self.client.request(method, self.url(path));
    if self.config.username.is_empty() {
      req
    } else {
      req.basic_auth(&self.config.username, Some(&self.config.password))
    }
  }

  fn check_owner(&self, owner: &OwnerId) -> Result<()> {
    if owner.as_str() == self.config.username {
      Ok(())
    } else {
      Err(ClientError::OwnerMismatch {
        configured: self.config.username.clone(),
        requested:  owner.as_str().to_owned(),
      })
    }
  }

  async fn send(&self, method: Method, path: &str, req: RequestBuilder) -> Result<Response> {
    tracing::debug!(%method, path, "sending request");
    req.send().await.map_err(|source| ClientError::Request {
      method,
      path: path.to_owned(),
      source,
    })
  }

  /// Turn a non-success response into [`ClientError::Status`], using the
  /// API's `{"error": ...}` body as the message when there is one.
  async fn error_for(method: Method, path: &str, resp: Response) -> ClientError {
    let status = resp.status();
    let message = match resp.json::<serde_json::Value>().await {
      Ok(body) => body["error"].as_str().unwrap_or_default().to_owned(),
      Err(_) => String::new(),
    };
    ClientError::Status { method, path: path.to_owned(), status, message }
  }

  async fn json<T: DeserializeOwned>(method: Method, path: &str, resp: Response) -> Result<T> {
    resp.json().await.map_err(|source| ClientError::Request {
      method,
      path: path.to_owned(),
      source,
    })
  }
}

// ─── RecordStore impl ────────────────────────────────────────────────────────

impl RecordStore for HttpStore {
  type Error = ClientError;

  /// `POST /api/subjects`
  async fn create_record(&self, owner: &OwnerId, input: NewSubject) -> Result<SubjectRecord> {
    self.check_owner(owner)?;
    let path = "/subjects";
    let req = self.request(Method::POST, path).json(&input);
    let resp = self.send(Method::POST, path, req).await?;
    if !resp.status().is_success() {
      return Err(Self::error_for(Method::POST, path, resp).await);
    }
    let view: SubjectView = Self::json(Method::POST, path, resp).await?;
    Ok(view.record)
  }

  /// `GET /api/subjects/{id}`
  async fn get_record(&self, owner: &OwnerId, id: Uuid) -> Result<Option<SubjectRecord>> {
    self.check_owner(owner)?;
    let path = format!("/subjects/{id}");
    let resp = self
      .send(Method::GET, &path, self.request(Method::GET, &path))
      .await?;
    match resp.status() {
      StatusCode::NOT_FOUND => Ok(None),
      s if s.is_success() => {
        let view: SubjectView = Self::json(Method::GET, &path, resp).await?;
        Ok(Some(view.record))
      }
      _ => Err(Self::error_for(Method::GET, &path, resp).await),
    }
  }

  /// `GET /api/subjects`
  async fn list_records(&self, owner: &OwnerId) -> Result<Vec<SubjectRecord>> {
    self.check_owner(owner)?;
    let path = "/subjects";
    let resp = self
      .send(Method::GET, path, self.request(Method::GET, path))
      .await?;
    if !resp.status().is_success() {
      return Err(Self::error_for(Method::GET, path, resp).await);
    }
    let views: Vec<SubjectView> = Self::json(Method::GET, path, resp).await?;
    Ok(views.into_iter().map(|v| v.record).collect())
  }

  /// `PATCH /api/subjects/{id}/counters`
  async fn apply_increment(&self, owner: &OwnerId, id: Uuid, delta: CounterDelta) -> Result<()> {
    self.check_owner(owner)?;
    let path = format!("/subjects/{id}/counters");
    let req = self.request(Method::PATCH, &path).json(&delta);
    let resp = self.send(Method::PATCH, &path, req).await?;
    if !resp.status().is_success() {
      return Err(Self::error_for(Method::PATCH, &path, resp).await);
    }
    Ok(())
  }

  /// `DELETE /api/subjects/{id}`
  async fn delete_record(&self, owner: &OwnerId, id: Uuid) -> Result<bool> {
    self.check_owner(owner)?;
    let path = format!("/subjects/{id}");
    let resp = self
      .send(Method::DELETE, &path, self.request(Method::DELETE, &path))
      .await?;
    match resp.status() {
      StatusCode::NOT_FOUND => Ok(false),
      s if s.is_success() => Ok(true),
      _ => Err(Self::error_for(Method::DELETE, &path, resp).await),
    }
  }
}
