//! Signed-in identity, passed explicitly to whoever needs it.
//!
//! The authentication collaborator holds a [`SessionHandle`] and signs users
//! in and out. Consumers hold a [`Session`] and read the current owner or wait
//! for the next transition.

use tokio::sync::watch;

use crate::subject::OwnerId;

/// Create a linked handle/session pair starting at `initial`.
pub fn channel(initial: Option<OwnerId>) -> (SessionHandle, Session) {
  let (tx, rx) = watch::channel(initial);
  (SessionHandle { tx }, Session { rx })
}

/// The writing side, owned by whatever authenticates the user.
#[derive(Debug)]
pub struct SessionHandle {
  tx: watch::Sender<Option<OwnerId>>,
}

impl SessionHandle {
  pub fn sign_in(&self, owner: OwnerId) {
    tracing::info!(%owner, "signed in");
    self.tx.send_replace(Some(owner));
  }

  pub fn sign_out(&self) {
    if self.tx.send_replace(None).is_some() {
      tracing::info!("signed out");
    }
  }

  pub fn session(&self) -> Session { Session { rx: self.tx.subscribe() } }
}

/// A read-only view of the current identity.
#[derive(Debug, Clone)]
pub struct Session {
  rx: watch::Receiver<Option<OwnerId>>,
}

impl Session {
  /// A session that is signed in as `owner` for its whole lifetime.
  pub fn fixed(owner: OwnerId) -> Self {
    let (tx, rx) = watch::channel(Some(owner));
    drop(tx);
    Self { rx }
  }

  pub fn owner(&self) -> Option<OwnerId> { self.rx.borrow().clone() }

  /// Wait for the next sign-in/sign-out transition. Returns `false` once the
  /// handle has been dropped and no further transitions can occur.
  pub async fn changed(&mut self) -> bool { self.rx.changed().await.is_ok() }
}
