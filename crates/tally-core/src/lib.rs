//! Core types and trait definitions for the Tally attendance tracker.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! All other crates depend on it. It owns the accounting rules (percentage
//! present, safe bunks), the [`store::RecordStore`] contract, and the
//! [`coordinator::UpdateCoordinator`] that applies attendance events
//! optimistically against a store.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod accounting;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod reconcile;
pub mod session;
pub mod store;
pub mod subject;
pub mod summary;

pub use error::{Error, InputError, Result};

#[cfg(test)]
mod tests;
