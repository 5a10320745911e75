//! Turn deadlines.
//!
//! Every backend call made while assembling a turn is bounded by the same
//! deadline. Expiry is reported as `BackendUnavailable`, so callers take
//! their normal fallback path instead of aborting the turn.

use crate::error::{ContextError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    pub fn at(at: Instant) -> Self {
        Self { at }
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Run a backend call under this deadline.
    pub async fn run<T, F>(&self, backend: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        if self.is_expired() {
            return Err(ContextError::backend(backend, "deadline exceeded"));
        }
        match tokio::time::timeout_at(self.at, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ContextError::backend(backend, format!("{:#}", e))),
            Err(_) => Err(ContextError::backend(backend, "deadline exceeded")),
        }
    }
}
