//! Request coalescing
//!
//! Duplicate concurrent requests for the same key (double-clicked buttons,
//! retrying clients) share a single in-flight execution: the first caller
//! becomes the leader and runs the operation, followers await the same
//! shared future and receive a clone of its result.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors surfaced to every caller sharing a coalesced request
#[derive(Debug, Clone, Error)]
pub enum CoalesceError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("request failed: {0}")]
    Failed(String),
}

type SharedResult<T> = Shared<BoxFuture<'static, Result<T, CoalesceError>>>;

struct InflightSlot<T: Clone> {
    started: Instant,
    fut: SharedResult<T>,
}

enum Role<T: Clone> {
    Leader(SharedResult<T>),
    Follower(SharedResult<T>),
}

/// Coalesces concurrent requests by key
pub struct RequestCoalescer<T: Clone> {
    inflight: DashMap<String, InflightSlot<T>>,
    timeout: Duration,
}

impl<T> RequestCoalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(timeout: Duration) -> Self {
        Self {
            inflight: DashMap::new(),
            timeout,
        }
    }

    /// Run `op` under `key`, sharing the result with any concurrent caller
    /// holding the same key.
    ///
    /// The leader removes the slot once the operation settles; a slot whose
    /// leader died (past its timeout with no cleanup) is replaced rather
    /// than joined, so one wedged task cannot poison the key forever.
    pub async fn run<F, E>(&self, key: &str, op: F) -> Result<T, CoalesceError>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        E: std::fmt::Display,
    {
        let role = match self.inflight.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().started.elapsed() <= self.timeout {
                    tracing::debug!(key, "coalescing onto in-flight request");
                    Role::Follower(occupied.get().fut.clone())
                } else {
                    // Stale slot; take over as the new leader.
                    let fut = Self::wrap(op, self.timeout);
                    occupied.insert(InflightSlot {
                        started: Instant::now(),
                        fut: fut.clone(),
                    });
                    Role::Leader(fut)
                }
            }
            Entry::Vacant(vacant) => {
                let fut = Self::wrap(op, self.timeout);
                vacant.insert(InflightSlot {
                    started: Instant::now(),
                    fut: fut.clone(),
                });
                Role::Leader(fut)
            }
        };

        match role {
            Role::Follower(fut) => fut.await,
            Role::Leader(fut) => {
                let result = fut.clone().await;
                // Only remove the slot we installed; a replacement leader's
                // slot stays.
                self.inflight
                    .remove_if(key, |_, slot| slot.fut.ptr_eq(&fut));
                result
            }
        }
    }

    /// Number of keys currently in flight
    pub fn inflight_len(&self) -> usize {
        self.inflight.len()
    }

    fn wrap<F, E>(op: F, timeout: Duration) -> SharedResult<T>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        E: std::fmt::Display,
    {
        async move {
            match tokio::time::timeout(timeout, op).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(CoalesceError::Failed(e.to_string())),
                Err(_) => Err(CoalesceError::Timeout(timeout)),
            }
        }
        .boxed()
        .shared()
    }
}
