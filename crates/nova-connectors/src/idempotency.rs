//! Idempotent dispatch of user-facing side effects

use crate::lock;
use futures::future::{BoxFuture, FutureExt, Shared};
use nova_core::{CoreError, CoreResult};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

pub const DEFAULT_DISPATCH_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_DISPATCH_SOFT_LIMIT: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome<T> {
    pub value: T,
    /// True when the value came from an earlier or concurrent run with the same key.
    pub duplicate: bool,
}

type Pending<T> = Shared<BoxFuture<'static, CoreResult<T>>>;

struct DispatchState<T> {
    completed: HashMap<String, (Instant, T)>,
    inflight: HashMap<String, Pending<T>>,
}

/// Clears the in-flight marker when the spawned operation ends, panics included.
struct ClearInflight<T> {
    state: Arc<Mutex<DispatchState<T>>>,
    key: String,
}

impl<T> Drop for ClearInflight<T> {
    fn drop(&mut self) {
        lock(&self.state).inflight.remove(&self.key);
    }
}

pub struct DispatchCache<T> {
    ttl: Duration,
    soft_limit: usize,
    state: Arc<Mutex<DispatchState<T>>>,
}

impl<T> DispatchCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            soft_limit: DEFAULT_DISPATCH_SOFT_LIMIT,
            state: Arc::new(Mutex::new(DispatchState {
                completed: HashMap::new(),
                inflight: HashMap::new(),
            })),
        }
    }

    pub fn with_soft_limit(mut self, soft_limit: usize) -> Self {
        self.soft_limit = soft_limit.max(1);
        self
    }

    pub fn completed_len(&self) -> usize {
        lock(&self.state).completed.len()
    }

    /// Run `op` at most once per key within the TTL.
    ///
    /// The operation runs on its own task, so dropping the caller does not
    /// abort a half-sent side effect. Failures are not remembered.
    pub async fn run<F, Fut>(&self, key: &str, op: F) -> CoreResult<DispatchOutcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CoreResult<T>> + Send + 'static,
    {
        if key.trim().is_empty() {
            let value = op().await?;
            return Ok(DispatchOutcome {
                value,
                duplicate: false,
            });
        }

        let (pending, duplicate) = {
            let mut state = lock(&self.state);
            let now = Instant::now();
            let remembered = state
                .completed
                .get(key)
                .map(|(expires_at, value)| (*expires_at > now, value.clone()));
            match remembered {
                Some((true, value)) => {
                    debug!(target: "nova::dispatch", key, "returning remembered result");
                    return Ok(DispatchOutcome {
                        value,
                        duplicate: true,
                    });
                }
                Some((false, _)) => {
                    state.completed.remove(key);
                }
                None => {}
            }

            match state.inflight.get(key) {
                Some(pending) => {
                    debug!(target: "nova::dispatch", key, "joining in-flight dispatch");
                    (pending.clone(), true)
                }
                None => {
                    let pending = self.spawn(key, op());
                    state.inflight.insert(key.to_string(), pending.clone());
                    (pending, false)
                }
            }
        };

        let value = pending.await?;
        Ok(DispatchOutcome { value, duplicate })
    }

    // Called with the state lock held; the task blocks on it until the
    // in-flight entry is registered.
    fn spawn<Fut>(&self, key: &str, work: Fut) -> Pending<T>
    where
        Fut: Future<Output = CoreResult<T>> + Send + 'static,
    {
        let clear = ClearInflight {
            state: self.state.clone(),
            key: key.to_string(),
        };
        let ttl = self.ttl;
        let soft_limit = self.soft_limit;
        let task = tokio::spawn(async move {
            let result = work.await;
            if let Ok(value) = &result {
                let mut state = lock(&clear.state);
                let now = Instant::now();
                state
                    .completed
                    .insert(clear.key.clone(), (now + ttl, value.clone()));
                if state.completed.len() > soft_limit {
                    state.completed.retain(|_, (expires_at, _)| *expires_at > now);
                }
            }
            drop(clear);
            result
        });

        async move {
            task.await.unwrap_or_else(|e| {
                Err(CoreError::Internal(format!("dispatch task failed: {}", e)))
            })
        }
        .boxed()
        .shared()
    }
}
