// SPDX-FileCopyrightText: Copyright © 2024 Corepack Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Bounded-parallelism and throttling primitives (spec §5, §9).
//!
//! `moss`'s `package/fetch.rs` leans on `rayon` for CPU-bound parallel
//! unpacking; our suspension points are I/O (image pulls, registry pushes,
//! backend reads), so [`Pool`] is the same "at most N in-flight" idea
//! expressed as a `tokio::sync::Semaphore` instead.

use std::sync::Arc;

use tokio::sync::{Mutex, Notify, Semaphore};

/// A very large bound used to emulate "unbounded" parallelism (§5: `N < 0`)
/// without giving the semaphore a second, branching code path.
const EFFECTIVELY_UNBOUNDED: usize = 4096;

/// Bounded concurrency for "at most N in-flight" operations (§4.5, §4.7).
///
/// `degree < 0` is unbounded, `degree` in `[0, 1]` is sequential (a single
/// permit), otherwise at most `degree` tasks run concurrently.
#[derive(Clone)]
pub struct Pool {
    semaphore: Arc<Semaphore>,
}

impl Pool {
    pub fn new(degree: i64) -> Self {
        let permits = if degree < 0 {
            EFFECTIVELY_UNBOUNDED
        } else {
            (degree as usize).max(1)
        };

        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
        }
    }

    /// Run `task` once a permit is available. The permit is held for the
    /// duration of `task` and released on completion, including on panic
    /// unwind through the semaphore guard's `Drop`.
    pub async fn run<F, Fut, T>(&self, task: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let _permit = self.semaphore.acquire().await.expect("pool semaphore never closed");
        task().await
    }
}

/// Single-producer/single-consumer throttle: keeps only the most recent
/// value while the consumer is busy, but guarantees the last value sent is
/// eventually delivered (§9 "Throttling pipe"). Used to keep
/// `OperationContext`'s progress forwarding from backing up a slow consumer
/// (e.g. an HTTP long-poll) behind a fast producer loop.
pub struct LatestValue<T> {
    slot: Mutex<Option<T>>,
    notify: Notify,
}

impl<T> Default for LatestValue<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
            notify: Notify::new(),
        }
    }
}

impl<T> LatestValue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the pending slot with `value` and wake a waiting
    /// `recv`. Never blocks; never drops a value that hasn't been taken.
    pub async fn send(&self, value: T) {
        *self.slot.lock().await = Some(value);
        self.notify.notify_one();
    }

    /// Wait for a value to be available and take it. If multiple `send`
    /// calls happened between two `recv` calls, only the most recent one is
    /// observed; intermediate values are coalesced away, which is the whole
    /// point of the throttle.
    pub async fn recv(&self) -> T {
        loop {
            if let Some(value) = self.slot.lock().await.take() {
                return value;
            }
            self.notify.notified().await;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn pool_limits_in_flight_tasks() {
        let pool = Pool::new(2);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_observed = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];
        for _ in 0..8 {
            let pool = pool.clone();
            let in_flight = in_flight.clone();
            let max_observed = max_observed.clone();
            handles.push(tokio::spawn(async move {
                pool.run(|| async {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_observed.fetch_max(now, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                })
                .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert!(max_observed.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn pool_degree_zero_is_sequential() {
        let pool = Pool::new(0);
        assert_eq!(pool.semaphore.available_permits(), 1);
    }

    #[tokio::test]
    async fn latest_value_delivers_final_send() {
        let pipe = Arc::new(LatestValue::new());
        pipe.send(1).await;
        pipe.send(2).await;
        pipe.send(3).await;

        assert_eq!(pipe.recv().await, 3);
    }

    #[tokio::test]
    async fn latest_value_recv_awaits_send() {
        let pipe = Arc::new(LatestValue::new());
        let reader = {
            let pipe = pipe.clone();
            tokio::spawn(async move { pipe.recv().await })
        };

        tokio::task::yield_now().await;
        pipe.send(42).await;

        assert_eq!(reader.await.unwrap(), 42);
    }
}
