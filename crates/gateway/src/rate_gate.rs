//! FIFO rate gate for outgoing Brave requests.
//!
//! Serialises callers through a fair queue and enforces a minimum
//! interval between task *starts*. The queue position is the lock wait:
//! `tokio::sync::Mutex` wakes waiters in FIFO order, which gives the
//! ordering guarantee directly.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use sg_domain::error::{Error, Result};

pub struct RateGate {
    min_interval: Duration,
    /// Start time of the most recent task. Held for the full duration of
    /// the running task, so the next waiter only proceeds once its
    /// predecessor has completed.
    last_start: Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            min_interval: Duration::from_millis(min_interval_ms),
            last_start: Mutex::new(None),
        }
    }

    /// Run `task` through the gate.
    ///
    /// With `max_wait` set, a caller that cannot reach the head of the
    /// queue in time fails with `rate_gate_timeout` without disturbing
    /// the waiters behind it. Errors from `task` propagate unchanged.
    pub async fn run<T, F, Fut>(&self, max_wait: Option<Duration>, task: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let enqueued = Instant::now();

        let mut slot = match max_wait {
            Some(limit) => match tokio::time::timeout(limit, self.last_start.lock()).await {
                Ok(guard) => guard,
                Err(_) => {
                    return Err(Error::RateGateTimeout {
                        waited_ms: enqueued.elapsed().as_millis() as u64,
                    })
                }
            },
            None => self.last_start.lock().await,
        };

        if let Some(last) = *slot {
            // Sleep-until in the past returns immediately.
            tokio::time::sleep_until(last + self.min_interval).await;
        }
        *slot = Some(Instant::now());

        // The guard stays held across the task: completion releases the
        // next waiter.
        task().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex as SyncMutex;

    /// Spawn a gated task that records (id, start time), yielding first so
    /// spawn order equals queue order.
    async fn spawn_recorded(
        gate: &Arc<RateGate>,
        starts: &Arc<SyncMutex<Vec<(u32, Instant)>>>,
        id: u32,
    ) -> tokio::task::JoinHandle<()> {
        let gate = gate.clone();
        let starts = starts.clone();
        let handle = tokio::spawn(async move {
            gate.run(None, || async {
                starts.lock().push((id, Instant::now()));
                Ok::<_, sg_domain::Error>(())
            })
            .await
            .unwrap();
        });
        // Let the spawned task reach the queue before the next spawn.
        tokio::task::yield_now().await;
        handle
    }

    #[tokio::test(start_paused = true)]
    async fn fifo_order_and_min_spacing() {
        let gate = Arc::new(RateGate::new(1_000));
        let starts = Arc::new(SyncMutex::new(Vec::new()));

        let mut handles = Vec::new();
        for id in 0..3 {
            handles.push(spawn_recorded(&gate, &starts, id).await);
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let recorded = starts.lock().clone();
        assert_eq!(recorded.len(), 3);
        // Enqueue order is preserved.
        assert_eq!(
            recorded.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        // Starts are at least min_interval apart.
        for pair in recorded.windows(2) {
            let gap = pair[1].1 - pair[0].1;
            assert!(gap >= Duration::from_millis(1_000), "gap was {gap:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_is_fifo_pass_through() {
        let gate = Arc::new(RateGate::new(0));
        let starts = Arc::new(SyncMutex::new(Vec::new()));

        let before = Instant::now();
        let mut handles = Vec::new();
        for id in 0..3 {
            handles.push(spawn_recorded(&gate, &starts, id).await);
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let recorded = starts.lock().clone();
        assert_eq!(
            recorded.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        // No pacing was inserted.
        assert!(recorded[2].1 - before < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_wait_times_out_without_breaking_the_queue() {
        let gate = Arc::new(RateGate::new(1_000));

        // First task occupies the gate for 10 seconds.
        let slow = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.run(None, || async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok::<_, sg_domain::Error>("slow done")
                })
                .await
            })
        };
        tokio::task::yield_now().await;

        // Second task gives up after 500ms.
        let err = gate
            .run(Some(Duration::from_millis(500)), || async {
                Ok::<_, sg_domain::Error>("never runs")
            })
            .await
            .unwrap_err();
        match err {
            Error::RateGateTimeout { waited_ms } => assert!(waited_ms >= 500),
            other => panic!("expected RateGateTimeout, got {other}"),
        }

        // The slow task is unaffected.
        assert_eq!(slow.await.unwrap().unwrap(), "slow done");
    }

    #[tokio::test(start_paused = true)]
    async fn task_error_propagates_and_releases_the_gate() {
        let gate = RateGate::new(100);

        let err = gate
            .run(None, || async {
                Err::<(), _>(sg_domain::Error::Other("task blew up".into()))
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("task blew up"));

        // Gate is usable afterwards.
        let ok = gate
            .run(None, || async { Ok::<_, sg_domain::Error>(42) })
            .await
            .unwrap();
        assert_eq!(ok, 42);
    }
}
