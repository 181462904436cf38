use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

struct Inner {
    expected: usize,
    remaining: Mutex<usize>,
    reached_zero: Condvar,
    notify: Notify,
}

/// Counts down received messages so a caller can wait for "N delivered"
/// without polling the broker.
///
/// Clones share the same counter.
#[derive(Clone)]
pub struct DeliveryTracker {
    inner: Arc<Inner>,
}

impl DeliveryTracker {
    pub fn new(expected: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                expected,
                remaining: Mutex::new(expected),
                reached_zero: Condvar::new(),
                notify: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.inner
            .remaining
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Count one delivery. Calls past zero are ignored.
    pub fn record_one(&self) {
        let mut remaining = self.lock();
        if *remaining == 0 {
            return;
        }
        *remaining -= 1;
        if *remaining == 0 {
            self.inner.reached_zero.notify_all();
            self.inner.notify.notify_waiters();
        }
    }

    pub fn remaining(&self) -> usize {
        *self.lock()
    }

    pub fn expected(&self) -> usize {
        self.inner.expected
    }

    /// Wait until the count reaches zero or `timeout` elapses. Returns whether
    /// the count reached zero.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let done = async {
            loop {
                let notified = self.inner.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.remaining() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, done).await.is_ok()
    }

    /// Blocking form of [`wait`](Self::wait) for callers outside the runtime
    pub fn wait_blocking(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut remaining = self.lock();
        while *remaining > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            remaining = self
                .inner
                .reached_zero
                .wait_timeout(remaining, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

impl std::fmt::Debug for DeliveryTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryTracker")
            .field("expected", &self.expected())
            .field("remaining", &self.remaining())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn concurrent_records_complete_the_count() {
        let tracker = DeliveryTracker::new(400);
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let tracker = tracker.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        tracker.record_one();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let started = Instant::now();
        assert!(tracker.wait_blocking(Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(tracker.remaining(), 0);
    }

    #[test]
    fn extra_records_are_ignored() {
        let tracker = DeliveryTracker::new(1);
        tracker.record_one();
        tracker.record_one();
        tracker.record_one();
        assert_eq!(tracker.remaining(), 0);
        assert_eq!(tracker.expected(), 1);
    }

    #[test]
    fn blocking_wait_times_out_when_short() {
        let tracker = DeliveryTracker::new(3);
        tracker.record_one();
        let started = Instant::now();
        assert!(!tracker.wait_blocking(Duration::from_millis(100)));
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(tracker.remaining(), 2);
    }

    #[test]
    fn blocking_wait_wakes_on_completion() {
        let tracker = DeliveryTracker::new(1);
        let other = tracker.clone();
        let recorder = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            other.record_one();
        });
        assert!(tracker.wait_blocking(Duration::from_secs(5)));
        recorder.join().unwrap();
    }

    #[tokio::test]
    async fn async_wait_times_out_when_short() {
        let tracker = DeliveryTracker::new(2);
        tracker.record_one();
        assert!(!tracker.wait(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn async_wait_wakes_on_completion() {
        let tracker = DeliveryTracker::new(2);
        let other = tracker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            other.record_one();
            other.record_one();
        });
        assert!(tracker.wait(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn zero_expected_is_already_complete() {
        let tracker = DeliveryTracker::new(0);
        assert!(tracker.wait(Duration::from_millis(1)).await);
        assert!(tracker.wait_blocking(Duration::ZERO));
    }
}
