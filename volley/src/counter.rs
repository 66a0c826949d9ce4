use parking_lot::Mutex;

/// In-flight execution counter shared by every robot of a round.
///
/// Tracks how many `execute` calls are running right now and the highest value seen
/// since the last [`reset`](ConcurrencyCounter::reset). All robots contend on the same
/// lock, which is fine: the critical section is two integer updates.
#[derive(Debug, Default)]
pub struct ConcurrencyCounter {
    inner: Mutex<Counts>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    current: i64,
    max: i64,
}

impl ConcurrencyCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adjusts the current count and raises the running maximum when exceeded.
    pub fn add(&self, delta: i64) {
        let mut counts = self.inner.lock();
        counts.current += delta;
        if counts.current > counts.max {
            counts.max = counts.current;
        }
    }

    pub fn current(&self) -> i64 {
        self.inner.lock().current
    }

    pub fn max(&self) -> i64 {
        self.inner.lock().max
    }

    pub fn reset(&self) {
        *self.inner.lock() = Counts::default();
    }

    /// Counts one execution for as long as the returned guard lives.
    pub fn enter(&self) -> ConcurrencyGuard<'_> {
        self.add(1);
        ConcurrencyGuard { counter: self }
    }
}

/// Decrements the counter on drop, including when the guarded call unwinds.
#[must_use = "the execution is only counted while the guard is alive"]
pub struct ConcurrencyGuard<'a> {
    counter: &'a ConcurrencyCounter,
}

impl Drop for ConcurrencyGuard<'_> {
    fn drop(&mut self) {
        self.counter.add(-1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{panic::AssertUnwindSafe, sync::Arc};

    #[test]
    fn max_tracks_highest_value() {
        let counter = ConcurrencyCounter::new();
        counter.add(1);
        counter.add(1);
        counter.add(-1);
        counter.add(1);
        counter.add(1);
        counter.add(-3);
        assert_eq!(counter.current(), 0);
        assert_eq!(counter.max(), 3);

        counter.reset();
        assert_eq!(counter.current(), 0);
        assert_eq!(counter.max(), 0);
    }

    #[test]
    fn guard_releases_on_drop() {
        let counter = ConcurrencyCounter::new();
        {
            let _a = counter.enter();
            let _b = counter.enter();
            assert_eq!(counter.current(), 2);
        }
        assert_eq!(counter.current(), 0);
        assert_eq!(counter.max(), 2);
    }

    #[test]
    fn guard_releases_on_panic() {
        let counter = ConcurrencyCounter::new();
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
            let _guard = counter.enter();
            panic!("boom");
        }));
        assert!(outcome.is_err());
        assert_eq!(counter.current(), 0);
        assert_eq!(counter.max(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn overlapping_executions_reach_population() {
        let counter = Arc::new(ConcurrencyCounter::new());
        let barrier = Arc::new(tokio::sync::Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    let _guard = counter.enter();
                    // nobody leaves before everybody entered
                    barrier.wait().await;
                })
            })
            .collect();
        for handle in futures::future::join_all(handles).await {
            handle.unwrap();
        }
        assert_eq!(counter.max(), 8);
        assert_eq!(counter.current(), 0);
    }
}
