use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Time source for the health-check scheduler
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

/// Wall-clock time backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Clock whose sleeps only return when [`ManualClock::tick`] is called.
///
/// Each tick releases exactly one pending or future sleep, so a test can
/// step the health-check loop one cycle at a time.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    ticks: Semaphore,
    sleeps: AtomicUsize,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc::now()),
            ticks: Semaphore::new(0),
            sleeps: AtomicUsize::new(0),
        }
    }

    /// Release one sleep
    pub fn tick(&self) {
        self.ticks.add_permits(1);
    }

    /// Number of sleeps requested so far
    pub fn sleeps(&self) -> usize {
        self.sleeps.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` sleeps have been requested
    pub async fn wait_for_sleeps(&self, count: usize) {
        while self.sleeps() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        if let Ok(permit) = self.ticks.acquire().await {
            permit.forget();
        }

        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        if let Ok(step) = chrono::Duration::from_std(duration) {
            *now += step;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_manual_clock_sleep_waits_for_tick() {
        let clock = Arc::new(ManualClock::new());
        let start = clock.now();

        let sleeper = {
            let clock = Arc::clone(&clock);
            tokio::spawn(async move { clock.sleep(Duration::from_secs(30)).await })
        };

        clock.wait_for_sleeps(1).await;
        assert!(!sleeper.is_finished());

        clock.tick();
        sleeper.await.unwrap();
        assert_eq!(clock.now() - start, chrono::Duration::seconds(30));
    }

    #[tokio::test]
    async fn test_system_clock_sleeps() {
        let before = std::time::Instant::now();
        SystemClock.sleep(Duration::from_millis(20)).await;
        assert!(before.elapsed() >= Duration::from_millis(20));
    }
}
