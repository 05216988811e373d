//! Trailing-edge debounce based on a generation counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

/// Default quiescence window.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

/// Coalesces bursts of [`touch`](DebounceScheduler::touch) calls into one
/// fire, sent once no touch happened for a full window.
///
/// Every touch bumps the generation and schedules a check after the window.
/// Only the check that still sees its own generation fires, so nothing has
/// to be cancelled. A steady stream of touches postpones the fire
/// indefinitely.
#[derive(Clone)]
pub struct DebounceScheduler {
    generation: Arc<AtomicU64>,
    window: Duration,
    fire: mpsc::Sender<u64>,
}

impl DebounceScheduler {
    /// Returns the scheduler and the receiver of fires. Each fire carries
    /// the generation that triggered it.
    pub fn new(window: Duration) -> (Self, mpsc::Receiver<u64>) {
        let (fire, fired) = mpsc::channel(1);
        let scheduler = Self {
            generation: Arc::new(AtomicU64::new(0)),
            window,
            fire,
        };
        (scheduler, fired)
    }

    /// Returns the quiet period before firing.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Records an event and re-arms the window. Must be called from within
    /// a tokio runtime.
    pub fn touch(&self) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let current = Arc::clone(&self.generation);
        let fire = self.fire.clone();
        let window = self.window;

        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if current.load(Ordering::Acquire) == generation {
                // A fire still queued covers this one
                let _ = fire.try_send(generation);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, timeout, Instant};

    #[tokio::test(start_paused = true)]
    async fn test_burst_fires_once_after_last_event() {
        let (debounce, mut fired) = DebounceScheduler::new(DEFAULT_DEBOUNCE);
        let start = Instant::now();

        for i in 0..5 {
            if i > 0 {
                sleep(Duration::from_millis(150)).await;
            }
            debounce.touch();
        }

        let generation = fired.recv().await.unwrap();
        let elapsed = start.elapsed();
        assert_eq!(generation, 5);
        assert!(elapsed >= Duration::from_millis(800), "fired at {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(810), "fired at {:?}", elapsed);

        assert!(timeout(Duration::from_secs(1), fired.recv()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_bursts_fire_separately() {
        let (debounce, mut fired) = DebounceScheduler::new(DEFAULT_DEBOUNCE);

        debounce.touch();
        assert_eq!(fired.recv().await, Some(1));

        sleep(Duration::from_millis(500)).await;
        debounce.touch();
        debounce.touch();
        assert_eq!(fired.recv().await, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_touch_no_fire() {
        let (_debounce, mut fired) = DebounceScheduler::new(DEFAULT_DEBOUNCE);
        assert!(timeout(Duration::from_secs(1), fired.recv()).await.is_err());
    }
}
