//! Heartbeat fed by the session thread and watched from the runtime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use pltp_core::Watchdog;

#[derive(Debug)]
pub struct Heartbeat {
    origin: Instant,
    /// Milliseconds since `origin` at the last feed.
    last_ms: AtomicU64,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Time since the last feed.
    pub fn since_feed(&self) -> Duration {
        let last = self.last_ms.load(Ordering::Relaxed);
        Duration::from_millis(self.now_ms().saturating_sub(last))
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

impl Watchdog for Heartbeat {
    fn feed(&self) {
        self.last_ms.store(self.now_ms(), Ordering::Relaxed);
    }
}

/// Warn once per stall while the heartbeat is older than `stall`.
pub async fn supervise(beat: Arc<Heartbeat>, stall: Duration) {
    let period = (stall / 4).max(Duration::from_millis(100));
    let mut ticker = tokio::time::interval(period);
    let mut stalled = false;
    loop {
        ticker.tick().await;
        let quiet = beat.since_feed();
        if quiet >= stall {
            if !stalled {
                tracing::warn!(quiet_ms = quiet.as_millis() as u64, "session loop has not fed the watchdog");
            }
            stalled = true;
        } else if stalled {
            tracing::info!("session loop alive again");
            stalled = false;
        }
    }
}
