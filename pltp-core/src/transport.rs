//! Collaborators the session drives: byte transport, clock, watchdog.
//! The host supplies implementations; the protocol logic never touches a
//! socket, radio or timer directly.

use std::io;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Full-duplex byte stream between the two peers.
pub trait Transport {
    /// Bring the local endpoint up under `identity`. A non-initiator starts
    /// accepting a peer; an initiator only prepares to dial.
    fn advertise(&mut self, identity: &str, initiator: bool) -> io::Result<()>;

    /// Dial the peer advertising `remote`. May complete later; the session
    /// polls [`connected`](Self::connected).
    fn connect(&mut self, remote: &str) -> io::Result<()>;

    /// Whether a peer is currently attached.
    fn connected(&mut self) -> bool;

    /// Bytes that can be read without waiting.
    fn available(&mut self) -> usize;

    /// Read up to `buf.len()` bytes, waiting at most the transport's own read
    /// timeout. Returns the count read.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Queue every byte of `bytes` for sending.
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;

    /// Drop the peer and stop advertising.
    fn disconnect(&mut self);
}

/// Time source. `now` is monotonic; `epoch_secs` is wall-clock time for the
/// clock message.
pub trait Clock {
    fn now(&self) -> Duration;
    fn sleep(&self, d: Duration);
    fn epoch_secs(&self) -> u64;
}

/// Liveness signal to an external supervisor, fed during long waits.
pub trait Watchdog {
    fn feed(&self);
}

/// Real time from the OS.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, d: Duration) {
        std::thread::sleep(d);
    }

    fn epoch_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Watchdog for hosts without a supervisor.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoWatchdog;

impl Watchdog for NoWatchdog {
    fn feed(&self) {}
}

impl<W: Watchdog + ?Sized> Watchdog for std::sync::Arc<W> {
    fn feed(&self) {
        (**self).feed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        clock.sleep(Duration::from_millis(2));
        assert!(clock.now() >= a + Duration::from_millis(2));
    }

    #[test]
    fn system_clock_epoch_is_recent() {
        // 2023-11-14, well before any machine running these tests.
        assert!(SystemClock::new().epoch_secs() > 1_700_000_000);
    }
}
