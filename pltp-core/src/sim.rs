//! Deterministic stand-ins for the host collaborators.
//!
//! - [`SimClock`]: virtual time; `sleep` advances it instantly, so a 30 s
//!   acknowledgment window costs nothing in a test.
//! - [`ScriptedTransport`]: single-threaded peer with a fixed inbound stream plus
//!   reply bursts released one per `flush`, with every flushed write recorded.
//! - [`pipe`]: two thread-safe endpoints joined back to back, with
//!   identity-based listen/connect, disconnect propagation and one-shot byte
//!   corruption on the outbound stream.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::transport::{Clock, Transport};

/// Shared virtual clock. Clones observe the same time.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    inner: Arc<SimClockInner>,
}

#[derive(Debug, Default)]
struct SimClockInner {
    nanos: AtomicU64,
    epoch: AtomicU64,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock whose wall time starts at `secs` since the Unix epoch.
    pub fn at_epoch(secs: u64) -> Self {
        let clock = Self::default();
        clock.inner.epoch.store(secs, Ordering::SeqCst);
        clock
    }

    pub fn advance(&self, d: Duration) {
        self.inner
            .nanos
            .fetch_add(d.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for SimClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.inner.nanos.load(Ordering::SeqCst))
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
    }

    fn epoch_secs(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst) + self.now().as_secs()
    }
}

/// Single-threaded scripted peer.
#[derive(Debug)]
pub struct ScriptedTransport {
    inbound: VecDeque<u8>,
    replies: VecDeque<Vec<u8>>,
    pending: Vec<u8>,
    flushed: Vec<Vec<u8>>,
    connected: bool,
    reachable: bool,
    drop_after_flushes: Option<usize>,
    identity: Option<String>,
    connect_calls: usize,
}

impl ScriptedTransport {
    /// Peer that accepts connections immediately.
    pub fn new() -> Self {
        Self {
            inbound: VecDeque::new(),
            replies: VecDeque::new(),
            pending: Vec::new(),
            flushed: Vec::new(),
            connected: false,
            reachable: true,
            drop_after_flushes: None,
            identity: None,
            connect_calls: 0,
        }
    }

    /// Peer that never shows up.
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::new()
        }
    }

    /// Bytes readable from the start.
    pub fn with_inbound(mut self, bytes: &[u8]) -> Self {
        self.inbound.extend(bytes);
        self
    }

    /// Queue a burst delivered after the next unanswered `flush`. An empty
    /// burst is a flush the peer ignores.
    pub fn reply_on_flush(mut self, burst: &[u8]) -> Self {
        self.replies.push_back(burst.to_vec());
        self
    }

    /// Drop the link right after the `n`th flush.
    pub fn drop_after_flushes(mut self, n: usize) -> Self {
        self.drop_after_flushes = Some(n);
        self
    }

    /// Every flushed write, in order.
    pub fn flushed(&self) -> &[Vec<u8>] {
        &self.flushed
    }

    /// Inbound bytes not yet read.
    pub fn unread(&self) -> usize {
        self.inbound.len()
    }

    /// Append to the inbound stream.
    pub fn inject(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes);
    }

    /// Simulate the peer vanishing.
    pub fn sever(&mut self) {
        self.connected = false;
    }

    /// Identity last advertised.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for ScriptedTransport {
    fn advertise(&mut self, identity: &str, initiator: bool) -> io::Result<()> {
        self.identity = Some(identity.to_string());
        if !initiator && self.reachable {
            self.connected = true;
        }
        Ok(())
    }

    fn connect(&mut self, _remote: &str) -> io::Result<()> {
        self.connect_calls += 1;
        if !self.reachable {
            return Err(io::ErrorKind::ConnectionRefused.into());
        }
        self.connected = true;
        Ok(())
    }

    fn connected(&mut self) -> bool {
        self.connected
    }

    fn available(&mut self) -> usize {
        self.inbound.len()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(self.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        if !self.connected {
            return Err(io::ErrorKind::NotConnected.into());
        }
        self.pending.extend_from_slice(bytes);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.connected {
            return Err(io::ErrorKind::NotConnected.into());
        }
        self.flushed.push(std::mem::take(&mut self.pending));
        if let Some(burst) = self.replies.pop_front() {
            self.inbound.extend(burst);
        }
        if self.drop_after_flushes == Some(self.flushed.len()) {
            self.connected = false;
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
        self.pending.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    A,
    B,
}

impl Side {
    fn index(self) -> usize {
        match self {
            Side::A => 0,
            Side::B => 1,
        }
    }

    fn other(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

#[derive(Debug, Default)]
struct Wire {
    /// Inbound queue per side.
    queues: [VecDeque<u8>; 2],
    /// Bytes each side wrote before any corruption, for inspection.
    sent: [Vec<u8>; 2],
    /// Absolute outbound offset to corrupt once, per side.
    corrupt_at: [Option<usize>; 2],
    listener: Option<(Side, String)>,
    connected: bool,
}

/// One end of an in-memory link created by [`pipe`].
#[derive(Debug, Clone)]
pub struct PipeEnd {
    wire: Arc<Mutex<Wire>>,
    side: Side,
    read_timeout: Duration,
}

/// Two connected-on-demand endpoints sharing one wire.
pub fn pipe() -> (PipeEnd, PipeEnd) {
    let wire = Arc::new(Mutex::new(Wire::default()));
    let end = |side| PipeEnd {
        wire: wire.clone(),
        side,
        read_timeout: Duration::from_millis(100),
    };
    (end(Side::A), end(Side::B))
}

impl PipeEnd {
    fn lock(&self) -> MutexGuard<'_, Wire> {
        self.wire.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Flip every bit of the outbound byte `offset` positions from now.
    pub fn corrupt_outgoing(&self, offset: usize) {
        let mut wire = self.lock();
        let i = self.side.index();
        wire.corrupt_at[i] = Some(wire.sent[i].len() + offset);
    }

    /// Everything this end has written, as it was before corruption.
    pub fn sent_bytes(&self) -> Vec<u8> {
        self.lock().sent[self.side.index()].clone()
    }

    /// Drop the link from this side; the other side sees it too.
    pub fn sever(&self) {
        let mut wire = self.lock();
        wire.connected = false;
        wire.queues = Default::default();
    }
}

impl Transport for PipeEnd {
    fn advertise(&mut self, identity: &str, initiator: bool) -> io::Result<()> {
        if !initiator {
            self.lock().listener = Some((self.side, identity.to_string()));
        }
        Ok(())
    }

    fn connect(&mut self, remote: &str) -> io::Result<()> {
        let mut wire = self.lock();
        match &wire.listener {
            Some((side, name)) if *side == self.side.other() && name == remote => {
                wire.listener = None;
                wire.connected = true;
                Ok(())
            }
            _ => Err(io::ErrorKind::ConnectionRefused.into()),
        }
    }

    fn connected(&mut self) -> bool {
        self.lock().connected
    }

    fn available(&mut self) -> usize {
        self.lock().queues[self.side.index()].len()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let deadline = Instant::now() + self.read_timeout;
        loop {
            {
                let mut wire = self.lock();
                let queue = &mut wire.queues[self.side.index()];
                if !queue.is_empty() {
                    let n = buf.len().min(queue.len());
                    for (slot, byte) in buf.iter_mut().zip(queue.drain(..n)) {
                        *slot = byte;
                    }
                    return Ok(n);
                }
                if !wire.connected || Instant::now() >= deadline {
                    return Ok(0);
                }
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut wire = self.lock();
        if !wire.connected {
            return Err(io::ErrorKind::NotConnected.into());
        }
        let me = self.side.index();
        let peer = self.side.other().index();
        for &byte in bytes {
            let offset = wire.sent[me].len();
            wire.sent[me].push(byte);
            let byte = if wire.corrupt_at[me] == Some(offset) {
                wire.corrupt_at[me] = None;
                !byte
            } else {
                byte
            };
            wire.queues[peer].push_back(byte);
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.lock().connected {
            return Err(io::ErrorKind::NotConnected.into());
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut wire = self.lock();
        wire.connected = false;
        wire.queues = Default::default();
        if matches!(&wire.listener, Some((side, _)) if *side == self.side) {
            wire.listener = None;
        }
    }
}
