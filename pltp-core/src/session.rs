//! Session: one protocol instance per connection. Owns the transport, the
//! connection state and the last received message. Bring-up and tear-down
//! live here; the send/receive halves are in `delivery`, typed messages in
//! `messaging`.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::PltpError;
use crate::protocol::{Message, Role};
use crate::transport::{Clock, NoWatchdog, SystemClock, Transport, Watchdog};

/// Connection state machine.
///
/// ```text
/// WaitingBegin ──begin──▶ Connecting ──peer attached──▶ ConnectedPendingData
///      ▲                      │                                │
///      └──────timeout─────────┘◀────failure / disconnect───────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Initial state, and where every failure lands.
    #[default]
    WaitingBegin,
    /// Handshake in progress.
    Connecting,
    /// Usable for message exchange.
    ConnectedPendingData,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Per-session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Frames acknowledged OK by the peer.
    pub frames_sent: u64,
    /// Header+body transmissions, retries included.
    pub send_attempts: u64,
    /// Replies other than OK.
    pub acks_rejected: u64,
    /// Acknowledgment windows that closed without a reply.
    pub ack_timeouts: u64,
    /// Frames received and verified.
    pub frames_received: u64,
    pub framing_errors: u64,
    pub integrity_errors: u64,
    pub stalls: u64,
}

/// A PLTP endpoint.
pub struct Session<T: Transport> {
    pub(crate) role: Role,
    pub(crate) state: ConnectionState,
    pub(crate) transport: T,
    pub(crate) clock: Box<dyn Clock + Send>,
    pub(crate) watchdog: Box<dyn Watchdog + Send>,
    pub(crate) config: SessionConfig,
    pub(crate) last_message: Option<Message>,
    pub(crate) stats: SessionStats,
}

impl<T: Transport> Session<T> {
    pub fn new(role: Role, transport: T) -> Self {
        Self {
            role,
            state: ConnectionState::WaitingBegin,
            transport,
            clock: Box::new(SystemClock::new()),
            watchdog: Box::new(NoWatchdog),
            config: SessionConfig::default(),
            last_message: None,
            stats: SessionStats::default(),
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_watchdog(mut self, watchdog: impl Watchdog + Send + 'static) -> Self {
        self.watchdog = Box::new(watchdog);
        self
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Most recent verified message, if any since the last `end`.
    pub fn last_message(&self) -> Option<&Message> {
        self.last_message.as_ref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Bring the session up. Base dials the Sensor; Sensor waits to be
    /// dialled. Either way the peer must attach within `timeout`.
    pub fn begin(&mut self, timeout: Duration) -> Result<(), PltpError> {
        if self.transport.connected() {
            debug!(role = %self.role, "dropping stale link before begin");
        }
        self.transport.disconnect();
        self.state = ConnectionState::WaitingBegin;

        let identity = self.role.identity();
        let initiator = self.role.initiates();
        info!(role = %self.role, "PLTP begin");
        self.transport.advertise(identity, initiator)?;
        self.state = ConnectionState::Connecting;

        let peer = self.role.peer().identity();
        let deadline = self.deadline(timeout);
        loop {
            if initiator && !self.transport.connected() {
                if let Err(e) = self.transport.connect(peer) {
                    debug!(peer, error = %e, "connect attempt failed");
                }
            }
            if self.transport.connected() {
                self.state = ConnectionState::ConnectedPendingData;
                info!(role = %self.role, peer, "connected");
                return Ok(());
            }
            if self.expired(deadline) {
                break;
            }
            self.watchdog.feed();
            self.clock.sleep(self.config.connect_poll());
        }

        warn!(role = %self.role, peer, "peer did not connect in time");
        self.state = ConnectionState::WaitingBegin;
        self.transport.disconnect();
        Err(PltpError::HandshakeTimeout)
    }

    /// Tear down the transport and drop the retained message, whatever the state.
    pub fn end(&mut self) {
        self.transport.disconnect();
        self.last_message = None;
        self.state = ConnectionState::WaitingBegin;
        info!(role = %self.role, "PLTP end");
    }

    /// Connected in the state machine and on the wire.
    pub fn is_connected(&mut self) -> bool {
        self.state == ConnectionState::ConnectedPendingData && self.transport.connected()
    }

    pub(crate) fn ensure_connected(&mut self) -> Result<(), PltpError> {
        if self.is_connected() {
            Ok(())
        } else {
            self.state = ConnectionState::WaitingBegin;
            Err(PltpError::TransportUnavailable)
        }
    }

    /// `timeout` from now; `None` when that lies past the clock's range.
    pub(crate) fn deadline(&self, timeout: Duration) -> Option<Duration> {
        self.clock.now().checked_add(timeout)
    }

    pub(crate) fn expired(&self, deadline: Option<Duration>) -> bool {
        deadline.is_some_and(|d| self.clock.now() >= d)
    }

    /// Apply the state reset an error demands before handing it back.
    pub(crate) fn settle<R>(&mut self, result: Result<R, PltpError>) -> Result<R, PltpError> {
        if let Err(e) = &result {
            if e.resets_session() && self.state != ConnectionState::WaitingBegin {
                debug!(error = %e, "session back to WaitingBegin");
                self.state = ConnectionState::WaitingBegin;
            }
        }
        result
    }

    /// Discard whatever is buffered inbound.
    pub(crate) fn drain_stray(&mut self) {
        let mut scratch = [0u8; 64];
        loop {
            let n = self.transport.available().min(scratch.len());
            if n == 0 {
                return;
            }
            match self.transport.read(&mut scratch[..n]) {
                Ok(0) | Err(_) => return,
                Ok(read) => debug!(bytes = read, "discarded stray bytes"),
            }
        }
    }
}
