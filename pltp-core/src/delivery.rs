//! Reliable delivery: send a frame until the peer acknowledges it, receive a
//! frame and acknowledge it. One byte comes back per frame: OK or NOT-OK.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Fault, PltpError};
use crate::integrity;
use crate::protocol::{Message, ACK_NOT_OK, ACK_OK, MAX_BODY_LEN};
use crate::session::Session;
use crate::transport::Transport;
use crate::wire::{self, AssembleError, FrameAssembler, Progress};

/// Scratch buffer size for one transport read; a body never exceeds it.
const READ_CHUNK: usize = MAX_BODY_LEN;

impl<T: Transport> Session<T> {
    /// Send `body` as one frame, trying up to `max_attempts` times.
    pub fn send(&mut self, body: &[u8], max_attempts: u32) -> Result<(), PltpError> {
        if body.len() > MAX_BODY_LEN {
            return Err(PltpError::BodyTooLong { len: body.len() });
        }
        let result = self.send_frame(body, max_attempts);
        self.settle(result)
    }

    fn send_frame(&mut self, body: &[u8], max_attempts: u32) -> Result<(), PltpError> {
        self.ensure_connected()?;
        let header = wire::encode_header(body.len() as u32, &integrity::checksum(body));
        self.drain_stray();

        for attempt in 1..=max_attempts {
            if !self.transport.connected() {
                return Err(PltpError::Disconnected);
            }
            debug!(len = body.len(), attempt, "sending frame");
            self.transport.write(&header)?;
            self.transport.write(body)?;
            self.transport.flush()?;
            self.stats.send_attempts += 1;
            self.watchdog.feed();

            match self.await_ack() {
                Some(ACK_OK) => {
                    self.stats.frames_sent += 1;
                    debug!(attempt, "frame acknowledged");
                    return Ok(());
                }
                Some(reply) => {
                    self.stats.acks_rejected += 1;
                    warn!(attempt, reply, "frame rejected by peer");
                }
                None => {
                    self.stats.ack_timeouts += 1;
                    warn!(attempt, "no acknowledgment");
                }
            }
            self.drain_stray();
        }

        if !self.transport.connected() {
            return Err(PltpError::Disconnected);
        }
        Err(PltpError::RetriesExhausted {
            attempts: max_attempts,
        })
    }

    /// Wait out the acknowledgment window for a single reply byte.
    fn await_ack(&mut self) -> Option<u8> {
        let deadline = self.deadline(self.config.ack_window());
        while self.transport.available() == 0 {
            if !self.transport.connected() || self.expired(deadline) {
                return None;
            }
            self.watchdog.feed();
            self.clock.sleep(self.config.poll_interval());
        }
        let mut byte = [0u8; 1];
        match self.transport.read(&mut byte) {
            Ok(1) => Some(byte[0]),
            _ => None,
        }
    }

    /// Receive one frame. `timeout` is an inactivity window, restarted
    /// whenever bytes arrive.
    pub fn receive(&mut self, timeout: Duration) -> Result<Message, PltpError> {
        let result = self.receive_frame(timeout);
        self.settle(result)
    }

    fn receive_frame(&mut self, timeout: Duration) -> Result<Message, PltpError> {
        self.ensure_connected()?;
        let budget = self.config.receive_retries;
        let mut assembler = FrameAssembler::new();
        let mut scratch = [0u8; READ_CHUNK];
        let mut retries = 0u32;
        let mut deadline = self.deadline(timeout);

        loop {
            if !self.transport.connected() {
                debug!("disconnected while receiving");
                return Err(PltpError::Disconnected);
            }
            self.watchdog.feed();

            let available = self.transport.available();
            if available == 0 {
                self.clock.sleep(self.config.poll_interval());
                if !self.expired(deadline) {
                    continue;
                }
                if assembler.is_empty() {
                    return Err(PltpError::Timeout);
                }
                if retries >= budget {
                    warn!(buffered = assembler.buffered(), "frame stalled, no retries left");
                    return Err(PltpError::RetriesExhausted { attempts: retries });
                }
                self.record_fault(Fault::Stalled);
                self.reply(ACK_NOT_OK)?;
                assembler.reset();
                retries += 1;
                deadline = self.deadline(timeout);
                continue;
            }

            deadline = self.deadline(timeout);
            let want = available.min(assembler.wants()).min(scratch.len());
            let n = self.transport.read(&mut scratch[..want])?;
            let (header, body) = match assembler.push(&scratch[..n]) {
                Ok(Progress::NeedMore) => continue,
                Ok(Progress::Complete(header, body)) => (header, body),
                Err(AssembleError::Malformed) => {
                    self.record_fault(Fault::Framing);
                    continue;
                }
                Err(AssembleError::Oversize(len)) => {
                    warn!(len, "declared body too long, aborting receive");
                    return Err(PltpError::OversizeBody { len: len as usize });
                }
            };

            if integrity::verify(&body, &header.checksum) {
                self.reply(ACK_OK)?;
                let message = Message::from_body(body);
                self.stats.frames_received += 1;
                debug!(kind = ?message.kind(), size = message.size(), "frame verified");
                self.last_message = Some(message.clone());
                return Ok(message);
            }

            self.record_fault(Fault::Integrity);
            if retries >= budget {
                warn!("checksum mismatch, no retries left");
                return Err(PltpError::RetriesExhausted { attempts: retries });
            }
            self.reply(ACK_NOT_OK)?;
            retries += 1;
            deadline = self.deadline(timeout);
        }
    }

    fn reply(&mut self, byte: u8) -> Result<(), PltpError> {
        self.transport.write(&[byte])?;
        self.transport.flush()?;
        Ok(())
    }

    fn record_fault(&mut self, fault: Fault) {
        match fault {
            Fault::Framing => {
                self.stats.framing_errors += 1;
                debug!(%fault, "header discarded");
            }
            Fault::Integrity => {
                self.stats.integrity_errors += 1;
                info!(%fault, "asking peer to resend");
            }
            Fault::Stalled => {
                self.stats.stalls += 1;
                info!(%fault, "asking peer to resend");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MessageType, Role, TAG_TIME};
    use crate::session::ConnectionState;
    use crate::config::SessionConfig;
    use crate::sim::{ScriptedTransport, SimClock};
    use crate::transport::Clock;
    use crate::wire::{encode_frame, encode_header, HEADER_LEN};

    fn connected(t: ScriptedTransport) -> Session<ScriptedTransport> {
        let mut s = Session::new(Role::Base, t).with_clock(SimClock::new());
        s.begin(Duration::from_secs(1)).unwrap();
        s
    }

    fn frame(body: &[u8]) -> Vec<u8> {
        encode_frame(body).unwrap()
    }

    /// Peer that answers NOT-OK `k` times, then OK.
    fn peer_rejecting(k: usize) -> ScriptedTransport {
        let mut t = ScriptedTransport::new();
        for _ in 0..k {
            t = t.reply_on_flush(&[ACK_NOT_OK]);
        }
        t.reply_on_flush(&[ACK_OK])
    }

    #[test]
    fn send_writes_header_then_body() {
        let mut s = connected(peer_rejecting(0));
        s.send(b"hello", 5).unwrap();
        assert_eq!(s.transport().flushed(), &[frame(b"hello")]);
        assert_eq!(s.stats().frames_sent, 1);
    }

    #[test]
    fn retry_budget_is_exact() {
        let max = 4u32;
        for k in 0..7usize {
            let mut s = connected(peer_rejecting(k));
            let result = s.send(b"payload", max);
            assert_eq!(result.is_ok(), (k as u32) < max, "k = {k}");
            let attempts = (k + 1).min(max as usize);
            assert_eq!(s.transport().flushed().len(), attempts, "k = {k}");
            assert_eq!(s.stats().send_attempts, attempts as u64);
            assert!(s.transport().flushed().iter().all(|w| *w == frame(b"payload")));
        }
    }

    #[test]
    fn silent_peer_times_out_each_attempt() {
        let clock = SimClock::new();
        let t = ScriptedTransport::new().reply_on_flush(&[]).reply_on_flush(&[ACK_OK]);
        let mut s = Session::new(Role::Base, t).with_clock(clock.clone());
        s.begin(Duration::from_secs(1)).unwrap();
        let before = clock.now();
        s.send(b"x", 3).unwrap();
        assert!(clock.now() - before >= Duration::from_secs(30));
        assert_eq!(s.stats().ack_timeouts, 1);
        assert_eq!(s.transport().flushed().len(), 2);
    }

    #[test]
    fn stale_bytes_are_flushed_before_sending() {
        let mut s = connected(peer_rejecting(0));
        // A stale OK from a previous exchange must not count as this reply.
        s.transport_mut().inject(&[ACK_NOT_OK, ACK_OK]);
        s.send(b"x", 1).unwrap();
        assert_eq!(s.transport().unread(), 0);
        assert_eq!(s.stats().frames_sent, 1);
    }

    #[test]
    fn exhausted_send_resets_state() {
        let mut s = connected(peer_rejecting(5));
        let err = s.send(b"x", 2).unwrap_err();
        assert!(matches!(err, PltpError::RetriesExhausted { attempts: 2 }));
        assert_eq!(s.state(), ConnectionState::WaitingBegin);
        assert!(matches!(
            s.send(b"x", 2),
            Err(PltpError::TransportUnavailable)
        ));
    }

    #[test]
    fn send_requires_connection() {
        let mut s = Session::new(Role::Base, ScriptedTransport::new()).with_clock(SimClock::new());
        assert!(matches!(
            s.send(b"x", 1),
            Err(PltpError::TransportUnavailable)
        ));
        assert!(s.transport().flushed().is_empty());
    }

    #[test]
    fn send_rejects_oversize_body() {
        let mut s = connected(peer_rejecting(0));
        let err = s.send(&[0u8; MAX_BODY_LEN + 1], 1).unwrap_err();
        assert!(matches!(err, PltpError::BodyTooLong { len } if len == MAX_BODY_LEN + 1));
        assert!(!err.resets_session());
        assert!(s.transport().flushed().is_empty());
        assert_eq!(s.state(), ConnectionState::ConnectedPendingData);
    }

    #[test]
    fn disconnect_mid_send_fails() {
        let t = ScriptedTransport::new().reply_on_flush(&[]).drop_after_flushes(1);
        let mut s = connected(t);
        assert!(matches!(s.send(b"x", 5), Err(PltpError::Disconnected)));
        assert_eq!(s.state(), ConnectionState::WaitingBegin);
        assert_eq!(s.transport().flushed().len(), 1);
    }

    #[test]
    fn receive_verifies_and_acks() {
        let body = [TAG_TIME, 0, 0xf1, 0x53, 0x65];
        let mut s = connected(ScriptedTransport::new().with_inbound(&frame(&body)));
        let msg = s.receive(Duration::from_secs(1)).unwrap();
        assert_eq!(msg.kind(), MessageType::Time);
        assert_eq!(msg.size(), 5);
        assert_eq!(s.transport().flushed(), &[vec![ACK_OK]]);
        assert_eq!(s.last_message(), Some(&msg));
    }

    #[test]
    fn receive_replaces_retained_message() {
        let mut inbound = frame(&[TAG_TIME, 1, 0, 0, 0]);
        inbound.extend(frame(&[9, 9]));
        let mut s = connected(ScriptedTransport::new().with_inbound(&inbound));
        s.receive(Duration::from_secs(1)).unwrap();
        let second = s.receive(Duration::from_secs(1)).unwrap();
        assert_eq!(second.kind(), MessageType::Unknown);
        assert_eq!(s.last_message().map(Message::size), Some(2));
    }

    #[test]
    fn malformed_header_costs_no_retry() {
        for offset in [0, 5, 38] {
            let mut bad = frame(b"noise!");
            bad[offset] = 0;
            // Only the header window is garbage; the next 39 bytes start a good frame.
            let mut inbound = bad[..HEADER_LEN].to_vec();
            inbound.extend(frame(b"good"));
            let mut s = connected(ScriptedTransport::new().with_inbound(&inbound));
            let msg = s.receive(Duration::from_secs(1)).unwrap();
            assert_eq!(msg.content(), b"good");
            assert_eq!(s.stats().framing_errors, 1);
            assert_eq!(s.transport().flushed(), &[vec![ACK_OK]], "offset {offset}");
        }
    }

    #[test]
    fn malformed_headers_never_spend_the_budget() {
        // No retries at all: any charge for noise would fail the receive.
        let mut inbound = Vec::new();
        for offset in [0, 5, 38] {
            let mut bad = frame(b"noise!");
            bad[offset] = 0;
            inbound.extend_from_slice(&bad[..HEADER_LEN]);
        }
        inbound.extend(frame(b"good"));
        let config = SessionConfig {
            receive_retries: 0,
            ..SessionConfig::default()
        };
        let mut s = Session::new(Role::Base, ScriptedTransport::new().with_inbound(&inbound))
            .with_clock(SimClock::new())
            .with_config(config);
        s.begin(Duration::from_secs(1)).unwrap();
        let msg = s.receive(Duration::from_secs(1)).unwrap();
        assert_eq!(msg.content(), b"good");
        assert_eq!(s.stats().framing_errors, 3);
        assert_eq!(s.transport().flushed(), &[vec![ACK_OK]]);
    }

    #[test]
    fn unbounded_timeouts_are_accepted() {
        let clock = SimClock::new();
        clock.advance(Duration::from_secs(5));
        let t = ScriptedTransport::new()
            .with_inbound(&frame(b"late"))
            .reply_on_flush(&[])
            .reply_on_flush(&[ACK_OK]);
        let mut s = Session::new(Role::Base, t).with_clock(clock);
        s.begin(Duration::MAX).unwrap();
        assert_eq!(s.receive(Duration::MAX).unwrap().content(), b"late");
        s.send(b"reply", 1).unwrap();
    }

    #[test]
    fn checksum_mismatch_requests_resend() {
        let mut bad = frame(b"reading");
        bad[HEADER_LEN] ^= 0x01;
        let t = ScriptedTransport::new()
            .with_inbound(&bad)
            .reply_on_flush(&frame(b"reading"));
        let mut s = connected(t);
        let msg = s.receive(Duration::from_secs(1)).unwrap();
        assert_eq!(msg.content(), b"reading");
        assert_eq!(
            s.transport().flushed(),
            &[vec![ACK_NOT_OK], vec![ACK_OK]]
        );
        assert_eq!(s.stats().integrity_errors, 1);
    }

    #[test]
    fn integrity_budget_exhausts() {
        let mut bad = frame(b"reading");
        bad[HEADER_LEN + 2] ^= 0x80;
        let t = ScriptedTransport::new()
            .with_inbound(&bad)
            .reply_on_flush(&bad)
            .reply_on_flush(&bad)
            .reply_on_flush(&bad);
        let mut s = connected(t);
        let err = s.receive(Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, PltpError::RetriesExhausted { attempts: 3 }));
        assert_eq!(s.transport().flushed(), &vec![vec![ACK_NOT_OK]; 3][..]);
        assert_eq!(s.state(), ConnectionState::WaitingBegin);
        assert!(s.last_message().is_none());
    }

    #[test]
    fn stalled_body_requests_resend() {
        let good = frame(b"partial body");
        let t = ScriptedTransport::new()
            .with_inbound(&good[..HEADER_LEN + 4])
            .reply_on_flush(&good);
        let mut s = connected(t);
        let msg = s.receive(Duration::from_secs(2)).unwrap();
        assert_eq!(msg.content(), b"partial body");
        assert_eq!(s.stats().stalls, 1);
        assert_eq!(
            s.transport().flushed(),
            &[vec![ACK_NOT_OK], vec![ACK_OK]]
        );
    }

    #[test]
    fn stall_without_retries_fails() {
        let good = frame(b"partial body");
        let t = ScriptedTransport::new()
            .with_inbound(&good[..HEADER_LEN + 4])
            .reply_on_flush(&good[..10])
            .reply_on_flush(&good[..10])
            .reply_on_flush(&good[..10]);
        let mut s = connected(t);
        let err = s.receive(Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, PltpError::RetriesExhausted { attempts: 3 }));
        assert_eq!(s.stats().stalls, 3);
    }

    #[test]
    fn idle_window_times_out_without_reset() {
        let mut s = connected(ScriptedTransport::new());
        assert!(matches!(
            s.receive(Duration::from_millis(500)),
            Err(PltpError::Timeout)
        ));
        assert_eq!(s.state(), ConnectionState::ConnectedPendingData);
        assert!(s.transport().flushed().is_empty());
    }

    #[test]
    fn oversize_declaration_aborts_unread() {
        let mut inbound = encode_header(MAX_BODY_LEN as u32 + 1, &[0u8; 32]).to_vec();
        inbound.extend(vec![0xAA; MAX_BODY_LEN + 1]);
        let mut s = connected(ScriptedTransport::new().with_inbound(&inbound));
        let err = s.receive(Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, PltpError::OversizeBody { len } if len == MAX_BODY_LEN + 1));
        assert_eq!(s.transport().unread(), MAX_BODY_LEN + 1);
        assert!(s.transport().flushed().is_empty());
        assert_eq!(s.state(), ConnectionState::WaitingBegin);
    }

    #[test]
    fn receive_on_dead_link_fails() {
        let good = frame(b"abc");
        let mut s = connected(ScriptedTransport::new().with_inbound(&good[..20]));
        s.transport_mut().sever();
        assert!(matches!(
            s.receive(Duration::from_secs(1)),
            Err(PltpError::TransportUnavailable)
        ));
        assert_eq!(s.state(), ConnectionState::WaitingBegin);
    }

    #[test]
    fn failed_exchange_then_disconnect_requires_begin() {
        let mut s = connected(peer_rejecting(3));
        assert!(s.send(b"x", 2).is_err());
        s.transport_mut().sever();
        assert_eq!(s.state(), ConnectionState::WaitingBegin);
        assert!(matches!(
            s.receive(Duration::from_secs(1)),
            Err(PltpError::TransportUnavailable)
        ));
        s.begin(Duration::from_secs(1)).unwrap();
        assert_eq!(s.state(), ConnectionState::ConnectedPendingData);
    }
}
