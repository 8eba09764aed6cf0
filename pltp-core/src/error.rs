//! Errors surfaced by session operations.

use std::io;

/// Outcome of a failed `begin`, `send`, `receive` or message-layer call.
#[derive(Debug, thiserror::Error)]
pub enum PltpError {
    #[error("transport not connected")]
    TransportUnavailable,
    #[error("peer did not connect within the handshake window")]
    HandshakeTimeout,
    #[error("transport disconnected")]
    Disconnected,
    /// Receive window elapsed with nothing accumulated.
    #[error("no message within the receive window")]
    Timeout,
    /// A received header declared more than the frame limit.
    #[error("peer declared a {len}-byte body, over the frame limit")]
    OversizeBody { len: usize },
    /// Refused before any I/O; the link is untouched.
    #[error("body of {len} bytes exceeds the frame limit")]
    BodyTooLong { len: usize },
    #[error("gave up after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
    #[error("file is a directory or has nothing to read")]
    InvalidFile,
    #[error("file name of {len} bytes does not fit a frame")]
    NameTooLong { len: usize },
    #[error("file ended after {read} of {expected} bytes")]
    FileTruncated { expected: u64, read: u64 },
    /// Reading the local file failed; the link is untouched.
    #[error("file read failed: {0}")]
    File(#[source] io::Error),
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

impl PltpError {
    /// Whether this failure leaves the session needing a fresh `begin`.
    pub fn resets_session(&self) -> bool {
        !matches!(
            self,
            PltpError::Timeout
                | PltpError::BodyTooLong { .. }
                | PltpError::InvalidFile
                | PltpError::NameTooLong { .. }
                | PltpError::FileTruncated { .. }
                | PltpError::File(_)
        )
    }
}

/// Recoverable fault seen while receiving. Retried in place; logged and
/// counted, escalated only as `RetriesExhausted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Header markers wrong. Costs no retry.
    Framing,
    /// Body checksum mismatch.
    Integrity,
    /// Window elapsed with a partial frame buffered.
    Stalled,
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Fault::Framing => "malformed header",
            Fault::Integrity => "checksum mismatch",
            Fault::Stalled => "stalled partial frame",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_classification() {
        assert!(!PltpError::Timeout.resets_session());
        assert!(!PltpError::InvalidFile.resets_session());
        assert!(PltpError::Disconnected.resets_session());
        assert!(PltpError::OversizeBody { len: 257 }.resets_session());
        assert!(PltpError::RetriesExhausted { attempts: 3 }.resets_session());
        assert!(PltpError::Transport(io::ErrorKind::BrokenPipe.into()).resets_session());
    }

    #[test]
    fn local_failures_leave_link_alone() {
        assert!(!PltpError::BodyTooLong { len: 257 }.resets_session());
        assert!(!PltpError::NameTooLong { len: 300 }.resets_session());
        assert!(!PltpError::FileTruncated { expected: 10, read: 4 }.resets_session());
        assert!(!PltpError::File(io::ErrorKind::Other.into()).resets_session());
    }
}
