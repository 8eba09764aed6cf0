//! Framing: 39-byte header (marker, 4 bytes LE length, marker, SHA-256, marker) + body.

use crate::integrity;
use crate::protocol::MAX_BODY_LEN;

/// Sentinel value every header marker byte must carry.
pub const MARKER: u8 = 255;
/// Fixed header size.
pub const HEADER_LEN: usize = 1 + 4 + 1 + 32 + 1;

const LEN_OFFSET: usize = 1;
const SECOND_MARKER: usize = 5;
const CHECKSUM_OFFSET: usize = 6;
const LAST_MARKER: usize = HEADER_LEN - 1;

/// Decoded header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub body_len: u32,
    pub checksum: [u8; 32],
}

/// Build the header that precedes a body of `body_len` bytes.
pub fn encode_header(body_len: u32, checksum: &[u8; 32]) -> [u8; HEADER_LEN] {
    let mut out = [0u8; HEADER_LEN];
    out[0] = MARKER;
    out[LEN_OFFSET..SECOND_MARKER].copy_from_slice(&body_len.to_le_bytes());
    out[SECOND_MARKER] = MARKER;
    out[CHECKSUM_OFFSET..LAST_MARKER].copy_from_slice(checksum);
    out[LAST_MARKER] = MARKER;
    out
}

/// Parse a header. Any marker mismatch rejects the whole window.
pub fn decode_header(bytes: &[u8; HEADER_LEN]) -> Result<FrameHeader, HeaderError> {
    if bytes[0] != MARKER || bytes[SECOND_MARKER] != MARKER || bytes[LAST_MARKER] != MARKER {
        return Err(HeaderError::Malformed);
    }
    let body_len = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    let mut checksum = [0u8; 32];
    checksum.copy_from_slice(&bytes[CHECKSUM_OFFSET..LAST_MARKER]);
    Ok(FrameHeader { body_len, checksum })
}

/// Header and body in one buffer, ready to write.
pub fn encode_frame(body: &[u8]) -> Result<Vec<u8>, FrameEncodeError> {
    if body.len() > MAX_BODY_LEN {
        return Err(FrameEncodeError::TooLarge(body.len()));
    }
    let header = encode_header(body.len() as u32, &integrity::checksum(body));
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&header);
    out.extend_from_slice(body);
    Ok(out)
}

/// Header markers did not match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("malformed frame header")]
    Malformed,
}

/// Error building a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("body of {0} bytes exceeds the frame limit")]
    TooLarge(usize),
}

/// Result of feeding bytes to a [`FrameAssembler`].
#[derive(Debug, PartialEq, Eq)]
pub enum Progress {
    NeedMore,
    /// Header and complete body. The checksum has not been checked yet.
    Complete(FrameHeader, Vec<u8>),
}

/// Error while assembling a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AssembleError {
    /// Header window discarded; the assembler has already reset.
    #[error("malformed frame header")]
    Malformed,
    #[error("declared body length {0} exceeds the frame limit")]
    Oversize(u32),
}

/// Accumulates one frame from fragmented reads. No I/O: the caller reads at
/// most [`wants`](Self::wants) bytes and passes them to [`push`](Self::push).
#[derive(Debug)]
pub struct FrameAssembler {
    header: [u8; HEADER_LEN],
    header_len: usize,
    frame: Option<FrameHeader>,
    body: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self {
            header: [0u8; HEADER_LEN],
            header_len: 0,
            frame: None,
            body: Vec::new(),
        }
    }

    /// Bytes still needed to finish the current stage (header or body).
    pub fn wants(&self) -> usize {
        match &self.frame {
            None => HEADER_LEN - self.header_len,
            Some(h) => h.body_len as usize - self.body.len(),
        }
    }

    /// Bytes of the current frame accumulated so far.
    pub fn buffered(&self) -> usize {
        self.header_len + self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffered() == 0
    }

    /// Drop everything accumulated and wait for a fresh header.
    pub fn reset(&mut self) {
        self.header = [0u8; HEADER_LEN];
        self.header_len = 0;
        self.frame = None;
        self.body = Vec::new();
    }

    /// Feed up to `wants()` bytes; anything beyond that is ignored.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Progress, AssembleError> {
        let take = bytes.len().min(self.wants());
        let bytes = &bytes[..take];
        match self.frame {
            None => {
                self.header[self.header_len..self.header_len + take].copy_from_slice(bytes);
                self.header_len += take;
                if self.header_len < HEADER_LEN {
                    return Ok(Progress::NeedMore);
                }
                let header = match decode_header(&self.header) {
                    Ok(h) => h,
                    Err(HeaderError::Malformed) => {
                        self.reset();
                        return Err(AssembleError::Malformed);
                    }
                };
                if header.body_len as usize > MAX_BODY_LEN {
                    self.reset();
                    return Err(AssembleError::Oversize(header.body_len));
                }
                self.body = Vec::with_capacity(header.body_len as usize);
                self.frame = Some(header);
            }
            Some(_) => self.body.extend_from_slice(bytes),
        }
        Ok(self.try_complete())
    }

    fn try_complete(&mut self) -> Progress {
        match self.frame {
            Some(header) if self.body.len() == header.body_len as usize => {
                let body = std::mem::take(&mut self.body);
                self.reset();
                Progress::Complete(header, body)
            }
            _ => Progress::NeedMore,
        }
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}
