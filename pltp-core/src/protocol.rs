//! PLTP wire protocol: constants, roles, message types and body layouts.

use crate::wire::MARKER;

/// Largest body a single frame may carry.
pub const MAX_BODY_LEN: usize = 256;

/// Single-byte reply: frame received and verified.
pub const ACK_OK: u8 = 252;
/// Single-byte reply: frame corrupted or incomplete, send it again.
pub const ACK_NOT_OK: u8 = 247;

/// First body byte of each message kind.
pub const TAG_TIME: u8 = 1;
pub const TAG_FILE_INFO: u8 = 2;
pub const TAG_FILE_CONTENT: u8 = 3;

/// File bytes carried by one FileContent body (the tag takes the first byte).
pub const CHUNK_PAYLOAD_LEN: usize = MAX_BODY_LEN - 1;

/// Offset of the file name inside a FileInfo body: tag + 4-byte size + marker.
const FILE_INFO_NAME_OFFSET: usize = 6;

/// Longest file name (without its NUL terminator) that fits a FileInfo body.
pub const MAX_FILE_NAME_LEN: usize = MAX_BODY_LEN - FILE_INFO_NAME_OFFSET - 1;

/// Fixed side of the link. Base dials, Sensor listens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Base,
    Sensor,
}

impl Role {
    /// Identity this side advertises on the transport.
    pub fn identity(self) -> &'static str {
        match self {
            Role::Base => "Base",
            Role::Sensor => "Sensor",
        }
    }

    /// Identity of the other side.
    pub fn peer(self) -> Role {
        match self {
            Role::Base => Role::Sensor,
            Role::Sensor => Role::Base,
        }
    }

    /// Whether this side opens the transport connection.
    pub fn initiates(self) -> bool {
        matches!(self, Role::Base)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.identity())
    }
}

/// Kind of a received message, taken from the first body byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Time,
    FileInfo,
    FileContent,
    /// Unrecognised tag, or an empty body.
    Unknown,
}

impl MessageType {
    pub fn from_tag(tag: u8) -> Self {
        match tag {
            TAG_TIME => MessageType::Time,
            TAG_FILE_INFO => MessageType::FileInfo,
            TAG_FILE_CONTENT => MessageType::FileContent,
            _ => MessageType::Unknown,
        }
    }
}

/// A verified message body. `size()` is always the length declared by the
/// header it arrived under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    kind: MessageType,
    content: Vec<u8>,
}

impl Message {
    /// Wrap a verified body, decoding its type from the first byte.
    pub fn from_body(content: Vec<u8>) -> Self {
        let kind = content
            .first()
            .map_or(MessageType::Unknown, |&tag| MessageType::from_tag(tag));
        Self { kind, content }
    }

    pub fn kind(&self) -> MessageType {
        self.kind
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }

    pub fn into_content(self) -> Vec<u8> {
        self.content
    }

    /// Epoch seconds carried by a Time message.
    pub fn epoch(&self) -> Option<u32> {
        if self.kind != MessageType::Time || self.content.len() < 5 {
            return None;
        }
        Some(u32::from_le_bytes([
            self.content[1],
            self.content[2],
            self.content[3],
            self.content[4],
        ]))
    }

    /// Size and name announced by a FileInfo message.
    pub fn file_info(&self) -> Option<FileInfo> {
        if self.kind != MessageType::FileInfo {
            return None;
        }
        FileInfo::decode(&self.content)
    }

    /// File bytes carried by a FileContent message.
    pub fn chunk(&self) -> Option<&[u8]> {
        match self.kind {
            MessageType::FileContent => Some(&self.content[1..]),
            _ => None,
        }
    }
}

/// Decoded FileInfo body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub size: u32,
    pub name: String,
}

impl FileInfo {
    /// Parse `[tag][size u32 LE][marker][name][NUL]`.
    pub fn decode(body: &[u8]) -> Option<Self> {
        if body.len() < FILE_INFO_NAME_OFFSET + 1
            || body[0] != TAG_FILE_INFO
            || body[5] != MARKER
        {
            return None;
        }
        let size = u32::from_le_bytes([body[1], body[2], body[3], body[4]]);
        let rest = &body[FILE_INFO_NAME_OFFSET..];
        let nul = rest.iter().position(|&b| b == 0)?;
        let name = String::from_utf8_lossy(&rest[..nul]).into_owned();
        Some(Self { size, name })
    }

    pub fn encode(&self) -> Vec<u8> {
        file_info_body(self.size, &self.name)
    }
}

/// Time body: tag followed by epoch seconds, little-endian.
pub fn time_body(epoch_secs: u32) -> [u8; 5] {
    let mut out = [0u8; 5];
    out[0] = TAG_TIME;
    out[1..5].copy_from_slice(&epoch_secs.to_le_bytes());
    out
}

/// FileInfo body. The caller checks `name.len() <= MAX_FILE_NAME_LEN`.
pub fn file_info_body(size: u32, name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(FILE_INFO_NAME_OFFSET + name.len() + 1);
    out.push(TAG_FILE_INFO);
    out.extend_from_slice(&size.to_le_bytes());
    out.push(MARKER);
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_are_complementary() {
        assert_eq!(Role::Base.peer(), Role::Sensor);
        assert_eq!(Role::Sensor.peer(), Role::Base);
        assert_eq!(Role::Base.identity(), "Base");
        assert_eq!(Role::Sensor.peer().identity(), "Base");
        assert!(Role::Base.initiates());
        assert!(!Role::Sensor.initiates());
    }

    #[test]
    fn time_body_layout() {
        let body = time_body(1_700_000_000);
        assert_eq!(body[0], TAG_TIME);
        let msg = Message::from_body(body.to_vec());
        assert_eq!(msg.kind(), MessageType::Time);
        assert_eq!(msg.size(), 5);
        assert_eq!(msg.epoch(), Some(1_700_000_000));
    }

    #[test]
    fn file_info_layout() {
        let body = file_info_body(10_000, "log.bin");
        assert_eq!(body.len(), 6 + 7 + 1);
        assert_eq!(body[5], MARKER);
        assert_eq!(*body.last().unwrap(), 0);
        let info = Message::from_body(body).file_info().unwrap();
        assert_eq!(info.size, 10_000);
        assert_eq!(info.name, "log.bin");
    }

    #[test]
    fn file_info_requires_marker_and_terminator() {
        let mut body = file_info_body(1, "a");
        body[5] = 0;
        assert!(FileInfo::decode(&body).is_none());

        let mut body = file_info_body(1, "a");
        body.pop();
        assert!(FileInfo::decode(&body).is_none());
    }

    #[test]
    fn unknown_tag_and_empty_body() {
        assert_eq!(Message::from_body(vec![9, 1, 2]).kind(), MessageType::Unknown);
        let empty = Message::from_body(Vec::new());
        assert_eq!(empty.kind(), MessageType::Unknown);
        assert_eq!(empty.size(), 0);
        assert!(empty.epoch().is_none());
        assert!(empty.chunk().is_none());
    }

    #[test]
    fn chunk_strips_tag() {
        let msg = Message::from_body(vec![TAG_FILE_CONTENT, 7, 8, 9]);
        assert_eq!(msg.chunk(), Some(&[7u8, 8, 9][..]));
        assert!(msg.file_info().is_none());
    }

    #[test]
    fn longest_name_fits_one_frame() {
        let name = "n".repeat(MAX_FILE_NAME_LEN);
        assert_eq!(file_info_body(0, &name).len(), MAX_BODY_LEN);
    }
}
