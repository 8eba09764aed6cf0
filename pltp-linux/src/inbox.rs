//! Reassembles announced files from FileInfo / FileContent messages.
//! Bytes land in `<name>.part` and are renamed once the announced size is
//! reached.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use pltp_core::{Message, MessageType};

/// A file that finished arriving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub path: PathBuf,
    pub size: u64,
}

struct Incoming {
    name: String,
    part: PathBuf,
    file: File,
    expected: u64,
    written: u64,
}

pub struct Inbox {
    dir: PathBuf,
    current: Option<Incoming>,
}

/// Final path component of an announced name; `None` when nothing usable is left.
fn safe_name(announced: &str) -> Option<String> {
    let last = announced.rsplit(['/', '\\']).next()?;
    if last.is_empty() || last == "." || last == ".." {
        return None;
    }
    Some(last.to_string())
}

impl Inbox {
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, current: None })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Feed one received message. Returns the finished file, if this message
    /// completed one.
    pub fn accept(&mut self, msg: &Message) -> io::Result<Option<Received>> {
        match msg.kind() {
            MessageType::FileInfo => {
                let Some(info) = msg.file_info() else {
                    tracing::warn!(size = msg.size(), "unreadable file announcement");
                    return Ok(None);
                };
                self.start(&info.name, u64::from(info.size))
            }
            MessageType::FileContent => match msg.chunk() {
                Some(bytes) => self.append(bytes),
                None => Ok(None),
            },
            _ => Ok(None),
        }
    }

    fn start(&mut self, announced: &str, size: u64) -> io::Result<Option<Received>> {
        self.abandon();
        let Some(name) = safe_name(announced) else {
            tracing::warn!(announced, "refusing file with no usable name");
            return Ok(None);
        };
        let part = self.dir.join(format!("{name}.part"));
        let file = File::create(&part)?;
        tracing::info!(%name, size, "receiving file");
        self.current = Some(Incoming {
            name,
            part,
            file,
            expected: size,
            written: 0,
        });
        if size == 0 {
            return self.finish();
        }
        Ok(None)
    }

    fn append(&mut self, bytes: &[u8]) -> io::Result<Option<Received>> {
        let Some(cur) = self.current.as_mut() else {
            tracing::warn!(len = bytes.len(), "file content with no announced file; dropped");
            return Ok(None);
        };
        let room = cur.expected - cur.written;
        let take = bytes.len().min(usize::try_from(room).unwrap_or(usize::MAX));
        if take < bytes.len() {
            tracing::warn!(name = %cur.name, extra = bytes.len() - take, "content beyond announced size dropped");
        }
        cur.file.write_all(&bytes[..take])?;
        cur.written += take as u64;
        if cur.written == cur.expected {
            return self.finish();
        }
        Ok(None)
    }

    fn finish(&mut self) -> io::Result<Option<Received>> {
        let Some(cur) = self.current.take() else {
            return Ok(None);
        };
        cur.file.sync_all()?;
        let path = self.dir.join(&cur.name);
        fs::rename(&cur.part, &path)?;
        Ok(Some(Received {
            path,
            size: cur.written,
        }))
    }

    /// Drop an unfinished assembly, leaving its `.part` file behind.
    pub fn abandon(&mut self) {
        if let Some(cur) = self.current.take() {
            tracing::warn!(
                name = %cur.name,
                got = cur.written,
                expected = cur.expected,
                "incomplete file abandoned"
            );
        }
    }

    #[cfg(test)]
    pub fn in_progress(&self) -> bool {
        self.current.is_some()
    }
}
