//! Typed messages on top of reliable delivery: clock value and chunked files.

use tracing::{debug, info};

use crate::error::PltpError;
use crate::file::{chunk_count, FileSource};
use crate::protocol::{
    time_body, FileInfo, CHUNK_PAYLOAD_LEN, MAX_BODY_LEN, MAX_FILE_NAME_LEN, TAG_FILE_CONTENT,
};
use crate::session::Session;
use crate::transport::Transport;

/// Summary of a completed `send_file`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTransfer {
    pub name: String,
    pub size: u32,
    /// FileContent frames sent.
    pub chunks: u32,
}

impl<T: Transport> Session<T> {
    /// Send the current wall-clock time. Returns the epoch value sent.
    pub fn send_clock(&mut self) -> Result<u32, PltpError> {
        // The body carries 32 bits of epoch seconds.
        let epoch = self.clock.epoch_secs() as u32;
        self.send(&time_body(epoch), self.config.clock_attempts)?;
        debug!(epoch, "clock sent");
        Ok(epoch)
    }

    /// Send a file: one FileInfo frame, then FileContent frames of up to 255
    /// bytes until the announced size is covered. Any failure aborts the
    /// whole transfer; a new call starts over.
    pub fn send_file(&mut self, file: &mut impl FileSource) -> Result<FileTransfer, PltpError> {
        if file.is_dir() || !file.available() {
            return Err(PltpError::InvalidFile);
        }
        let name = file.name().to_string();
        if name.len() > MAX_FILE_NAME_LEN {
            return Err(PltpError::NameTooLong { len: name.len() });
        }
        let size = u32::try_from(file.size()).map_err(|_| PltpError::InvalidFile)?;

        let announce = FileInfo { size, name };
        info!(name = %announce.name, size, chunks = chunk_count(u64::from(size)), "sending file");
        self.send(&announce.encode(), self.config.default_attempts)?;
        let name = announce.name;

        let mut buf = [0u8; MAX_BODY_LEN];
        buf[0] = TAG_FILE_CONTENT;
        let mut total: u64 = 0;
        let mut chunks = 0u32;
        while total < u64::from(size) {
            let n = file
                .read(&mut buf[1..1 + CHUNK_PAYLOAD_LEN])
                .map_err(PltpError::File)?;
            if n == 0 {
                return Err(PltpError::FileTruncated {
                    expected: u64::from(size),
                    read: total,
                });
            }
            self.send(&buf[..1 + n], self.config.content_attempts)?;
            total += n as u64;
            chunks += 1;
            debug!(chunk = chunks, sent = total, size, "file chunk delivered");
        }

        info!(%name, size, chunks, "file sent");
        Ok(FileTransfer { name, size, chunks })
    }
}
