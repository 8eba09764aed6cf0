//! File accessor used by the chunked file sender.

use std::io;

/// A readable file handle as the sender sees it.
pub trait FileSource {
    fn is_dir(&self) -> bool;
    /// Whether unread bytes remain.
    fn available(&self) -> bool;
    /// Total size in bytes.
    fn size(&self) -> u64;
    /// Name announced to the receiver.
    fn name(&self) -> &str;
    /// Sequential read. Returns 0 at end of file.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// In-memory file.
#[derive(Debug, Clone)]
pub struct MemoryFile {
    name: String,
    data: Vec<u8>,
    pos: usize,
}

impl MemoryFile {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
            pos: 0,
        }
    }
}

impl FileSource for MemoryFile {
    fn is_dir(&self) -> bool {
        false
    }

    fn available(&self) -> bool {
        self.pos < self.data.len()
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Number of FileContent frames needed for `size` bytes.
pub fn chunk_count(size: u64) -> u64 {
    size.div_ceil(crate::protocol::CHUNK_PAYLOAD_LEN as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_file_reads_sequentially() {
        let mut f = MemoryFile::new("a.bin", (0..10).collect());
        assert!(f.available());
        let mut buf = [0u8; 4];
        assert_eq!(f.read(&mut buf).unwrap(), 4);
        assert_eq!(buf, [0, 1, 2, 3]);
        let mut rest = [0u8; 16];
        assert_eq!(f.read(&mut rest).unwrap(), 6);
        assert!(!f.available());
        assert_eq!(f.read(&mut rest).unwrap(), 0);
    }

    #[test]
    fn empty_memory_file_is_unavailable() {
        assert!(!MemoryFile::new("empty", Vec::new()).available());
    }

    #[test]
    fn chunk_counts() {
        assert_eq!(chunk_count(0), 0);
        assert_eq!(chunk_count(1), 1);
        assert_eq!(chunk_count(255), 1);
        assert_eq!(chunk_count(256), 2);
        assert_eq!(chunk_count(10_000), 40);
    }
}
