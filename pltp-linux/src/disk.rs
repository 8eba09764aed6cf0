//! Files on disk as a `FileSource`.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use pltp_core::FileSource;

pub struct DiskFile {
    name: String,
    file: File,
    size: u64,
    pos: u64,
    dir: bool,
}

impl DiskFile {
    /// Open `path`; the announced name is its final component.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let meta = file.metadata()?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            name,
            file,
            size: meta.len(),
            pos: 0,
            dir: meta.is_dir(),
        })
    }
}

impl FileSource for DiskFile {
    fn is_dir(&self) -> bool {
        self.dir
    }

    fn available(&self) -> bool {
        !self.dir && self.pos < self.size
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.file.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reading.csv");
        std::fs::write(&path, b"t,v\n1,2\n").unwrap();

        let mut f = DiskFile::open(&path).unwrap();
        assert_eq!(f.name(), "reading.csv");
        assert_eq!(f.size(), 8);
        assert!(!f.is_dir());
        assert!(f.available());
        let mut buf = [0u8; 16];
        assert_eq!(f.read(&mut buf).unwrap(), 8);
        assert!(!f.available());
    }

    #[test]
    fn directory_is_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let f = DiskFile::open(dir.path()).unwrap();
        assert!(f.is_dir());
        assert!(!f.available());
    }

    #[test]
    fn empty_file_has_nothing_available() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();
        assert!(!DiskFile::open(&path).unwrap().available());
    }
}
