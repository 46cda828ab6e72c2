use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

use crate::error::{CgError, Result};

/// Width, in bytes, of a single entry in the kernel tables read by this crate.
pub const ENTRY_SIZE: usize = 8;

/// Random-access reader of a kernel table made of little-endian 64-bit entries, such as
/// `/proc/<PID>/pagemap` or `/proc/kpagecgroup`.
///
/// Every read is positioned (`pread(2)`), so a `Table` holds no cursor state and can be shared
/// immutably between all callers.
#[derive(Debug)]
pub struct Table {
    path: String,
    file: File,
}

impl Table {
    /// Open the table at the given path, read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().display().to_string();
        let file = File::open(&path).map_err(|e| CgError::TableOpen {
            path: path.clone(),
            source: e,
        })?;
        Ok(Table { path, file })
    }

    /// Returns the path the table was opened from.
    #[inline(always)]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Read `count` consecutive entries, starting at entry `index`.
    ///
    /// # Errors
    ///
    /// Returns [`CgError::ShortRead`] if the table ends before `count` entries could be read, and
    /// [`CgError::Read`] if the underlying read fails.
    pub fn read_entries(&self, index: u64, count: usize) -> Result<Vec<u64>> {
        let mut buf = vec![0; count * ENTRY_SIZE];
        self.read_exact_at(&mut buf, index * ENTRY_SIZE as u64)?;
        Ok(buf
            .chunks_exact(ENTRY_SIZE)
            .map(|chunk| {
                let mut raw = [0; ENTRY_SIZE];
                raw.copy_from_slice(chunk);
                u64::from_le_bytes(raw)
            })
            .collect())
    }

    /// Read the single entry at `index`.
    pub fn read_entry(&self, index: u64) -> Result<u64> {
        let mut buf = [0; ENTRY_SIZE];
        self.read_exact_at(&mut buf, index * ENTRY_SIZE as u64)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let mut got = 0;
        while got < buf.len() {
            match self.file.read_at(&mut buf[got..], offset + got as u64) {
                Ok(0) => {
                    return Err(CgError::ShortRead {
                        path: self.path.clone(),
                        offset,
                        expected: buf.len(),
                        got,
                    })
                }
                Ok(n) => got += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(CgError::Read {
                        path: self.path.clone(),
                        source: e,
                    })
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Write;

    use super::*;

    /// Write a fake kernel table holding the given entries, little-endian.
    pub(crate) fn fake_table(entries: &[u64]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        for e in entries {
            f.write_all(&e.to_le_bytes()).unwrap();
        }
        f.flush().unwrap();
        f
    }

    #[test]
    fn test_read_entries() -> anyhow::Result<()> {
        let f = fake_table(&[1, 0xdead_beef, u64::MAX, 42]);
        let table = Table::open(f.path())?;
        assert_eq!(table.read_entries(1, 3)?, vec![0xdead_beef, u64::MAX, 42]);
        assert_eq!(table.read_entry(0)?, 1);
        assert_eq!(table.read_entry(3)?, 42);
        Ok(())
    }

    #[test]
    fn test_short_read() -> anyhow::Result<()> {
        let f = fake_table(&[7, 8]);
        let table = Table::open(f.path())?;
        match table.read_entries(1, 2) {
            Err(CgError::ShortRead {
                offset,
                expected,
                got,
                ..
            }) => {
                assert_eq!(offset, 8);
                assert_eq!(expected, 16);
                assert_eq!(got, 8);
            }
            other => panic!("expected a short read, got {:?}", other),
        }
        assert!(matches!(
            table.read_entry(2),
            Err(CgError::ShortRead { got: 0, .. })
        ));
        Ok(())
    }

    #[test]
    fn test_open_missing_table() {
        let err = Table::open("/nonexistent/kpagecgroup").unwrap_err();
        assert!(err.is_fatal());
    }
}
