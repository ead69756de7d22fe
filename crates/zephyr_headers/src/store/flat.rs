//! Append-only file of fixed-size records.
//!
//! The file length is always a whole number of records: appends that fail
//! halfway are cut back, and a torn tail found at open time is truncated.
//! Reads are positional so concurrent readers never share a cursor.
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{error, warn};

use crate::error::{ChainError, Result};

#[derive(Debug)]
pub struct FlatFile {
    path: PathBuf,
    file: File,
    record_size: usize,
    len: u32,
}

impl FlatFile {
    /// Opens `path`, creating it when missing.
    pub fn open(path: &Path, record_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| ChainError::storage(path, e))?;
        let bytes = file
            .metadata()
            .map_err(|e| ChainError::storage(path, e))?
            .len();

        let whole = bytes - bytes % record_size as u64;
        if whole != bytes {
            warn!(
                "{}: dropping {} trailing bytes of a partial record",
                path.display(),
                bytes - whole
            );
            file.set_len(whole).map_err(|e| ChainError::storage(path, e))?;
        }

        let len = u32::try_from(whole / record_size as u64)
            .map_err(|_| ChainError::Config(format!("{} is too large", path.display())))?;
        Ok(FlatFile {
            path: path.to_path_buf(),
            file,
            record_size,
            len,
        })
    }

    /// Creates an empty file at `path`, replacing whatever was there.
    pub fn create(path: &Path, record_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| ChainError::storage(path, e))?;
        Ok(FlatFile {
            path: path.to_path_buf(),
            file,
            record_size,
            len: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of stored records.
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn read(&self, index: u32) -> Result<Vec<u8>> {
        self.read_range(index, 1)
    }

    /// Reads `count` consecutive records starting at `start`.
    pub fn read_range(&self, start: u32, count: u32) -> Result<Vec<u8>> {
        let end = start.checked_add(count).filter(|end| *end <= self.len);
        if end.is_none() {
            return Err(ChainError::storage(
                &self.path,
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("records {start}..+{count} past end ({})", self.len),
                ),
            ));
        }
        let mut buf = vec![0u8; count as usize * self.record_size];
        read_exact_at(&self.file, &mut buf, self.offset(start))
            .map_err(|e| ChainError::storage(&self.path, e))?;
        Ok(buf)
    }

    pub fn read_all(&self) -> Result<Vec<u8>> {
        self.read_range(0, self.len)
    }

    /// Appends whole records. On failure the file is cut back to its previous length.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() % self.record_size != 0 {
            return Err(ChainError::MalformedHeader(format!(
                "{} bytes is not a whole number of {}-byte records",
                bytes.len(),
                self.record_size
            )));
        }
        let added = u32::try_from(bytes.len() / self.record_size)
            .ok()
            .and_then(|n| self.len.checked_add(n))
            .ok_or_else(|| ChainError::Config(format!("{} would overflow", self.path.display())))?;

        if let Err(e) = write_all_at(&self.file, bytes, self.offset(self.len)) {
            if let Err(undo) = self.file.set_len(self.offset(self.len)) {
                error!(
                    "{}: could not undo partial append: {undo}",
                    self.path.display()
                );
            }
            return Err(ChainError::storage(&self.path, e));
        }
        self.len = added;
        Ok(())
    }

    /// Keeps the first `count` records.
    pub fn truncate(&mut self, count: u32) -> Result<()> {
        if count >= self.len {
            return Ok(());
        }
        self.file
            .set_len(self.offset(count))
            .map_err(|e| ChainError::storage(&self.path, e))?;
        self.len = count;
        Ok(())
    }

    pub fn rename(&mut self, to: &Path) -> Result<()> {
        if to == self.path {
            return Ok(());
        }
        fs::rename(&self.path, to).map_err(|e| ChainError::storage(&self.path, e))?;
        self.path = to.to_path_buf();
        Ok(())
    }

    /// Deletes the file from disk.
    pub fn remove(self) -> Result<()> {
        let FlatFile { path, file, .. } = self;
        drop(file);
        fs::remove_file(&path).map_err(|e| ChainError::storage(&path, e))
    }

    pub fn sync(&self) -> Result<()> {
        self.file
            .sync_data()
            .map_err(|e| ChainError::storage(&self.path, e))
    }

    fn offset(&self, index: u32) -> u64 {
        u64::from(index) * self.record_size as u64
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
