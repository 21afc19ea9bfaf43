//! Cache files: block-level I/O for one tree file.

use bytes::{Buf, BufMut, BytesMut};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use arbor_common::{ArborError, DiskOff, Result};

/// Identifier the cache table assigns to each open file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheFileId(pub u32);

impl std::fmt::Display for CacheFileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cachefile:{}", self.0)
    }
}

/// An open tree file registered with a cache table.
///
/// Pages are stored as blocks at their byte location:
/// ```text
/// +----------------+ location
/// | len: u32       |
/// +----------------+ location + 4
/// | payload        |
/// +----------------+ location + 4 + len
/// | crc32: u32     |  (of payload)
/// +----------------+
/// ```
pub struct CacheFile {
    id: CacheFileId,
    path: PathBuf,
    file: Mutex<File>,
}

impl CacheFile {
    /// Size of the block length prefix in bytes.
    pub const LEN_SIZE: usize = 4;
    /// Size of the block checksum in bytes.
    pub const CHECKSUM_SIZE: usize = 4;

    /// Opens an existing file for reading and writing.
    pub(crate) fn open(id: CacheFileId, path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self {
            id,
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    /// Returns the cache file ID.
    pub fn id(&self) -> CacheFileId {
        self.id
    }

    /// Returns the path this file was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current file length in bytes.
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    /// Returns true if the file holds no bytes.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Returns the on-disk footprint of a block with the given payload length.
    pub fn block_size(payload_len: usize) -> usize {
        Self::LEN_SIZE + payload_len + Self::CHECKSUM_SIZE
    }

    /// Reads and verifies the block stored at `location`.
    pub fn read_block(&self, location: DiskOff) -> Result<Vec<u8>> {
        let not_found = || ArborError::PageNotFound {
            file: self.id.0,
            location: location.0,
        };

        let mut file = self.file.lock();
        let file_len = file.metadata()?.len();
        if location.0 + Self::LEN_SIZE as u64 > file_len {
            return Err(not_found());
        }

        file.seek(SeekFrom::Start(location.0))?;
        let mut len_buf = [0u8; Self::LEN_SIZE];
        file.read_exact(&mut len_buf)?;
        let payload_len = (&len_buf[..]).get_u32_le() as usize;

        if location.0 + Self::block_size(payload_len) as u64 > file_len {
            return Err(ArborError::PageCorrupted {
                location: location.0,
                reason: format!("block of {} bytes runs past end of file", payload_len),
            });
        }

        let mut data = vec![0u8; payload_len + Self::CHECKSUM_SIZE];
        file.read_exact(&mut data)?;

        let stored = (&data[payload_len..]).get_u32_le();
        data.truncate(payload_len);
        let computed = crc32fast::hash(&data);
        if stored != computed {
            return Err(ArborError::PageCorrupted {
                location: location.0,
                reason: format!(
                    "checksum mismatch: stored={}, computed={}",
                    stored, computed
                ),
            });
        }

        Ok(data)
    }

    /// Writes `payload` as a block at `location`.
    pub fn write_block(&self, location: DiskOff, payload: &[u8]) -> Result<()> {
        let mut buf = BytesMut::with_capacity(Self::block_size(payload.len()));
        buf.put_u32_le(payload.len() as u32);
        buf.put_slice(payload);
        buf.put_u32_le(crc32fast::hash(payload));

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(location.0))?;
        file.write_all(&buf)?;
        Ok(())
    }

    /// Flushes file contents to disk.
    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }
}

impl std::fmt::Debug for CacheFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheFile")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish()
    }
}
