//! Tree file header.
//!
//! The header lives in its own block at location 0 of the tree file:
//! ```text
//! magic: u32 | flags: u32 | nodesize: u32 | freelist: u64 |
//! unused_memory: u64 | n_named_roots: i32 (-1) | unnamed_root: u64
//! ```

use crate::codec::BlockReader;
use crate::constants::HEADER_MAGIC;
use arbor_cache::CacheFile;
use arbor_common::{ArborError, DiskOff, Result};
use arbor_log::{LoggedHeader, LoggedRoots};
use bytes::{BufMut, Bytes, BytesMut};

/// Header of one tree file. Only the single-unnamed-root layout exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Modified since the last write.
    pub dirty: bool,
    pub flags: u32,
    pub nodesize: u32,
    /// Head of the free-node list.
    pub freelist: DiskOff,
    /// First byte past the last allocated node.
    pub unused_memory: DiskOff,
    /// Root node location.
    pub unnamed_root: DiskOff,
}

impl FileHeader {
    /// Root count written for the single-unnamed-root layout.
    pub const UNNAMED_ROOT_COUNT: i32 = -1;

    /// Builds a header from a logged one, rejecting multi-root layouts.
    pub fn from_logged(logged: &LoggedHeader) -> Result<Self> {
        let unnamed_root = match &logged.roots {
            LoggedRoots::Unnamed(root) => *root,
            LoggedRoots::Named(roots) => {
                return Err(ArborError::UnsupportedHeader(format!(
                    "{} named roots",
                    roots.len()
                )))
            }
        };
        Ok(Self {
            dirty: false,
            flags: logged.flags,
            nodesize: logged.nodesize,
            freelist: logged.freelist,
            unused_memory: logged.unused_memory,
            unnamed_root,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(40);
        buf.put_u32_le(HEADER_MAGIC);
        buf.put_u32_le(self.flags);
        buf.put_u32_le(self.nodesize);
        buf.put_u64_le(self.freelist.0);
        buf.put_u64_le(self.unused_memory.0);
        buf.put_i32_le(Self::UNNAMED_ROOT_COUNT);
        buf.put_u64_le(self.unnamed_root.0);
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = BlockReader::new(DiskOff::HEADER, data);
        let magic = reader.u32()?;
        if magic != HEADER_MAGIC {
            return Err(reader.corrupted(format!("bad header magic {:#010x}", magic)));
        }
        let flags = reader.u32()?;
        let nodesize = reader.u32()?;
        let freelist = reader.off()?;
        let unused_memory = reader.off()?;
        let n_named_roots = reader.i32()?;
        if n_named_roots != Self::UNNAMED_ROOT_COUNT {
            return Err(ArborError::UnsupportedHeader(format!(
                "{} named roots",
                n_named_roots
            )));
        }
        let unnamed_root = reader.off()?;
        reader.finish()?;

        Ok(Self {
            dirty: false,
            flags,
            nodesize,
            freelist,
            unused_memory,
            unnamed_root,
        })
    }

    /// Reads the header block of `file`.
    pub fn read_from(file: &CacheFile) -> Result<Self> {
        Self::decode(&file.read_block(DiskOff::HEADER)?)
    }

    /// Writes the header block of `file` and clears the dirty flag.
    pub fn write_to(&mut self, file: &CacheFile) -> Result<()> {
        file.write_block(DiskOff::HEADER, &self.encode())?;
        self.dirty = false;
        Ok(())
    }
}
