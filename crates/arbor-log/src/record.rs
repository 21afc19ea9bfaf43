//! Log record format.

use crate::entry::*;
use arbor_common::{ArborError, DiskOff, FileNum, Lsn, Result, TxnId};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// A single record in the recovery log.
///
/// Record format on disk:
/// - header (21 bytes):
///   - lsn: 8 bytes
///   - txn_id: 8 bytes
///   - record_type: 1 byte
///   - payload_len: 4 bytes
/// - payload: variable length, layout depends on record_type
/// - checksum: 4 bytes (CRC32 of header + payload)
///
/// All integers are little-endian. Byte strings in the payload are a u32
/// length followed by the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Transaction that logged this record.
    pub txn_id: TxnId,
    /// Decoded entry.
    pub entry: LogEntry,
}

impl LogRecord {
    /// Size of the record header in bytes.
    pub const HEADER_SIZE: usize = 21;
    /// Size of the checksum in bytes.
    pub const CHECKSUM_SIZE: usize = 4;
    /// Maximum payload size (16 MB).
    pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

    /// Creates a new log record.
    pub fn new(txn_id: TxnId, entry: LogEntry) -> Self {
        Self { txn_id, entry }
    }

    /// Returns the LSN of this record.
    pub fn lsn(&self) -> Lsn {
        self.entry.lsn()
    }

    /// Returns the record type.
    pub fn kind(&self) -> LogRecordType {
        self.entry.kind()
    }

    /// Serializes this record to bytes.
    pub fn serialize(&self) -> Bytes {
        let mut payload = BytesMut::new();
        encode_entry(&self.entry, &mut payload);

        let mut buf =
            BytesMut::with_capacity(Self::HEADER_SIZE + payload.len() + Self::CHECKSUM_SIZE);
        buf.put_u64_le(self.lsn().0);
        buf.put_u64_le(self.txn_id.0);
        buf.put_u8(self.kind() as u8);
        buf.put_u32_le(payload.len() as u32);
        buf.put_slice(&payload);

        let checksum = crc32fast::hash(&buf);
        buf.put_u32_le(checksum);

        buf.freeze()
    }

    /// Deserializes one record from the front of `data`.
    ///
    /// Returns the record and the number of bytes it occupied.
    pub fn deserialize(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < Self::HEADER_SIZE + Self::CHECKSUM_SIZE {
            return Err(ArborError::LogCorrupted {
                lsn: 0,
                reason: "record too short".to_string(),
            });
        }

        let mut header = &data[..Self::HEADER_SIZE];
        let lsn = header.get_u64_le();
        let txn_id = TxnId(header.get_u64_le());
        let tag = header.get_u8();
        let payload_len = header.get_u32_le() as usize;

        let kind = LogRecordType::from_tag(tag).ok_or_else(|| ArborError::LogCorrupted {
            lsn,
            reason: format!("invalid record type: {}", tag),
        })?;

        if payload_len > Self::MAX_PAYLOAD_SIZE {
            return Err(ArborError::LogCorrupted {
                lsn,
                reason: format!("payload too large: {}", payload_len),
            });
        }

        let total = Self::HEADER_SIZE + payload_len + Self::CHECKSUM_SIZE;
        if data.len() < total {
            return Err(ArborError::LogCorrupted {
                lsn,
                reason: "truncated record".to_string(),
            });
        }

        let body_end = Self::HEADER_SIZE + payload_len;
        let stored_checksum = (&data[body_end..total]).get_u32_le();
        let computed_checksum = crc32fast::hash(&data[..body_end]);
        if stored_checksum != computed_checksum {
            return Err(ArborError::LogCorrupted {
                lsn,
                reason: format!(
                    "checksum mismatch: stored={}, computed={}",
                    stored_checksum, computed_checksum
                ),
            });
        }

        let mut reader = PayloadReader::new(lsn, &data[Self::HEADER_SIZE..body_end]);
        let entry = decode_entry(kind, Lsn(lsn), &mut reader)?;
        reader.finish()?;

        Ok((Self { txn_id, entry }, total))
    }

    /// Parses every record in a buffer of concatenated records.
    pub fn parse_all(mut data: &[u8]) -> Result<Vec<LogRecord>> {
        let mut records = Vec::new();
        while !data.is_empty() {
            let (record, used) = Self::deserialize(data)?;
            records.push(record);
            data = &data[used..];
        }
        Ok(records)
    }
}

fn put_bytes(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u32_le(bytes.len() as u32);
    buf.put_slice(bytes);
}

fn encode_entry(entry: &LogEntry, buf: &mut BytesMut) {
    match entry {
        LogEntry::Commit(_) => {}
        LogEntry::Delete(e) => {
            buf.put_u32_le(e.file.0);
            put_bytes(buf, &e.key);
            put_bytes(buf, &e.data);
        }
        LogEntry::FileCreate(e) => {
            put_bytes(buf, &e.fname);
            buf.put_u32_le(e.mode);
        }
        LogEntry::FileOpen(e) => {
            buf.put_u32_le(e.file.0);
            put_bytes(buf, &e.fname);
        }
        LogEntry::FileHeader(e) => {
            buf.put_u32_le(e.file.0);
            let h = &e.header;
            buf.put_u32_le(h.flags);
            buf.put_u32_le(h.nodesize);
            buf.put_u64_le(h.freelist.0);
            buf.put_u64_le(h.unused_memory.0);
            buf.put_i32_le(h.roots.n_named_roots());
            match &h.roots {
                LoggedRoots::Unnamed(root) => buf.put_u64_le(root.0),
                LoggedRoots::Named(roots) => {
                    for (name, root) in roots {
                        put_bytes(buf, name);
                        buf.put_u64_le(root.0);
                    }
                }
            }
        }
        LogEntry::NewNode(e) => {
            buf.put_u32_le(e.file.0);
            buf.put_u64_le(e.location.0);
            buf.put_u32_le(e.height);
            buf.put_u32_le(e.nodesize);
            buf.put_u8(e.is_dup_sort as u8);
            buf.put_u32_le(e.rand4fingerprint);
        }
        LogEntry::Enqueue(e) => {
            buf.put_u32_le(e.file.0);
            buf.put_u64_le(e.location.0);
            buf.put_u32_le(e.childnum);
            buf.put_u8(e.msg_type);
            put_bytes(buf, &e.key);
            put_bytes(buf, &e.data);
        }
        LogEntry::Dequeue(e) => {
            buf.put_u32_le(e.file.0);
            buf.put_u64_le(e.location.0);
            buf.put_u32_le(e.childnum);
        }
        LogEntry::AddChild(e) => {
            buf.put_u32_le(e.file.0);
            buf.put_u64_le(e.location.0);
            buf.put_u32_le(e.childnum);
            buf.put_u64_le(e.child.0);
            buf.put_u32_le(e.child_fingerprint);
        }
        LogEntry::DeleteChild(e) => {
            buf.put_u32_le(e.file.0);
            buf.put_u64_le(e.location.0);
            buf.put_u32_le(e.childnum);
            buf.put_u64_le(e.child.0);
            buf.put_u32_le(e.child_fingerprint);
            put_bytes(buf, &e.pivot_key);
        }
        LogEntry::SetChild(e) => {
            buf.put_u32_le(e.file.0);
            buf.put_u64_le(e.location.0);
            buf.put_u32_le(e.childnum);
            buf.put_u64_le(e.old_child.0);
            buf.put_u64_le(e.new_child.0);
        }
        LogEntry::SetPivot(e) => {
            buf.put_u32_le(e.file.0);
            buf.put_u64_le(e.location.0);
            buf.put_u32_le(e.childnum);
            put_bytes(buf, &e.pivot_key);
        }
        LogEntry::ChangeChildFingerprint(e) => {
            buf.put_u32_le(e.file.0);
            buf.put_u64_le(e.location.0);
            buf.put_u32_le(e.childnum);
            buf.put_u32_le(e.old_fingerprint);
            buf.put_u32_le(e.new_fingerprint);
        }
        LogEntry::InsertInLeaf(e) => {
            buf.put_u32_le(e.file.0);
            buf.put_u64_le(e.location.0);
            buf.put_u32_le(e.index);
            put_bytes(buf, &e.key);
            put_bytes(buf, &e.data);
        }
        LogEntry::DeleteInLeaf(e) => {
            buf.put_u32_le(e.file.0);
            buf.put_u64_le(e.location.0);
            buf.put_u32_le(e.index);
            put_bytes(buf, &e.key);
            put_bytes(buf, &e.data);
        }
        LogEntry::ResizeLeafStorage(e) => {
            buf.put_u32_le(e.file.0);
            buf.put_u64_le(e.location.0);
            buf.put_u32_le(e.old_size);
            buf.put_u32_le(e.new_size);
        }
        LogEntry::RedistributeLeafStorage(e) => {
            buf.put_u32_le(e.file.0);
            buf.put_u64_le(e.old_location.0);
            buf.put_u64_le(e.new_location.0);
            buf.put_u32_le(e.pairs.len() as u32);
            for pair in &e.pairs {
                buf.put_u32_le(pair.a);
                buf.put_u32_le(pair.b);
            }
        }
        LogEntry::ChangeUnnamedRoot(e) => {
            buf.put_u32_le(e.file.0);
            buf.put_u64_le(e.old_root.0);
            buf.put_u64_le(e.new_root.0);
        }
        LogEntry::ChangeNamedRoot(e) => {
            buf.put_u32_le(e.file.0);
            put_bytes(buf, &e.name);
            buf.put_u64_le(e.old_root.0);
            buf.put_u64_le(e.new_root.0);
        }
        LogEntry::ChangeUnusedMemory(e) => {
            buf.put_u32_le(e.file.0);
            buf.put_u64_le(e.old_unused.0);
            buf.put_u64_le(e.new_unused.0);
        }
    }
}

fn decode_entry(kind: LogRecordType, lsn: Lsn, r: &mut PayloadReader<'_>) -> Result<LogEntry> {
    let entry = match kind {
        LogRecordType::Commit => LogEntry::Commit(Commit { lsn }),
        LogRecordType::Delete => LogEntry::Delete(Delete {
            lsn,
            file: r.file()?,
            key: r.bytes()?,
            data: r.bytes()?,
        }),
        LogRecordType::FileCreate => LogEntry::FileCreate(FileCreate {
            lsn,
            fname: r.bytes()?,
            mode: r.u32()?,
        }),
        LogRecordType::FileOpen => LogEntry::FileOpen(FileOpen {
            lsn,
            file: r.file()?,
            fname: r.bytes()?,
        }),
        LogRecordType::FileHeader => {
            let file = r.file()?;
            let flags = r.u32()?;
            let nodesize = r.u32()?;
            let freelist = r.off()?;
            let unused_memory = r.off()?;
            let n_named_roots = r.i32()?;
            let roots = match n_named_roots {
                -1 => LoggedRoots::Unnamed(r.off()?),
                n if n >= 0 => {
                    // Each root is at least a name length plus an offset
                    let n = n as usize;
                    if n > r.remaining() / 12 {
                        return Err(r.corrupted(format!("root count {} exceeds payload", n)));
                    }
                    let mut roots = Vec::with_capacity(n);
                    for _ in 0..n {
                        let name = r.bytes()?;
                        roots.push((name, r.off()?));
                    }
                    LoggedRoots::Named(roots)
                }
                n => return Err(r.corrupted(format!("invalid root count: {}", n))),
            };
            LogEntry::FileHeader(HeaderEntry {
                lsn,
                file,
                header: LoggedHeader {
                    flags,
                    nodesize,
                    freelist,
                    unused_memory,
                    roots,
                },
            })
        }
        LogRecordType::NewNode => LogEntry::NewNode(NewNode {
            lsn,
            file: r.file()?,
            location: r.off()?,
            height: r.u32()?,
            nodesize: r.u32()?,
            is_dup_sort: r.u8()? != 0,
            rand4fingerprint: r.u32()?,
        }),
        LogRecordType::Enqueue => LogEntry::Enqueue(Enqueue {
            lsn,
            file: r.file()?,
            location: r.off()?,
            childnum: r.u32()?,
            msg_type: r.u8()?,
            key: r.bytes()?,
            data: r.bytes()?,
        }),
        LogRecordType::Dequeue => LogEntry::Dequeue(Dequeue {
            lsn,
            file: r.file()?,
            location: r.off()?,
            childnum: r.u32()?,
        }),
        LogRecordType::AddChild => LogEntry::AddChild(AddChild {
            lsn,
            file: r.file()?,
            location: r.off()?,
            childnum: r.u32()?,
            child: r.off()?,
            child_fingerprint: r.u32()?,
        }),
        LogRecordType::DeleteChild => LogEntry::DeleteChild(DeleteChild {
            lsn,
            file: r.file()?,
            location: r.off()?,
            childnum: r.u32()?,
            child: r.off()?,
            child_fingerprint: r.u32()?,
            pivot_key: r.bytes()?,
        }),
        LogRecordType::SetChild => LogEntry::SetChild(SetChild {
            lsn,
            file: r.file()?,
            location: r.off()?,
            childnum: r.u32()?,
            old_child: r.off()?,
            new_child: r.off()?,
        }),
        LogRecordType::SetPivot => LogEntry::SetPivot(SetPivot {
            lsn,
            file: r.file()?,
            location: r.off()?,
            childnum: r.u32()?,
            pivot_key: r.bytes()?,
        }),
        LogRecordType::ChangeChildFingerprint => {
            LogEntry::ChangeChildFingerprint(ChangeChildFingerprint {
                lsn,
                file: r.file()?,
                location: r.off()?,
                childnum: r.u32()?,
                old_fingerprint: r.u32()?,
                new_fingerprint: r.u32()?,
            })
        }
        LogRecordType::InsertInLeaf => LogEntry::InsertInLeaf(InsertInLeaf {
            lsn,
            file: r.file()?,
            location: r.off()?,
            index: r.u32()?,
            key: r.bytes()?,
            data: r.bytes()?,
        }),
        LogRecordType::DeleteInLeaf => LogEntry::DeleteInLeaf(DeleteInLeaf {
            lsn,
            file: r.file()?,
            location: r.off()?,
            index: r.u32()?,
            key: r.bytes()?,
            data: r.bytes()?,
        }),
        LogRecordType::ResizeLeafStorage => LogEntry::ResizeLeafStorage(ResizeLeafStorage {
            lsn,
            file: r.file()?,
            location: r.off()?,
            old_size: r.u32()?,
            new_size: r.u32()?,
        }),
        LogRecordType::RedistributeLeafStorage => {
            let file = r.file()?;
            let old_location = r.off()?;
            let new_location = r.off()?;
            let count = r.u32()? as usize;
            // Each pair is 8 bytes; reject counts the payload cannot hold
            if count > r.remaining() / 8 {
                return Err(r.corrupted(format!("index pair count {} exceeds payload", count)));
            }
            let mut pairs = Vec::with_capacity(count);
            for _ in 0..count {
                pairs.push(IndexPair::new(r.u32()?, r.u32()?));
            }
            LogEntry::RedistributeLeafStorage(RedistributeLeafStorage {
                lsn,
                file,
                old_location,
                new_location,
                pairs,
            })
        }
        LogRecordType::ChangeUnnamedRoot => LogEntry::ChangeUnnamedRoot(ChangeUnnamedRoot {
            lsn,
            file: r.file()?,
            old_root: r.off()?,
            new_root: r.off()?,
        }),
        LogRecordType::ChangeNamedRoot => LogEntry::ChangeNamedRoot(ChangeNamedRoot {
            lsn,
            file: r.file()?,
            name: r.bytes()?,
            old_root: r.off()?,
            new_root: r.off()?,
        }),
        LogRecordType::ChangeUnusedMemory => LogEntry::ChangeUnusedMemory(ChangeUnusedMemory {
            lsn,
            file: r.file()?,
            old_unused: r.off()?,
            new_unused: r.off()?,
        }),
    };
    Ok(entry)
}

/// Bounds-checked reader over a record payload.
struct PayloadReader<'a> {
    lsn: u64,
    data: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    fn new(lsn: u64, data: &'a [u8]) -> Self {
        Self { lsn, data }
    }

    fn corrupted(&self, reason: String) -> ArborError {
        ArborError::LogCorrupted {
            lsn: self.lsn,
            reason,
        }
    }

    fn remaining(&self) -> usize {
        self.data.remaining()
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.data.remaining() < n {
            return Err(self.corrupted(format!(
                "payload truncated: need {} bytes, have {}",
                n,
                self.data.remaining()
            )));
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.data.get_u8())
    }

    fn u32(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(self.data.get_u32_le())
    }

    fn i32(&mut self) -> Result<i32> {
        self.need(4)?;
        Ok(self.data.get_i32_le())
    }

    fn u64(&mut self) -> Result<u64> {
        self.need(8)?;
        Ok(self.data.get_u64_le())
    }

    fn file(&mut self) -> Result<FileNum> {
        self.u32().map(FileNum)
    }

    fn off(&mut self) -> Result<DiskOff> {
        self.u64().map(DiskOff)
    }

    fn bytes(&mut self) -> Result<Bytes> {
        let len = self.u32()? as usize;
        self.need(len)?;
        let bytes = Bytes::copy_from_slice(&self.data[..len]);
        self.data.advance(len);
        Ok(bytes)
    }

    fn finish(&self) -> Result<()> {
        if !self.data.is_empty() {
            return Err(self.corrupted(format!(
                "{} trailing payload bytes",
                self.data.len()
            )));
        }
        Ok(())
    }
}
