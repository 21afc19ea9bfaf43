//! Per-child message buffers of internal nodes.

use crate::codec::{bytes_size, put_bytes, BlockReader};
use arbor_common::Result;
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::VecDeque;

/// A message waiting in an internal node to be pushed toward the leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedMessage {
    pub msg_type: u8,
    pub key: Bytes,
    pub data: Bytes,
}

impl BufferedMessage {
    fn encoded_size(&self) -> usize {
        1 + bytes_size(&self.key) + bytes_size(&self.data)
    }
}

/// FIFO of buffered messages for one child.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageBuffer {
    messages: VecDeque<BufferedMessage>,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffered messages.
    pub fn n_entries(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Appends a message at the tail.
    pub fn enqueue(&mut self, msg_type: u8, key: Bytes, data: Bytes) {
        self.messages.push_back(BufferedMessage {
            msg_type,
            key,
            data,
        });
    }

    /// Removes the message at the head.
    pub fn dequeue(&mut self) -> Option<BufferedMessage> {
        self.messages.pop_front()
    }

    pub(crate) fn encoded_size(&self) -> usize {
        4 + self
            .messages
            .iter()
            .map(BufferedMessage::encoded_size)
            .sum::<usize>()
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.messages.len() as u32);
        for msg in &self.messages {
            buf.put_u8(msg.msg_type);
            put_bytes(buf, &msg.key);
            put_bytes(buf, &msg.data);
        }
    }

    pub(crate) fn decode(reader: &mut BlockReader<'_>) -> Result<Self> {
        // type byte plus two length prefixes
        let count = reader.count(9)?;
        let mut messages = VecDeque::with_capacity(count);
        for _ in 0..count {
            let msg_type = reader.u8()?;
            let key = reader.bytes()?;
            let data = reader.bytes()?;
            messages.push_back(BufferedMessage {
                msg_type,
                key,
                data,
            });
        }
        Ok(Self { messages })
    }
}
