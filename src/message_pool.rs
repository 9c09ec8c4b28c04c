//! Reference-counted pool of fixed-size message buffers.
//!
//! Every message on the wire lives in a pool slot. Handles are duplicated
//! while a message is shared between the send path and the reply path; the
//! slot returns to the free list only when the last handle is released, and
//! [`MessagePool::release`] reports that moment so the owner can replenish
//! its budget synchronously.

use crate::error::ProtocolViolation;
use crate::protocol::{checksum, Header, HEADER_SIZE};

/// A message buffer: a 128-byte header followed by body capacity.
///
/// The header lives serialized inside the buffer so the whole message can go
/// on the wire without copying; accessors read and write it through
/// [`Header`] copies.
pub struct MessageBuffer {
    data: Box<[u8]>,
}

impl MessageBuffer {
    fn with_capacity(size_max: usize) -> Self {
        assert!(size_max >= HEADER_SIZE);
        let mut buffer = Self {
            data: vec![0u8; size_max].into_boxed_slice(),
        };
        buffer.reset();
        buffer
    }

    fn reset(&mut self) {
        let header = Header::default();
        self.data[..HEADER_SIZE].copy_from_slice(header.as_bytes());
    }

    /// Copy the header out of the buffer.
    pub fn header(&self) -> Header {
        Header::from_prefix(&self.data).unwrap()
    }

    /// Overwrite the buffer's header.
    pub fn set_header(&mut self, header: &Header) {
        self.data[..HEADER_SIZE].copy_from_slice(header.as_bytes());
    }

    /// Read, modify, and write back the header.
    pub fn with_header(&mut self, f: impl FnOnce(&mut Header)) {
        let mut header = self.header();
        f(&mut header);
        self.set_header(&header);
    }

    /// Total message size (header + body) as recorded in the header.
    pub fn size(&self) -> usize {
        u32::from_le_bytes(self.data[92..96].try_into().unwrap()) as usize
    }

    /// Maximum message size this buffer can hold.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The body as recorded by the header's size.
    pub fn body(&self) -> &[u8] {
        &self.data[HEADER_SIZE..self.size()]
    }

    /// The full body capacity, for callers filling in a request.
    pub fn body_mut(&mut self) -> &mut [u8] {
        &mut self.data[HEADER_SIZE..]
    }

    /// Copy `body` into the buffer and record its size in the header.
    pub fn set_body(&mut self, body: &[u8]) {
        assert!(HEADER_SIZE + body.len() <= self.data.len());
        self.data[HEADER_SIZE..HEADER_SIZE + body.len()].copy_from_slice(body);
        let size = (HEADER_SIZE + body.len()) as u32;
        self.data[92..96].copy_from_slice(&size.to_le_bytes());
    }

    /// Compute and store the body checksum, then the header checksum.
    ///
    /// Must be called after every header or body field is final.
    pub fn finalize(&mut self) {
        let size = self.size();
        assert!((HEADER_SIZE..=self.data.len()).contains(&size));

        let checksum_body = checksum(&self.data[HEADER_SIZE..size]);
        self.data[16..32].copy_from_slice(&checksum_body.to_le_bytes());

        let checksum_header = checksum(&self.data[16..HEADER_SIZE]);
        self.data[..16].copy_from_slice(&checksum_header.to_le_bytes());
    }

    /// Verify both checksums.
    pub fn validate(&self) -> Result<(), ProtocolViolation> {
        let size = self.size();
        if size < HEADER_SIZE || size > self.data.len() {
            return Err(ProtocolViolation::Truncated);
        }
        let header = self.header();
        if !header.valid_checksum() {
            return Err(ProtocolViolation::HeaderChecksum);
        }
        if !header.valid_checksum_body(&self.data[HEADER_SIZE..size]) {
            return Err(ProtocolViolation::BodyChecksum);
        }
        Ok(())
    }

    /// The wire bytes of the message (header + body).
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.size()]
    }
}

impl std::fmt::Debug for MessageBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBuffer")
            .field("size", &self.size())
            .field("capacity", &self.data.len())
            .finish()
    }
}

/// Handle to a pooled message.
///
/// Deliberately neither `Clone` nor `Copy`: references are duplicated only
/// through [`MessagePool::dup`] so the pool's counts stay exact.
#[derive(Debug)]
pub struct Message {
    slot: usize,
}

struct Slot {
    buffer: MessageBuffer,
    references: u32,
}

/// Fixed-capacity pool of reference-counted message buffers.
pub struct MessagePool {
    slots: Vec<Slot>,
    free: Vec<usize>,
}

impl MessagePool {
    /// Create a pool of `capacity` buffers of `message_size_max` bytes each.
    pub fn new(capacity: usize, message_size_max: usize) -> Self {
        assert!(capacity > 0);
        let slots = (0..capacity)
            .map(|_| Slot {
                buffer: MessageBuffer::with_capacity(message_size_max),
                references: 0,
            })
            .collect();
        Self {
            slots,
            free: (0..capacity).rev().collect(),
        }
    }

    /// Acquire a free buffer, holding one reference to it.
    ///
    /// Returns `None` when every buffer is in use.
    pub fn acquire(&mut self) -> Option<Message> {
        let slot = self.free.pop()?;
        debug_assert_eq!(self.slots[slot].references, 0);
        self.slots[slot].buffer.reset();
        self.slots[slot].references = 1;
        Some(Message { slot })
    }

    /// Duplicate a handle, adding a reference.
    pub fn dup(&mut self, message: &Message) -> Message {
        let slot = &mut self.slots[message.slot];
        assert!(slot.references > 0);
        slot.references += 1;
        Message { slot: message.slot }
    }

    /// Drop a reference.
    ///
    /// Returns true when this was the last reference and the buffer went
    /// back on the free list, the caller's cue to replenish any budget
    /// keyed to the pool.
    pub fn release(&mut self, message: Message) -> bool {
        let slot = &mut self.slots[message.slot];
        assert!(slot.references > 0);
        slot.references -= 1;
        if slot.references == 0 {
            self.free.push(message.slot);
            true
        } else {
            false
        }
    }

    /// Borrow the buffer behind a handle.
    pub fn get(&self, message: &Message) -> &MessageBuffer {
        let slot = &self.slots[message.slot];
        assert!(slot.references > 0);
        &slot.buffer
    }

    /// Mutably borrow the buffer behind a handle.
    pub fn get_mut(&mut self, message: &Message) -> &mut MessageBuffer {
        let slot = &mut self.slots[message.slot];
        assert!(slot.references > 0);
        &mut slot.buffer
    }

    /// Number of buffers currently free.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// The fixed pool capacity.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
