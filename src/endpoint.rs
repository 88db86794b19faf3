//! Endpoint transfer contexts
//!
//! A [`TransferContext`] tracks one transfer on one endpoint direction:
//! where the bytes come from (or go to), how many are left, and what
//! to do once an OUT transfer has fully arrived. The control engine and
//! the CDC pump drain contexts one packet at a time.

use crate::bdt::EndpointAddress;
use usb_device::UsbDirection;

/// Capacity of a memory buffer held by a context
pub const INLINE_CAPACITY: usize = 64;

/// A small buffer of bytes, owned by a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlineBuffer {
    bytes: [u8; INLINE_CAPACITY],
    len: u8,
}

impl InlineBuffer {
    pub const fn new() -> Self {
        InlineBuffer {
            bytes: [0; INLINE_CAPACITY],
            len: 0,
        }
    }

    /// Copies as much of `data` as fits.
    pub fn from_slice(data: &[u8]) -> Self {
        let mut buffer = Self::new();
        buffer.extend(data);
        buffer
    }

    /// Appends as much of `data` as fits, and returns how much that was.
    pub fn extend(&mut self, data: &[u8]) -> usize {
        let start = usize::from(self.len);
        let count = data.len().min(INLINE_CAPACITY - start);
        self.bytes[start..start + count].copy_from_slice(&data[..count]);
        self.len += count as u8;
        count
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..usize::from(self.len)]
    }

    pub fn len(&self) -> usize {
        usize::from(self.len)
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for InlineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Where the bytes of a transfer live
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferSource {
    /// RAM, owned by the transfer
    Memory,
    /// Read-only program storage
    PersistentStorage,
}

/// Work to run once, when an OUT transfer has fully arrived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The received bytes are a CDC line coding record.
    SetLineCoding,
}

#[derive(Debug, Clone, Copy)]
enum Source {
    Empty,
    Memory(InlineBuffer),
    Persistent(&'static [u8]),
    /// One stream stitched together from the parts of a table.
    MultiPart {
        table: &'static [&'static [u8]],
        part: usize,
    },
}

/// One transfer on one endpoint direction
pub struct TransferContext {
    address: EndpointAddress,
    needs_arming: bool,
    source: Source,
    /// Offset into the memory buffer, persistent slice, or current part
    cursor: usize,
    remaining: u16,
    max_packet_len: u16,
    completion: Option<Completion>,
}

impl TransferContext {
    pub const fn new(number: u8, direction: UsbDirection, max_packet_len: u16) -> Self {
        TransferContext {
            address: EndpointAddress::new(number, direction),
            needs_arming: false,
            source: Source::Empty,
            cursor: 0,
            remaining: 0,
            max_packet_len,
            completion: None,
        }
    }

    /// Drop the transfer. The ping-pong slot and packet length remain.
    pub fn reset(&mut self) {
        self.needs_arming = false;
        self.source = Source::Empty;
        self.cursor = 0;
        self.remaining = 0;
        self.completion = None;
    }

    pub fn address(&self) -> EndpointAddress {
        self.address
    }

    pub fn address_mut(&mut self) -> &mut EndpointAddress {
        &mut self.address
    }

    pub fn needs_arming(&self) -> bool {
        self.needs_arming
    }

    pub fn set_needs_arming(&mut self, needs_arming: bool) {
        self.needs_arming = needs_arming;
    }

    pub fn remaining(&self) -> u16 {
        self.remaining
    }

    pub fn set_remaining(&mut self, remaining: u16) {
        self.remaining = remaining;
    }

    #[cfg(test)]
    pub fn max_packet_len(&self) -> u16 {
        self.max_packet_len
    }

    #[cfg(test)]
    pub fn buffer_source(&self) -> Option<BufferSource> {
        match self.source {
            Source::Empty => None,
            Source::Memory(_) => Some(BufferSource::Memory),
            Source::Persistent(_) | Source::MultiPart { .. } => {
                Some(BufferSource::PersistentStorage)
            }
        }
    }

    /// The active part of a multi-part transfer, and the bytes left in it.
    #[cfg(test)]
    pub fn multi_part(&self) -> Option<(usize, usize)> {
        match self.source {
            Source::MultiPart { table, part } => Some((part, table[part].len() - self.cursor)),
            _ => None,
        }
    }

    /// A transfer with no data stage.
    pub fn acknowledge(&mut self) {
        self.reset();
        self.needs_arming = true;
    }

    /// Send a copy of `data`.
    pub fn transmit_memory(&mut self, data: &[u8]) {
        self.transmit_buffer(InlineBuffer::from_slice(data));
    }

    pub fn transmit_buffer(&mut self, buffer: InlineBuffer) {
        self.reset();
        self.remaining = buffer.len() as u16;
        self.source = Source::Memory(buffer);
        self.needs_arming = true;
    }

    pub fn transmit_persistent(&mut self, data: &'static [u8]) {
        self.reset();
        self.remaining = u16::try_from(data.len()).unwrap_or(u16::MAX);
        self.source = Source::Persistent(data);
        self.needs_arming = true;
    }

    /// Send the parts of `table` back to back, as one transfer.
    pub fn transmit_multi_part(&mut self, table: &'static [&'static [u8]]) {
        self.reset();
        let total: usize = table.iter().map(|part| part.len()).sum();
        self.remaining = u16::try_from(total).unwrap_or(u16::MAX);
        self.source = Source::MultiPart { table, part: 0 };
        self.needs_arming = true;
    }

    /// Receive `len` bytes into memory, then run `completion`.
    pub fn receive(&mut self, len: u16, completion: Option<Completion>) {
        self.reset();
        self.remaining = len.min(INLINE_CAPACITY as u16);
        self.source = Source::Memory(InlineBuffer::new());
        self.completion = completion;
        self.needs_arming = true;
    }

    /// Don't move more than `len` bytes.
    pub fn limit(&mut self, len: u16) {
        self.remaining = self.remaining.min(len);
    }

    fn chunk(&self) -> &[u8] {
        match &self.source {
            Source::Empty => &[],
            Source::Memory(buffer) => &buffer.as_slice()[self.cursor..],
            Source::Persistent(data) => &data[self.cursor..],
            Source::MultiPart { table, part } => &table[*part][self.cursor..],
        }
    }

    fn next_part(&mut self) -> bool {
        match &mut self.source {
            Source::MultiPart { table, part } if *part + 1 < table.len() => {
                *part += 1;
                self.cursor = 0;
                true
            }
            _ => false,
        }
    }

    /// Copy the next packet of the transfer into `packet`, and return
    /// its length.
    ///
    /// The packet is no longer than the max packet length, the bytes
    /// remaining, or `packet`.
    pub fn fill(&mut self, packet: &mut [u8]) -> usize {
        let count = usize::from(self.remaining)
            .min(usize::from(self.max_packet_len))
            .min(packet.len());
        let mut written = 0;
        while written < count {
            let chunk = self.chunk();
            if chunk.is_empty() {
                if self.next_part() {
                    continue;
                }
                break;
            }
            let len = chunk.len().min(count - written);
            packet[written..written + len].copy_from_slice(&chunk[..len]);
            self.cursor += len;
            written += len;
        }
        self.remaining -= written as u16;
        if self.remaining == 0 {
            self.source = Source::Empty;
            self.cursor = 0;
        }
        written
    }

    /// Take a received packet, and return how many bytes were kept.
    pub fn drain(&mut self, packet: &[u8]) -> usize {
        let count = packet.len().min(usize::from(self.remaining));
        let kept = match &mut self.source {
            Source::Memory(buffer) => buffer.extend(&packet[..count]),
            _ => 0,
        };
        self.remaining -= kept as u16;
        kept
    }

    /// Bytes received so far.
    pub fn received(&self) -> &[u8] {
        match &self.source {
            Source::Memory(buffer) => buffer.as_slice(),
            _ => &[],
        }
    }

    /// The completion runs at most once.
    pub fn take_completion(&mut self) -> Option<Completion> {
        self.completion.take()
    }
}
