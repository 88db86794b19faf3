//! Endpoint packet memory
//!
//! One region of memory holds every endpoint buffer. BDs address a
//! buffer by its offset from the start of this region.

use crate::ral::VCell;

/// A buffer within the packet memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub offset: u16,
    pub len: u16,
}

impl Region {
    const fn after(previous: Region, len: u16) -> Self {
        Region {
            offset: previous.offset + previous.len,
            len,
        }
    }

    /// The part of this region that starts `skip` bytes in.
    pub const fn skip(self, skip: u16) -> Self {
        Region {
            offset: self.offset + skip,
            len: self.len - skip,
        }
    }
}

/// Endpoint 0 max packet length
pub const EP0_PACKET_LEN: u16 = 8;
/// CDC data endpoint max packet length
pub const DATA_PACKET_LEN: u16 = 64;

pub const EP0_SETUP: Region = Region {
    offset: 0,
    len: EP0_PACKET_LEN,
};
pub const EP0_DATA: Region = Region::after(EP0_SETUP, EP0_PACKET_LEN);
pub const EP1_OUT: Region = Region::after(EP0_DATA, DATA_PACKET_LEN);
pub const EP1_IN: Region = Region::after(EP1_OUT, DATA_PACKET_LEN);
pub const EP2_IN: Region = Region::after(EP1_IN, DATA_PACKET_LEN);

/// Size of the packet memory
pub const PACKET_MEMORY_LEN: usize = (EP2_IN.offset + EP2_IN.len) as usize;

/// Memory shared with the SIE for packet data
pub struct PacketMemory([VCell<u8>; PACKET_MEMORY_LEN]);

impl PacketMemory {
    pub const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const BYTE: VCell<u8> = VCell::new(0);
        PacketMemory([BYTE; PACKET_MEMORY_LEN])
    }

    fn cells(&self, offset: u16, len: usize) -> &[VCell<u8>] {
        let start = usize::from(offset);
        &self.0[start..start + len]
    }

    /// Copy `buffer.len()` bytes starting at `offset` into `buffer`.
    ///
    /// # Panics
    ///
    /// Panics if the read extends past the packet memory.
    pub fn read(&self, offset: u16, buffer: &mut [u8]) {
        let len = buffer.len();
        for (dst, src) in buffer.iter_mut().zip(self.cells(offset, len)) {
            *dst = src.read();
        }
    }

    /// Copy `data` into the packet memory, starting at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the write extends past the packet memory.
    pub fn write(&self, offset: u16, data: &[u8]) {
        for (dst, src) in self.cells(offset, data.len()).iter().zip(data) {
            dst.write(*src);
        }
    }

    pub fn byte(&self, offset: u16) -> u8 {
        self.0[usize::from(offset)].read()
    }

    /// Move `len` bytes from `src` to `dst`. `dst` must not be above `src`.
    pub fn move_down(&self, src: u16, dst: u16, len: usize) {
        debug_assert!(dst <= src);
        for i in 0..len {
            let byte = self.0[usize::from(src) + i].read();
            self.0[usize::from(dst) + i].write(byte);
        }
    }

    pub(crate) fn as_ptr(&self) -> *const () {
        self.0.as_ptr().cast()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn layout() {
        assert_eq!(EP0_SETUP.offset, 0x00);
        assert_eq!(EP0_DATA.offset, 0x08);
        assert_eq!(EP1_OUT.offset, 0x10);
        assert_eq!(EP1_IN.offset, 0x50);
        assert_eq!(EP2_IN.offset, 0x90);
        assert_eq!(PACKET_MEMORY_LEN, 0xD0);
    }

    #[test]
    fn read_write() {
        let memory = PacketMemory::new();
        memory.write(EP1_IN.offset, b"hello");
        let mut buffer = [0; 5];
        memory.read(EP1_IN.offset, &mut buffer);
        assert_eq!(&buffer, b"hello");
        assert_eq!(memory.byte(EP1_IN.offset + 4), b'o');
    }

    #[test]
    fn move_down() {
        let memory = PacketMemory::new();
        memory.write(EP1_OUT.offset + 10, b"abc");
        memory.move_down(EP1_OUT.offset + 10, EP1_OUT.offset, 3);
        let mut buffer = [0; 3];
        memory.read(EP1_OUT.offset, &mut buffer);
        assert_eq!(&buffer, b"abc");
    }

    #[test]
    fn skip() {
        let region = EP1_OUT.skip(5);
        assert_eq!(region.offset, EP1_OUT.offset + 5);
        assert_eq!(region.len, 59);
    }

    #[test]
    #[should_panic]
    fn write_out_of_bounds() {
        let memory = PacketMemory::new();
        memory.write(EP2_IN.offset + 60, b"too long");
    }
}
