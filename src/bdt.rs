//! Buffer descriptor table (BDT) and endpoint addressing
//!
//! The BDT holds two BDs (an even and an odd ping-pong slot) for each
//! endpoint direction. The SIE alternates between the slots of an
//! endpoint direction on every transaction; firmware tracks the same
//! alternation in [`EndpointAddress::slot`].

use crate::bd::BufferDescriptor;
use usb_device::UsbDirection;

/// Number of endpoint numbers the SIE addresses
pub const ENDPOINT_NUMBERS: usize = 16;

/// Two directions, two slots for each endpoint
pub const BDT_ENTRIES: usize = ENDPOINT_NUMBERS * 4;

/// Ping-pong slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Even,
    Odd,
}

impl Slot {
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Slot::Even => Slot::Odd,
            Slot::Odd => Slot::Even,
        }
    }
}

/// An endpoint number, a direction and the ping-pong slot in use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointAddress {
    number: u8,
    direction: UsbDirection,
    slot: Slot,
}

impl EndpointAddress {
    /// # Panics
    ///
    /// Panics if `number` isn't a valid endpoint number.
    pub const fn new(number: u8, direction: UsbDirection) -> Self {
        assert!((number as usize) < ENDPOINT_NUMBERS);
        EndpointAddress {
            number,
            direction,
            slot: Slot::Even,
        }
    }

    /// Decode a BDT index, as reported in USTAT.
    pub const fn from_index(index: u8) -> Self {
        EndpointAddress {
            number: (index >> 2) & 0xF,
            direction: if index & 0b10 != 0 {
                UsbDirection::In
            } else {
                UsbDirection::Out
            },
            slot: if index & 1 != 0 { Slot::Odd } else { Slot::Even },
        }
    }

    /// The BDT index: endpoint number in bits 5:2, direction in bit 1
    /// (IN is 1) and slot in bit 0.
    pub const fn index(&self) -> usize {
        ((self.number as usize) << 2)
            | ((matches!(self.direction, UsbDirection::In) as usize) << 1)
            | (matches!(self.slot, Slot::Odd) as usize)
    }

    pub const fn number(&self) -> u8 {
        self.number
    }

    pub const fn direction(&self) -> UsbDirection {
        self.direction
    }

    pub const fn slot(&self) -> Slot {
        self.slot
    }

    pub fn set_slot(&mut self, slot: Slot) {
        self.slot = slot;
    }

    /// Move to the other ping-pong slot.
    pub fn toggle_slot(&mut self) {
        self.slot = self.slot.other();
    }

    /// The same endpoint direction, in the other slot.
    #[must_use]
    pub const fn companion(&self) -> Self {
        self.with_slot(self.slot.other())
    }

    #[must_use]
    pub const fn with_slot(&self, slot: Slot) -> Self {
        EndpointAddress {
            number: self.number,
            direction: self.direction,
            slot,
        }
    }
}

/// The buffer descriptor table
///
/// Hardware expects the table on a 512 byte boundary.
#[repr(C, align(512))]
pub struct Bdt([BufferDescriptor; BDT_ENTRIES]);

impl Bdt {
    pub const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const BD: BufferDescriptor = BufferDescriptor::new();
        Bdt([BD; BDT_ENTRIES])
    }

    pub fn descriptor(&self, address: EndpointAddress) -> &BufferDescriptor {
        &self.0[address.index()]
    }

    /// Take back and zero every BD.
    pub fn clear(&self) {
        for bd in self.0.iter() {
            bd.reclaim();
            bd.clear();
        }
    }

    pub(crate) fn as_ptr(&self) -> *const () {
        self.0.as_ptr().cast()
    }
}
