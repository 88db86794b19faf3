//! Buffer descriptor
//!
//! A buffer descriptor (BD) is the record that firmware and the SIE
//! pass back and forth to move one packet. UOWN says who may touch it:
//! firmware fills in the address, count and toggle while it owns the
//! BD, then publishes it by setting UOWN. The SIE clears UOWN once the
//! transaction is done, after replacing the low STAT bits with the
//! token PID and CNT with the number of bytes moved.
//!
//! Firmware never writes individual fields. It either [`arm`](BufferDescriptor::arm)s
//! a complete [`Arm`] description, or [`observe`](BufferDescriptor::observe)s
//! a BD the SIE handed back.

#![allow(non_snake_case, non_upper_case_globals)]

use crate::ral::{self, VCell};
use core::sync::atomic::{self, Ordering};

#[repr(C)]
pub struct BufferDescriptor {
    pub(crate) STAT: VCell<u8>,
    pub(crate) CNT: VCell<u8>,
    /// Buffer offset within the endpoint packet memory
    pub(crate) ADR: VCell<u16>,
}

const _: [(); 1] = [(); (core::mem::size_of::<BufferDescriptor>() == 4) as usize];

pub mod STAT {
    crate::ral::register_fields! {
        /// Byte count bits 9:8
        BC: 0, 2;
        BSTALL: 2, 1;
        DTSEN: 3, 1;
        /// Token PID, reported by the SIE on hand-back.
        ///
        /// Overlaps BSTALL and DTSEN.
        PID: 2, 4;
        DTS: 6, 1;
        UOWN: 7, 1;
    }
}

/// Data toggle (DATA0 / DATA1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Toggle {
    Data0 = 0,
    Data1 = 1,
}

impl Toggle {
    #[must_use]
    pub const fn toggled(self) -> Self {
        match self {
            Toggle::Data0 => Toggle::Data1,
            Toggle::Data1 => Toggle::Data0,
        }
    }
}

/// Token PID of a completed transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pid {
    Out,
    In,
    Setup,
    Other(u8),
}

impl Pid {
    pub const fn from_bits(pid: u8) -> Self {
        match pid & 0xF {
            0x1 => Pid::Out,
            0x9 => Pid::In,
            0xD => Pid::Setup,
            pid => Pid::Other(pid),
        }
    }

    #[cfg(test)]
    pub const fn bits(self) -> u8 {
        match self {
            Pid::Out => 0x1,
            Pid::In => 0x9,
            Pid::Setup => 0xD,
            Pid::Other(pid) => pid & 0xF,
        }
    }
}

/// A complete description of an armed buffer descriptor
///
/// There's no way to arm a BD from a partial description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct Arm {
    address: u16,
    count: u16,
    toggle: Toggle,
    sync: bool,
    stall: bool,
}

impl Arm {
    /// Receive up to `capacity` bytes into the buffer at `address`.
    ///
    /// Defaults to DATA0 with toggle synchronization.
    pub const fn receive(address: u16, capacity: u16) -> Self {
        Arm {
            address,
            count: capacity,
            toggle: Toggle::Data0,
            sync: true,
            stall: false,
        }
    }

    /// Transmit `len` bytes from the buffer at `address`.
    ///
    /// Defaults to DATA0 with toggle synchronization.
    pub const fn transmit(address: u16, len: u16) -> Self {
        Self::receive(address, len)
    }

    /// Answer the next token with a STALL handshake.
    pub const fn stall() -> Self {
        Arm {
            address: 0,
            count: 0,
            toggle: Toggle::Data0,
            sync: false,
            stall: true,
        }
    }

    pub const fn toggle(mut self, toggle: Toggle) -> Self {
        self.toggle = toggle;
        self
    }

    /// Accept either data PID.
    pub const fn without_sync(mut self) -> Self {
        self.sync = false;
        self
    }

    /// Set BSTALL along with the buffer.
    ///
    /// On endpoint 0 OUT, SETUP tokens still complete into the buffer,
    /// while any other token is stalled.
    pub const fn stalled(mut self) -> Self {
        self.stall = true;
        self
    }
}

/// What the SIE reported when it handed a BD back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Returned {
    pub pid: Pid,
    pub count: u16,
    pub toggle: Toggle,
    pub address: u16,
}

impl BufferDescriptor {
    pub const fn new() -> Self {
        BufferDescriptor {
            STAT: VCell::new(0),
            CNT: VCell::new(0),
            ADR: VCell::new(0),
        }
    }

    pub fn is_owned_by_controller(&self) -> bool {
        ral::read_reg!(crate::bd, self, STAT, UOWN == 1)
    }

    /// Fill in the BD, then hand it to the SIE.
    ///
    /// The caller must own the BD. Use [`reclaim`](Self::reclaim) first
    /// when taking it back by force.
    pub fn arm(&self, arm: Arm) {
        self.ADR.write(arm.address);
        self.CNT.write(arm.count as u8);
        ral::write_reg!(crate::bd, self, STAT,
            BC: (arm.count >> 8) as u8,
            BSTALL: arm.stall as u8,
            DTSEN: arm.sync as u8,
            DTS: arm.toggle as u8
        );
        atomic::compiler_fence(Ordering::Release);
        ral::modify_reg!(crate::bd, self, STAT, UOWN: 1);
    }

    /// Returns what the SIE reported, or `None` if the SIE still owns the BD.
    pub fn observe(&self) -> Option<Returned> {
        if self.is_owned_by_controller() {
            return None;
        }
        atomic::compiler_fence(Ordering::Acquire);
        let stat = self.STAT.read();
        let high = u16::from((stat & STAT::BC::mask) >> STAT::BC::offset);
        Some(Returned {
            pid: Pid::from_bits((stat & STAT::PID::mask) >> STAT::PID::offset),
            count: (high << 8) | u16::from(self.CNT.read()),
            toggle: if (stat & STAT::DTS::mask) != 0 {
                Toggle::Data1
            } else {
                Toggle::Data0
            },
            address: self.ADR.read(),
        })
    }

    /// Indicates if the BD is armed to answer with STALL.
    ///
    /// The SIE leaves STAT alone while a stalled BD is pending, so this
    /// is the one read that's meaningful while the SIE owns the BD.
    pub fn is_halted(&self) -> bool {
        let stat = self.STAT.read();
        stat & STAT::UOWN::mask != 0 && stat & STAT::BSTALL::mask != 0
    }

    /// Take the BD back from the SIE, whatever it was doing.
    ///
    /// This abandons the packet described by the BD.
    pub fn reclaim(&self) {
        ral::modify_reg!(crate::bd, self, STAT, UOWN: 0);
        atomic::compiler_fence(Ordering::Acquire);
    }

    /// Zero every field. The caller must own the BD.
    pub fn clear(&self) {
        self.STAT.write(0);
        self.CNT.write(0);
        self.ADR.write(0);
    }

    /// Record `toggle` as the toggle of the last packet moved by this
    /// BD, without handing it to the SIE.
    pub fn prepare_toggle(&self, toggle: Toggle) {
        ral::write_reg!(crate::bd, self, STAT, DTS: toggle as u8, DTSEN: 1);
    }
}

impl Default for BufferDescriptor {
    fn default() -> Self {
        Self::new()
    }
}
