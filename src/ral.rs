//! Register access layer for the serial interface engine (SIE)
//!
//! SIE registers are eight bits wide. Fields are described with the
//! RAL module layout (`offset`, `mask`, `R`, `W`, `RW`) so that the
//! `ral-registers` macros work on them. Registers that are really a
//! set of flags are also described with `bitflags` types.

#![allow(non_snake_case, non_upper_case_globals)]

use core::cell::UnsafeCell;

pub use ral_registers::{modify_reg, read_reg, write_reg};

/// Volatile cell that conforms to the RAL's register API
///
/// Backs SIE registers, and all memory that the SIE shares with
/// firmware.
#[repr(transparent)]
pub struct VCell<T>(UnsafeCell<T>);

impl<T> VCell<T> {
    pub const fn new(val: T) -> Self {
        VCell(UnsafeCell::new(val))
    }
}

impl<T: Copy> VCell<T> {
    pub fn read(&self) -> T {
        // Safety: the cell is only reached through shared references,
        // and every access is a single volatile load of a Copy value.
        unsafe { self.0.get().read_volatile() }
    }
    pub fn write(&self, val: T) {
        // Safety: see read().
        unsafe { self.0.get().write_volatile(val) }
    }
}

/// Generates RAL field modules for an eight bit register.
///
/// Each entry is `NAME: offset, width;`.
macro_rules! register_fields {
    ($($(#[$attr:meta])* $name:ident: $offset:expr, $width:expr;)+) => {
        $(
            $(#[$attr])*
            #[allow(non_snake_case, non_upper_case_globals)]
            pub mod $name {
                pub const offset: u8 = $offset;
                pub const mask: u8 = ((((1u16 << $width) - 1) as u8) << offset);
                pub mod R {}
                pub mod W {}
                pub mod RW {}
            }
        )+
    };
}
pub(crate) use register_fields;

/// SIE control and status registers
pub mod sie {
    use super::VCell;
    use core::ops::Deref;

    /// Number of endpoint control registers
    pub const ENDPOINT_CONTROL_COUNT: usize = 16;

    #[repr(C)]
    pub struct RegisterBlock {
        pub UCON: VCell<u8>,
        pub UCFG: VCell<u8>,
        pub UIR: VCell<u8>,
        pub UIE: VCell<u8>,
        pub UEIR: VCell<u8>,
        pub UEIE: VCell<u8>,
        pub USTAT: VCell<u8>,
        pub UADDR: VCell<u8>,
        pub UEP: [VCell<u8>; ENDPOINT_CONTROL_COUNT],
    }

    impl RegisterBlock {
        /// A zeroed register block, for modeling the SIE in memory.
        #[cfg(test)]
        pub(crate) const fn new() -> Self {
            #[allow(clippy::declare_interior_mutable_const)]
            const ZERO: VCell<u8> = VCell::new(0);
            RegisterBlock {
                UCON: VCell::new(0),
                UCFG: VCell::new(0),
                UIR: VCell::new(0),
                UIE: VCell::new(0),
                UEIR: VCell::new(0),
                UEIE: VCell::new(0),
                USTAT: VCell::new(0),
                UADDR: VCell::new(0),
                UEP: [ZERO; ENDPOINT_CONTROL_COUNT],
            }
        }
    }

    /// A handle to the SIE registers
    pub struct Instance {
        ptr: *const RegisterBlock,
    }

    // Safety: the register block is a fixed MMIO region; moving the
    // handle between contexts doesn't change what it points at.
    unsafe impl Send for Instance {}

    impl Instance {
        /// # Safety
        ///
        /// `ptr` must point at a valid SIE register block that lives
        /// as long as the returned instance.
        pub(crate) unsafe fn new(ptr: *const ()) -> Self {
            Instance { ptr: ptr.cast() }
        }
    }

    impl Deref for Instance {
        type Target = RegisterBlock;
        fn deref(&self) -> &RegisterBlock {
            // Safety: validity is a precondition of Instance::new.
            unsafe { &*self.ptr }
        }
    }

    pub mod UCON {
        crate::ral::register_fields! {
            SUSPND: 1, 1;
            RESUME: 2, 1;
            USBEN: 3, 1;
            PKTDIS: 4, 1;
            SE0: 5, 1;
            PPBRST: 6, 1;
        }
    }

    pub mod UCFG {
        crate::ral::register_fields! {
            PPB: 0, 2;
            FSEN: 2, 1;
            UPUEN: 4, 1;
        }

        /// Ping-pong buffering on all endpoints
        pub const PPB_ALL: u8 = 0b10;
    }

    pub mod USTAT {
        crate::ral::register_fields! {
            PPBI: 1, 1;
            DIR: 2, 1;
            ENDP: 3, 4;
            /// ENDP, DIR and PPBI together form the BDT index.
            INDEX: 1, 6;
        }
    }

    pub mod UADDR {
        crate::ral::register_fields! {
            ADDR: 0, 7;
        }
    }
}

bitflags::bitflags! {
    /// USB interrupt sources, laid out the same in UIR and UIE
    ///
    /// A flag in UIR is cleared by writing zero to its bit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Interrupts : u8 {
        /// Bus reset
        const URST = 1 << 0;
        /// Bus error; see UEIR
        const UERR = 1 << 1;
        /// Bus activity detected while suspended
        const ACTV = 1 << 2;
        /// Transaction complete; USTAT is valid
        const TRN = 1 << 3;
        /// Bus idle for more than 3ms
        const IDLE = 1 << 4;
        /// A STALL handshake was sent
        const STALL = 1 << 5;
        /// Start of frame
        const SOF = 1 << 6;
    }
}

bitflags::bitflags! {
    /// Bus error sources, laid out the same in UEIR and UEIE
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ErrorInterrupts : u8 {
        const PID = 1 << 0;
        const CRC5 = 1 << 1;
        const CRC16 = 1 << 2;
        const DFN8 = 1 << 3;
        const BTO = 1 << 4;
        const BTS = 1 << 7;
    }
}

bitflags::bitflags! {
    /// Endpoint control (UEPn) bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EndpointControl : u8 {
        /// Set by the SIE when it sent a STALL on this endpoint
        const STALL = 1 << 0;
        const INEN = 1 << 1;
        const OUTEN = 1 << 2;
        /// Disables SETUP tokens; set on all non-control endpoints
        const CONDIS = 1 << 3;
        /// Handshake enable; clear only for isochronous endpoints
        const HSHK = 1 << 4;
    }
}

/// The RAL macros need a named register. This wraps one of the
/// UEPn registers so the macros can reach it.
pub mod endpoint_control {
    use super::{sie::RegisterBlock, EndpointControl, VCell};

    pub struct Uep<'a> {
        pub UEP: &'a VCell<u8>,
    }

    /// Returns the control register for `endpoint`.
    ///
    /// # Panics
    ///
    /// Panics if `endpoint` is 16 or greater.
    pub fn register(sie: &RegisterBlock, endpoint: usize) -> Uep<'_> {
        Uep {
            UEP: &sie.UEP[endpoint],
        }
    }

    impl Uep<'_> {
        pub fn get(&self) -> EndpointControl {
            EndpointControl::from_bits_retain(crate::ral::read_reg!(super::endpoint_control, self, UEP))
        }
        pub fn set(&self, control: EndpointControl) {
            crate::ral::write_reg!(super::endpoint_control, self, UEP, control.bits());
        }
        pub fn insert(&self, control: EndpointControl) {
            self.set(self.get() | control);
        }
        pub fn remove(&self, control: EndpointControl) {
            self.set(self.get() - control);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{endpoint_control, modify_reg, read_reg, sie, write_reg, EndpointControl, Interrupts};

    #[test]
    fn ucon() {
        let regs = sie::RegisterBlock::new();
        write_reg!(sie, &regs, UCON, USBEN: 1, PPBRST: 1);
        assert_eq!(regs.UCON.read(), 0b0100_1000);
        modify_reg!(sie, &regs, UCON, PPBRST: 0, PKTDIS: 1);
        assert_eq!(regs.UCON.read(), 0b0001_1000);
        assert!(read_reg!(sie, &regs, UCON, SE0 == 0));
    }

    #[test]
    fn ucfg() {
        let regs = sie::RegisterBlock::new();
        write_reg!(sie, &regs, UCFG, UPUEN: 1, FSEN: 1, PPB: sie::UCFG::PPB_ALL);
        assert_eq!(regs.UCFG.read(), 0x16);
    }

    #[test]
    fn ustat_index() {
        let regs = sie::RegisterBlock::new();
        // EP1, IN, odd slot
        regs.USTAT.write(0b0000_1110);
        assert_eq!(read_reg!(sie, &regs, USTAT, ENDP), 1);
        assert_eq!(read_reg!(sie, &regs, USTAT, DIR), 1);
        assert_eq!(read_reg!(sie, &regs, USTAT, PPBI), 1);
        assert_eq!(read_reg!(sie, &regs, USTAT, INDEX), 0b0111);
    }

    #[test]
    fn uaddr() {
        let regs = sie::RegisterBlock::new();
        write_reg!(sie, &regs, UADDR, ADDR: 0xFF);
        assert_eq!(regs.UADDR.read(), 0x7F);
    }

    #[test]
    fn interrupt_bits() {
        assert_eq!(Interrupts::all().bits(), 0x7F);
        assert_eq!((Interrupts::SOF | Interrupts::STALL | Interrupts::TRN).bits(), 0x68);
        assert_eq!(super::ErrorInterrupts::all().bits(), 0x9F);
    }

    #[test]
    fn endpoint_control_register() {
        let regs = sie::RegisterBlock::new();
        let uep = endpoint_control::register(&regs, 3);
        uep.insert(EndpointControl::HSHK | EndpointControl::INEN);
        assert_eq!(regs.UEP[3].read(), 0x12);
        uep.remove(EndpointControl::INEN);
        assert_eq!(uep.get(), EndpointControl::HSHK);
        assert_eq!(regs.UEP[2].read(), 0);
    }
}
