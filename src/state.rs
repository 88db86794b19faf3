//! Memory shared with the SIE

use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::{bdt::Bdt, buffer::PacketMemory};

/// Fill and read counters of the CDC receive ring
///
/// The ring's bytes are the EP1 OUT buffer. The event handler writes
/// `fill`; the consumer writes `read`.
pub struct RxRing {
    fill: AtomicU8,
    read: AtomicU8,
}

impl RxRing {
    const fn new() -> Self {
        RxRing {
            fill: AtomicU8::new(0),
            read: AtomicU8::new(0),
        }
    }

    pub fn fill(&self) -> u8 {
        self.fill.load(Ordering::Acquire)
    }

    pub fn read(&self) -> u8 {
        self.read.load(Ordering::Acquire)
    }

    pub fn set_fill(&self, fill: u8) {
        self.fill.store(fill, Ordering::Release);
    }

    pub fn set_read(&self, read: u8) {
        self.read.store(read, Ordering::Release);
    }

    pub fn has_data(&self) -> bool {
        self.fill() != self.read()
    }

    pub fn clear(&self) {
        self.read.store(0, Ordering::Release);
        self.fill.store(0, Ordering::Release);
    }
}

/// Driver state shared with the SIE.
///
/// Each USB driver needs a `UsbState`. Allocate a `static` object
/// and supply it to the [`Device`](crate::Device) constructor. Make
/// sure that states are not shared across USB instances; otherwise,
/// the driver constructor panics.
///
/// ```
/// use bdt_usbd::UsbState;
///
/// static USB_STATE: UsbState = UsbState::new();
/// ```
///
/// The SIE must be told where the BDT and the packet memory live; see
/// [`bdt_address`](UsbState::bdt_address) and
/// [`packet_memory_address`](UsbState::packet_memory_address).
pub struct UsbState {
    bdt: Bdt,
    memory: PacketMemory,
    rx: RxRing,
    taken: AtomicBool,
}

// Safety: the BDT and packet memory are only reached through volatile
// cells, and the driver that takes the state is the only firmware
// user. The ring counters are atomics.
unsafe impl Sync for UsbState {}

impl UsbState {
    pub const fn new() -> Self {
        UsbState {
            bdt: Bdt::new(),
            memory: PacketMemory::new(),
            rx: RxRing::new(),
            taken: AtomicBool::new(false),
        }
    }

    /// Returns the state, or `None` if a driver already took it.
    pub(crate) fn take(&'static self) -> Option<&'static Self> {
        (!self.taken.swap(true, Ordering::SeqCst)).then_some(self)
    }

    pub(crate) fn bdt(&self) -> &Bdt {
        &self.bdt
    }

    pub(crate) fn memory(&self) -> &PacketMemory {
        &self.memory
    }

    pub(crate) fn rx(&self) -> &RxRing {
        &self.rx
    }

    /// The start of the buffer descriptor table.
    pub fn bdt_address(&self) -> *const () {
        self.bdt.as_ptr()
    }

    /// The base address for buffer descriptor offsets.
    pub fn packet_memory_address(&self) -> *const () {
        self.memory.as_ptr()
    }
}

impl Default for UsbState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::UsbState;

    #[test]
    fn take_once() {
        static STATE: UsbState = UsbState::new();
        assert!(STATE.take().is_some());
        assert!(STATE.take().is_none());
    }

    #[test]
    fn ring_counters() {
        let state = UsbState::new();
        assert!(!state.rx().has_data());
        state.rx().set_fill(3);
        assert!(state.rx().has_data());
        state.rx().set_read(3);
        assert!(!state.rx().has_data());
        state.rx().clear();
        assert_eq!((state.rx().fill(), state.rx().read()), (0, 0));
    }
}
