//! Sharing a device between the USB interrupt and the foreground

use crate::{descriptors::DescriptorStore, device::VbusSense, Device};
use core::cell::RefCell;
use cortex_m::interrupt::{self, Mutex};
use usb_device::UsbError;

/// A [`Device`] that both the USB interrupt handler and foreground code
/// can reach
///
/// Every access runs in a critical section, so an event never
/// interleaves with a foreground call.
///
/// ```no_run
/// use bdt_usbd::{CdcAcmDescriptors, Device, Peripherals, SharedDevice, UsbState};
///
/// struct Sie;
/// unsafe impl Peripherals for Sie {
///     fn sie(&self) -> *const () {
///         0x0F60 as *const ()
///     }
/// }
///
/// static USB_STATE: UsbState = UsbState::new();
///
/// let mut device = Device::new(Sie, &USB_STATE, CdcAcmDescriptors, || true);
/// device.initialize();
/// let shared = SharedDevice::new(device);
///
/// // In the USB interrupt handler:
/// shared.on_bus_event();
///
/// // In the foreground:
/// while let Some(byte) = shared.receive_byte() {
///     shared.send_char(byte).ok();
/// }
/// ```
pub struct SharedDevice<D, V> {
    device: Mutex<RefCell<Device<D, V>>>,
}

impl<D, V> SharedDevice<D, V> {
    pub const fn new(device: Device<D, V>) -> Self {
        SharedDevice {
            device: Mutex::new(RefCell::new(device)),
        }
    }

    /// Interrupt-safe, immutable access to the device
    pub fn with_device<R>(&self, func: impl FnOnce(&Device<D, V>) -> R) -> R {
        interrupt::free(|cs| {
            let device = self.device.borrow(cs);
            let device = device.borrow();
            func(&device)
        })
    }

    /// Interrupt-safe, mutable access to the device
    pub fn with_device_mut<R>(&self, func: impl FnOnce(&mut Device<D, V>) -> R) -> R {
        interrupt::free(|cs| {
            let device = self.device.borrow(cs);
            let mut device = device.borrow_mut();
            func(&mut device)
        })
    }
}

impl<D: DescriptorStore, V: VbusSense> SharedDevice<D, V> {
    /// Call once per USB interrupt.
    pub fn on_bus_event(&self) {
        self.with_device_mut(Device::on_bus_event);
    }

    /// Attach once the attach permission allows it. Returns `true` if
    /// the device is attached.
    pub fn poll_attach(&self) -> bool {
        self.with_device_mut(|device| {
            if !device.is_attached() && device.can_attach() {
                device.attach().ok();
            }
            device.is_attached()
        })
    }

    pub fn send_char(&self, byte: u8) -> Result<(), UsbError> {
        self.with_device_mut(|device| device.send_char(byte))
    }

    pub fn send_from_memory(&self, bytes: &[u8]) -> Result<usize, UsbError> {
        self.with_device_mut(|device| device.send_from_memory(bytes))
    }

    pub fn send_from_persistent(&self, bytes: &'static [u8]) -> Result<(), UsbError> {
        self.with_device_mut(|device| device.send_from_persistent(bytes))
    }

    pub fn data_available(&self) -> bool {
        self.with_device(Device::data_available)
    }

    pub fn receive_byte(&self) -> Option<u8> {
        self.with_device_mut(Device::receive_byte)
    }
}
