//! A USB full-speed device core for buffer descriptor table (BDT) controllers
//!
//! `bdt-usbd` drives a serial interface engine (SIE) that moves packets
//! through a table of buffer descriptors with ping-pong buffering. It
//! implements endpoint 0 control transfers and the standard requests,
//! and exposes a CDC-ACM virtual serial port on endpoints 1 and 2.
//!
//! To interface the library, you must define a safe implementation of
//! [`Peripherals`], and allocate a [`UsbState`]. Then,
//!
//! 1. create a [`Device`], and [`initialize`](Device::initialize) it;
//! 2. [`attach`](Device::attach) once [`can_attach`](Device::can_attach)
//!    allows it;
//! 3. call [`on_bus_event`](Device::on_bus_event) from the USB interrupt;
//! 4. send and receive serial data once the host configures the device.
//!
//! [`SharedDevice`] lets the interrupt handler and the foreground share
//! the device.

#![cfg_attr(not(test), no_std)]

#[cfg(feature = "defmt-03")]
extern crate defmt_03 as defmt;

#[macro_use]
mod log;

mod bd;
mod bdt;
mod buffer;
mod bus;
mod cdc;
mod control;
mod descriptors;
mod device;
mod endpoint;
mod ral;
mod requests;
mod setup;
mod state;

#[cfg(test)]
mod sim;

pub use bus::SharedDevice;
pub use cdc::{LineCoding, Parity, StopBits, TX_QUEUE_LEN};
pub use control::{ControlState, StallState};
pub use descriptors::{CdcAcmDescriptors, DescriptorStore, PRODUCT_ID, VENDOR_ID};
pub use device::{Config, Device, DeviceState, VbusSense};
pub use setup::SetupPacket;
pub use state::UsbState;

/// A type that owns the SIE register block
///
/// # Safety
///
/// `Peripherals` should only be implemented on a type that owns the
/// SIE registers. The returned pointer is assumed to be valid for as
/// long as the driver exists, and is cast to the register block
/// definition.
///
/// The SIE must also be told where the buffer descriptor table and
/// packet memory are; see [`UsbState`].
///
/// # Example
///
/// ```
/// use bdt_usbd::Peripherals;
///
/// /// Owns the SIE registers
/// struct Sie(());
///
/// impl Sie {
///     const ADDRESS: usize = 0x0F60;
///     /// # Safety
///     ///
///     /// Call once.
///     unsafe fn steal() -> Self {
///         Sie(())
///     }
/// }
///
/// unsafe impl Peripherals for Sie {
///     fn sie(&self) -> *const () {
///         Self::ADDRESS as *const ()
///     }
/// }
///
/// let sie = unsafe { Sie::steal() };
/// assert_eq!(sie.sie(), 0x0F60 as *const ());
/// ```
pub unsafe trait Peripherals {
    /// Returns the address of the SIE registers
    fn sie(&self) -> *const ();
}
