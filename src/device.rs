//! Device lifecycle and bus event dispatch

use crate::{
    bd::Arm,
    bdt::{Bdt, EndpointAddress, Slot},
    buffer::{PacketMemory, DATA_PACKET_LEN, EP0_PACKET_LEN, EP0_SETUP},
    cdc::Cdc,
    control::Control,
    descriptors::DescriptorStore,
    endpoint::TransferContext,
    ral::{self, endpoint_control, sie::ENDPOINT_CONTROL_COUNT, EndpointControl, ErrorInterrupts, Interrupts},
    state::{RxRing, UsbState},
    Peripherals,
};
use usb_device::{UsbDirection, UsbError};

/// Endpoints that have transfer contexts: control, CDC data and
/// CDC notification
pub(crate) const ENDPOINT_COUNT: usize = 3;

/// Device lifecycle state
///
/// States are ordered. The event handler ignores transactions until the
/// device reaches `Waiting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceState {
    Detached,
    Attached,
    Powered,
    /// Reset by the host; waiting for an address
    Waiting,
    /// SET_ADDRESS received; the address applies after the status stage
    Addressing,
    Addressed,
    Configured,
}

/// Decides when the device may connect to the bus
///
/// Typically samples VBUS. Any `FnMut() -> bool` is a `VbusSense`.
pub trait VbusSense {
    fn can_attach(&mut self) -> bool;
}

impl<F: FnMut() -> bool> VbusSense for F {
    fn can_attach(&mut self) -> bool {
        self()
    }
}

/// Run-time device configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Frames after the last endpoint 0 transaction before the status
    /// stage is forced.
    pub status_timeout: u8,
}

impl Config {
    pub const fn new() -> Self {
        Config { status_timeout: 45 }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// The EP0 OUT arming that waits for the next SETUP
pub(crate) const fn setup_arm() -> Arm {
    Arm::receive(EP0_SETUP.offset, EP0_PACKET_LEN).stalled()
}

fn contexts(direction: UsbDirection) -> [TransferContext; ENDPOINT_COUNT] {
    [
        TransferContext::new(0, direction, EP0_PACKET_LEN),
        TransferContext::new(1, direction, DATA_PACKET_LEN),
        TransferContext::new(2, direction, DATA_PACKET_LEN),
    ]
}

/// A USB device with a CDC-ACM serial function
///
/// `Device` owns all protocol state. Call [`on_bus_event`](Device::on_bus_event)
/// once per USB interrupt, and use the CDC methods from the foreground.
/// Both contexts need exclusive access; see [`SharedDevice`](crate::SharedDevice).
pub struct Device<D, V> {
    pub(crate) sie: ral::sie::Instance,
    usb: &'static UsbState,
    pub(crate) descriptors: D,
    vbus: V,
    pub(crate) config: Config,
    pub(crate) state: DeviceState,
    attachable: bool,
    suspended: bool,
    pub(crate) active_configuration: u8,
    /// The BD of the transaction being serviced
    pub(crate) packet: EndpointAddress,
    pub(crate) control: Control,
    pub(crate) in_ep: [TransferContext; ENDPOINT_COUNT],
    pub(crate) out_ep: [TransferContext; ENDPOINT_COUNT],
    pub(crate) cdc: Cdc,
}

impl<D: DescriptorStore, V: VbusSense> Device<D, V> {
    /// Create a device with the default [`Config`].
    ///
    /// # Panics
    ///
    /// Panics if `state` is already used by another device.
    pub fn new<P: Peripherals>(peripherals: P, state: &'static UsbState, descriptors: D, vbus: V) -> Self {
        Self::with_config(peripherals, state, descriptors, vbus, Config::default())
    }

    /// Create a device.
    ///
    /// Call [`initialize`](Device::initialize) before anything else.
    ///
    /// # Panics
    ///
    /// Panics if `state` is already used by another device.
    pub fn with_config<P: Peripherals>(
        peripherals: P,
        state: &'static UsbState,
        descriptors: D,
        vbus: V,
        config: Config,
    ) -> Self {
        let usb = state
            .take()
            .expect("UsbState already assigned to another device");
        // Safety: a Peripherals implementation promises a valid register block.
        let sie = unsafe { ral::sie::Instance::new(peripherals.sie()) };
        Device {
            sie,
            usb,
            descriptors,
            vbus,
            config,
            state: DeviceState::Detached,
            attachable: false,
            suspended: false,
            active_configuration: 0,
            packet: EndpointAddress::new(0, UsbDirection::Out),
            control: Control::new(),
            in_ep: contexts(UsbDirection::In),
            out_ep: contexts(UsbDirection::Out),
            cdc: Cdc::new(),
        }
    }

    pub(crate) fn bdt(&self) -> &'static Bdt {
        self.usb.bdt()
    }

    pub(crate) fn memory(&self) -> &'static PacketMemory {
        self.usb.memory()
    }

    pub(crate) fn rx(&self) -> &'static RxRing {
        self.usb.rx()
    }

    pub(crate) fn context(&self, number: u8, direction: UsbDirection) -> Option<&TransferContext> {
        let contexts = match direction {
            UsbDirection::In => &self.in_ep,
            UsbDirection::Out => &self.out_ep,
        };
        contexts.get(usize::from(number))
    }

    fn flags(&self) -> Interrupts {
        Interrupts::from_bits_truncate(ral::read_reg!(ral::sie, self.sie, UIR))
    }

    fn enabled(&self) -> Interrupts {
        Interrupts::from_bits_truncate(ral::read_reg!(ral::sie, self.sie, UIE))
    }

    fn pending(&self, interrupt: Interrupts) -> bool {
        self.flags().contains(interrupt) && self.enabled().contains(interrupt)
    }

    fn clear_flags(&self, interrupts: Interrupts) {
        ral::modify_reg!(ral::sie, self.sie, UIR, |uir: u8| uir & !interrupts.bits());
    }

    fn enable_interrupts(&self, interrupts: Interrupts) {
        ral::modify_reg!(ral::sie, self.sie, UIE, |uie: u8| uie | interrupts.bits());
    }

    fn disable_interrupts(&self, interrupts: Interrupts) {
        ral::modify_reg!(ral::sie, self.sie, UIE, |uie: u8| uie & !interrupts.bits());
    }

    /// Bring the SIE to a known, detached state.
    pub fn initialize(&mut self) {
        ral::write_reg!(ral::sie, self.sie, UCON, 0);
        self.reset();
        self.control.enter_initial_state();
        self.attachable = false;
    }

    /// Abandon every transfer and return the SIE to its post-reset
    /// configuration, with endpoint 0 waiting for SETUP.
    ///
    /// The device is `Detached` afterwards. A bus reset moves it on to
    /// `Waiting`.
    pub fn reset(&mut self) {
        ral::write_reg!(ral::sie, self.sie, UIE, 0);
        ral::write_reg!(ral::sie, self.sie, UEIE, 0);
        ral::write_reg!(ral::sie, self.sie, UIR, 0);
        ral::write_reg!(ral::sie, self.sie, UEIR, 0);
        for number in 0..ENDPOINT_CONTROL_COUNT {
            endpoint_control::register(&self.sie, number).set(EndpointControl::empty());
        }
        ral::write_reg!(ral::sie, self.sie, UCFG, UPUEN: 1, FSEN: 1, PPB: ral::sie::UCFG::PPB_ALL);
        ral::write_reg!(ral::sie, self.sie, UEIE, ErrorInterrupts::all().bits());
        ral::write_reg!(ral::sie, self.sie, UIE, Interrupts::all().bits());

        self.bdt().clear();
        ral::modify_reg!(ral::sie, self.sie, UCON, PPBRST: 1);
        ral::write_reg!(ral::sie, self.sie, UADDR, 0);
        ral::modify_reg!(ral::sie, self.sie, UCON, PKTDIS: 0);
        ral::modify_reg!(ral::sie, self.sie, UCON, PPBRST: 0);
        while self.flags().contains(Interrupts::TRN) {
            self.clear_flags(Interrupts::TRN);
        }

        self.control.reset();
        self.suspended = false;
        for ctx in self.in_ep.iter_mut().chain(self.out_ep.iter_mut()) {
            ctx.reset();
            ctx.address_mut().set_slot(Slot::Even);
        }
        self.packet = EndpointAddress::new(0, UsbDirection::Out);
        self.cdc = Cdc::new();
        self.rx().clear();

        endpoint_control::register(&self.sie, 0)
            .set(EndpointControl::HSHK | EndpointControl::OUTEN | EndpointControl::INEN);
        self.bdt().descriptor(self.out_ep[0].address()).arm(setup_arm());

        self.state = DeviceState::Detached;
        self.active_configuration = 0;
    }

    pub fn is_attached(&self) -> bool {
        self.state != DeviceState::Detached
    }

    /// Sample the attach permission, and remember the answer for
    /// [`attach`](Device::attach).
    pub fn can_attach(&mut self) -> bool {
        self.attachable = self.vbus.can_attach();
        self.attachable
    }

    /// Enable the SIE and connect to the bus.
    ///
    /// Only valid while `Detached`, after [`can_attach`](Device::can_attach)
    /// said yes.
    pub fn attach(&mut self) -> Result<(), UsbError> {
        if self.state != DeviceState::Detached || !self.attachable {
            warn!("Attach rejected");
            return Err(UsbError::InvalidState);
        }
        ral::write_reg!(ral::sie, self.sie, UCON, 0);
        ral::write_reg!(ral::sie, self.sie, UIE, 0);
        ral::modify_reg!(ral::sie, self.sie, UCON, USBEN: 1);
        self.enable_interrupts(
            Interrupts::SOF | Interrupts::STALL | Interrupts::TRN | Interrupts::ACTV | Interrupts::UERR,
        );
        self.state = DeviceState::Attached;
        Ok(())
    }

    /// Disconnect from the bus, and stop handling bus events.
    pub fn detach(&mut self) {
        ral::write_reg!(ral::sie, self.sie, UCON, 0);
        ral::write_reg!(ral::sie, self.sie, UIE, 0);
        self.state = DeviceState::Detached;
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// The address committed to the SIE.
    pub fn address(&self) -> u8 {
        ral::read_reg!(ral::sie, self.sie, UADDR, ADDR)
    }

    pub fn active_configuration(&self) -> u8 {
        self.active_configuration
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Handle every pending bus condition.
    ///
    /// Call once per USB interrupt. This is the only place where bus
    /// activity changes the device state.
    pub fn on_bus_event(&mut self) {
        if self.state == DeviceState::Detached {
            return;
        }

        if self.state == DeviceState::Attached && ral::read_reg!(ral::sie, self.sie, UCON, SE0 == 0) {
            self.clear_flags(Interrupts::all() - Interrupts::URST);
            self.enable_interrupts(Interrupts::IDLE | Interrupts::URST);
            self.state = DeviceState::Powered;
            debug!("POWERED");
        }

        if self.pending(Interrupts::ACTV) {
            self.wake();
        }

        if self.suspended {
            return;
        }

        if self.pending(Interrupts::URST) {
            self.reset();
            self.state = DeviceState::Waiting;
            self.clear_flags(Interrupts::URST);
            debug!("RESET");
        }

        if self.pending(Interrupts::IDLE) {
            self.suspend();
        }

        if self.pending(Interrupts::SOF) {
            self.clear_flags(Interrupts::SOF);
            self.on_frame();
        }

        if self.pending(Interrupts::STALL) {
            self.on_stall_handshake();
        }

        if self.pending(Interrupts::UERR) {
            ral::write_reg!(ral::sie, self.sie, UEIR, 0);
            self.clear_flags(Interrupts::UERR);
        }

        if self.state < DeviceState::Waiting {
            return;
        }

        if self.enabled().contains(Interrupts::TRN) {
            while self.flags().contains(Interrupts::TRN) {
                let index = ral::read_reg!(ral::sie, self.sie, USTAT, INDEX);
                self.clear_flags(Interrupts::TRN);
                self.on_transaction(EndpointAddress::from_index(index));
            }
        }
    }

    fn wake(&mut self) {
        ral::modify_reg!(ral::sie, self.sie, UCON, SUSPND: 0);
        self.disable_interrupts(Interrupts::ACTV);
        self.clear_flags(Interrupts::ACTV);
        self.suspended = false;
        debug!("RESUME");
    }

    fn suspend(&mut self) {
        self.enable_interrupts(Interrupts::ACTV);
        self.clear_flags(Interrupts::IDLE);
        ral::modify_reg!(ral::sie, self.sie, UCON, SUSPND: 1);
        self.suspended = true;
        debug!("SUSPEND");
    }

    fn on_frame(&mut self) {
        if self.control.timeout != 0 {
            self.control.timeout -= 1;
        } else {
            self.status_stage();
        }
    }

    /// The SIE stalled a token on endpoint 0. If it stalled an IN
    /// while OUT is armed, OUT is re-armed for the next SETUP.
    fn on_stall_handshake(&mut self) {
        let uep0 = endpoint_control::register(&self.sie, 0);
        if uep0.get().contains(EndpointControl::STALL) {
            let bdt = self.bdt();
            let out = bdt.descriptor(self.out_ep[0].address());
            if out.is_owned_by_controller() && bdt.descriptor(self.in_ep[0].address()).is_halted() {
                out.reclaim();
                out.arm(setup_arm());
            }
            uep0.remove(EndpointControl::STALL);
        }
        self.clear_flags(Interrupts::STALL);
    }

    fn on_transaction(&mut self, packet: EndpointAddress) {
        let number = usize::from(packet.number());
        trace!(
            "TRN EP{} {} {}",
            number,
            match packet.direction() {
                UsbDirection::In => "In",
                UsbDirection::Out => "Out",
            },
            match packet.slot() {
                Slot::Even => "Even",
                Slot::Odd => "Odd",
            }
        );
        if number >= ENDPOINT_COUNT {
            return;
        }
        let ctx = match packet.direction() {
            UsbDirection::In => &mut self.in_ep[number],
            UsbDirection::Out => &mut self.out_ep[number],
        };
        ctx.address_mut().set_slot(packet.slot().other());
        self.packet = packet;

        match number {
            0 => self.on_control_transaction(),
            1 => self.on_data_transaction(),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, DeviceState};
    use crate::{
        bd::Toggle,
        bdt::EndpointAddress,
        ral::{EndpointControl, Interrupts},
        setup::SetupPacket,
        sim::{Sim, Token},
    };
    use usb_device::{control::Request, UsbDirection, UsbError};

    const UCON_SUSPND: u8 = 1 << 1;
    const UCON_USBEN: u8 = 1 << 3;

    #[test]
    fn initialize_leaves_device_detached() {
        let sim = Sim::new(|| true);
        assert_eq!(sim.device.state(), DeviceState::Detached);
        assert!(!sim.device.is_attached());
        assert_eq!(sim.ucon(), 0);
        assert_eq!(
            sim.endpoint_control(0),
            EndpointControl::HSHK | EndpointControl::OUTEN | EndpointControl::INEN
        );
        let setup = sim.bd(EndpointAddress::new(0, UsbDirection::Out));
        assert!(setup.is_owned_by_controller());
        assert!(setup.is_halted());
        assert_eq!(Config::default().status_timeout, 45);
    }

    #[test]
    fn attach_needs_permission() {
        let mut sim = Sim::new(|| false);
        assert_eq!(sim.device.attach(), Err(UsbError::InvalidState));
        assert!(!sim.device.can_attach());
        assert_eq!(sim.device.attach(), Err(UsbError::InvalidState));
        assert!(!sim.device.is_attached());
    }

    #[test]
    fn attach_and_detach() {
        let mut sim = Sim::attached();
        assert_eq!(sim.device.state(), DeviceState::Attached);
        assert_eq!(sim.ucon() & UCON_USBEN, UCON_USBEN);
        assert_eq!(sim.device.attach(), Err(UsbError::InvalidState));

        sim.device.detach();
        assert_eq!(sim.device.state(), DeviceState::Detached);
        assert_eq!(sim.ucon(), 0);
        // Events are ignored while detached
        sim.raise(Interrupts::URST);
        assert_eq!(sim.device.state(), DeviceState::Detached);
    }

    #[test]
    fn powered_then_reset() {
        let mut sim = Sim::attached();
        sim.device.on_bus_event();
        assert_eq!(sim.device.state(), DeviceState::Powered);
        sim.bus_reset();
        assert_eq!(sim.device.state(), DeviceState::Waiting);
        assert_eq!(sim.device.address(), 0);
        assert!(!sim.flags().contains(Interrupts::URST));
    }

    #[test]
    fn transactions_ignored_before_reset() {
        let mut sim = Sim::attached();
        sim.device.on_bus_event();
        sim.transaction(EndpointAddress::new(0, UsbDirection::Out));
        assert!(sim.flags().contains(Interrupts::TRN));
        assert_eq!(sim.device.state(), DeviceState::Powered);
    }

    #[test]
    fn unknown_endpoint_ignored() {
        let mut sim = Sim::configured();
        sim.transaction(EndpointAddress::new(5, UsbDirection::Out));
        assert!(!sim.flags().contains(Interrupts::TRN));
        assert_eq!(sim.device.state(), DeviceState::Configured);
        assert_eq!(sim.device_descriptor().len(), 18);
    }

    #[test]
    fn bus_reset_abandons_configuration() {
        let mut sim = Sim::configured();
        sim.device.send_char(b'a').unwrap();
        sim.bus_reset();
        assert_eq!(sim.device.state(), DeviceState::Waiting);
        assert_eq!(sim.device.active_configuration(), 0);
        assert_eq!(sim.device.address(), 0);
        assert_eq!(sim.endpoint_control(1), EndpointControl::empty());
        assert_eq!(sim.in_token(1), Token::Nak);
        assert_eq!(sim.device_descriptor().len(), 18);
    }

    #[test]
    fn suspend_and_resume() {
        let mut sim = Sim::powered();
        sim.raise(Interrupts::IDLE);
        assert!(sim.device.is_suspended());
        assert_eq!(sim.ucon() & UCON_SUSPND, UCON_SUSPND);

        // Nothing but activity is handled while suspended
        sim.raise(Interrupts::SOF);
        assert!(sim.flags().contains(Interrupts::SOF));

        sim.raise(Interrupts::ACTV);
        assert!(!sim.device.is_suspended());
        assert_eq!(sim.ucon() & UCON_SUSPND, 0);
        assert!(!sim.flags().intersects(Interrupts::ACTV | Interrupts::SOF));
    }

    #[test]
    fn bus_error_cleared() {
        let mut sim = Sim::powered();
        sim.raise(Interrupts::UERR);
        assert!(!sim.flags().contains(Interrupts::UERR));
        assert_eq!(sim.device.state(), DeviceState::Waiting);
    }

    #[test]
    fn enumeration() {
        let mut sim = Sim::powered();
        let device = sim.device_descriptor();
        assert_eq!(device.len(), 18);
        sim.control_no_data(SetupPacket::from_fields(0x00, Request::SET_ADDRESS, 5, 0, 0));
        let configuration = sim.control_read(SetupPacket::from_fields(0x80, Request::GET_DESCRIPTOR, 0x0200, 0, 255));
        assert_eq!(configuration.len(), 75);
        sim.set_configuration(1);
        assert_eq!(sim.device.state(), DeviceState::Configured);
        sim.control_write(
            SetupPacket::from_fields(0x21, crate::cdc::SET_LINE_CODING, 0, 0, 7),
            &[0x80, 0x25, 0, 0, 0, 0, 8],
        );
        assert_eq!(sim.device.line_coding().baud_rate(), 9600);
        assert_eq!(sim.out_token(1, b"ping", Toggle::Data0), Token::Ack);
        assert_eq!(sim.device.receive_byte(), Some(b'p'));
    }
}
