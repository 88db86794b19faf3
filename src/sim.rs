//! A host model of the SIE
//!
//! The model owns a register block and a `UsbState` in host memory. It
//! plays the SIE's part of each transaction: it checks the BD at the
//! ping-pong pointer, moves the data, hands the BD back with the token
//! PID, posts USTAT, and raises TRNIF. Then it runs the device's event
//! handler, as the USB interrupt would.
//!
//! The model doesn't see PPBRST pulses. Helpers that cause one reset
//! the ping-pong pointers themselves.

use crate::{
    bd::{BufferDescriptor, Pid, Toggle, STAT},
    bdt::{EndpointAddress, Slot},
    descriptors::CdcAcmDescriptors,
    device::{Device, DeviceState},
    ral::{self, sie::RegisterBlock, EndpointControl, Interrupts},
    setup::SetupPacket,
    state::UsbState,
    Peripherals,
};
use usb_device::{control::Request, UsbDirection};

struct SimSie(&'static RegisterBlock);

unsafe impl Peripherals for SimSie {
    fn sie(&self) -> *const () {
        (self.0 as *const RegisterBlock).cast()
    }
}

/// What the host sees in answer to a token
#[derive(Debug, PartialEq, Eq)]
pub enum Token {
    Data(Vec<u8>, Toggle),
    Ack,
    Nak,
    Stall,
}

pub struct Sim {
    pub device: Device<CdcAcmDescriptors, fn() -> bool>,
    regs: &'static RegisterBlock,
    usb: &'static UsbState,
    /// The slot the SIE uses next, per endpoint and direction (OUT, IN)
    pointers: [[Slot; 2]; 16],
}

fn direction_index(direction: UsbDirection) -> usize {
    match direction {
        UsbDirection::Out => 0,
        UsbDirection::In => 1,
    }
}

impl Sim {
    /// An initialized, detached device.
    pub fn new(vbus: fn() -> bool) -> Self {
        let regs: &'static RegisterBlock = Box::leak(Box::new(RegisterBlock::new()));
        let usb: &'static UsbState = Box::leak(Box::new(UsbState::new()));
        let mut device = Device::new(SimSie(regs), usb, CdcAcmDescriptors, vbus);
        device.initialize();
        Sim {
            device,
            regs,
            usb,
            pointers: [[Slot::Even; 2]; 16],
        }
    }

    /// Attached to the bus, before the first event.
    pub fn attached() -> Self {
        let mut sim = Self::new(|| true);
        assert!(sim.device.can_attach());
        sim.device.attach().unwrap();
        sim
    }

    /// Reset by the host, waiting for an address.
    pub fn powered() -> Self {
        let mut sim = Self::attached();
        sim.device.on_bus_event();
        assert_eq!(sim.device.state(), DeviceState::Powered);
        sim.bus_reset();
        assert_eq!(sim.device.state(), DeviceState::Waiting);
        sim
    }

    /// At address 5.
    pub fn addressed() -> Self {
        let mut sim = Self::powered();
        sim.control_no_data(SetupPacket::from_fields(0x00, Request::SET_ADDRESS, 5, 0, 0));
        assert_eq!(sim.device.state(), DeviceState::Addressed);
        sim
    }

    /// In configuration 1.
    pub fn configured() -> Self {
        let mut sim = Self::addressed();
        sim.set_configuration(1);
        assert_eq!(sim.device.state(), DeviceState::Configured);
        sim
    }

    pub fn flags(&self) -> Interrupts {
        Interrupts::from_bits_truncate(self.regs.UIR.read())
    }

    pub fn ucon(&self) -> u8 {
        self.regs.UCON.read()
    }

    pub fn endpoint_control(&self, number: usize) -> EndpointControl {
        EndpointControl::from_bits_retain(self.regs.UEP[number].read())
    }

    pub fn bd(&self, address: EndpointAddress) -> &'static BufferDescriptor {
        self.usb.bdt().descriptor(address)
    }

    /// Raise `interrupt`, and run the event handler.
    pub fn raise(&mut self, interrupt: Interrupts) {
        self.regs.UIR.write(self.regs.UIR.read() | interrupt.bits());
        self.device.on_bus_event();
    }

    pub fn bus_reset(&mut self) {
        self.raise(Interrupts::URST);
        self.reset_ping_pong();
    }

    pub fn sof(&mut self) {
        self.raise(Interrupts::SOF);
    }

    pub fn reset_ping_pong(&mut self) {
        self.pointers = [[Slot::Even; 2]; 16];
    }

    fn next(&self, number: u8, direction: UsbDirection) -> EndpointAddress {
        let slot = self.pointers[usize::from(number)][direction_index(direction)];
        EndpointAddress::new(number, direction).with_slot(slot)
    }

    /// Post a completed transaction for `address`, and run the event
    /// handler.
    pub fn transaction(&mut self, address: EndpointAddress) {
        self.regs.USTAT.write((address.index() as u8) << 1);
        self.raise(Interrupts::TRN);
    }

    fn hand_back(&mut self, address: EndpointAddress, pid: Pid, count: usize, toggle: Toggle) {
        let bd = self.bd(address);
        bd.CNT.write(count as u8);
        bd.STAT.write(
            (toggle as u8) << STAT::DTS::offset
                | pid.bits() << STAT::PID::offset
                | ((count >> 8) as u8 & STAT::BC::mask),
        );
        let pointer = &mut self.pointers[usize::from(address.number())][direction_index(address.direction())];
        *pointer = pointer.other();
        self.transaction(address);
    }

    fn stall(&mut self, number: u8) -> Token {
        let uep = &self.regs.UEP[usize::from(number)];
        uep.write(uep.read() | EndpointControl::STALL.bits());
        self.raise(Interrupts::STALL);
        Token::Stall
    }

    fn armed_count(bd: &BufferDescriptor) -> usize {
        usize::from(bd.CNT.read()) | usize::from(bd.STAT.read() & STAT::BC::mask) << 8
    }

    fn armed_toggle(bd: &BufferDescriptor) -> Toggle {
        if bd.STAT.read() & STAT::DTS::mask != 0 {
            Toggle::Data1
        } else {
            Toggle::Data0
        }
    }

    pub fn setup(&mut self, setup: SetupPacket) {
        let address = self.next(0, UsbDirection::Out);
        let bd = self.bd(address);
        assert!(bd.is_owned_by_controller(), "endpoint 0 isn't waiting for SETUP");
        assert!(Self::armed_count(bd) >= SetupPacket::LEN);
        self.usb.memory().write(bd.ADR.read(), setup.as_bytes());
        ral::modify_reg!(ral::sie, self.regs, UCON, PKTDIS: 1);
        self.hand_back(address, Pid::Setup, SetupPacket::LEN, Toggle::Data0);
    }

    pub fn in_token(&mut self, number: u8) -> Token {
        let address = self.next(number, UsbDirection::In);
        let bd = self.bd(address);
        if !bd.is_owned_by_controller() {
            return Token::Nak;
        }
        if bd.is_halted() {
            return self.stall(number);
        }
        let toggle = Self::armed_toggle(bd);
        let mut bytes = vec![0; Self::armed_count(bd)];
        self.usb.memory().read(bd.ADR.read(), &mut bytes);
        self.hand_back(address, Pid::In, bytes.len(), toggle);
        Token::Data(bytes, toggle)
    }

    pub fn out_token(&mut self, number: u8, data: &[u8], toggle: Toggle) -> Token {
        let address = self.next(number, UsbDirection::Out);
        let bd = self.bd(address);
        if !bd.is_owned_by_controller() {
            return Token::Nak;
        }
        if bd.is_halted() {
            return self.stall(number);
        }
        assert!(data.len() <= Self::armed_count(bd), "more data than the BD holds");
        if bd.STAT.read() & STAT::DTSEN::mask != 0 {
            assert_eq!(toggle, Self::armed_toggle(bd), "data toggle mismatch");
        }
        self.usb.memory().write(bd.ADR.read(), data);
        self.hand_back(address, Pid::Out, data.len(), toggle);
        Token::Ack
    }

    /// A complete control read. Returns the data stage.
    pub fn control_read(&mut self, setup: SetupPacket) -> Vec<u8> {
        self.setup(setup);
        let mut bytes = Vec::new();
        loop {
            match self.in_token(0) {
                Token::Data(packet, _) => {
                    let short = packet.len() < 8;
                    bytes.extend(packet);
                    if short || bytes.len() >= usize::from(setup.length()) {
                        break;
                    }
                }
                other => panic!("control read answered with {other:?}"),
            }
        }
        assert_eq!(self.out_token(0, &[], Toggle::Data1), Token::Ack);
        bytes
    }

    /// A complete control write.
    pub fn control_write(&mut self, setup: SetupPacket, data: &[u8]) {
        self.setup(setup);
        let mut toggle = Toggle::Data1;
        for packet in data.chunks(8) {
            assert_eq!(self.out_token(0, packet, toggle), Token::Ack);
            toggle = toggle.toggled();
        }
        assert_eq!(self.in_token(0), Token::Data(Vec::new(), Toggle::Data1));
    }

    /// A complete control transfer without a data stage.
    pub fn control_no_data(&mut self, setup: SetupPacket) {
        self.control_write(setup, &[]);
    }

    pub fn set_configuration(&mut self, value: u16) {
        self.setup(SetupPacket::from_fields(0x00, Request::SET_CONFIGURATION, value, 0, 0));
        self.reset_ping_pong();
        assert_eq!(self.in_token(0), Token::Data(Vec::new(), Toggle::Data1));
    }

    pub fn device_descriptor(&mut self) -> Vec<u8> {
        self.control_read(SetupPacket::from_fields(0x80, Request::GET_DESCRIPTOR, 0x0100, 0, 64))
    }
}
