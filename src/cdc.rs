//! CDC-ACM virtual serial port
//!
//! Endpoint 1 carries the serial data. Received bytes stay in the EP1
//! OUT packet buffer, which doubles as a receive ring: the event handler
//! advances the fill counter, and the consumer advances the read
//! counter. Sends are queued while a packet is in flight, and the queue
//! is bounded; a full queue rejects the send with `WouldBlock`.

use core::fmt;

use crate::{
    bd::{Arm, Toggle},
    buffer::{EP1_IN, EP1_OUT},
    descriptors::DescriptorStore,
    device::{Device, DeviceState, VbusSense, ENDPOINT_COUNT},
    endpoint::{Completion, InlineBuffer},
    ral::{endpoint_control, EndpointControl},
    setup::SetupPacket,
};
use usb_device::{control::RequestType, UsbDirection, UsbError};

pub const SET_LINE_CODING: u8 = 0x20;
pub const GET_LINE_CODING: u8 = 0x21;
pub const SET_CONTROL_LINE_STATE: u8 = 0x22;
pub const SEND_BREAK: u8 = 0x23;

/// Pending sends, not counting the one in flight
pub const TX_QUEUE_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One = 0,
    OnePointFive = 1,
    Two = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None = 0,
    Odd = 1,
    Even = 2,
    Mark = 3,
    Space = 4,
}

/// Serial line settings, as exchanged with SET/GET_LINE_CODING
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineCoding {
    baud_rate: u32,
    stop_bits: StopBits,
    parity: Parity,
    data_bits: u8,
}

impl LineCoding {
    /// Size of the record on the wire
    pub const LEN: usize = 7;

    pub const fn new() -> Self {
        LineCoding {
            baud_rate: 11250,
            stop_bits: StopBits::One,
            parity: Parity::None,
            data_bits: 8,
        }
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn stop_bits(&self) -> StopBits {
        self.stop_bits
    }

    pub fn parity(&self) -> Parity {
        self.parity
    }

    pub fn data_bits(&self) -> u8 {
        self.data_bits
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let baud = self.baud_rate.to_le_bytes();
        [
            baud[0],
            baud[1],
            baud[2],
            baud[3],
            self.stop_bits as u8,
            self.parity as u8,
            self.data_bits,
        ]
    }

    /// Decode a record. Returns `None` if it's short, or uses an unknown
    /// stop bit or parity code.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes: &[u8; Self::LEN] = bytes.get(..Self::LEN)?.try_into().ok()?;
        let stop_bits = match bytes[4] {
            0 => StopBits::One,
            1 => StopBits::OnePointFive,
            2 => StopBits::Two,
            _ => return None,
        };
        let parity = match bytes[5] {
            0 => Parity::None,
            1 => Parity::Odd,
            2 => Parity::Even,
            3 => Parity::Mark,
            4 => Parity::Space,
            _ => return None,
        };
        Some(LineCoding {
            baud_rate: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            stop_bits,
            parity,
            data_bits: bytes[6],
        })
    }
}

impl Default for LineCoding {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum TxRequest {
    Memory(InlineBuffer),
    Persistent(&'static [u8]),
    Char(u8),
}

/// FIFO of sends waiting for endpoint 1 IN
pub(crate) struct TxQueue {
    entries: [Option<TxRequest>; TX_QUEUE_LEN],
    len: usize,
}

impl TxQueue {
    pub(crate) const fn new() -> Self {
        TxQueue {
            entries: [None; TX_QUEUE_LEN],
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn push(&mut self, request: TxRequest) -> Result<(), UsbError> {
        let slot = self.entries.get_mut(self.len).ok_or(UsbError::WouldBlock)?;
        *slot = Some(request);
        self.len += 1;
        Ok(())
    }

    pub(crate) fn pop(&mut self) -> Option<TxRequest> {
        let head = self.entries[0].take()?;
        self.entries.rotate_left(1);
        self.len -= 1;
        Some(head)
    }
}

pub(crate) struct Cdc {
    line_coding: LineCoding,
    queue: TxQueue,
    /// A packet is armed on EP1 IN
    tx_busy: bool,
    in_halted: bool,
    out_halted: bool,
    /// The ring is full, so EP1 OUT isn't armed
    rx_parked: bool,
    rx_toggle: Toggle,
}

impl Cdc {
    pub(crate) const fn new() -> Self {
        Cdc {
            line_coding: LineCoding::new(),
            queue: TxQueue::new(),
            tx_busy: false,
            in_halted: false,
            out_halted: false,
            rx_parked: false,
            rx_toggle: Toggle::Data0,
        }
    }
}

impl<D: DescriptorStore, V: VbusSense> Device<D, V> {
    /// Returns `false` if the request isn't a CDC request.
    pub(crate) fn class_request(&mut self, setup: &SetupPacket) -> bool {
        if setup.request_type() != RequestType::Class {
            return false;
        }
        match setup.request() {
            SET_LINE_CODING => self.out_ep[0].receive(LineCoding::LEN as u16, Some(Completion::SetLineCoding)),
            GET_LINE_CODING => {
                let coding = self.cdc.line_coding.to_bytes();
                self.in_ep[0].transmit_memory(&coding);
            }
            SET_CONTROL_LINE_STATE | SEND_BREAK => self.in_ep[0].acknowledge(),
            _ => return false,
        }
        true
    }

    /// Runs once the SET_LINE_CODING data stage is complete.
    pub(crate) fn apply_line_coding(&mut self) {
        match LineCoding::from_bytes(self.out_ep[0].received()) {
            Some(coding) => {
                debug!(
                    "LINE CODING {} {} {} {}",
                    coding.baud_rate,
                    coding.stop_bits as u8,
                    coding.parity as u8,
                    coding.data_bits
                );
                // Only the baud rate is applied
                self.cdc.line_coding.baud_rate = coding.baud_rate;
            }
            None => {
                warn!("Invalid line coding");
            }
        }
    }

    /// Start the serial function for a new configuration.
    pub(crate) fn cdc_initialize(&mut self) {
        self.cdc = Cdc::new();
        self.rx().clear();
        self.in_ep[1].reset();
        self.out_ep[1].reset();
        self.arm_serial_out(true);
        // The first packet goes out as DATA0
        let companion = self.in_ep[1].address().companion();
        self.bdt().descriptor(companion).prepare_toggle(Toggle::Data1);
    }

    pub(crate) fn on_data_transaction(&mut self) {
        match self.packet.direction() {
            UsbDirection::Out => self.on_serial_out(),
            UsbDirection::In => self.pump_serial_in(),
        }
    }

    fn on_serial_out(&mut self) {
        let Some(returned) = self.bdt().descriptor(self.packet).observe() else {
            return;
        };
        let rx = self.rx();
        let start = rx.fill();
        let count = returned.count.min(self.out_ep[1].remaining()) as u8;
        if rx.read() == start {
            // Everything before this packet was consumed.
            if start != 0 {
                self.memory()
                    .move_down(EP1_OUT.offset + u16::from(start), EP1_OUT.offset, usize::from(count));
            }
            rx.set_read(0);
            rx.set_fill(count);
        } else {
            rx.set_fill(start + count);
        }
        trace!("CDC OUT {}", count);
        self.cdc.rx_toggle = returned.toggle.toggled();
        self.arm_serial_out(false);
    }

    /// Arm EP1 OUT for the free space at the end of the ring.
    fn arm_serial_out(&mut self, sync: bool) {
        let fill = self.rx().fill();
        let room = EP1_OUT.len - u16::from(fill);
        self.out_ep[1].set_remaining(room);
        self.cdc.rx_parked = room == 0;
        if self.cdc.rx_parked {
            return;
        }
        let arm = Arm::receive(EP1_OUT.skip(u16::from(fill)).offset, room).toggle(self.cdc.rx_toggle);
        let arm = if sync { arm } else { arm.without_sync() };
        self.bdt().descriptor(self.out_ep[1].address()).arm(arm);
    }

    /// Send the next packet, if there is one.
    fn pump_serial_in(&mut self) {
        if self.in_ep[1].remaining() == 0 {
            match self.cdc.queue.pop() {
                Some(request) => self.load_request(request),
                None => {
                    self.cdc.tx_busy = false;
                    return;
                }
            }
        }
        self.arm_serial_in();
    }

    fn load_request(&mut self, request: TxRequest) {
        let ctx = &mut self.in_ep[1];
        match request {
            TxRequest::Memory(buffer) => ctx.transmit_buffer(buffer),
            TxRequest::Persistent(data) => ctx.transmit_persistent(data),
            TxRequest::Char(byte) => ctx.transmit_memory(&[byte]),
        }
    }

    fn arm_serial_in(&mut self) {
        let address = self.in_ep[1].address();
        let bdt = self.bdt();
        let last = bdt
            .descriptor(address.companion())
            .observe()
            .map_or(Toggle::Data1, |returned| returned.toggle);
        let len = self.load_packet(1, EP1_IN);
        bdt.descriptor(address)
            .arm(Arm::transmit(EP1_IN.offset, len).toggle(last.toggled()));
        self.cdc.tx_busy = true;
    }

    fn enqueue(&mut self, request: TxRequest) -> Result<(), UsbError> {
        if self.state != DeviceState::Configured {
            return Err(UsbError::InvalidState);
        }
        if self.cdc.tx_busy || self.cdc.in_halted {
            self.cdc.queue.push(request).map_err(|err| {
                warn!("CDC queue full");
                err
            })
        } else {
            self.load_request(request);
            self.arm_serial_in();
            Ok(())
        }
    }

    /// Halt or resume a CDC endpoint. Returns `false` if the endpoint
    /// can't be halted.
    ///
    /// Both slots are taken back, so a packet in flight is lost.
    pub(crate) fn set_endpoint_halt(&mut self, number: u8, direction: UsbDirection, halt: bool) -> bool {
        let usable = match direction {
            UsbDirection::In => EndpointControl::INEN,
            UsbDirection::Out => EndpointControl::OUTEN,
        };
        if self.state != DeviceState::Configured
            || number == 0
            || usize::from(number) >= ENDPOINT_COUNT
            || !endpoint_control::register(&self.sie, usize::from(number)).get().contains(usable)
        {
            return false;
        }
        let Some(address) = self.context(number, direction).map(|ctx| ctx.address()) else {
            return false;
        };
        let bdt = self.bdt();
        for slot in [address, address.companion()] {
            let bd = bdt.descriptor(slot);
            bd.reclaim();
            if halt {
                bd.arm(Arm::stall());
            } else {
                bd.clear();
            }
        }
        debug!("HALT EP{} {}", number, halt);

        if number != 1 {
            return true;
        }
        match direction {
            UsbDirection::Out => {
                self.cdc.out_halted = halt;
                if !halt {
                    self.cdc.rx_toggle = Toggle::Data0;
                    self.arm_serial_out(true);
                }
            }
            UsbDirection::In => {
                self.cdc.in_halted = halt;
                self.cdc.tx_busy = false;
                if !halt {
                    bdt.descriptor(address.companion()).prepare_toggle(Toggle::Data1);
                    self.pump_serial_in();
                }
            }
        }
        true
    }

    /// Send one byte.
    pub fn send_char(&mut self, byte: u8) -> Result<(), UsbError> {
        self.enqueue(TxRequest::Char(byte))
    }

    /// Send a copy of `bytes`, and return how many were accepted.
    ///
    /// At most one packet's worth (64 bytes) is accepted per call.
    pub fn send_from_memory(&mut self, bytes: &[u8]) -> Result<usize, UsbError> {
        let buffer = InlineBuffer::from_slice(bytes);
        if buffer.is_empty() {
            return Ok(0);
        }
        let len = buffer.len();
        self.enqueue(TxRequest::Memory(buffer)).map(|()| len)
    }

    /// Send `bytes` straight from program storage, in as many packets
    /// as it takes.
    pub fn send_from_persistent(&mut self, bytes: &'static [u8]) -> Result<(), UsbError> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.enqueue(TxRequest::Persistent(bytes))
    }

    /// Sends waiting behind the packet in flight.
    pub fn pending_sends(&self) -> usize {
        self.cdc.queue.len()
    }

    pub fn data_available(&self) -> bool {
        self.rx().has_data()
    }

    /// Take the next received byte, or `None` if there isn't one.
    pub fn receive_byte(&mut self) -> Option<u8> {
        let rx = self.rx();
        let (read, fill) = (rx.read(), rx.fill());
        if read >= fill {
            return None;
        }
        let byte = self.memory().byte(EP1_OUT.offset + u16::from(read));
        rx.set_read(read + 1);
        if self.cdc.rx_parked && read + 1 == fill && !self.cdc.out_halted {
            rx.clear();
            self.arm_serial_out(false);
        }
        Some(byte)
    }

    /// The line coding last set by the host.
    pub fn line_coding(&self) -> &LineCoding {
        &self.cdc.line_coding
    }
}

impl<D: DescriptorStore, V: VbusSense> fmt::Write for Device<D, V> {
    fn write_str(&mut self, text: &str) -> fmt::Result {
        let mut bytes = text.as_bytes();
        while !bytes.is_empty() {
            let sent = self.send_from_memory(bytes).map_err(|_| fmt::Error)?;
            bytes = &bytes[sent..];
        }
        Ok(())
    }
}
