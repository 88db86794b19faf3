//! Endpoint 0 control transfers
//!
//! A control transfer runs SETUP, an optional data stage, and a status
//! stage. After the SETUP is dispatched, the engine looks at which
//! endpoint 0 context the handler armed:
//!
//! - IN armed, device-to-host request: `Tx`. Send data, receive the
//!   status OUT.
//! - IN armed, host-to-device request: `Rx` with no data. Send the
//!   status IN right away.
//! - Only OUT armed: `Rx`. Receive data, then send the status IN.
//! - Nothing armed: the request isn't supported. Stall it.

use crate::{
    bd::{Arm, Pid, Returned, Toggle},
    buffer::{Region, EP0_DATA, EP0_PACKET_LEN, EP0_SETUP},
    descriptors::DescriptorStore,
    device::{setup_arm, Device, DeviceState, VbusSense},
    endpoint::{Completion, INLINE_CAPACITY},
    ral,
    setup::SetupPacket,
};
use usb_device::{
    control::{Request, RequestType},
    UsbDirection,
};

/// Direction of the control transfer in progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Wait,
    /// Device to host
    Tx,
    /// Host to device
    Rx,
}

/// Tracks the end of a control read
///
/// Sending the final (short or zero length) packet arms the
/// arbitration. Any IN token after that is answered with STALL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallState {
    Idle,
    Armed,
    Stalled,
}

/// Guards the status stage, so that it's set up once per transfer
///
/// Several events may try to start the status stage: the last data
/// packet, and the frame timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StatusStage {
    NotEntered,
    Entered,
    Done,
}

impl StatusStage {
    /// Returns `true` only for the first caller.
    pub(crate) fn enter(&mut self) -> bool {
        let first = *self == StatusStage::NotEntered;
        if first {
            *self = StatusStage::Entered;
        }
        first
    }

    pub(crate) fn finish(&mut self) {
        *self = StatusStage::Done;
    }
}

pub(crate) struct Control {
    pub(crate) state: ControlState,
    pub(crate) stall: StallState,
    pub(crate) status: StatusStage,
    /// Frames left before the status stage is forced
    pub(crate) timeout: u8,
    /// The request being serviced
    pub(crate) setup: SetupPacket,
}

impl Control {
    pub(crate) const fn new() -> Self {
        Control {
            state: ControlState::Wait,
            stall: StallState::Idle,
            status: StatusStage::NotEntered,
            timeout: 0,
            setup: SetupPacket::new([0; SetupPacket::LEN]),
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::new();
    }

    /// State after power up. Nothing may be sent until a SETUP arrives.
    pub(crate) fn enter_initial_state(&mut self) {
        self.state = ControlState::Wait;
        self.stall = StallState::Stalled;
        self.timeout = 0;
    }
}

impl<D: DescriptorStore, V: VbusSense> Device<D, V> {
    pub fn control_state(&self) -> ControlState {
        self.control.state
    }

    pub fn stall_state(&self) -> StallState {
        self.control.stall
    }

    pub(crate) fn on_control_transaction(&mut self) {
        self.control.timeout = self.config.status_timeout;
        match self.packet.direction() {
            UsbDirection::In => self.on_control_in(),
            UsbDirection::Out => match self.bdt().descriptor(self.packet).observe() {
                Some(returned) if returned.pid == Pid::Setup => self.on_setup(returned),
                _ => self.on_control_out(),
            },
        }
    }

    fn on_setup(&mut self, returned: Returned) {
        let mut raw = [0; SetupPacket::LEN];
        self.memory().read(returned.address, &mut raw);
        let setup = SetupPacket::new(raw);
        trace!("SETUP {}", raw);

        // Take back everything endpoint 0 had armed, whatever the SIE
        // was doing with it.
        let bdt = self.bdt();
        let in_address = self.in_ep[0].address();
        bdt.descriptor(in_address).reclaim();
        bdt.descriptor(in_address.companion()).reclaim();
        bdt.descriptor(self.out_ep[0].address()).reclaim();

        self.control.stall = StallState::Idle;
        self.control.state = ControlState::Wait;
        self.control.status = StatusStage::NotEntered;
        self.control.setup = setup;
        self.in_ep[0].reset();
        self.out_ep[0].reset();

        if !self.standard_request(&setup) && !self.class_request(&setup) {
            debug!("STALL request {:x} {:x}", raw[0], raw[1]);
        }
        self.complete_setup();
    }

    fn complete_setup(&mut self) {
        ral::modify_reg!(ral::sie, self.sie, UCON, PKTDIS: 0);

        let bdt = self.bdt();
        let next_setup = self.packet.with_slot(self.packet.slot().other());
        if self.in_ep[0].needs_arming() {
            if self.control.setup.direction() == UsbDirection::In {
                self.control.state = ControlState::Tx;
                self.start_data_stage();
            } else {
                self.control.state = ControlState::Rx;
                bdt.descriptor(next_setup).arm(setup_arm());
            }
            self.status_stage();
        } else if self.out_ep[0].needs_arming() {
            self.control.state = ControlState::Rx;
            self.start_data_stage();
        } else {
            bdt.descriptor(next_setup).arm(setup_arm());
            bdt.descriptor(self.in_ep[0].address()).arm(Arm::stall());
        }
    }

    /// Arm the first packet of the data stage.
    fn start_data_stage(&mut self) {
        let bdt = self.bdt();
        match self.control.state {
            ControlState::Rx => {
                bdt.descriptor(self.out_ep[0].address())
                    .arm(Arm::receive(EP0_DATA.offset, EP0_PACKET_LEN).toggle(Toggle::Data1));
            }
            ControlState::Tx => {
                self.in_ep[0].limit(self.control.setup.length());
                let len = self.load_control_packet();
                bdt.descriptor(self.in_ep[0].address())
                    .arm(Arm::transmit(EP0_DATA.offset, len).toggle(Toggle::Data1));
            }
            ControlState::Wait => {}
        }
    }

    /// Copy the next packet of a control read into the data buffer.
    fn load_control_packet(&mut self) -> u16 {
        let remaining = self.in_ep[0].remaining();
        let len = self.load_packet(0, EP0_DATA);
        if remaining < EP0_PACKET_LEN {
            self.control.stall = match self.control.stall {
                StallState::Idle => StallState::Armed,
                StallState::Armed | StallState::Stalled => StallState::Stalled,
            };
        }
        len
    }

    /// Copy the next packet of IN endpoint `endpoint` into `region`, and
    /// return its length.
    pub(crate) fn load_packet(&mut self, endpoint: usize, region: Region) -> u16 {
        let mut packet = [0; INLINE_CAPACITY];
        let capacity = usize::from(region.len).min(packet.len());
        let len = self.in_ep[endpoint].fill(&mut packet[..capacity]);
        self.memory().write(region.offset, &packet[..len]);
        len as u16
    }

    fn on_control_in(&mut self) {
        let bdt = self.bdt();
        let last = bdt
            .descriptor(self.packet)
            .observe()
            .map_or(Toggle::Data1, |returned| returned.toggle);

        if self.state == DeviceState::Addressing {
            self.commit_address();
        }

        if self.control.state == ControlState::Tx {
            let len = self.load_control_packet();
            let bd = bdt.descriptor(self.in_ep[0].address());
            if self.control.stall == StallState::Stalled {
                bd.arm(Arm::stall());
            } else {
                bd.arm(Arm::transmit(EP0_DATA.offset, len).toggle(last.toggled()));
            }
        } else {
            if self.out_ep[0].needs_arming() {
                self.run_completion();
                self.out_ep[0].set_needs_arming(false);
            }
            self.control.state = ControlState::Wait;
        }
    }

    fn on_control_out(&mut self) {
        if self.control.state == ControlState::Rx {
            self.read_control_packet();
        } else {
            self.control.state = ControlState::Wait;
            let bd = self.bdt().descriptor(self.out_ep[0].address());
            if !bd.is_owned_by_controller() {
                bd.arm(setup_arm());
            }
        }
    }

    fn read_control_packet(&mut self) {
        let Some(returned) = self.bdt().descriptor(self.packet).observe() else {
            return;
        };
        let mut packet = [0; EP0_PACKET_LEN as usize];
        let len = usize::from(returned.count).min(packet.len());
        self.memory().read(returned.address, &mut packet[..len]);
        self.out_ep[0].drain(&packet[..len]);

        let bd = self.bdt().descriptor(self.out_ep[0].address());
        if self.out_ep[0].remaining() > 0 {
            bd.arm(Arm::receive(EP0_DATA.offset, EP0_PACKET_LEN).toggle(returned.toggle.toggled()));
        } else {
            bd.arm(setup_arm());
            self.run_completion();
            self.out_ep[0].set_needs_arming(false);
            self.status_stage();
        }
    }

    fn run_completion(&mut self) {
        match self.out_ep[0].take_completion() {
            Some(Completion::SetLineCoding) => self.apply_line_coding(),
            None => {}
        }
    }

    /// Arm the status stage, at most once per control transfer.
    pub(crate) fn status_stage(&mut self) {
        if !self.control.status.enter() {
            return;
        }
        let bdt = self.bdt();
        match self.control.state {
            ControlState::Rx => {
                bdt.descriptor(self.in_ep[0].address())
                    .arm(Arm::transmit(EP0_DATA.offset, 0).toggle(Toggle::Data1));
            }
            ControlState::Tx => {
                // The status OUT, then the next SETUP one slot ahead.
                let out = self.out_ep[0].address_mut();
                bdt.descriptor(*out)
                    .arm(Arm::receive(EP0_SETUP.offset, EP0_PACKET_LEN).toggle(Toggle::Data1));
                out.toggle_slot();
                bdt.descriptor(*out).arm(setup_arm());
                out.toggle_slot();
            }
            ControlState::Wait => {}
        }
        self.control.status.finish();
    }

    /// SET_ADDRESS takes effect once its status stage completes.
    fn commit_address(&mut self) {
        let setup = self.control.setup;
        let [low, high] = setup.value().to_le_bytes();
        let valid = setup.request_type() == RequestType::Standard
            && setup.request() == Request::SET_ADDRESS
            && high == 0
            && low <= 0x7F;
        let address = if valid {
            low
        } else {
            warn!("Malformed SET_ADDRESS {:x}", setup.value());
            0
        };
        ral::write_reg!(ral::sie, self.sie, UADDR, ADDR: address);
        self.state = if address == 0 {
            DeviceState::Waiting
        } else {
            DeviceState::Addressed
        };
        debug!("ADDRESS {}", address);
    }
}
