//! Standard requests (USB 2.0, chapter 9)
//!
//! A handler answers a request by arming an endpoint 0 context. A
//! request that arms nothing is stalled by the control engine.

use crate::{
    bdt::{EndpointAddress, Slot},
    descriptors::DescriptorStore,
    device::{Device, DeviceState, VbusSense},
    ral::{self, endpoint_control, sie::ENDPOINT_CONTROL_COUNT, EndpointControl},
    setup::SetupPacket,
};
use usb_device::{
    control::{Recipient, Request, RequestType},
    descriptor::descriptor_type,
    UsbDirection,
};

/// bmAttributes of an isochronous endpoint
const TRANSFER_TYPE_ISOCHRONOUS: u8 = 0b01;
/// Configuration bmAttributes
const SELF_POWERED: u8 = 1 << 6;

impl<D: DescriptorStore, V: VbusSense> Device<D, V> {
    /// Returns `false` if the request isn't a standard request that
    /// this device knows.
    pub(crate) fn standard_request(&mut self, setup: &SetupPacket) -> bool {
        if setup.request_type() != RequestType::Standard {
            return false;
        }
        match setup.request() {
            Request::SET_ADDRESS => {
                self.in_ep[0].acknowledge();
                self.state = DeviceState::Addressing;
            }
            Request::GET_DESCRIPTOR => self.get_descriptor(setup),
            Request::SET_CONFIGURATION => return self.set_configuration(setup),
            Request::GET_CONFIGURATION => {
                let configuration = self.active_configuration;
                self.in_ep[0].transmit_memory(&[configuration]);
            }
            Request::GET_STATUS => self.get_status(setup),
            Request::CLEAR_FEATURE => self.feature(setup, false),
            Request::SET_FEATURE => self.feature(setup, true),
            Request::GET_INTERFACE => self.in_ep[0].transmit_memory(&[0]),
            Request::SET_INTERFACE => self.in_ep[0].acknowledge(),
            // Recognized, but there's nothing to answer with.
            Request::SET_DESCRIPTOR | Request::SYNCH_FRAME => {}
            _ => return false,
        }
        true
    }

    fn get_descriptor(&mut self, setup: &SetupPacket) {
        if setup.direction() != UsbDirection::In {
            return;
        }
        let (kind, index) = setup.descriptor();
        let store = &self.descriptors;
        let ctx = &mut self.in_ep[0];
        let descriptor = match kind {
            descriptor_type::DEVICE => Some(store.device()),
            descriptor_type::CONFIGURATION => {
                if let Some(sections) = store.configuration_sections(index) {
                    ctx.transmit_multi_part(sections);
                }
                return;
            }
            descriptor_type::INTERFACE => store.interface(index),
            descriptor_type::ENDPOINT => store.endpoint(index),
            descriptor_type::STRING => store.string(index),
            _ => None,
        };
        if let Some(descriptor) = descriptor {
            ctx.transmit_persistent(descriptor);
        }
    }

    fn set_configuration(&mut self, setup: &SetupPacket) -> bool {
        if setup.value() > u16::from(self.descriptors.num_configurations()) {
            return false;
        }
        let value = setup.value() as u8;
        self.in_ep[0].acknowledge();

        for number in 1..ENDPOINT_CONTROL_COUNT {
            endpoint_control::register(&self.sie, number).set(EndpointControl::empty());
        }
        self.bdt().clear();
        ral::modify_reg!(ral::sie, self.sie, UCON, PPBRST: 1);
        for ctx in self.in_ep.iter_mut().chain(self.out_ep.iter_mut()) {
            ctx.address_mut().set_slot(Slot::Even);
        }
        ral::modify_reg!(ral::sie, self.sie, UCON, PPBRST: 0);

        self.active_configuration = value;
        if value == 0 {
            self.state = DeviceState::Addressed;
        } else {
            self.state = DeviceState::Configured;
            self.enable_endpoints(value - 1);
            self.cdc_initialize();
        }
        // The SIE's ping-pong pointers restarted at even. Completing the
        // SETUP moves on from the odd slot, so the next SETUP is armed
        // on the even one.
        self.packet.set_slot(Slot::Odd);
        debug!("CONFIGURATION {}", value);
        true
    }

    /// Enable every endpoint that configuration `index` describes.
    fn enable_endpoints(&self, index: u8) {
        let Some(sections) = self.descriptors.configuration_sections(index) else {
            return;
        };
        let endpoints = sections
            .iter()
            .filter(|section| section.len() >= 7 && section[1] == descriptor_type::ENDPOINT);
        for endpoint in endpoints {
            let address = endpoint[2];
            let mut control = EndpointControl::CONDIS;
            control |= match UsbDirection::from(address) {
                UsbDirection::In => EndpointControl::INEN,
                UsbDirection::Out => EndpointControl::OUTEN,
            };
            if endpoint[3] & 0b11 != TRANSFER_TYPE_ISOCHRONOUS {
                control |= EndpointControl::HSHK;
            }
            endpoint_control::register(&self.sie, usize::from(address & 0xF)).insert(control);
        }
    }

    fn self_powered(&self) -> bool {
        let index = self.active_configuration.saturating_sub(1);
        self.descriptors
            .configuration(index)
            .and_then(|configuration| configuration.get(7))
            .map_or(false, |attributes| attributes & SELF_POWERED != 0)
    }

    fn get_status(&mut self, setup: &SetupPacket) {
        let status = match setup.recipient() {
            Recipient::Device => u8::from(self.self_powered()),
            Recipient::Interface => 0,
            Recipient::Endpoint => {
                let (number, direction) = setup.endpoint();
                let address = self
                    .context(number, direction)
                    .map_or(EndpointAddress::new(number, direction), |ctx| ctx.address());
                u8::from(self.bdt().descriptor(address).is_halted())
            }
            _ => return,
        };
        self.in_ep[0].transmit_memory(&[status, 0]);
    }

    fn feature(&mut self, setup: &SetupPacket, set: bool) {
        match (setup.recipient(), setup.value()) {
            (Recipient::Device, Request::FEATURE_DEVICE_REMOTE_WAKEUP) => self.in_ep[0].acknowledge(),
            (Recipient::Endpoint, Request::FEATURE_ENDPOINT_HALT) => {
                let (number, direction) = setup.endpoint();
                if self.set_endpoint_halt(number, direction, set) {
                    self.in_ep[0].acknowledge();
                }
            }
            _ => {}
        }
    }
}
