//! SETUP packet decoding

use usb_device::{
    control::{Recipient, RequestType},
    UsbDirection,
};

/// The eight bytes of a SETUP packet, as received in the endpoint 0
/// setup buffer. Multi-byte fields are little endian.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SetupPacket([u8; SetupPacket::LEN]);

impl SetupPacket {
    pub const LEN: usize = 8;

    pub const fn new(raw: [u8; Self::LEN]) -> Self {
        SetupPacket(raw)
    }

    /// Build a packet from its fields.
    pub const fn from_fields(request_type: u8, request: u8, value: u16, index: u16, length: u16) -> Self {
        let value = value.to_le_bytes();
        let index = index.to_le_bytes();
        let length = length.to_le_bytes();
        SetupPacket([
            request_type,
            request,
            value[0],
            value[1],
            index[0],
            index[1],
            length[0],
            length[1],
        ])
    }

    pub const fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    /// bmRequestType, bits 4:0
    pub fn recipient(&self) -> Recipient {
        match self.0[0] & 0x1F {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            3 => Recipient::Other,
            _ => Recipient::Reserved,
        }
    }

    /// bmRequestType, bits 6:5
    pub fn request_type(&self) -> RequestType {
        match (self.0[0] >> 5) & 0b11 {
            0 => RequestType::Standard,
            1 => RequestType::Class,
            2 => RequestType::Vendor,
            _ => RequestType::Reserved,
        }
    }

    /// bmRequestType, bit 7
    pub fn direction(&self) -> UsbDirection {
        UsbDirection::from(self.0[0])
    }

    /// bRequest
    pub fn request(&self) -> u8 {
        self.0[1]
    }

    /// wValue
    pub fn value(&self) -> u16 {
        u16::from_le_bytes([self.0[2], self.0[3]])
    }

    /// wIndex
    pub fn index(&self) -> u16 {
        u16::from_le_bytes([self.0[4], self.0[5]])
    }

    /// wLength
    pub fn length(&self) -> u16 {
        u16::from_le_bytes([self.0[6], self.0[7]])
    }

    /// GET_DESCRIPTOR: descriptor type (wValue high) and index (wValue low)
    pub fn descriptor(&self) -> (u8, u8) {
        (self.0[3], self.0[2])
    }

    /// Endpoint recipients: endpoint number (wIndex bits 3:0) and
    /// direction (wIndex bit 7)
    pub fn endpoint(&self) -> (u8, UsbDirection) {
        (self.0[4] & 0xF, UsbDirection::from(self.0[4]))
    }
}

#[cfg(test)]
mod tests {
    use super::SetupPacket;
    use usb_device::{
        control::{Recipient, Request, RequestType},
        UsbDirection,
    };

    #[test]
    fn get_descriptor() {
        let setup = SetupPacket::new([0x80, 0x06, 0x00, 0x02, 0x00, 0x00, 0xFF, 0x00]);
        assert_eq!(setup.direction(), UsbDirection::In);
        assert_eq!(setup.request_type(), RequestType::Standard);
        assert_eq!(setup.recipient(), Recipient::Device);
        assert_eq!(setup.request(), Request::GET_DESCRIPTOR);
        assert_eq!(setup.descriptor(), (2, 0));
        assert_eq!(setup.length(), 255);
    }

    #[test]
    fn class_interface_request() {
        let setup = SetupPacket::new([0x21, 0x20, 0x00, 0x00, 0x00, 0x00, 0x07, 0x00]);
        assert_eq!(setup.direction(), UsbDirection::Out);
        assert_eq!(setup.request_type(), RequestType::Class);
        assert_eq!(setup.recipient(), Recipient::Interface);
        assert_eq!(setup.length(), 7);
    }

    #[test]
    fn endpoint_recipient() {
        let setup = SetupPacket::from_fields(0x02, Request::CLEAR_FEATURE, 0, 0x81, 0);
        assert_eq!(setup.recipient(), Recipient::Endpoint);
        assert_eq!(setup.endpoint(), (1, UsbDirection::In));
        assert_eq!(setup.index(), 0x81);
    }

    #[test]
    fn from_fields() {
        let setup = SetupPacket::from_fields(0x00, Request::SET_ADDRESS, 0x0105, 0, 0);
        assert_eq!(setup.as_bytes(), &[0x00, 0x05, 0x05, 0x01, 0, 0, 0, 0]);
        assert_eq!(setup.value(), 0x0105);
    }

    #[test]
    fn reserved_type() {
        let setup = SetupPacket::new([0x7F, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(setup.request_type(), RequestType::Reserved);
        assert_eq!(setup.recipient(), Recipient::Reserved);
    }
}
