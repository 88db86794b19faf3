//! Descriptor tables
//!
//! The device core looks descriptors up through [`DescriptorStore`].
//! [`CdcAcmDescriptors`] is a complete composite CDC-ACM set that
//! matches the endpoints the CDC pump drives.

use usb_device::descriptor::descriptor_type;

/// Read-only descriptor lookup
///
/// Every table is `'static`; the core streams them straight from
/// program storage.
pub trait DescriptorStore {
    /// The 18 byte device descriptor.
    fn device(&self) -> &'static [u8];
    /// The 9 byte header of configuration `index`.
    fn configuration(&self, index: u8) -> Option<&'static [u8]>;
    /// Configuration `index` with all interface, class and endpoint
    /// descriptors, in the order they're sent to the host.
    fn configuration_sections(&self, index: u8) -> Option<&'static [&'static [u8]]>;
    fn interface(&self, index: u8) -> Option<&'static [u8]>;
    fn endpoint(&self, index: u8) -> Option<&'static [u8]>;
    fn string(&self, index: u8) -> Option<&'static [u8]>;

    /// bNumConfigurations of the device descriptor.
    fn num_configurations(&self) -> u8 {
        self.device().get(17).copied().unwrap_or(0)
    }
}

/// Vendor ID of the default descriptors
pub const VENDOR_ID: u16 = 0x03EB;
/// Product ID of the default descriptors
pub const PRODUCT_ID: u16 = 0x2122;

/// Communications device class
const CLASS_CDC: u8 = 0x02;
/// Abstract control model subclass
const SUBCLASS_ACM: u8 = 0x02;
/// CDC data interface class
const CLASS_CDC_DATA: u8 = 0x0A;
const CS_INTERFACE: u8 = 0x24;

const ENDPOINT_BULK: u8 = 0x02;
const ENDPOINT_INTERRUPT: u8 = 0x03;

/// Self powered, no remote wakeup
const CONFIG_ATTRIBUTES: u8 = 0x80 | 0x40;

static DEVICE: [u8; 18] = [
    18,
    descriptor_type::DEVICE,
    0x00,
    0x02, // USB 2.0
    CLASS_CDC,
    0x00,
    0x00,
    crate::buffer::EP0_PACKET_LEN as u8,
    VENDOR_ID.to_le_bytes()[0],
    VENDOR_ID.to_le_bytes()[1],
    PRODUCT_ID.to_le_bytes()[0],
    PRODUCT_ID.to_le_bytes()[1],
    0x01,
    0x00, // device release 0.01
    1,    // iManufacturer
    2,    // iProduct
    0,    // iSerialNumber
    1,    // bNumConfigurations
];

static INTERFACE_ASSOCIATION: [u8; 8] = [
    8,
    descriptor_type::IAD,
    0, // first interface
    2, // interface count
    CLASS_CDC,
    SUBCLASS_ACM,
    0x00,
    3,
];

static COMM_INTERFACE: [u8; 9] = [
    9,
    descriptor_type::INTERFACE,
    0, // bInterfaceNumber
    0, // bAlternateSetting
    1, // bNumEndpoints
    CLASS_CDC,
    SUBCLASS_ACM,
    0x00,
    0,
];

static CDC_HEADER: [u8; 5] = [5, CS_INTERFACE, 0x00, 0x10, 0x01];
/// SET/GET_LINE_CODING and SET_CONTROL_LINE_STATE
static CDC_ACM: [u8; 4] = [4, CS_INTERFACE, 0x02, 0x02];
static CDC_UNION: [u8; 5] = [5, CS_INTERFACE, 0x06, 0, 1];
static CDC_CALL_MANAGEMENT: [u8; 5] = [5, CS_INTERFACE, 0x01, 0x01, 1];

static NOTIFICATION_ENDPOINT: [u8; 7] = [
    7,
    descriptor_type::ENDPOINT,
    0x82,
    ENDPOINT_INTERRUPT,
    crate::buffer::DATA_PACKET_LEN as u8,
    0x00,
    1, // 1ms
];

static DATA_INTERFACE: [u8; 9] = [
    9,
    descriptor_type::INTERFACE,
    1,
    0,
    2,
    CLASS_CDC_DATA,
    0x00,
    0x00,
    0,
];

static DATA_IN_ENDPOINT: [u8; 7] = [
    7,
    descriptor_type::ENDPOINT,
    0x81,
    ENDPOINT_BULK,
    crate::buffer::DATA_PACKET_LEN as u8,
    0x00,
    1,
];

static DATA_OUT_ENDPOINT: [u8; 7] = [
    7,
    descriptor_type::ENDPOINT,
    0x01,
    ENDPOINT_BULK,
    crate::buffer::DATA_PACKET_LEN as u8,
    0x00,
    1,
];

/// Every section of the configuration, in order
const CONFIGURATION_LEN: usize = 9 + 8 + 9 + 5 + 4 + 5 + 5 + 7 + 9 + 7 + 7;

static CONFIGURATION: [u8; 9] = [
    9,
    descriptor_type::CONFIGURATION,
    (CONFIGURATION_LEN as u16).to_le_bytes()[0],
    (CONFIGURATION_LEN as u16).to_le_bytes()[1],
    2, // bNumInterfaces
    1, // bConfigurationValue
    3, // iConfiguration
    CONFIG_ATTRIBUTES,
    50, // 100mA
];

static CONFIGURATION_SECTIONS: [&[u8]; 11] = [
    &CONFIGURATION,
    &INTERFACE_ASSOCIATION,
    &COMM_INTERFACE,
    &CDC_HEADER,
    &CDC_ACM,
    &CDC_UNION,
    &CDC_CALL_MANAGEMENT,
    &NOTIFICATION_ENDPOINT,
    &DATA_INTERFACE,
    &DATA_IN_ENDPOINT,
    &DATA_OUT_ENDPOINT,
];

static INTERFACES: [&[u8]; 2] = [&COMM_INTERFACE, &DATA_INTERFACE];
static ENDPOINTS: [&[u8]; 3] = [&NOTIFICATION_ENDPOINT, &DATA_IN_ENDPOINT, &DATA_OUT_ENDPOINT];

/// Builds a string descriptor from ASCII text.
const fn string_descriptor<const N: usize>(text: &[u8]) -> [u8; N] {
    assert!(N == 2 + 2 * text.len());
    let mut descriptor = [0; N];
    descriptor[0] = N as u8;
    descriptor[1] = descriptor_type::STRING;
    let mut i = 0;
    while i < text.len() {
        descriptor[2 + 2 * i] = text[i];
        i += 1;
    }
    descriptor
}

/// English (United States)
static LANGUAGES: [u8; 4] = [4, descriptor_type::STRING, 0x09, 0x04];
static MANUFACTURER: [u8; 18] = string_descriptor(b"bdt-usbd");
static PRODUCT: [u8; 38] = string_descriptor(b"CDC Serial Adapter");
static CONFIGURATION_NAME: [u8; 34] = string_descriptor(b"Virtual COM Port");

static STRINGS: [&[u8]; 4] = [&LANGUAGES, &MANUFACTURER, &PRODUCT, &CONFIGURATION_NAME];

/// The default composite CDC-ACM descriptors
///
/// Interface 0 is the communication interface, with interrupt
/// endpoint 0x82. Interface 1 is the data interface, with bulk
/// endpoints 0x81 and 0x01.
#[derive(Debug, Default, Clone, Copy)]
pub struct CdcAcmDescriptors;

impl DescriptorStore for CdcAcmDescriptors {
    fn device(&self) -> &'static [u8] {
        &DEVICE
    }
    fn configuration(&self, index: u8) -> Option<&'static [u8]> {
        (index == 0).then_some(&CONFIGURATION[..])
    }
    fn configuration_sections(&self, index: u8) -> Option<&'static [&'static [u8]]> {
        (index == 0).then_some(&CONFIGURATION_SECTIONS[..])
    }
    fn interface(&self, index: u8) -> Option<&'static [u8]> {
        INTERFACES.get(usize::from(index)).copied()
    }
    fn endpoint(&self, index: u8) -> Option<&'static [u8]> {
        ENDPOINTS.get(usize::from(index)).copied()
    }
    fn string(&self, index: u8) -> Option<&'static [u8]> {
        STRINGS.get(usize::from(index)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::{CdcAcmDescriptors, DescriptorStore};
    use usb_device::descriptor::descriptor_type;

    #[test]
    fn device() {
        let device = CdcAcmDescriptors.device();
        assert_eq!(device.len(), usize::from(device[0]));
        assert_eq!(device[1], descriptor_type::DEVICE);
        assert_eq!(u16::from_le_bytes([device[8], device[9]]), 0x03EB);
        assert_eq!(u16::from_le_bytes([device[10], device[11]]), 0x2122);
        assert_eq!(CdcAcmDescriptors.num_configurations(), 1);
    }

    #[test]
    fn configuration_total_length() {
        let sections = CdcAcmDescriptors.configuration_sections(0).unwrap();
        assert_eq!(sections.len(), 11);
        let total: usize = sections.iter().map(|section| section.len()).sum();
        assert_eq!(total, 75);
        let header = CdcAcmDescriptors.configuration(0).unwrap();
        assert_eq!(usize::from(u16::from_le_bytes([header[2], header[3]])), total);
        for section in sections {
            assert_eq!(usize::from(section[0]), section.len());
        }
        assert!(CdcAcmDescriptors.configuration(1).is_none());
    }

    #[test]
    fn strings() {
        let store = CdcAcmDescriptors;
        assert_eq!(store.string(0).unwrap(), &[4, 3, 0x09, 0x04]);
        let manufacturer = store.string(1).unwrap();
        assert_eq!(usize::from(manufacturer[0]), manufacturer.len());
        assert_eq!(&manufacturer[2..6], &[b'b', 0, b'd', 0]);
        assert!(store.string(4).is_none());
    }

    #[test]
    fn endpoints() {
        let store = CdcAcmDescriptors;
        let addresses: [u8; 3] = core::array::from_fn(|i| store.endpoint(i as u8).unwrap()[2]);
        assert_eq!(addresses, [0x82, 0x81, 0x01]);
        assert!(store.endpoint(3).is_none());
        assert_eq!(store.interface(1).unwrap()[5], 0x0A);
    }
}
