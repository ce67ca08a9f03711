//! Wire-compatible PD message header.
//!
//! The bit layout is consumed directly by the UUT's protocol layer:
//! message type, port data role, specification revision, port power role,
//! message ID (3 bits), number of data objects (3 bits) and the extended
//! flag.

use byteorder::{ByteOrder, LittleEndian};
use proc_bitfield::bitfield;

use crate::counters::Counter;
use crate::message::ParseError;
use crate::{DataRole, PowerRole};

bitfield! {
    /// The 16-bit message header. Every message starts with it.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Header(pub u16): Debug, FromStorage, IntoStorage {
        /// Set for extended messages. This tester only handles standard
        /// messages; the flag is carried so the UUT sees the real layout.
        pub extended: bool @ 15,
        /// The number of 32-bit data objects that follow the header.
        pub num_objects: u8 [get usize] @ 12..=14,
        /// Rolling counter, maintained by the originator of the message.
        pub message_id: u8 @ 9..=11,
        /// The originator's power role (0 -> sink, 1 -> source).
        pub port_power_role: bool [get PowerRole, set PowerRole] @ 8,
        /// The specification revision (01b -> 2.0, 10b -> 3.0).
        pub spec_revision: u8 [try_get SpecificationRevision, set SpecificationRevision] @ 6..=7,
        /// The originator's data role (0 -> UFP, 1 -> DFP).
        pub port_data_role: bool [get DataRole, set DataRole] @ 5,
        /// The message type code. Interpreted against `num_objects`.
        pub message_type_raw: u8 @ 0..=4,
    }
}

impl Header {
    /// Create a header template carrying the given role and revision stamps.
    pub fn new_template(
        port_data_role: DataRole,
        port_power_role: PowerRole,
        spec_revision: SpecificationRevision,
    ) -> Self {
        Self(0)
            .with_port_data_role(port_data_role)
            .with_port_power_role(port_power_role)
            .with_spec_revision(spec_revision)
    }

    /// Create a control message header from a template.
    pub fn new_control(template: Self, message_id: Counter, message_type: ControlMessageType) -> Self {
        template
            .with_message_id(message_id.value())
            .with_message_type_raw(message_type as u8)
            .with_num_objects(0)
            .with_extended(false)
    }

    /// Create a data message header from a template.
    pub fn new_data(template: Self, message_id: Counter, message_type: DataMessageType, num_objects: u8) -> Self {
        template
            .with_message_id(message_id.value())
            .with_message_type_raw(message_type as u8)
            .with_num_objects(num_objects)
            .with_extended(false)
    }

    /// Parse a header from its binary representation.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, ParseError> {
        if buf.len() < 2 {
            return Err(ParseError::InvalidLength {
                expected: 2,
                found: buf.len(),
            });
        }

        let header = Header(LittleEndian::read_u16(buf));
        // Reject reserved revision codes early.
        header.spec_revision()?;
        Ok(header)
    }

    /// Serialize the header, returning the number of written bytes.
    pub fn to_bytes(self, buf: &mut [u8]) -> usize {
        LittleEndian::write_u16(buf, self.0);
        2
    }

    /// Extract the message type that the header encodes.
    pub fn message_type(&self) -> MessageType {
        if self.num_objects() == 0 {
            MessageType::Control(self.message_type_raw().into())
        } else {
            MessageType::Data(self.message_type_raw().into())
        }
    }
}

/// Supported specification revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum SpecificationRevision {
    /// Revision 2.0.
    R2_0,
    /// Revision 3.0.
    R3_0,
}

impl TryFrom<u8> for SpecificationRevision {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0b01 => Ok(Self::R2_0),
            0b10 => Ok(Self::R3_0),
            _ => Err(ParseError::UnsupportedSpecificationRevision(value)),
        }
    }
}

impl From<SpecificationRevision> for u8 {
    fn from(value: SpecificationRevision) -> Self {
        match value {
            SpecificationRevision::R2_0 => 0b01,
            SpecificationRevision::R3_0 => 0b10,
        }
    }
}

/// The type of message that a header encodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageType {
    /// A control message (no data objects).
    Control(ControlMessageType),
    /// A data message (one or more data objects).
    Data(DataMessageType),
}

/// Control message type codes.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlMessageType {
    GoodCRC = 0b0_0001,
    GotoMin = 0b0_0010,
    Accept = 0b0_0011,
    Reject = 0b0_0100,
    Ping = 0b0_0101,
    PsRdy = 0b0_0110,
    GetSourceCap = 0b0_0111,
    GetSinkCap = 0b0_1000,
    DrSwap = 0b0_1001,
    PrSwap = 0b0_1010,
    VconnSwap = 0b0_1011,
    Wait = 0b0_1100,
    SoftReset = 0b0_1101,
    NotSupported = 0b1_0000,
    Reserved,
}

impl From<u8> for ControlMessageType {
    fn from(value: u8) -> Self {
        match value {
            0b0_0001 => Self::GoodCRC,
            0b0_0010 => Self::GotoMin,
            0b0_0011 => Self::Accept,
            0b0_0100 => Self::Reject,
            0b0_0101 => Self::Ping,
            0b0_0110 => Self::PsRdy,
            0b0_0111 => Self::GetSourceCap,
            0b0_1000 => Self::GetSinkCap,
            0b0_1001 => Self::DrSwap,
            0b0_1010 => Self::PrSwap,
            0b0_1011 => Self::VconnSwap,
            0b0_1100 => Self::Wait,
            0b0_1101 => Self::SoftReset,
            0b1_0000 => Self::NotSupported,
            _ => Self::Reserved,
        }
    }
}

/// Data message type codes.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataMessageType {
    SourceCapabilities = 0b0_0001,
    Request = 0b0_0010,
    Bist = 0b0_0011,
    SinkCapabilities = 0b0_0100,
    VendorDefined = 0b0_1111,
    Reserved,
}

impl From<u8> for DataMessageType {
    fn from(value: u8) -> Self {
        match value {
            0b0_0001 => Self::SourceCapabilities,
            0b0_0010 => Self::Request,
            0b0_0011 => Self::Bist,
            0b0_0100 => Self::SinkCapabilities,
            0b0_1111 => Self::VendorDefined,
            _ => Self::Reserved,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::CounterType;

    fn template() -> Header {
        Header::new_template(DataRole::Ufp, PowerRole::Source, SpecificationRevision::R3_0)
    }

    #[test]
    fn control_header_round_trip() {
        let header = Header::new_control(
            template(),
            Counter::new_from_value(CounterType::MessageId, 5),
            ControlMessageType::Accept,
        );

        let mut buf = [0u8; 2];
        assert_eq!(header.to_bytes(&mut buf), 2);

        let parsed = Header::from_bytes(&buf).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.message_id(), 5);
        assert_eq!(
            parsed.message_type(),
            MessageType::Control(ControlMessageType::Accept)
        );
        assert_eq!(parsed.port_power_role(), PowerRole::Source);
    }

    #[test]
    fn data_header_carries_object_count() {
        let header = Header::new_data(
            template(),
            Counter::new_from_value(CounterType::MessageId, 1),
            DataMessageType::SourceCapabilities,
            3,
        );

        assert_eq!(header.num_objects(), 3);
        assert_eq!(
            header.message_type(),
            MessageType::Data(DataMessageType::SourceCapabilities)
        );
    }

    #[test]
    fn reserved_revision_is_rejected() {
        // Revision field set to the reserved 11b pattern.
        let raw = Header(0).with_message_type_raw(ControlMessageType::Accept as u8).0 | (0b11 << 6);

        let mut buf = [0u8; 2];
        byteorder::LittleEndian::write_u16(&mut buf, raw);

        assert!(matches!(
            Header::from_bytes(&buf),
            Err(ParseError::UnsupportedSpecificationRevision(0b11))
        ));
    }
}
