//! PD message framing, serialization and parsing.

pub mod header;
pub mod pdo;

use byteorder::{ByteOrder, LittleEndian};
use heapless::Vec;
use usbpd_tester_traits::FrameType;

use header::Header;

/// Maximum number of data objects in a standard message.
pub const MAX_OBJECTS: usize = 7;

/// Maximum serialized size of a standard message (header plus objects).
pub const MAX_MESSAGE_SIZE: usize = 2 + 4 * MAX_OBJECTS;

/// Errors that can occur during message or header parsing.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The input buffer has an invalid length.
    #[error("invalid input buffer length (expected {expected:?}, found {found:?})")]
    InvalidLength {
        /// The expected length.
        expected: usize,
        /// The actual length found.
        found: usize,
    },
    /// The specification revision field is reserved or unsupported.
    #[error("unsupported specification revision `{0}`")]
    UnsupportedSpecificationRevision(u8),
    /// The payload length does not match the header's object count.
    #[error("payload of {payload_len} bytes does not match {num_objects} data objects")]
    PayloadMismatch {
        /// Number of data objects announced by the header.
        num_objects: usize,
        /// Actual payload length in bytes.
        payload_len: usize,
    },
}

/// A PD message as it crosses the mock transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdMessage {
    /// Framing of the packet.
    pub frame_type: FrameType,
    /// The message header.
    pub header: Header,
    /// The data objects. Always `header.num_objects()` entries.
    pub objects: Vec<u32, MAX_OBJECTS>,
}

impl PdMessage {
    /// Create a standard message without data objects.
    pub fn new_control(header: Header) -> Self {
        Self {
            frame_type: FrameType::Sop,
            header,
            objects: Vec::new(),
        }
    }

    /// Create a standard message carrying the given data objects.
    ///
    /// The header's object count must match `objects.len()`.
    pub fn new_data(header: Header, objects: &[u32]) -> Self {
        debug_assert_eq!(header.num_objects(), objects.len());

        Self {
            frame_type: FrameType::Sop,
            header,
            objects: Vec::from_slice(objects).expect("at most 7 data objects"),
        }
    }

    /// The hard reset sentinel frame. Bypasses normal framing entirely.
    pub fn hard_reset() -> Self {
        Self {
            frame_type: FrameType::HardReset,
            header: Header(0),
            objects: Vec::new(),
        }
    }

    /// Serialize the message, returning the number of written bytes.
    ///
    /// Hard reset frames carry no payload and serialize to zero bytes.
    pub fn to_bytes(&self, buffer: &mut [u8]) -> usize {
        if matches!(self.frame_type, FrameType::HardReset) {
            return 0;
        }

        let mut size = self.header.to_bytes(buffer);
        for object in &self.objects {
            LittleEndian::write_u32(&mut buffer[size..], *object);
            size += 4;
        }

        size
    }

    /// Parse a standard (SOP) message from its binary representation.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        let header = Header::from_bytes(data)?;
        let payload = &data[2..];

        if payload.len() != 4 * header.num_objects() {
            return Err(ParseError::PayloadMismatch {
                num_objects: header.num_objects(),
                payload_len: payload.len(),
            });
        }

        let objects = payload
            .chunks_exact(4)
            .map(LittleEndian::read_u32)
            .collect::<Vec<u32, MAX_OBJECTS>>();

        Ok(Self {
            frame_type: FrameType::Sop,
            header,
            objects,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::{Counter, CounterType};
    use crate::message::header::{ControlMessageType, DataMessageType, MessageType, SpecificationRevision};
    use crate::{DataRole, PowerRole};

    fn template() -> Header {
        Header::new_template(DataRole::Ufp, PowerRole::Source, SpecificationRevision::R2_0)
    }

    #[test]
    fn data_message_round_trip_preserves_objects() {
        let objects = [0x2801_900A, 0x0001_912C, 0xDEAD_BEEF];
        let header = Header::new_data(
            template(),
            Counter::new_from_value(CounterType::MessageId, 2),
            DataMessageType::SourceCapabilities,
            objects.len() as u8,
        );
        let message = PdMessage::new_data(header, &objects);

        let mut buffer = [0u8; MAX_MESSAGE_SIZE];
        let size = message.to_bytes(&mut buffer);
        assert_eq!(size, 2 + 4 * objects.len());

        let parsed = PdMessage::from_bytes(&buffer[..size]).unwrap();
        assert_eq!(parsed, message);
        assert_eq!(parsed.objects.as_slice(), &objects);
    }

    #[test]
    fn control_message_serializes_to_header_only() {
        let header = Header::new_control(
            template(),
            Counter::new(CounterType::MessageId),
            ControlMessageType::GetSinkCap,
        );
        let message = PdMessage::new_control(header);

        let mut buffer = [0u8; MAX_MESSAGE_SIZE];
        assert_eq!(message.to_bytes(&mut buffer), 2);

        let parsed = PdMessage::from_bytes(&buffer[..2]).unwrap();
        assert_eq!(
            parsed.header.message_type(),
            MessageType::Control(ControlMessageType::GetSinkCap)
        );
        assert!(parsed.objects.is_empty());
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let header = Header::new_data(
            template(),
            Counter::new(CounterType::MessageId),
            DataMessageType::Request,
            1,
        );
        let message = PdMessage::new_data(header, &[0x1000_280A]);

        let mut buffer = [0u8; MAX_MESSAGE_SIZE];
        let size = message.to_bytes(&mut buffer);

        assert!(matches!(
            PdMessage::from_bytes(&buffer[..size - 1]),
            Err(ParseError::PayloadMismatch { num_objects: 1, payload_len: 3 })
        ));
    }
}
