//! The simulated port partner, a PD source driving the UUT.
//!
//! The partner frames messages with its own role and revision stamps and its
//! own rolling message ID, injects them into the transport's receive slot and
//! drains the UUT's transmit slot. Whether the message ID advances is under
//! scenario control, so replays with a stale ID can be scripted.

use core::marker::PhantomData;
use std::sync::Arc;

use embassy_futures::select::{Either, select};
use usbpd_tester_traits::{DataRole, FrameType, PowerRole, Tcpc};

use crate::counters::{Counter, CounterType};
use crate::message::header::{ControlMessageType, DataMessageType, Header, SpecificationRevision};
use crate::message::{MAX_MESSAGE_SIZE, ParseError, PdMessage};
use crate::timers::Timer;
use crate::transport::{Frame, TransportEmulator};

/// How long the partner waits for the UUT to transmit before giving up.
pub const UUT_TX_TIMEOUT_MS: u64 = 500;

/// Errors raised while exchanging messages with the UUT.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PartnerError {
    /// The UUT did not transmit within the bounded wait.
    #[error("the UUT did not transmit within {0} ms")]
    NoTransmission(u64),
    /// The UUT transmitted an unparsable message.
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// The simulated source peer.
pub struct ProtocolPartner<TIMER: Timer> {
    port: Arc<TransportEmulator>,
    power_role: PowerRole,
    data_role: DataRole,
    revision: SpecificationRevision,
    message_id: Counter,
    _timer: PhantomData<TIMER>,
}

impl<TIMER: Timer> ProtocolPartner<TIMER> {
    /// Create a partner on the given port, presenting as a 3.0 source DFP
    /// with a zeroed message ID.
    pub fn new(port: Arc<TransportEmulator>) -> Self {
        Self {
            port,
            power_role: PowerRole::Source,
            data_role: DataRole::Dfp,
            revision: SpecificationRevision::R3_0,
            message_id: Counter::new(CounterType::MessageId),
            _timer: PhantomData,
        }
    }

    /// Select the specification revision stamped into outgoing headers.
    pub fn set_revision(&mut self, revision: SpecificationRevision) {
        self.revision = revision;
    }

    /// The specification revision stamped into outgoing headers.
    pub fn revision(&self) -> SpecificationRevision {
        self.revision
    }

    /// Select the power role stamped into outgoing headers.
    pub fn set_power_role(&mut self, power_role: PowerRole) {
        self.power_role = power_role;
    }

    /// Select the data role stamped into outgoing headers.
    pub fn set_data_role(&mut self, data_role: DataRole) {
        self.data_role = data_role;
    }

    /// Rewind the rolling message ID to zero, as after a (hard) reset.
    pub fn reset_message_id(&mut self) {
        self.message_id.reset();
    }

    /// The message ID that the next non-incrementing send would stamp.
    pub fn message_id(&self) -> u8 {
        self.message_id.value()
    }

    fn header_template(&self) -> Header {
        Header::new_template(self.data_role, self.power_role, self.revision)
    }

    fn advance_message_id(&mut self) {
        // Wrap-around is the normal rolling behavior for message IDs.
        self.message_id.increment().ok();
    }

    fn inject(&self, message: &PdMessage) {
        let mut buffer = [0u8; MAX_MESSAGE_SIZE];
        let size = message.to_bytes(&mut buffer);

        self.port.inject(Frame::sop(&buffer[..size]));
    }

    /// Inject a control message.
    ///
    /// When `increment_id` is set, the rolling ID advances before it is
    /// stamped into the header. Sending without incrementing replays the
    /// previous ID, which a compliant UUT must discard as a duplicate.
    pub fn send_control(&mut self, message_type: ControlMessageType, increment_id: bool) {
        if increment_id {
            self.advance_message_id();
        }

        let header = Header::new_control(self.header_template(), self.message_id, message_type);
        self.inject(&PdMessage::new_control(header));
    }

    /// Inject a data message carrying the given data objects.
    pub fn send_data(&mut self, message_type: DataMessageType, objects: &[u32], increment_id: bool) {
        if increment_id {
            self.advance_message_id();
        }

        let header = Header::new_data(
            self.header_template(),
            self.message_id,
            message_type,
            objects.len() as u8,
        );
        self.inject(&PdMessage::new_data(header, objects));
    }

    /// Inject a hard reset ordered set.
    pub fn send_hard_reset(&self) {
        self.port.inject(Frame::hard_reset());
    }

    /// Whether the UUT has not yet drained the injected message.
    pub fn is_rx_msg_pending(&self) -> bool {
        self.port.is_rx_pending().is_some()
    }

    /// Whether the UUT left a transmitted message undrained.
    pub fn is_uut_tx_pending(&self) -> bool {
        self.port.is_tx_pending()
    }

    /// Wait for the UUT to transmit and parse the frame.
    ///
    /// Hard reset frames come back as [`PdMessage::hard_reset`]. The wait is
    /// bounded by [`UUT_TX_TIMEOUT_MS`] so that a mute UUT fails the scenario
    /// instead of hanging it.
    pub async fn get_uut_tx_data(&self) -> Result<PdMessage, PartnerError> {
        match select(self.port.wait_tx(), TIMER::after_millis(UUT_TX_TIMEOUT_MS)).await {
            Either::First(frame) => match frame.frame_type {
                FrameType::HardReset => Ok(PdMessage::hard_reset()),
                FrameType::Sop => Ok(PdMessage::from_bytes(&frame.bytes)?),
            },
            Either::Second(()) => Err(PartnerError::NoTransmission(UUT_TX_TIMEOUT_MS)),
        }
    }
}
