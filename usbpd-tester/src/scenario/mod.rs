//! Compliance procedures: scripted exchanges with pass/fail verdicts.
//!
//! A [`ComplianceScenario`] owns the whole tester side of the bench: the
//! transport, the VBUS rail, the simulated partner, the state-wait oracle
//! and the policy callback table. The UUT is brought up against the shared
//! halves of those objects and then driven through the procedures below,
//! each of which returns `Ok` when the UUT behaved compliantly.

use std::sync::Arc;

use log::info;
use usbpd_tester_traits::{CcState, FrameType, Notification, PeState, RpValue, TypeCState, UutState, VbusLevel};

use crate::message::header::{ControlMessageType, DataMessageType, MessageType, SpecificationRevision};
use crate::message::pdo::{FixedSupply, FixedVariableRequest};
use crate::message::PdMessage;
use crate::oracle::StateWaitOracle;
use crate::partner::{PartnerError, ProtocolPartner};
use crate::policy::TesterPolicy;
use crate::timers::{Timer, bounds};
use crate::transport::TransportEmulator;
use crate::vbus::VbusEmulator;

#[cfg(test)]
mod tests;

/// Settling period after negotiation or a scripted disturbance, so that
/// stray UUT activity surfaces before the verdict.
const SETTLE_MS: u64 = 500;

/// Settling period after dropping CC and VBUS.
const DISCONNECT_SETTLE_MS: u64 = 200;

/// Bounded wait for ordinary state entries.
const STATE_TIMEOUT_MS: u64 = 1000;

/// Failure verdicts of the compliance procedures.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ScenarioError {
    /// The UUT did not enter the expected state in time.
    #[error("the UUT did not enter {state:?} within {timeout_millis} ms")]
    StateTimeout {
        /// The awaited state.
        state: UutState,
        /// The bounded wait that expired.
        timeout_millis: u64,
    },
    /// An exchange with the UUT failed.
    #[error(transparent)]
    Partner(#[from] PartnerError),
    /// The UUT never asked its policy for a request object.
    #[error("the UUT never built a request object")]
    NoRequestObject,
    /// The UUT replied with an unexpected message type.
    #[error("unexpected reply {found:?}")]
    WrongMessageType {
        /// The message type found.
        found: MessageType,
    },
    /// The request references a PDO the source never offered.
    #[error("requested object position {position} of {num_pdos} offered PDOs")]
    ObjectPositionOutOfRange {
        /// 1-indexed position in the request.
        position: u8,
        /// Number of PDOs the partner advertised.
        num_pdos: usize,
    },
    /// A measured interval fell outside its compliance window.
    #[error("{name} fired after {elapsed} ms, outside [{min}, {max}] ms")]
    TimingOutOfBounds {
        /// Name of the checked timing parameter.
        name: &'static str,
        /// The measured interval in milliseconds.
        elapsed: u64,
        /// Lower bound of the window.
        min: u64,
        /// Upper bound of the window.
        max: u64,
    },
    /// The UUT issued a hard reset where none was allowed.
    #[error("unexpected hard reset from the UUT")]
    UnexpectedHardReset,
    /// The UUT was expected to issue a hard reset but sent data instead.
    #[error("expected a hard reset frame from the UUT")]
    MissingHardReset,
    /// The policy did not receive a required notification.
    #[error("the UUT never delivered {0:?}")]
    NotificationMissing(Notification),
    /// The capabilities the UUT reported differ from those advertised.
    #[error("the UUT reported different source capabilities than advertised")]
    SourceCapsMismatch,
    /// The sink capabilities reply differs from the policy's table.
    #[error("the sink capabilities reply does not match the policy table")]
    SinkCapsMismatch,
    /// The UUT left an injected message undrained.
    #[error("the UUT did not consume the injected message")]
    MessageNotConsumed,
    /// The UUT transmitted where silence was required.
    #[error("unexpected transmission from the UUT")]
    UnexpectedTransmission,
}

fn check_window(name: &'static str, elapsed: u64, min: u64, max: u64) -> Result<(), ScenarioError> {
    if elapsed < min || elapsed > max {
        return Err(ScenarioError::TimingOutOfBounds { name, elapsed, min, max });
    }

    info!("{name} fired after {elapsed} ms, inside [{min}, {max}] ms");
    Ok(())
}

/// The tester-side bench, with the compliance procedures as methods.
pub struct ComplianceScenario<TIMER: Timer> {
    port: Arc<TransportEmulator>,
    vbus: Arc<VbusEmulator>,
    oracle: Arc<StateWaitOracle>,
    policy: Arc<TesterPolicy>,
    partner: ProtocolPartner<TIMER>,
    source_pdo: FixedSupply,
}

impl<TIMER: Timer> Default for ComplianceScenario<TIMER> {
    fn default() -> Self {
        Self::new()
    }
}

impl<TIMER: Timer> ComplianceScenario<TIMER> {
    /// Create a bench advertising a single 5 V / 3 A fixed supply.
    pub fn new() -> Self {
        let port = Arc::new(TransportEmulator::new());
        let vbus = Arc::new(VbusEmulator::new());
        let oracle = Arc::new(StateWaitOracle::new());
        let policy = Arc::new(TesterPolicy::new(oracle.clone()));
        let partner = ProtocolPartner::new(port.clone());

        Self {
            port,
            vbus,
            oracle,
            policy,
            partner,
            source_pdo: FixedSupply::new_from_millis(5000, 3000).with_dual_role_data(true),
        }
    }

    /// The shared port, for handing to the UUT.
    pub fn port(&self) -> Arc<TransportEmulator> {
        self.port.clone()
    }

    /// The shared VBUS rail, for handing to the UUT.
    pub fn vbus(&self) -> Arc<VbusEmulator> {
        self.vbus.clone()
    }

    /// The shared policy table, for installing on the UUT.
    pub fn policy(&self) -> Arc<TesterPolicy> {
        self.policy.clone()
    }

    /// Select the specification revision the partner stamps into headers.
    pub fn set_partner_revision(&mut self, revision: SpecificationRevision) {
        self.partner.set_revision(revision);
    }

    async fn expect_state(&self, state: UutState, timeout_millis: u64) -> Result<u64, ScenarioError> {
        let elapsed = self.oracle.wait_or_timeout::<TIMER>(state, timeout_millis).await;

        if elapsed >= timeout_millis {
            return Err(ScenarioError::StateTimeout { state, timeout_millis });
        }

        Ok(elapsed)
    }

    /// Drop CC and VBUS, then settle and wipe all recorded observations.
    pub async fn disconnect(&mut self) {
        self.port.apply_cc(CcState::Open, CcState::Open);
        self.vbus.apply_level(VbusLevel::Safe0V);
        self.partner.reset_message_id();

        TIMER::after_millis(DISCONNECT_SETTLE_MS).await;

        self.oracle.clear_all();
        self.policy.reset();
    }

    /// Present a 3 A source and wait for the UUT to attach and start
    /// listening for capabilities.
    async fn attach(&mut self) -> Result<(), ScenarioError> {
        self.disconnect().await;

        self.port.apply_rp(RpValue::Current3A0);
        self.vbus.apply_level(VbusLevel::Present);

        self.expect_state(UutState::TypeC(TypeCState::AttachedSnk), STATE_TIMEOUT_MS)
            .await?;
        self.expect_state(
            UutState::PolicyEngine(PeState::SnkWaitForCapabilities),
            STATE_TIMEOUT_MS,
        )
        .await?;

        Ok(())
    }

    fn check_request_message(&self, message: &PdMessage) -> Result<(), ScenarioError> {
        if matches!(message.frame_type, FrameType::HardReset) {
            return Err(ScenarioError::UnexpectedHardReset);
        }

        match message.header.message_type() {
            MessageType::Data(DataMessageType::Request) => (),
            found => return Err(ScenarioError::WrongMessageType { found }),
        }

        let request = FixedVariableRequest(message.objects[0]);
        let position = request.object_position();

        // One PDO on offer, so only position 1 is valid.
        if position == 0 || position as usize > 1 {
            return Err(ScenarioError::ObjectPositionOutOfRange {
                position,
                num_pdos: 1,
            });
        }

        Ok(())
    }

    /// Complete the contract after the UUT's request was drained: Accept,
    /// then PS_RDY, then verify the power supply transition callback.
    async fn uut_sent_request(&mut self) -> Result<(), ScenarioError> {
        self.oracle.clear(UutState::PolicyEngine(PeState::SnkTransitionSink));
        self.oracle.clear(UutState::PolicyEngine(PeState::SnkReady));

        self.partner.send_control(ControlMessageType::Accept, true);
        self.expect_state(UutState::PolicyEngine(PeState::SnkTransitionSink), STATE_TIMEOUT_MS)
            .await?;

        self.partner.send_control(ControlMessageType::PsRdy, true);
        self.expect_state(UutState::PolicyEngine(PeState::SnkReady), STATE_TIMEOUT_MS)
            .await?;

        if !self.policy.take_notification(Notification::TransitionPowerSupply) {
            return Err(ScenarioError::NotificationMissing(Notification::TransitionPowerSupply));
        }

        Ok(())
    }

    /// Advertise capabilities and negotiate the explicit contract.
    async fn negotiate_contract(&mut self) -> Result<(), ScenarioError> {
        self.partner
            .send_data(DataMessageType::SourceCapabilities, &[self.source_pdo.0], true);

        self.expect_state(UutState::PolicyEngine(PeState::SnkSelectCapability), STATE_TIMEOUT_MS)
            .await?;

        if !self.policy.take_request_seen() {
            return Err(ScenarioError::NoRequestObject);
        }

        let request = self.partner.get_uut_tx_data().await?;
        self.check_request_message(&request)?;

        self.uut_sent_request().await?;

        if self.policy.source_caps().as_slice() != [self.source_pdo.0] {
            return Err(ScenarioError::SourceCapsMismatch);
        }

        if !self.policy.notification_seen(Notification::PdConnected) {
            return Err(ScenarioError::NotificationMissing(Notification::PdConnected));
        }

        Ok(())
    }

    /// Bring-up: attach, negotiate a contract and settle into SNK_Ready.
    ///
    /// Every procedure that needs an explicit contract starts here.
    pub async fn bring_up_sink_uut(&mut self) -> Result<(), ScenarioError> {
        self.attach().await?;
        self.negotiate_contract().await?;

        TIMER::after_millis(SETTLE_MS).await;
        self.oracle.clear_all();

        Ok(())
    }

    async fn expect_hard_reset_frame(&self) -> Result<(), ScenarioError> {
        let frame = self.partner.get_uut_tx_data().await?;

        if !matches!(frame.frame_type, FrameType::HardReset) {
            return Err(ScenarioError::MissingHardReset);
        }

        Ok(())
    }

    /// Get_Sink_Cap must be answered with the policy's capability table.
    pub async fn get_sink_cap_response(&mut self) -> Result<(), ScenarioError> {
        self.bring_up_sink_uut().await?;

        self.partner.send_control(ControlMessageType::GetSinkCap, true);
        let reply = self.partner.get_uut_tx_data().await?;

        match reply.header.message_type() {
            MessageType::Data(DataMessageType::SinkCapabilities) => (),
            found => return Err(ScenarioError::WrongMessageType { found }),
        }

        if reply.objects.as_slice() != [TesterPolicy::sink_cap_pdo().0] {
            return Err(ScenarioError::SinkCapsMismatch);
        }

        Ok(())
    }

    /// Get_Source_Cap must be refused: Reject towards a 2.0 partner,
    /// Not_Supported towards a 3.0 partner.
    pub async fn get_source_cap_response(&mut self) -> Result<(), ScenarioError> {
        self.bring_up_sink_uut().await?;

        let expected = match self.partner.revision() {
            SpecificationRevision::R2_0 => ControlMessageType::Reject,
            SpecificationRevision::R3_0 => ControlMessageType::NotSupported,
        };

        self.partner.send_control(ControlMessageType::GetSourceCap, true);
        let reply = self.partner.get_uut_tx_data().await?;

        match reply.header.message_type() {
            MessageType::Control(found) if found == expected => Ok(()),
            found => Err(ScenarioError::WrongMessageType { found }),
        }
    }

    /// The UUT must not hard reset while capabilities arrive inside the
    /// tTypeCSinkWaitCap window, and must then negotiate normally.
    pub async fn sink_wait_cap_deadline(&mut self) -> Result<(), ScenarioError> {
        self.attach().await?;

        // Stay silent until just before the window opens.
        TIMER::after_millis(bounds::T_TYPEC_SINK_WAIT_CAP_MIN_MS - 10).await;

        if self.oracle.is_set(UutState::PolicyEngine(PeState::SnkHardReset)) {
            return Err(ScenarioError::UnexpectedHardReset);
        }

        self.negotiate_contract().await
    }

    /// Without capabilities, the UUT must hard reset inside the
    /// tTypeCSinkWaitCap window.
    pub async fn sink_wait_cap_timeout(&mut self) -> Result<(), ScenarioError> {
        self.attach().await?;

        let elapsed = self
            .oracle
            .wait_or_timeout::<TIMER>(
                UutState::PolicyEngine(PeState::SnkHardReset),
                bounds::T_TYPEC_SINK_WAIT_CAP_MAX_MS + 100,
            )
            .await;

        check_window(
            "tTypeCSinkWaitCap",
            elapsed,
            bounds::T_TYPEC_SINK_WAIT_CAP_MIN_MS,
            bounds::T_TYPEC_SINK_WAIT_CAP_MAX_MS,
        )?;

        self.expect_hard_reset_frame().await
    }

    /// An Accept arriving just inside tSenderResponse must avert the hard
    /// reset and complete the contract.
    pub async fn sender_response_deadline(&mut self) -> Result<(), ScenarioError> {
        self.attach().await?;

        self.partner
            .send_data(DataMessageType::SourceCapabilities, &[self.source_pdo.0], true);
        self.expect_state(UutState::PolicyEngine(PeState::SnkSelectCapability), STATE_TIMEOUT_MS)
            .await?;

        let request = self.partner.get_uut_tx_data().await?;
        self.check_request_message(&request)?;

        // Respond at the last compliant moment.
        TIMER::after_millis(bounds::T_SENDER_RESPONSE_MIN_MS - 1).await;

        if self.oracle.is_set(UutState::PolicyEngine(PeState::SnkHardReset)) {
            return Err(ScenarioError::UnexpectedHardReset);
        }

        self.uut_sent_request().await?;

        // No late hard reset may follow.
        TIMER::after_millis(2 * bounds::T_SENDER_RESPONSE_MAX_MS).await;

        if self.oracle.is_set(UutState::PolicyEngine(PeState::SnkHardReset)) {
            return Err(ScenarioError::UnexpectedHardReset);
        }

        Ok(())
    }

    /// With no response to its request, the UUT must hard reset inside the
    /// tSenderResponse window and report the unresponsive partner.
    pub async fn sender_response_timeout(&mut self) -> Result<(), ScenarioError> {
        self.attach().await?;

        self.partner
            .send_data(DataMessageType::SourceCapabilities, &[self.source_pdo.0], true);
        self.expect_state(UutState::PolicyEngine(PeState::SnkSelectCapability), STATE_TIMEOUT_MS)
            .await?;

        let request = self.partner.get_uut_tx_data().await?;
        self.check_request_message(&request)?;

        let elapsed = self
            .oracle
            .wait_or_timeout::<TIMER>(
                UutState::PolicyEngine(PeState::SnkHardReset),
                bounds::T_SENDER_RESPONSE_MAX_MS + 100,
            )
            .await;

        check_window(
            "tSenderResponse",
            elapsed,
            bounds::T_SENDER_RESPONSE_MIN_MS,
            bounds::T_SENDER_RESPONSE_MAX_MS,
        )?;

        if !self.policy.notification_seen(Notification::PortPartnerNotResponsive) {
            return Err(ScenarioError::NotificationMissing(
                Notification::PortPartnerNotResponsive,
            ));
        }

        self.expect_hard_reset_frame().await
    }

    /// With no PS_RDY after Accept, the UUT must hard reset inside the
    /// tPSTransition window.
    pub async fn ps_transition_timeout(&mut self) -> Result<(), ScenarioError> {
        self.attach().await?;

        self.partner
            .send_data(DataMessageType::SourceCapabilities, &[self.source_pdo.0], true);
        self.expect_state(UutState::PolicyEngine(PeState::SnkSelectCapability), STATE_TIMEOUT_MS)
            .await?;

        let request = self.partner.get_uut_tx_data().await?;
        self.check_request_message(&request)?;

        self.partner.send_control(ControlMessageType::Accept, true);
        self.expect_state(UutState::PolicyEngine(PeState::SnkTransitionSink), STATE_TIMEOUT_MS)
            .await?;

        let elapsed = self
            .oracle
            .wait_or_timeout::<TIMER>(
                UutState::PolicyEngine(PeState::SnkHardReset),
                bounds::T_PS_TRANSITION_MAX_MS + 100,
            )
            .await;

        check_window(
            "tPSTransition",
            elapsed,
            bounds::T_PS_TRANSITION_MIN_MS,
            bounds::T_PS_TRANSITION_MAX_MS,
        )?;

        self.expect_hard_reset_frame().await
    }

    /// A replayed message carrying a stale ID must be drained and ignored,
    /// whether it is a control or a data message.
    pub async fn duplicate_message_id(&mut self) -> Result<(), ScenarioError> {
        self.bring_up_sink_uut().await?;

        // A control message without advancing the rolling ID. A fresh one
        // would draw a Sink_Capabilities reply.
        self.partner.send_control(ControlMessageType::GetSinkCap, false);
        self.expect_stale_message_ignored().await?;

        // A replayed data message must be ignored just the same.
        self.partner
            .send_data(DataMessageType::SourceCapabilities, &[self.source_pdo.0], false);
        self.expect_stale_message_ignored().await?;

        if self.policy.take_request_seen() {
            return Err(ScenarioError::UnexpectedTransmission);
        }

        Ok(())
    }

    async fn expect_stale_message_ignored(&self) -> Result<(), ScenarioError> {
        TIMER::after_millis(SETTLE_MS).await;

        if self.partner.is_rx_msg_pending() {
            return Err(ScenarioError::MessageNotConsumed);
        }

        if self.partner.is_uut_tx_pending() {
            return Err(ScenarioError::UnexpectedTransmission);
        }

        Ok(())
    }

    /// A partner-issued hard reset must drive the UUT through the default
    /// transition, and a fresh contract must come up afterwards.
    pub async fn partner_hard_reset_recovery(&mut self) -> Result<(), ScenarioError> {
        self.bring_up_sink_uut().await?;

        self.partner.send_hard_reset();
        self.expect_state(
            UutState::PolicyEngine(PeState::SnkTransitionToDefault),
            STATE_TIMEOUT_MS,
        )
        .await?;

        if !self.policy.take_notification(Notification::HardResetReceived) {
            return Err(ScenarioError::NotificationMissing(Notification::HardResetReceived));
        }

        self.partner.reset_message_id();
        self.expect_state(
            UutState::PolicyEngine(PeState::SnkWaitForCapabilities),
            STATE_TIMEOUT_MS,
        )
        .await?;

        self.policy.reset();
        self.negotiate_contract().await
    }
}
