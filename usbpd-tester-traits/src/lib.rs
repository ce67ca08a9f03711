//! Contracts between the compliance tester and the unit under test (UUT).
//!
//! The tester drives a sink policy-engine implementation exclusively through
//! the traits in this crate: the UUT consumes the port controller via [`Tcpc`]
//! and VBUS via [`VbusSource`], and reports back through the [`DevicePolicy`]
//! callback table it was handed at start-up.
#![warn(missing_docs)]

use std::sync::Arc;

/// Power role of a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerRole {
    /// Provides power.
    Source,
    /// Consumes power.
    Sink,
}

impl From<bool> for PowerRole {
    fn from(value: bool) -> Self {
        match value {
            false => Self::Sink,
            true => Self::Source,
        }
    }
}

impl From<PowerRole> for bool {
    fn from(role: PowerRole) -> bool {
        match role {
            PowerRole::Sink => false,
            PowerRole::Source => true,
        }
    }
}

/// Data role of a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataRole {
    /// Upstream-facing port.
    Ufp,
    /// Downstream-facing port.
    Dfp,
}

impl From<bool> for DataRole {
    fn from(value: bool) -> Self {
        match value {
            false => Self::Ufp,
            true => Self::Dfp,
        }
    }
}

impl From<DataRole> for bool {
    fn from(role: DataRole) -> bool {
        match role {
            DataRole::Ufp => false,
            DataRole::Dfp => true,
        }
    }
}

/// Voltage state of a CC line, as seen by a sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CcState {
    /// Nothing attached.
    #[default]
    Open,
    /// Ra pull-down detected.
    Ra,
    /// Rd pull-down detected.
    Rd,
    /// Default USB Rp advertisement.
    RpDefault,
    /// 1.5 A Rp advertisement.
    Rp1A5,
    /// 3.0 A Rp advertisement.
    Rp3A0,
}

impl CcState {
    /// Whether this line advertises a source Rp.
    pub fn is_rp(self) -> bool {
        matches!(self, Self::RpDefault | Self::Rp1A5 | Self::Rp3A0)
    }
}

/// Rp current advertisement values, selectable when operating as a source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RpValue {
    /// Default USB current.
    #[default]
    Usb,
    /// 1.5 A.
    Current1A5,
    /// 3.0 A.
    Current3A0,
}

impl From<RpValue> for CcState {
    fn from(rp: RpValue) -> Self {
        match rp {
            RpValue::Usb => CcState::RpDefault,
            RpValue::Current1A5 => CcState::Rp1A5,
            RpValue::Current3A0 => CcState::Rp3A0,
        }
    }
}

/// CC line termination requested by the UUT.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CcPull {
    /// No termination.
    #[default]
    Open,
    /// Pull-down (sink).
    Rd,
    /// Pull-up (source).
    Rp,
}

/// Active CC line selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CcPolarity {
    /// CC1 carries power delivery traffic.
    #[default]
    Cc1,
    /// CC2 carries power delivery traffic.
    Cc2,
}

/// Framing of a packet on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameType {
    /// Start-of-packet, addressed to the port partner.
    Sop,
    /// Hard reset ordered set. Carries no payload.
    HardReset,
}

/// Alerts that the port controller delivers through the registered handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Alert {
    /// A transmitted message was acknowledged with GoodCRC.
    TransmitSuccess,
    /// A hard reset ordered set was received.
    HardResetReceived,
}

/// Interrupt-style alert callback, registered once by the UUT.
pub type AlertHandler = Arc<dyn Fn(Alert) + Send + Sync>;

/// Faults returned by the port controller contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortFault {
    /// No message is pending reception.
    NoMessage,
    /// The caller's buffer cannot hold the pending frame.
    BufferTooSmall {
        /// Number of bytes the pending frame occupies.
        needed: usize,
    },
    /// The pending frame was a hard reset, not data.
    HardReset,
}

/// Port controller (TCPC) driver contract consumed by the UUT.
///
/// Mirrors the register/callback surface of a Type-C port controller.
/// All methods take `&self`; implementations use interior mutability so that
/// the UUT and the tester can share one port.
pub trait Tcpc {
    /// Initialize the controller. Clears any pending messages.
    fn init(&self) -> Result<(), PortFault>;

    /// Register the alert callback through which transmit acknowledgments and
    /// hard resets are delivered.
    fn set_alert_handler(&self, handler: AlertHandler);

    /// Read the voltage state of both CC lines. Never fails.
    fn get_cc(&self) -> (CcState, CcState);

    /// Enable or disable reception of power delivery messages.
    fn set_rx_enable(&self, enable: bool);

    /// Non-blocking check for a pending received frame and its framing.
    fn is_rx_pending(&self) -> Option<FrameType>;

    /// Retrieve a pending message into `buffer`, returning its length.
    ///
    /// Fails with [`PortFault::NoMessage`] if nothing is pending and with
    /// [`PortFault::HardReset`] (raising the hard reset alert) if the pending
    /// frame is a hard reset instead of data.
    fn receive_data(&self, buffer: &mut [u8]) -> Result<usize, PortFault>;

    /// Transmit a frame. At most one message is in flight; a second transmit
    /// overwrites the first.
    fn transmit_data(&self, frame_type: FrameType, data: &[u8]) -> Result<(), PortFault>;

    /// Select the Rp value advertised when operating as a source.
    fn select_rp(&self, rp: RpValue);

    /// Read back the selected Rp value.
    fn get_rp(&self) -> RpValue;

    /// Apply a CC line termination.
    fn set_cc(&self, pull: CcPull);

    /// Store the roles used to stamp GoodCRC framing.
    fn set_roles(&self, power_role: PowerRole, data_role: DataRole);

    /// Enable or disable VCONN sourcing.
    fn set_vconn(&self, enable: bool);

    /// Select the active CC line.
    fn set_cc_polarity(&self, polarity: CcPolarity);

    /// Enter or leave BIST carrier test mode.
    fn set_bist_mode(&self, enable: bool);

    /// Enable reception of SOP' framed messages.
    fn sop_prime_enable(&self, enable: bool);

    /// Log the controller's register state.
    fn dump_registers(&self);
}

/// Named VBUS voltage levels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VbusLevel {
    /// At or below vSafe0V.
    Safe0V,
    /// At or above vSafe5V.
    Present,
    /// Below the sink disconnect threshold.
    Removed,
}

/// VBUS measurement driver contract consumed by the UUT.
pub trait VbusSource {
    /// Measure VBUS in millivolts. Never fails.
    fn measure(&self) -> u32;

    /// Check whether VBUS is at a named level.
    fn check_level(&self, level: VbusLevel) -> bool;

    /// Enable or disable the VBUS discharge path.
    fn discharge(&self, enable: bool);

    /// Enable or disable VBUS measurement.
    fn enable(&self, enable: bool);
}

/// Type-C state machine states reported by the UUT.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeCState {
    /// No partner attached.
    UnattachedSnk,
    /// Attachment is being debounced.
    AttachWaitSnk,
    /// Attached as a sink.
    AttachedSnk,
}

/// Policy engine states reported by the UUT.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeState {
    /// Sink start-up after attach or reset.
    SnkStartup,
    /// Waiting for Source Capabilities.
    SnkWaitForCapabilities,
    /// Evaluating received capabilities.
    SnkEvaluateCapability,
    /// A Request was sent; waiting for the source response.
    SnkSelectCapability,
    /// The source accepted; waiting for the power transition.
    SnkTransitionSink,
    /// Explicit contract in place.
    SnkReady,
    /// The UUT issued a hard reset.
    SnkHardReset,
    /// Recovering to default conditions after a hard reset.
    SnkTransitionToDefault,
    /// Responding to Get_Sink_Cap.
    SnkGiveSinkCap,
    /// Responding with Reject/Not_Supported.
    SendNotSupported,
}

/// Protocol layer transmit states reported by the UUT.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrlTxState {
    /// Transmitter idle, waiting for a message request.
    WaitForMessageRequest,
}

/// A namespaced state identifier, the key of the state-wait oracle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UutState {
    /// Type-C state machine domain.
    TypeC(TypeCState),
    /// Policy engine domain.
    PolicyEngine(PeState),
    /// Protocol layer transmitter domain.
    PrlTx(PrlTxState),
}

/// Level-style notifications from the UUT's policy engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Notification {
    /// An Accept message was received.
    AcceptReceived,
    /// A Reject message was received.
    RejectReceived,
    /// A Not_Supported message was received.
    NotSupportedReceived,
    /// A message was discarded.
    MessageDiscarded,
    /// A protocol error was detected.
    ProtocolError,
    /// An explicit contract negotiation is underway.
    PdConnected,
    /// The port partner does not speak power delivery.
    NotPdConnected,
    /// The sink shall transition its power supply.
    TransitionPowerSupply,
    /// The port partner did not respond in time.
    PortPartnerNotResponsive,
    /// A hard reset was received from the partner.
    HardResetReceived,
    /// The sink transitions to default levels.
    SnkTransitionToDefault,
    /// The current data role is UFP.
    DataRoleIsUfp,
    /// The current data role is DFP.
    DataRoleIsDfp,
}

/// Everything the UUT reports through [`DevicePolicy::notify`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyEvent {
    /// A state machine entered the named state.
    State(UutState),
    /// A level-style notification.
    Notification(Notification),
}

/// Policy predicates the UUT may evaluate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyCheck {
    /// Allow a power role swap.
    PowerRoleSwap,
    /// Allow a data role swap to DFP.
    DataRoleSwapToDfp,
    /// Allow a data role swap to UFP.
    DataRoleSwapToUfp,
    /// The sink operates at default power levels.
    SnkAtDefaultLevel,
    /// The port controls VCONN.
    VconnControl,
}

/// Policy callback table, installed once on the UUT and owned by it for the
/// UUT's lifetime.
pub trait DevicePolicy {
    /// Evaluate a policy predicate.
    fn check(&self, check: PolicyCheck) -> bool;

    /// Report a state entry or notification.
    fn notify(&self, event: PolicyEvent);

    /// Fill `pdos` with the sink capability PDOs, returning their count.
    fn get_sink_caps(&self, pdos: &mut [u32]) -> usize;

    /// Store the source capabilities the UUT received.
    fn set_source_caps(&self, pdos: &[u32]);

    /// Build the request data object for the current capabilities.
    fn get_request_object(&self) -> u32;
}
