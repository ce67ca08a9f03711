//! A reference sink implementation driven through the mock transport.
//!
//! This sink exists so the compliance procedures have a known-good UUT to
//! exercise: it walks the attach, capability negotiation and power
//! transition sequences with nominal timer values and reports every state
//! entry through the installed [`DevicePolicy`]. It is deliberately small,
//! a single 1 ms tick loop, not a production policy engine.

use core::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, trace, warn};
use usbpd_tester_traits::{
    Alert, CcPolarity, CcPull, DataRole, DevicePolicy, FrameType, Notification, PeState, PolicyEvent, PortFault,
    PowerRole, PrlTxState, Tcpc, TypeCState, UutState, VbusLevel, VbusSource,
};

use crate::counters::{Counter, CounterType};
use crate::message::header::{ControlMessageType, DataMessageType, Header, MessageType, SpecificationRevision};
use crate::message::{MAX_MESSAGE_SIZE, MAX_OBJECTS, PdMessage};
use crate::timers::{Timer, TimerType};

/// Alert flags set by the port controller's interrupt callback and consumed
/// by the tick loop.
#[derive(Default)]
struct AlertFlags {
    tx_acked: AtomicBool,
    hard_reset: AtomicBool,
}

impl AlertFlags {
    fn take_tx_acked(&self) -> bool {
        self.tx_acked.swap(false, Ordering::SeqCst)
    }

    fn take_hard_reset(&self) -> bool {
        self.hard_reset.swap(false, Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy)]
enum SinkState {
    Unattached,
    WaitForCapabilities { deadline: u64 },
    SelectCapability { deadline: u64 },
    TransitionSink { deadline: u64 },
    Ready,
    TransitionToDefault { deadline: u64 },
    /// Hard reset attempts exhausted. Waits for detach.
    ErrorRecovery,
}

/// The reference sink.
pub struct DummySink<TCPC, VBUS, DPM, TIMER>
where
    TCPC: Tcpc,
    VBUS: VbusSource,
    DPM: DevicePolicy,
    TIMER: Timer,
{
    tcpc: Arc<TCPC>,
    vbus: Arc<VBUS>,
    policy: Arc<DPM>,
    alerts: Arc<AlertFlags>,
    state: SinkState,
    revision: SpecificationRevision,
    message_id: Counter,
    hard_reset_count: Counter,
    last_rx_message_id: Option<u8>,
    _timer: PhantomData<TIMER>,
}

impl<TCPC, VBUS, DPM, TIMER> DummySink<TCPC, VBUS, DPM, TIMER>
where
    TCPC: Tcpc,
    VBUS: VbusSource,
    DPM: DevicePolicy,
    TIMER: Timer,
{
    /// Create a sink on the given port, registering its alert callback and
    /// initializing the controller.
    pub fn new(tcpc: Arc<TCPC>, vbus: Arc<VBUS>, policy: Arc<DPM>) -> Result<Self, PortFault> {
        let alerts = Arc::new(AlertFlags::default());

        let flags = alerts.clone();
        tcpc.set_alert_handler(Arc::new(move |alert| match alert {
            Alert::TransmitSuccess => flags.tx_acked.store(true, Ordering::SeqCst),
            Alert::HardResetReceived => flags.hard_reset.store(true, Ordering::SeqCst),
        }));

        tcpc.init()?;
        vbus.enable(true);

        Ok(Self {
            tcpc,
            vbus,
            policy,
            alerts,
            state: SinkState::Unattached,
            revision: SpecificationRevision::R3_0,
            message_id: Counter::new(CounterType::MessageId),
            hard_reset_count: Counter::new(CounterType::HardReset),
            last_rx_message_id: None,
            _timer: PhantomData,
        })
    }

    /// Run the sink. Never returns; callers spawn this on the executor.
    pub async fn run(mut self) {
        loop {
            self.tick();
            TIMER::after_millis(1).await;
        }
    }

    fn notify_state(&self, state: UutState) {
        self.policy.notify(PolicyEvent::State(state));
    }

    fn notify(&self, notification: Notification) {
        self.policy.notify(PolicyEvent::Notification(notification));
    }

    fn header_template(&self) -> Header {
        Header::new_template(DataRole::Ufp, PowerRole::Sink, self.revision)
    }

    /// Transmit a message, retrying up to nRetryCount times when no GoodCRC
    /// acknowledgment arrives. Advances the message ID on success.
    fn transmit(&mut self, message: &PdMessage) -> bool {
        let mut buffer = [0u8; MAX_MESSAGE_SIZE];
        let size = message.to_bytes(&mut buffer);

        let mut retry = Counter::new(CounterType::Retry);

        loop {
            self.alerts.take_tx_acked();

            if self.tcpc.transmit_data(FrameType::Sop, &buffer[..size]).is_err() {
                warn!("port controller refused transmission");
                return false;
            }

            if self.alerts.take_tx_acked() {
                self.message_id.increment().ok();
                return true;
            }

            if retry.increment().is_err() {
                warn!("transmission never acknowledged");
                return false;
            }

            trace!("retrying unacknowledged transmission");
        }
    }

    fn tick(&mut self) {
        let now = TIMER::now_millis();

        if !self.update_connection(now) {
            return;
        }

        self.pump_rx(now);
        self.check_deadline(now);
    }

    /// Track attach and detach. Returns whether a partner is attached.
    fn update_connection(&mut self, now: u64) -> bool {
        let (cc1, cc2) = self.tcpc.get_cc();
        let source_present = (cc1.is_rp() || cc2.is_rp()) && self.vbus.check_level(VbusLevel::Present);

        match self.state {
            SinkState::Unattached => {
                if source_present {
                    self.on_attach(now, cc1.is_rp());
                }

                source_present
            }
            _ => {
                let detached = (!cc1.is_rp() && !cc2.is_rp()) || self.vbus.check_level(VbusLevel::Removed);

                if detached {
                    self.on_detach();
                    return false;
                }

                true
            }
        }
    }

    fn on_attach(&mut self, now: u64, rp_on_cc1: bool) {
        debug!("source attached");

        self.notify_state(UutState::TypeC(TypeCState::AttachWaitSnk));
        self.notify_state(UutState::TypeC(TypeCState::AttachedSnk));

        self.tcpc.set_cc(CcPull::Rd);
        self.tcpc
            .set_cc_polarity(if rp_on_cc1 { CcPolarity::Cc1 } else { CcPolarity::Cc2 });
        self.tcpc.set_roles(PowerRole::Sink, DataRole::Ufp);
        self.notify(Notification::DataRoleIsUfp);
        self.tcpc.set_rx_enable(true);

        self.notify_state(UutState::PolicyEngine(PeState::SnkStartup));
        self.notify_state(UutState::PrlTx(PrlTxState::WaitForMessageRequest));

        self.message_id.reset();
        self.hard_reset_count.reset();
        self.last_rx_message_id = None;
        self.revision = SpecificationRevision::R3_0;

        self.enter_wait_for_capabilities(now);
    }

    fn on_detach(&mut self) {
        debug!("source detached");

        self.tcpc.set_rx_enable(false);
        self.notify_state(UutState::TypeC(TypeCState::UnattachedSnk));
        self.notify(Notification::NotPdConnected);
        self.state = SinkState::Unattached;
    }

    fn enter_wait_for_capabilities(&mut self, now: u64) {
        self.notify_state(UutState::PolicyEngine(PeState::SnkWaitForCapabilities));
        self.state = SinkState::WaitForCapabilities {
            deadline: now + TimerType::SinkWaitCap.duration_millis(),
        };
    }

    fn pump_rx(&mut self, now: u64) {
        if self.tcpc.is_rx_pending().is_none() {
            return;
        }

        let mut buffer = [0u8; MAX_MESSAGE_SIZE];

        match self.tcpc.receive_data(&mut buffer) {
            Ok(size) => match PdMessage::from_bytes(&buffer[..size]) {
                Ok(message) => self.on_message(now, message),
                Err(error) => {
                    warn!("unparsable message: {error}");
                    self.notify(Notification::ProtocolError);
                }
            },
            Err(PortFault::HardReset) => {
                self.alerts.take_hard_reset();
                self.on_hard_reset_received(now);
            }
            Err(PortFault::NoMessage) => {}
            Err(fault) => warn!("receive fault: {fault:?}"),
        }
    }

    fn on_message(&mut self, now: u64, message: PdMessage) {
        let message_id = message.header.message_id();

        if self.last_rx_message_id == Some(message_id) {
            trace!("duplicate message ID {message_id}, ignoring");
            return;
        }

        self.last_rx_message_id = Some(message_id);

        // Fall back to the partner's revision when it is lower than ours.
        if message.header.spec_revision() == Ok(SpecificationRevision::R2_0) {
            self.revision = SpecificationRevision::R2_0;
        }

        match message.header.message_type() {
            MessageType::Data(DataMessageType::SourceCapabilities) => {
                self.on_source_capabilities(now, &message.objects);
            }
            MessageType::Control(ControlMessageType::Accept) => self.on_accept(now),
            MessageType::Control(ControlMessageType::Reject) => self.on_reject(),
            MessageType::Control(ControlMessageType::PsRdy) => self.on_ps_rdy(),
            MessageType::Control(ControlMessageType::GetSinkCap) => self.on_get_sink_cap(now),
            MessageType::Control(ControlMessageType::GetSourceCap) => self.on_get_source_cap(now),
            MessageType::Control(ControlMessageType::SoftReset) => self.on_soft_reset(now),
            other => trace!("ignoring {other:?} in {:?}", self.state),
        }
    }

    fn on_source_capabilities(&mut self, now: u64, objects: &[u32]) {
        if matches!(self.state, SinkState::ErrorRecovery) {
            return;
        }

        self.notify_state(UutState::PolicyEngine(PeState::SnkEvaluateCapability));
        self.policy.set_source_caps(objects);

        let request = self.policy.get_request_object();
        let header = Header::new_data(self.header_template(), self.message_id, DataMessageType::Request, 1);

        if self.transmit(&PdMessage::new_data(header, &[request])) {
            self.notify(Notification::PdConnected);
            self.notify_state(UutState::PolicyEngine(PeState::SnkSelectCapability));
            self.state = SinkState::SelectCapability {
                deadline: now + TimerType::SenderResponse.duration_millis(),
            };
        } else {
            self.notify(Notification::ProtocolError);
            self.start_hard_reset(now);
        }
    }

    fn on_accept(&mut self, now: u64) {
        if !matches!(self.state, SinkState::SelectCapability { .. }) {
            return;
        }

        self.notify(Notification::AcceptReceived);
        self.notify_state(UutState::PolicyEngine(PeState::SnkTransitionSink));
        self.state = SinkState::TransitionSink {
            deadline: now + TimerType::PsTransition.duration_millis(),
        };
    }

    fn on_reject(&mut self) {
        if !matches!(self.state, SinkState::SelectCapability { .. }) {
            return;
        }

        self.notify(Notification::RejectReceived);
        self.notify_state(UutState::PolicyEngine(PeState::SnkReady));
        self.state = SinkState::Ready;
    }

    fn on_ps_rdy(&mut self) {
        if !matches!(self.state, SinkState::TransitionSink { .. }) {
            return;
        }

        self.notify(Notification::TransitionPowerSupply);
        self.notify_state(UutState::PolicyEngine(PeState::SnkReady));
        self.state = SinkState::Ready;
    }

    fn on_get_sink_cap(&mut self, now: u64) {
        if !matches!(self.state, SinkState::Ready) {
            return;
        }

        self.notify_state(UutState::PolicyEngine(PeState::SnkGiveSinkCap));

        let mut pdos = [0u32; MAX_OBJECTS];
        let count = self.policy.get_sink_caps(&mut pdos);

        let header = Header::new_data(
            self.header_template(),
            self.message_id,
            DataMessageType::SinkCapabilities,
            count as u8,
        );

        if self.transmit(&PdMessage::new_data(header, &pdos[..count])) {
            self.notify_state(UutState::PolicyEngine(PeState::SnkReady));
        } else {
            self.notify(Notification::ProtocolError);
            self.start_hard_reset(now);
        }
    }

    fn on_get_source_cap(&mut self, now: u64) {
        if !matches!(self.state, SinkState::Ready) {
            return;
        }

        self.notify_state(UutState::PolicyEngine(PeState::SendNotSupported));

        // A 2.0 partner expects Reject, Not_Supported only exists since 3.0.
        let reply = match self.revision {
            SpecificationRevision::R2_0 => ControlMessageType::Reject,
            SpecificationRevision::R3_0 => ControlMessageType::NotSupported,
        };

        let header = Header::new_control(self.header_template(), self.message_id, reply);

        if self.transmit(&PdMessage::new_control(header)) {
            self.notify_state(UutState::PolicyEngine(PeState::SnkReady));
        } else {
            self.notify(Notification::ProtocolError);
            self.start_hard_reset(now);
        }
    }

    fn on_soft_reset(&mut self, now: u64) {
        debug!("soft reset received");

        self.message_id.reset();
        self.last_rx_message_id = None;

        let header = Header::new_control(self.header_template(), self.message_id, ControlMessageType::Accept);

        if self.transmit(&PdMessage::new_control(header)) {
            self.enter_wait_for_capabilities(now);
        } else {
            self.notify(Notification::ProtocolError);
            self.start_hard_reset(now);
        }
    }

    fn on_hard_reset_received(&mut self, now: u64) {
        debug!("hard reset received");

        self.notify(Notification::HardResetReceived);
        self.enter_transition_to_default(now);
    }

    fn start_hard_reset(&mut self, now: u64) {
        if self.hard_reset_count.increment().is_err() {
            warn!("hard reset attempts exhausted");
            self.notify(Notification::NotPdConnected);
            self.state = SinkState::ErrorRecovery;
            return;
        }

        self.notify_state(UutState::PolicyEngine(PeState::SnkHardReset));
        self.tcpc.transmit_data(FrameType::HardReset, &[]).ok();
        self.alerts.take_tx_acked();

        self.enter_transition_to_default(now);
    }

    fn enter_transition_to_default(&mut self, now: u64) {
        self.message_id.reset();
        self.last_rx_message_id = None;

        self.notify(Notification::SnkTransitionToDefault);
        self.notify_state(UutState::PolicyEngine(PeState::SnkTransitionToDefault));
        self.state = SinkState::TransitionToDefault {
            deadline: now + TimerType::HardResetComplete.duration_millis(),
        };
    }

    fn check_deadline(&mut self, now: u64) {
        match self.state {
            SinkState::WaitForCapabilities { deadline } if now >= deadline => {
                debug!("no capabilities within tTypeCSinkWaitCap");
                self.start_hard_reset(now);
            }
            SinkState::SelectCapability { deadline } if now >= deadline => {
                debug!("no response within tSenderResponse");
                self.notify(Notification::PortPartnerNotResponsive);
                self.start_hard_reset(now);
            }
            SinkState::TransitionSink { deadline } if now >= deadline => {
                debug!("no PS_RDY within tPSTransition");
                self.start_hard_reset(now);
            }
            SinkState::TransitionToDefault { deadline } if now >= deadline => {
                self.notify_state(UutState::PolicyEngine(PeState::SnkStartup));
                self.enter_wait_for_capabilities(now);
            }
            _ => (),
        }
    }
}
