//! Mock port controller: the register/callback surface the UUT drives.
//!
//! One [`TransportEmulator`] is shared between the UUT (through the
//! [`Tcpc`] contract) and the tester, which scripts CC states, injects
//! frames into the receive slot and drains the transmit slot. Each direction
//! holds at most one frame, modeling a single-buffer hardware FIFO: a new
//! transmit overwrites an undrained one.

use std::sync::Mutex;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use heapless::Vec;
use log::{debug, trace};
use usbpd_tester_traits::{
    Alert, AlertHandler, CcPolarity, CcPull, CcState, DataRole, FrameType, PortFault, PowerRole, RpValue, Tcpc,
};

use crate::message::MAX_MESSAGE_SIZE;

/// A raw frame in one of the transport's single-buffer slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Framing of the packet.
    pub frame_type: FrameType,
    /// Serialized message bytes. Empty for hard reset frames.
    pub bytes: Vec<u8, MAX_MESSAGE_SIZE>,
}

impl Frame {
    /// Create a SOP frame from serialized message bytes.
    pub fn sop(bytes: &[u8]) -> Self {
        Self {
            frame_type: FrameType::Sop,
            bytes: Vec::from_slice(bytes).expect("frame exceeds maximum message size"),
        }
    }

    /// Create a hard reset frame.
    pub fn hard_reset() -> Self {
        Self {
            frame_type: FrameType::HardReset,
            bytes: Vec::new(),
        }
    }
}

/// Acknowledgment behavior of the emulated link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxMode {
    /// Acknowledge UUT transmissions with a GoodCRC alert.
    #[default]
    Ack,
    /// Accept transmissions but never acknowledge them, modeling a lost
    /// GoodCRC.
    Silent,
}

#[derive(Debug, Default)]
struct Registers {
    cc1: CcState,
    cc2: CcState,
    rp: RpValue,
    cc_pull: CcPull,
    polarity: CcPolarity,
    power_role: Option<PowerRole>,
    data_role: Option<DataRole>,
    rx_enabled: bool,
    vconn: bool,
    bist: bool,
    sop_prime: bool,
    tx_mode: TxMode,
    pending_rx: Option<Frame>,
}

/// The mock port controller.
pub struct TransportEmulator {
    registers: Mutex<Registers>,
    pending_tx: Signal<CriticalSectionRawMutex, Frame>,
    alert_handler: Mutex<Option<AlertHandler>>,
}

impl Default for TransportEmulator {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportEmulator {
    /// Create a disconnected port in acknowledge mode.
    pub fn new() -> Self {
        Self {
            registers: Mutex::new(Registers::default()),
            pending_tx: Signal::new(),
            alert_handler: Mutex::new(None),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registers> {
        self.registers.lock().expect("transport state poisoned")
    }

    fn raise_alert(&self, alert: Alert) {
        let handler = self.alert_handler.lock().expect("alert handler poisoned").clone();

        if let Some(handler) = handler {
            trace!("raise alert {alert:?}");
            handler(alert);
        }
    }

    /// Switch between acknowledge and silent mode. Only the scenario switches
    /// modes, never the emulator itself.
    pub fn set_tx_mode(&self, mode: TxMode) {
        self.lock().tx_mode = mode;
    }

    /// Script the voltage state of both CC lines.
    pub fn apply_cc(&self, cc1: CcState, cc2: CcState) {
        let mut registers = self.lock();
        registers.cc1 = cc1;
        registers.cc2 = cc2;
    }

    /// Present a source Rp on CC1, leaving CC2 open.
    pub fn apply_rp(&self, rp: RpValue) {
        self.apply_cc(rp.into(), CcState::Open);
    }

    /// Place a frame into the receive slot, overwriting any undrained one.
    ///
    /// Dropped silently when the UUT has reception disabled.
    pub fn inject(&self, frame: Frame) {
        let mut registers = self.lock();

        if !registers.rx_enabled {
            trace!("rx disabled, dropping injected frame");
            return;
        }

        registers.pending_rx = Some(frame);
    }

    /// Non-blocking check whether the UUT left a transmitted frame undrained.
    pub fn is_tx_pending(&self) -> bool {
        self.pending_tx.signaled()
    }

    /// Atomically drain the transmit slot, if occupied.
    pub fn try_take_tx(&self) -> Option<Frame> {
        self.pending_tx.try_take()
    }

    /// Wait for the UUT to transmit, draining the slot.
    pub async fn wait_tx(&self) -> Frame {
        self.pending_tx.wait().await
    }
}

impl Tcpc for TransportEmulator {
    fn init(&self) -> Result<(), PortFault> {
        let mut registers = self.lock();
        registers.pending_rx = None;
        registers.tx_mode = TxMode::Ack;
        drop(registers);

        self.pending_tx.reset();
        Ok(())
    }

    fn set_alert_handler(&self, handler: AlertHandler) {
        *self.alert_handler.lock().expect("alert handler poisoned") = Some(handler);
    }

    fn get_cc(&self) -> (CcState, CcState) {
        let registers = self.lock();
        (registers.cc1, registers.cc2)
    }

    fn set_rx_enable(&self, enable: bool) {
        self.lock().rx_enabled = enable;
    }

    fn is_rx_pending(&self) -> Option<FrameType> {
        self.lock().pending_rx.as_ref().map(|frame| frame.frame_type)
    }

    fn receive_data(&self, buffer: &mut [u8]) -> Result<usize, PortFault> {
        let mut registers = self.lock();

        let Some(frame) = registers.pending_rx.as_ref() else {
            return Err(PortFault::NoMessage);
        };

        if buffer.len() < frame.bytes.len() {
            return Err(PortFault::BufferTooSmall {
                needed: frame.bytes.len(),
            });
        }

        let frame = registers.pending_rx.take().expect("checked above");
        drop(registers);

        if matches!(frame.frame_type, FrameType::HardReset) {
            self.raise_alert(Alert::HardResetReceived);
            return Err(PortFault::HardReset);
        }

        buffer[..frame.bytes.len()].copy_from_slice(&frame.bytes);
        Ok(frame.bytes.len())
    }

    fn transmit_data(&self, frame_type: FrameType, data: &[u8]) -> Result<(), PortFault> {
        let registers = self.lock();
        let tx_mode = registers.tx_mode;
        drop(registers);

        if data.len() > MAX_MESSAGE_SIZE {
            return Err(PortFault::BufferTooSmall { needed: data.len() });
        }

        match tx_mode {
            TxMode::Ack => {
                let frame = match frame_type {
                    FrameType::Sop => Frame::sop(data),
                    FrameType::HardReset => Frame::hard_reset(),
                };

                // Overwrites an undrained frame, like a single-buffer FIFO.
                self.pending_tx.signal(frame);
                self.raise_alert(Alert::TransmitSuccess);
            }
            TxMode::Silent => {
                trace!("silent mode, swallowing transmitted frame");
            }
        }

        Ok(())
    }

    fn select_rp(&self, rp: RpValue) {
        self.lock().rp = rp;
    }

    fn get_rp(&self) -> RpValue {
        self.lock().rp
    }

    fn set_cc(&self, pull: CcPull) {
        self.lock().cc_pull = pull;
    }

    fn set_roles(&self, power_role: PowerRole, data_role: DataRole) {
        let mut registers = self.lock();
        registers.power_role = Some(power_role);
        registers.data_role = Some(data_role);
    }

    fn set_vconn(&self, enable: bool) {
        self.lock().vconn = enable;
    }

    fn set_cc_polarity(&self, polarity: CcPolarity) {
        self.lock().polarity = polarity;
    }

    fn set_bist_mode(&self, enable: bool) {
        self.lock().bist = enable;
    }

    fn sop_prime_enable(&self, enable: bool) {
        self.lock().sop_prime = enable;
    }

    fn dump_registers(&self) {
        let registers = self.lock();
        debug!(
            "cc1: {:?}, cc2: {:?}, rp: {:?}, pull: {:?}, polarity: {:?}, roles: {:?}/{:?}, \
             rx_enabled: {}, vconn: {}, bist: {}, sop': {}, tx_mode: {:?}",
            registers.cc1,
            registers.cc2,
            registers.rp,
            registers.cc_pull,
            registers.polarity,
            registers.power_role,
            registers.data_role,
            registers.rx_enabled,
            registers.vconn,
            registers.bist,
            registers.sop_prime,
            registers.tx_mode,
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn recording_handler() -> (AlertHandler, Arc<Mutex<std::vec::Vec<Alert>>>) {
        let alerts: Arc<Mutex<std::vec::Vec<Alert>>> = Arc::new(Mutex::new(std::vec::Vec::new()));
        let recorded = alerts.clone();
        let handler: AlertHandler = Arc::new(move |alert| recorded.lock().unwrap().push(alert));
        (handler, alerts)
    }

    #[test]
    fn transmit_in_ack_mode_raises_alert_and_stores_frame() {
        let port = TransportEmulator::new();
        let (handler, alerts) = recording_handler();
        port.set_alert_handler(handler);

        port.transmit_data(FrameType::Sop, &[0x42, 0x10]).unwrap();

        assert_eq!(alerts.lock().unwrap().as_slice(), &[Alert::TransmitSuccess]);
        assert!(port.is_tx_pending());

        let frame = port.try_take_tx().unwrap();
        assert_eq!(frame.frame_type, FrameType::Sop);
        assert_eq!(frame.bytes.as_slice(), &[0x42, 0x10]);
        assert!(!port.is_tx_pending());
    }

    #[test]
    fn transmit_in_silent_mode_is_swallowed() {
        let port = TransportEmulator::new();
        let (handler, alerts) = recording_handler();
        port.set_alert_handler(handler);
        port.set_tx_mode(TxMode::Silent);

        port.transmit_data(FrameType::Sop, &[0x42, 0x10]).unwrap();

        assert!(alerts.lock().unwrap().is_empty());
        assert!(!port.is_tx_pending());
    }

    #[test]
    fn second_transmit_overwrites_undrained_frame() {
        let port = TransportEmulator::new();

        port.transmit_data(FrameType::Sop, &[0x01, 0x00]).unwrap();
        port.transmit_data(FrameType::Sop, &[0x02, 0x00]).unwrap();

        let frame = port.try_take_tx().unwrap();
        assert_eq!(frame.bytes.as_slice(), &[0x02, 0x00]);
        assert!(port.try_take_tx().is_none());
    }

    #[test]
    fn receive_without_pending_message_fails() {
        let port = TransportEmulator::new();
        let mut buffer = [0u8; MAX_MESSAGE_SIZE];

        assert_eq!(port.receive_data(&mut buffer), Err(PortFault::NoMessage));
    }

    #[test]
    fn receive_hard_reset_raises_alert_instead_of_data() {
        let port = TransportEmulator::new();
        let (handler, alerts) = recording_handler();
        port.set_alert_handler(handler);
        port.set_rx_enable(true);

        port.inject(Frame::hard_reset());
        assert_eq!(port.is_rx_pending(), Some(FrameType::HardReset));

        let mut buffer = [0u8; MAX_MESSAGE_SIZE];
        assert_eq!(port.receive_data(&mut buffer), Err(PortFault::HardReset));
        assert_eq!(alerts.lock().unwrap().as_slice(), &[Alert::HardResetReceived]);

        // The slot was drained by the failed receive.
        assert_eq!(port.is_rx_pending(), None);
    }

    #[test]
    fn injection_is_dropped_while_rx_disabled() {
        let port = TransportEmulator::new();

        port.inject(Frame::sop(&[0x42, 0x10]));
        assert_eq!(port.is_rx_pending(), None);

        port.set_rx_enable(true);
        port.inject(Frame::sop(&[0x42, 0x10]));
        assert_eq!(port.is_rx_pending(), Some(FrameType::Sop));

        let mut buffer = [0u8; MAX_MESSAGE_SIZE];
        assert_eq!(port.receive_data(&mut buffer), Ok(2));
        assert_eq!(&buffer[..2], &[0x42, 0x10]);
        assert_eq!(port.receive_data(&mut buffer), Err(PortFault::NoMessage));
    }
}
