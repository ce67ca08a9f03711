//! Tester-side device policy, the callback table installed on the reference
//! UUT.
//!
//! State entries are forwarded to the [`StateWaitOracle`]; level-style
//! notifications latch into per-kind flags that scenarios read back or
//! consume. The policy always requests the first source PDO at 100 mA.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use heapless::Vec;
use log::debug;
use usbpd_tester_traits::{DevicePolicy, Notification, PolicyCheck, PolicyEvent};

use crate::message::MAX_OBJECTS;
use crate::message::pdo::{FixedSupplySink, FixedVariableRequest};
use crate::oracle::StateWaitOracle;

const NOTIFICATION_COUNT: usize = 13;

/// Voltage the sink capability advertises, in millivolts.
const SINK_VOLTAGE_MV: u32 = 5000;
/// Current the sink capability and request draw, in milliamperes.
const SINK_CURRENT_MA: u32 = 100;

/// Policy callbacks recording everything the UUT reports.
pub struct TesterPolicy {
    oracle: Arc<StateWaitOracle>,
    notifications: [AtomicBool; NOTIFICATION_COUNT],
    source_caps: Mutex<Vec<u32, MAX_OBJECTS>>,
    request_seen: AtomicBool,
}

impl TesterPolicy {
    /// Create a policy forwarding state entries to `oracle`.
    pub fn new(oracle: Arc<StateWaitOracle>) -> Self {
        Self {
            oracle,
            notifications: [const { AtomicBool::new(false) }; NOTIFICATION_COUNT],
            source_caps: Mutex::new(Vec::new()),
            request_seen: AtomicBool::new(false),
        }
    }

    /// Whether the UUT delivered `notification` since the last reset or take.
    pub fn notification_seen(&self, notification: Notification) -> bool {
        self.notifications[notification as usize].load(Ordering::Relaxed)
    }

    /// Consume the flag for `notification`, returning whether it was raised.
    pub fn take_notification(&self, notification: Notification) -> bool {
        self.notifications[notification as usize].swap(false, Ordering::Relaxed)
    }

    /// Consume the flag recording that the UUT built a request object.
    pub fn take_request_seen(&self) -> bool {
        self.request_seen.swap(false, Ordering::Relaxed)
    }

    /// The source capabilities the UUT last reported.
    pub fn source_caps(&self) -> Vec<u32, MAX_OBJECTS> {
        self.source_caps.lock().expect("source caps poisoned").clone()
    }

    /// The sink capability PDO this policy advertises.
    pub fn sink_cap_pdo() -> FixedSupplySink {
        FixedSupplySink::new_from_millis(SINK_VOLTAGE_MV, SINK_CURRENT_MA)
    }

    /// Drop all latched notifications and recorded capabilities.
    pub fn reset(&self) {
        for flag in &self.notifications {
            flag.store(false, Ordering::Relaxed);
        }

        self.request_seen.store(false, Ordering::Relaxed);
        self.source_caps.lock().expect("source caps poisoned").clear();
    }
}

impl DevicePolicy for TesterPolicy {
    fn check(&self, check: PolicyCheck) -> bool {
        match check {
            PolicyCheck::SnkAtDefaultLevel => true,
            PolicyCheck::PowerRoleSwap
            | PolicyCheck::DataRoleSwapToDfp
            | PolicyCheck::DataRoleSwapToUfp
            | PolicyCheck::VconnControl => false,
        }
    }

    fn notify(&self, event: PolicyEvent) {
        debug!("UUT reports {event:?}");

        match event {
            PolicyEvent::State(state) => self.oracle.signal(state),
            PolicyEvent::Notification(notification) => {
                self.notifications[notification as usize].store(true, Ordering::Relaxed);
            }
        }
    }

    fn get_sink_caps(&self, pdos: &mut [u32]) -> usize {
        if pdos.is_empty() {
            return 0;
        }

        pdos[0] = Self::sink_cap_pdo().0;
        1
    }

    fn set_source_caps(&self, pdos: &[u32]) {
        let mut source_caps = self.source_caps.lock().expect("source caps poisoned");
        source_caps.clear();
        source_caps.extend_from_slice(pdos).ok();
    }

    fn get_request_object(&self) -> u32 {
        self.request_seen.store(true, Ordering::Relaxed);
        FixedVariableRequest::new_from_millis(1, SINK_CURRENT_MA).0
    }
}

#[cfg(test)]
mod tests {
    use usbpd_tester_traits::{PeState, UutState};

    use super::*;

    fn policy() -> TesterPolicy {
        TesterPolicy::new(Arc::new(StateWaitOracle::new()))
    }

    #[test]
    fn state_entries_raise_oracle_flags() {
        let oracle = Arc::new(StateWaitOracle::new());
        let policy = TesterPolicy::new(oracle.clone());

        policy.notify(PolicyEvent::State(UutState::PolicyEngine(PeState::SnkReady)));

        assert!(oracle.is_set(UutState::PolicyEngine(PeState::SnkReady)));
        assert!(!oracle.is_set(UutState::PolicyEngine(PeState::SnkStartup)));
    }

    #[test]
    fn notifications_latch_until_taken() {
        let policy = policy();

        policy.notify(PolicyEvent::Notification(Notification::PdConnected));

        assert!(policy.notification_seen(Notification::PdConnected));
        assert!(!policy.notification_seen(Notification::ProtocolError));

        assert!(policy.take_notification(Notification::PdConnected));
        assert!(!policy.notification_seen(Notification::PdConnected));
    }

    #[test]
    fn request_object_targets_the_first_pdo() {
        let policy = policy();

        let rdo = FixedVariableRequest(policy.get_request_object());
        assert_eq!(rdo.object_position(), 1);
        assert_eq!(rdo.raw_operating_current(), 10);

        assert!(policy.take_request_seen());
        assert!(!policy.take_request_seen());
    }

    #[test]
    fn sink_caps_fit_the_offered_buffer() {
        let policy = policy();

        let mut pdos = [0u32; 1];
        assert_eq!(policy.get_sink_caps(&mut pdos), 1);
        assert_eq!(pdos[0], TesterPolicy::sink_cap_pdo().0);

        // A zero-length buffer reports no capabilities instead of panicking.
        assert_eq!(policy.get_sink_caps(&mut []), 0);
    }

    #[test]
    fn source_caps_are_recorded_for_readback() {
        let policy = policy();
        let pdos = [0x2801_912C, 0x0002_D12C];

        policy.set_source_caps(&pdos);
        assert_eq!(policy.source_caps().as_slice(), &pdos);

        policy.reset();
        assert!(policy.source_caps().is_empty());
    }
}
