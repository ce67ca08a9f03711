//! Scriptable VBUS voltage source.

use std::sync::atomic::{AtomicU32, Ordering};

use log::trace;
use usbpd_tester_traits::{VbusLevel, VbusSource};

/// Upper bound of vSafe0V in millivolts.
pub const VBUS_SAFE_0V_MAX_MV: u32 = 800;
/// Lower bound of vSafe5V in millivolts.
pub const VBUS_SAFE_5V_MIN_MV: u32 = 4750;
/// Sink disconnect threshold in millivolts.
pub const VBUS_SINK_DISCONNECT_MV: u32 = 3670;

/// Nominal VBUS voltage in millivolts.
pub const VBUS_NOMINAL_MV: u32 = 5000;

/// A VBUS rail whose voltage the tester sets instantaneously.
///
/// Ramp rates and droop are not modeled. `discharge` and `enable` from the
/// driver contract are accepted and ignored.
#[derive(Debug, Default)]
pub struct VbusEmulator {
    millivolts: AtomicU32,
}

impl VbusEmulator {
    /// Create a rail at 0 mV.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the rail to an exact voltage.
    pub fn apply_mv(&self, millivolts: u32) {
        trace!("vbus set to {millivolts} mV");
        self.millivolts.store(millivolts, Ordering::Relaxed);
    }

    /// Set the rail to a voltage that satisfies the named level.
    pub fn apply_level(&self, level: VbusLevel) {
        match level {
            VbusLevel::Safe0V => self.apply_mv(0),
            VbusLevel::Present => self.apply_mv(VBUS_NOMINAL_MV),
            VbusLevel::Removed => self.apply_mv(0),
        }
    }
}

impl VbusSource for VbusEmulator {
    fn measure(&self) -> u32 {
        self.millivolts.load(Ordering::Relaxed)
    }

    fn check_level(&self, level: VbusLevel) -> bool {
        let millivolts = self.measure();

        match level {
            VbusLevel::Safe0V => millivolts < VBUS_SAFE_0V_MAX_MV,
            VbusLevel::Present => millivolts >= VBUS_SAFE_5V_MIN_MV,
            VbusLevel::Removed => millivolts < VBUS_SINK_DISCONNECT_MV,
        }
    }

    fn discharge(&self, _enable: bool) {}

    fn enable(&self, _enable: bool) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_checks_follow_thresholds() {
        let vbus = VbusEmulator::new();

        vbus.apply_mv(0);
        assert!(vbus.check_level(VbusLevel::Safe0V));
        assert!(vbus.check_level(VbusLevel::Removed));
        assert!(!vbus.check_level(VbusLevel::Present));

        vbus.apply_mv(VBUS_NOMINAL_MV);
        assert!(!vbus.check_level(VbusLevel::Safe0V));
        assert!(!vbus.check_level(VbusLevel::Removed));
        assert!(vbus.check_level(VbusLevel::Present));

        // Sagging but above the disconnect threshold is neither present nor
        // removed.
        vbus.apply_mv(4000);
        assert!(!vbus.check_level(VbusLevel::Present));
        assert!(!vbus.check_level(VbusLevel::Removed));
    }

    #[test]
    fn named_levels_produce_matching_measurements() {
        let vbus = VbusEmulator::new();

        vbus.apply_level(VbusLevel::Present);
        assert_eq!(vbus.measure(), VBUS_NOMINAL_MV);
        assert!(vbus.check_level(VbusLevel::Present));

        vbus.apply_level(VbusLevel::Safe0V);
        assert!(vbus.check_level(VbusLevel::Safe0V));
    }
}
