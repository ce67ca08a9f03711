//! Power and request data objects for fixed supplies.
//!
//! Only the PD 2.0/3.0 fixed-supply profiles are covered, which is all the
//! compliance procedures in this crate negotiate.

use proc_bitfield::bitfield;

use crate::_50millivolts_mod::_50millivolts;
use crate::units::ElectricPotential;

bitfield! {
    /// A source fixed-supply PDO.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct FixedSupply(pub u32): Debug, FromStorage, IntoStorage {
        /// Fixed supply marker (00b).
        pub kind: u8 @ 30..=31,
        /// Dual-role power.
        pub dual_role_power: bool @ 29,
        /// USB suspend supported.
        pub usb_suspend_supported: bool @ 28,
        /// Unconstrained power.
        pub unconstrained_power: bool @ 27,
        /// USB communications capable.
        pub usb_communications_capable: bool @ 26,
        /// Dual-role data.
        pub dual_role_data: bool @ 25,
        /// Unchunked extended messages supported.
        pub unchunked_extended_messages_supported: bool @ 24,
        /// Peak current capability.
        pub peak_current: u8 @ 20..=21,
        /// Voltage in 50 mV units.
        pub raw_voltage: u16 @ 10..=19,
        /// Maximum current in 10 mA units.
        pub raw_max_current: u16 @ 0..=9,
    }
}

impl Default for FixedSupply {
    fn default() -> Self {
        Self(0)
    }
}

impl FixedSupply {
    /// Build a PDO for the given voltage and maximum current.
    pub fn new_from_millis(voltage_mv: u32, max_current_ma: u32) -> Self {
        Self(0)
            .with_raw_voltage((voltage_mv / 50) as u16)
            .with_raw_max_current((max_current_ma / 10) as u16)
    }

    /// Supply voltage.
    pub fn voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_voltage().into())
    }

    /// Maximum supply current in milliamperes.
    ///
    /// Integer arithmetic on the 10 mA wire coding, so sub-ampere values
    /// survive exactly.
    pub fn max_current_ma(&self) -> u32 {
        u32::from(self.raw_max_current()) * 10
    }
}

bitfield! {
    /// A sink fixed-supply PDO, advertised in Sink Capabilities.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct FixedSupplySink(pub u32): Debug, FromStorage, IntoStorage {
        /// Fixed supply marker (00b).
        pub kind: u8 @ 30..=31,
        /// Dual-role power.
        pub dual_role_power: bool @ 29,
        /// Higher capability.
        pub higher_capability: bool @ 28,
        /// Unconstrained power.
        pub unconstrained_power: bool @ 27,
        /// USB communications capable.
        pub usb_communications_capable: bool @ 26,
        /// Dual-role data.
        pub dual_role_data: bool @ 25,
        /// Fast role swap requirement.
        pub fast_role_swap: u8 @ 23..=24,
        /// Voltage in 50 mV units.
        pub raw_voltage: u16 @ 10..=19,
        /// Operational current in 10 mA units.
        pub raw_operational_current: u16 @ 0..=9,
    }
}

impl Default for FixedSupplySink {
    fn default() -> Self {
        Self(0)
    }
}

impl FixedSupplySink {
    /// Build a sink PDO for the given voltage and operational current.
    pub fn new_from_millis(voltage_mv: u32, operational_current_ma: u32) -> Self {
        Self(0)
            .with_raw_voltage((voltage_mv / 50) as u16)
            .with_raw_operational_current((operational_current_ma / 10) as u16)
    }

    /// Supply voltage.
    pub fn voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_voltage().into())
    }

    /// Operational current in milliamperes.
    pub fn operational_current_ma(&self) -> u32 {
        u32::from(self.raw_operational_current()) * 10
    }
}

bitfield! {
    /// A fixed/variable-supply request data object.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct FixedVariableRequest(pub u32): Debug, FromStorage, IntoStorage {
        /// Position of the requested PDO, 1-indexed. Zero is invalid.
        pub object_position: u8 @ 28..=31,
        /// GiveBack flag.
        pub giveback_flag: bool @ 27,
        /// Capability mismatch.
        pub capability_mismatch: bool @ 26,
        /// USB communications capable.
        pub usb_communications_capable: bool @ 25,
        /// No USB suspend.
        pub no_usb_suspend: bool @ 24,
        /// Operating current in 10 mA units.
        pub raw_operating_current: u16 @ 10..=19,
        /// Maximum operating current in 10 mA units.
        pub raw_max_operating_current: u16 @ 0..=9,
    }
}

impl Default for FixedVariableRequest {
    fn default() -> Self {
        Self(0)
    }
}

impl FixedVariableRequest {
    /// Build a request for the PDO at `object_position`, drawing
    /// `current_ma` milliamperes.
    pub fn new_from_millis(object_position: u8, current_ma: u32) -> Self {
        Self(0)
            .with_object_position(object_position)
            .with_raw_operating_current((current_ma / 10) as u16)
            .with_raw_max_operating_current((current_ma / 10) as u16)
            .with_no_usb_suspend(true)
    }

    /// Operating current in milliamperes.
    pub fn operating_current_ma(&self) -> u32 {
        u32::from(self.raw_operating_current()) * 10
    }
}

#[cfg(test)]
mod tests {
    use uom::si::electric_potential::millivolt;

    use super::*;

    #[test]
    fn fixed_supply_encodes_millivolts_and_milliamps() {
        let pdo = FixedSupply::new_from_millis(5000, 100)
            .with_dual_role_power(true)
            .with_unconstrained_power(true);

        assert_eq!(pdo.raw_voltage(), 100);
        assert_eq!(pdo.raw_max_current(), 10);
        assert_eq!(pdo.voltage().get::<millivolt>(), 5000);
        assert_eq!(pdo.max_current_ma(), 100);
        assert_eq!(pdo.kind(), 0);
    }

    #[test]
    fn sub_ampere_currents_read_back_exactly() {
        // Values below 1 A must not be lost to base-unit truncation.
        assert_eq!(FixedSupply::new_from_millis(5000, 100).max_current_ma(), 100);
        assert_eq!(FixedSupplySink::new_from_millis(5000, 10).operational_current_ma(), 10);
        assert_eq!(FixedVariableRequest::new_from_millis(1, 990).operating_current_ma(), 990);
    }

    #[test]
    fn request_round_trips_object_position() {
        let rdo = FixedVariableRequest::new_from_millis(1, 100);

        assert_eq!(rdo.object_position(), 1);
        assert_eq!(rdo.raw_operating_current(), 10);
        assert_eq!(rdo.raw_max_operating_current(), 10);
        assert!(rdo.no_usb_suspend());

        let reparsed = FixedVariableRequest(rdo.0);
        assert_eq!(reparsed.operating_current_ma(), 100);
    }

    #[test]
    fn sink_pdo_carries_operational_current() {
        let pdo = FixedSupplySink::new_from_millis(5000, 100)
            .with_dual_role_power(true)
            .with_unconstrained_power(true);

        assert_eq!(pdo.voltage().get::<millivolt>(), 5000);
        assert_eq!(pdo.operational_current_ma(), 100);
    }
}
