//! Mock USB power delivery transport and compliance-test oracle.
//!
//! This crate stands in for the physical CC/VBUS lines and a simulated power
//! delivery source, so that a sink policy-engine implementation (the UUT) can
//! be driven through scripted protocol exchanges and checked against the
//! timing windows of the PD specification.
//!
//! The moving parts:
//! - [`transport::TransportEmulator`] — the mock port controller, shared
//!   between the UUT (through the [`usbpd_tester_traits::Tcpc`] contract) and
//!   the tester,
//! - [`partner::ProtocolPartner`] — the simulated source peer that frames and
//!   injects messages,
//! - [`vbus::VbusEmulator`] — the scripted VBUS level,
//! - [`oracle::StateWaitOracle`] — edge-triggered state flags with a
//!   timeout-bounded wait that doubles as a stopwatch,
//! - [`scenario::ComplianceScenario`] — bring-up and per-test procedures.
#![warn(missing_docs)]

pub mod counters;
pub mod dummy;
pub mod message;
pub mod oracle;
pub mod partner;
pub mod policy;
pub mod scenario;
pub mod timers;
pub mod transport;
pub mod vbus;

#[macro_use]
extern crate uom;

// Links the std critical-section implementation that `embassy-sync` needs on
// the host.
use critical_section as _;

pub use usbpd_tester_traits::{DataRole, PowerRole};

pub(crate) mod units {
    pub type ElectricPotential = uom::si::u32::ElectricPotential;
}

pub(crate) mod _50millivolts_mod {
    unit! {
        system: uom::si;
        quantity: uom::si::electric_potential;

        @_50millivolts: 0.05; "50mV", "50 millivolt", "50 millivolts";
    }
}
