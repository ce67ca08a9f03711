//! Edge-triggered flags recording UUT state machine entries.
//!
//! The UUT's policy callback signals a flag whenever one of its state
//! machines enters a state. Scenarios then wait on the flag for the state
//! they expect next, with a bounded timeout, and read back how long the
//! entry took. A flag that was raised before the wait started satisfies it
//! immediately; waiting consumes the flag.

use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use usbpd_tester_traits::UutState;

use crate::timers::Timer;

const STATE_COUNT: usize = 14;

fn index(state: UutState) -> usize {
    match state {
        UutState::TypeC(state) => state as usize,
        UutState::PolicyEngine(state) => 3 + state as usize,
        UutState::PrlTx(state) => 13 + state as usize,
    }
}

/// One flag per observable UUT state.
pub struct StateWaitOracle {
    flags: [Signal<CriticalSectionRawMutex, ()>; STATE_COUNT],
}

impl Default for StateWaitOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl StateWaitOracle {
    /// Create an oracle with all flags clear.
    pub fn new() -> Self {
        Self {
            flags: [const { Signal::new() }; STATE_COUNT],
        }
    }

    /// Record that the UUT entered `state`.
    pub fn signal(&self, state: UutState) {
        self.flags[index(state)].signal(());
    }

    /// Whether `state` was entered since the flag was last consumed.
    pub fn is_set(&self, state: UutState) -> bool {
        self.flags[index(state)].signaled()
    }

    /// Consume the flag for `state`, if raised.
    pub fn clear(&self, state: UutState) {
        self.flags[index(state)].reset();
    }

    /// Consume every flag.
    pub fn clear_all(&self) {
        for flag in &self.flags {
            flag.reset();
        }
    }

    /// Wait until the UUT enters `state` or the timeout expires, whichever
    /// comes first, and return the elapsed wait in milliseconds.
    ///
    /// Returns 0 when the flag was already raised, and `timeout_millis` on
    /// expiry. Callers distinguish the outcomes by comparing the result
    /// against the timeout.
    pub async fn wait_or_timeout<TIMER: Timer>(&self, state: UutState, timeout_millis: u64) -> u64 {
        let flag = &self.flags[index(state)];

        if flag.try_take().is_some() {
            return 0;
        }

        let start = TIMER::now_millis();

        match select(flag.wait(), TIMER::after_millis(timeout_millis)).await {
            Either::First(()) => (TIMER::now_millis() - start).min(timeout_millis),
            Either::Second(()) => timeout_millis,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use usbpd_tester_traits::{PeState, TypeCState, UutState};

    use super::StateWaitOracle;
    use crate::timers::testing::TokioTimer;

    const ATTACHED: UutState = UutState::TypeC(TypeCState::AttachedSnk);
    const READY: UutState = UutState::PolicyEngine(PeState::SnkReady);

    #[tokio::test(start_paused = true)]
    async fn raised_flag_satisfies_wait_immediately() {
        let oracle = StateWaitOracle::new();
        oracle.signal(ATTACHED);

        let elapsed = oracle.wait_or_timeout::<TokioTimer>(ATTACHED, 100).await;
        assert_eq!(elapsed, 0);

        // The wait consumed the flag.
        assert!(!oracle.is_set(ATTACHED));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_without_signal_expires_after_timeout() {
        let oracle = StateWaitOracle::new();

        let elapsed = oracle.wait_or_timeout::<TokioTimer>(ATTACHED, 250).await;
        assert_eq!(elapsed, 250);
    }

    #[tokio::test(start_paused = true)]
    async fn signal_during_wait_reports_elapsed_time() {
        let oracle = Arc::new(StateWaitOracle::new());

        let signaler = oracle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            signaler.signal(READY);
        });

        let elapsed = oracle.wait_or_timeout::<TokioTimer>(READY, 100).await;
        assert_eq!(elapsed, 40);
    }

    #[tokio::test(start_paused = true)]
    async fn flags_are_independent_per_state() {
        let oracle = StateWaitOracle::new();
        oracle.signal(ATTACHED);

        let elapsed = oracle.wait_or_timeout::<TokioTimer>(READY, 50).await;
        assert_eq!(elapsed, 50);

        // The unrelated flag is untouched.
        assert!(oracle.is_set(ATTACHED));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_all_drops_raised_flags() {
        let oracle = StateWaitOracle::new();
        oracle.signal(ATTACHED);
        oracle.signal(READY);

        oracle.clear_all();

        assert!(!oracle.is_set(ATTACHED));
        assert!(!oracle.is_set(READY));
    }
}
