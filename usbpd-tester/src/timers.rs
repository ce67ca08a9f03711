//! Timer abstraction and the protocol timing values consumed by scenarios.

use core::future::Future;

/// The timer trait to implement by the test executor.
pub trait Timer {
    /// Expire after the specified number of milliseconds.
    fn after_millis(milliseconds: u64) -> impl Future<Output = ()>;

    /// A monotonic millisecond clock, used to measure elapsed time across a
    /// wait.
    fn now_millis() -> u64;
}

/// Types of timers that the reference UUT runs.
#[derive(Debug, Clone, Copy)]
pub enum TimerType {
    /// Recovery period after a hard reset is signalled.
    HardResetComplete,
    /// tPSTransition, armed when Accept is received.
    PsTransition,
    /// tSenderResponse, armed when a Request is acknowledged.
    SenderResponse,
    /// tTypeCSinkWaitCap, armed on attach.
    SinkWaitCap,
}

impl TimerType {
    /// Nominal duration of the timer in milliseconds.
    ///
    /// Each value lies inside the corresponding compliance window published
    /// in [`bounds`].
    pub fn duration_millis(self) -> u64 {
        match self {
            TimerType::HardResetComplete => 5,
            TimerType::PsTransition => 500,
            TimerType::SenderResponse => 27,
            TimerType::SinkWaitCap => 465,
        }
    }

    /// Create a timer future for this type.
    pub fn new<TIMER: Timer>(self) -> impl Future<Output = ()> {
        TIMER::after_millis(self.duration_millis())
    }
}

/// Published min/max timing windows that scenarios compare elapsed time
/// against, in milliseconds.
pub mod bounds {
    /// tTypeCSinkWaitCap minimum.
    pub const T_TYPEC_SINK_WAIT_CAP_MIN_MS: u64 = 310;
    /// tTypeCSinkWaitCap maximum.
    pub const T_TYPEC_SINK_WAIT_CAP_MAX_MS: u64 = 620;

    /// tSenderResponse minimum.
    pub const T_SENDER_RESPONSE_MIN_MS: u64 = 24;
    /// tSenderResponse maximum.
    pub const T_SENDER_RESPONSE_MAX_MS: u64 = 30;

    /// tPSTransition minimum.
    pub const T_PS_TRANSITION_MIN_MS: u64 = 450;
    /// tPSTransition maximum.
    pub const T_PS_TRANSITION_MAX_MS: u64 = 550;
}

/// Timer backing for tests, driven by tokio's (possibly paused) clock.
#[cfg(test)]
pub(crate) mod testing {
    use std::cell::Cell;

    use super::Timer;

    thread_local! {
        static EPOCH: Cell<Option<tokio::time::Instant>> = const { Cell::new(None) };
    }

    /// A [`Timer`] on tokio time.
    ///
    /// The millisecond clock starts at zero on first use within a thread, so
    /// each current-thread test runtime gets its own epoch.
    pub struct TokioTimer;

    impl Timer for TokioTimer {
        async fn after_millis(milliseconds: u64) {
            tokio::time::sleep(std::time::Duration::from_millis(milliseconds)).await;
        }

        fn now_millis() -> u64 {
            let now = tokio::time::Instant::now();

            EPOCH.with(|epoch| {
                let start = match epoch.get() {
                    Some(start) => start,
                    None => {
                        epoch.set(Some(now));
                        now
                    }
                };

                now.duration_since(start).as_millis() as u64
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{TimerType, bounds};

    #[test]
    fn uut_timers_lie_within_compliance_windows() {
        let wait_cap = TimerType::SinkWaitCap.duration_millis();
        assert!(wait_cap >= bounds::T_TYPEC_SINK_WAIT_CAP_MIN_MS);
        assert!(wait_cap <= bounds::T_TYPEC_SINK_WAIT_CAP_MAX_MS);

        let sender_response = TimerType::SenderResponse.duration_millis();
        assert!(sender_response >= bounds::T_SENDER_RESPONSE_MIN_MS);
        assert!(sender_response <= bounds::T_SENDER_RESPONSE_MAX_MS);

        let ps_transition = TimerType::PsTransition.duration_millis();
        assert!(ps_transition >= bounds::T_PS_TRANSITION_MIN_MS);
        assert!(ps_transition <= bounds::T_PS_TRANSITION_MAX_MS);
    }
}
