//! Rolling counters for message IDs and retry/reset attempts.

/// Error raised when a counter rolls over its maximum.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The counter wrapped around to zero.
    Overrun,
}

/// A counter that wraps at a type-specific maximum.
#[derive(Debug, Clone, Copy)]
pub struct Counter {
    value: u8,
    max_value: u8,
}

/// Counter kinds, with maxima from the PD specification.
#[derive(Debug, Clone, Copy)]
pub enum CounterType {
    /// Hard reset attempts (nHardResetCount).
    HardReset,
    /// Rolling message ID (MessageIDCounter).
    MessageId,
    /// Transmit retries (nRetryCount).
    Retry,
}

impl Counter {
    /// Create a zeroed counter of the given kind.
    pub fn new(counter_type: CounterType) -> Self {
        let max_value = match counter_type {
            CounterType::HardReset => 2,
            CounterType::MessageId => 7,
            CounterType::Retry => 2,
        };

        Self { value: 0, max_value }
    }

    /// Create a counter of the given kind, pre-set to `value`.
    pub fn new_from_value(counter_type: CounterType, value: u8) -> Self {
        let mut counter = Self::new(counter_type);
        counter.set(value);
        counter
    }

    /// Set the counter, wrapping at the maximum.
    pub fn set(&mut self, value: u8) {
        self.value = value % (self.max_value + 1);
    }

    /// Current value.
    pub fn value(&self) -> u8 {
        self.value
    }

    /// Increment, reporting [`Error::Overrun`] on wrap-around.
    pub fn increment(&mut self) -> Result<(), Error> {
        self.set(self.value + 1);

        if self.value == 0 { Err(Error::Overrun) } else { Ok(()) }
    }

    /// Reset to zero.
    pub fn reset(&mut self) {
        self.value = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::{Counter, CounterType, Error};

    #[test]
    fn message_id_wraps_modulo_eight() {
        let mut counter = Counter::new(CounterType::MessageId);

        for n in 1..=24u32 {
            let result = counter.increment();
            assert_eq!(counter.value() as u32, n % 8);
            assert_eq!(result.is_err(), n % 8 == 0);
        }
    }

    #[test]
    fn retry_overruns_after_max() {
        let mut counter = Counter::new(CounterType::Retry);

        assert_eq!(counter.increment(), Ok(()));
        assert_eq!(counter.increment(), Ok(()));
        assert_eq!(counter.increment(), Err(Error::Overrun));
        assert_eq!(counter.value(), 0);
    }
}
