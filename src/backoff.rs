use std::time::Duration;

use crate::config::ReconnectDelay;

/// Reconnect delay policy shared by the meter loop and the MQTT client:
/// start at `min`, double on each consecutive failure while `exponential`,
/// cap at `max`, reset to `min` after a success.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: u64,
    max: u64,
    exponential: bool,
    current: u64,
}

impl Backoff {
    pub fn new(delay: &ReconnectDelay) -> Self {
        Self {
            min: delay.min,
            max: delay.max,
            exponential: delay.exponential,
            current: delay.min,
        }
    }

    /// Delay to wait for the failure just observed. Advances the internal
    /// state for the next call.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        if self.exponential {
            self.current = (self.current * 2).min(self.max);
        }
        Duration::from_secs(delay)
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}
