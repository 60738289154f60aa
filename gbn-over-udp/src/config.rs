//! Protocol parameters.
//!
//! [`Config`] carries everything a connection needs to know about timing,
//! window bounds and segmentation.  Defaults reproduce the classic lab
//! constants (1024-byte payloads, a one-second timeout, five retries).

use std::time::Duration;

use thiserror::Error;

use crate::frame::MAX_PAYLOAD;
use crate::seq::SEQ_SPACE;

/// Default retransmission timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Default number of retries allowed per step before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default upper bound on the send window.
pub const DEFAULT_MAX_WINDOW: usize = 16;

/// Tunable parameters for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Largest payload placed in a single DATA frame.
    pub max_payload: usize,
    /// Fixed retransmission timeout, also used for handshake and close steps.
    pub timeout: Duration,
    /// Retries allowed after the first transmission before a step is fatal.
    pub max_attempts: u32,
    /// Window size used for the first frames of a connection.
    pub initial_window: usize,
    /// Largest window the sender may grow to (`W_max`).
    pub max_window: usize,
    /// How long the passive closer keeps answering retransmitted FINs.
    pub linger: Duration,
    /// Upper bound on how long `recv` waits for a frame; `None` waits forever.
    pub recv_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_payload: MAX_PAYLOAD,
            timeout: DEFAULT_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_window: 1,
            max_window: DEFAULT_MAX_WINDOW,
            linger: DEFAULT_TIMEOUT * 2,
            recv_timeout: None,
        }
    }
}

impl Config {
    /// Same timing for every step; linger follows as twice the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.linger = timeout * 2;
        self
    }

    pub fn with_window(mut self, initial: usize, max: usize) -> Self {
        self.initial_window = initial;
        self.max_window = max;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    /// Reject parameter combinations the protocol cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_payload == 0 || self.max_payload > MAX_PAYLOAD {
            return Err(ConfigError::PayloadOutOfRange(self.max_payload));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.initial_window == 0 || self.initial_window > self.max_window {
            return Err(ConfigError::WindowOutOfRange {
                initial: self.initial_window,
                max: self.max_window,
            });
        }
        // Cumulative acks are only unambiguous while the window fits in half
        // the sequence space.
        if self.max_window * 2 > SEQ_SPACE {
            return Err(ConfigError::SequenceSpaceTooSmall(self.max_window));
        }
        Ok(())
    }
}

/// Errors raised by configuration validation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("max payload {0} must be between 1 and {max}", max = MAX_PAYLOAD)]
    PayloadOutOfRange(usize),
    #[error("timeout must be non-zero")]
    ZeroTimeout,
    #[error("window bounds invalid: need 1 <= initial ({initial}) <= max ({max})")]
    WindowOutOfRange { initial: usize, max: usize },
    #[error("max window {0} exceeds half the sequence space ({half})", half = SEQ_SPACE / 2)]
    SequenceSpaceTooSmall(usize),
    #[error("{name} probability {value} is outside [0, 1]")]
    Probability { name: &'static str, value: f64 },
}
