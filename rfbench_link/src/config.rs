//! `link.toml` configuration.
//!
//! ```toml
//! [shared]
//! service_name = "rfbench"
//! log_level = "info"
//!
//! [link]
//! host = "192.168.0.20"
//! port = 5025
//! connect_timeout_ms = 3000
//! max_retries = 3
//! base_timeout_ms = 500
//! buffer_size = 1024
//!
//! [poll]
//! interval_ms = 250
//! axes = ["X", "Y", "Z", "THETA", "PHI"]
//!
//! [motion]
//! operation_timeout_s = 90
//! confirmations = 2
//! ```
//!
//! Every table and field is optional.

use crate::motion::MotionCoordinator;
use crate::poller::PollSchedule;
use crate::transport::RetryPolicy;
use rfbench_common::axis::Axis;
use rfbench_common::config::{ConfigError, SharedConfig};
use rfbench_common::consts::{
    CONFIRMATIONS_REQUIRED, DEFAULT_BUFFER_SIZE, DEFAULT_PORT, MAX_ATTEMPT_TIMEOUT,
    OPERATION_TIMEOUT,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_connect_timeout_ms() -> u64 {
    3000
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_timeout_ms() -> u64 {
    500
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_interval_ms() -> u64 {
    250
}

fn default_axes() -> Vec<Axis> {
    Axis::ALL.to_vec()
}

fn default_operation_timeout_s() -> u64 {
    OPERATION_TIMEOUT.as_secs()
}

fn default_confirmations() -> u32 {
    CONFIRMATIONS_REQUIRED
}

/// Instrument endpoint and per-request retry budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSection {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Total attempts per send or receive.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Timeout of the first attempt; doubles per attempt up to 5 s.
    #[serde(default = "default_base_timeout_ms")]
    pub base_timeout_ms: u64,

    /// Receive chunk size in bytes.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_retries: default_max_retries(),
            base_timeout_ms: default_base_timeout_ms(),
            buffer_size: default_buffer_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSection {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Axes visited round-robin, in order.
    #[serde(default = "default_axes")]
    pub axes: Vec<Axis>,
}

impl Default for PollSection {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            axes: default_axes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionSection {
    #[serde(default = "default_operation_timeout_s")]
    pub operation_timeout_s: u64,

    /// Consecutive confirmations that complete an operation.
    #[serde(default = "default_confirmations")]
    pub confirmations: u32,
}

impl Default for MotionSection {
    fn default() -> Self {
        Self {
            operation_timeout_s: default_operation_timeout_s(),
            confirmations: default_confirmations(),
        }
    }
}

/// Contents of `link.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LinkConfig {
    #[serde(default)]
    pub shared: SharedConfig,
    #[serde(default)]
    pub link: LinkSection,
    #[serde(default)]
    pub poll: PollSection,
    #[serde(default)]
    pub motion: MotionSection,
}

impl LinkConfig {
    /// Validate the configuration.
    ///
    /// # Validation Rules
    /// 1. `shared` passes [`SharedConfig::validate`]
    /// 2. `link.host` is not blank and `link.port` is not 0
    /// 3. `link.max_retries`, `link.buffer_size`, `link.base_timeout_ms` and
    ///    `link.connect_timeout_ms` are > 0
    /// 4. `poll.interval_ms` > 0, `poll.axes` non-empty without duplicates
    /// 5. `motion.confirmations` and `motion.operation_timeout_s` > 0
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        if self.link.host.trim().is_empty() {
            return Err(invalid("link.host cannot be empty"));
        }
        if self.link.port == 0 {
            return Err(invalid("link.port must be greater than 0"));
        }
        if self.link.max_retries == 0 {
            return Err(invalid("link.max_retries must be at least 1"));
        }
        if self.link.base_timeout_ms == 0 {
            return Err(invalid("link.base_timeout_ms must be greater than 0"));
        }
        if self.link.connect_timeout_ms == 0 {
            return Err(invalid("link.connect_timeout_ms must be greater than 0"));
        }
        if self.link.buffer_size == 0 {
            return Err(invalid("link.buffer_size must be greater than 0"));
        }

        if self.poll.interval_ms == 0 {
            return Err(invalid("poll.interval_ms must be greater than 0"));
        }
        if self.poll.axes.is_empty() {
            return Err(invalid("poll.axes cannot be empty"));
        }
        for (i, axis) in self.poll.axes.iter().enumerate() {
            if self.poll.axes[..i].contains(axis) {
                return Err(ConfigError::ValidationError(format!(
                    "poll.axes lists {axis} twice"
                )));
            }
        }

        if self.motion.confirmations == 0 {
            return Err(invalid("motion.confirmations must be at least 1"));
        }
        if self.motion.operation_timeout_s == 0 {
            return Err(invalid("motion.operation_timeout_s must be greater than 0"));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.link.connect_timeout_ms)
    }

    /// Retry budget of foreground commands and status queries.
    pub fn command_policy(&self) -> RetryPolicy {
        let mut policy = RetryPolicy::new(
            self.link.max_retries,
            Duration::from_millis(self.link.base_timeout_ms).min(MAX_ATTEMPT_TIMEOUT),
        );
        policy.buffer_size = self.link.buffer_size;
        policy
    }

    pub fn poll_schedule(&self) -> PollSchedule {
        PollSchedule::new(
            self.poll.axes.clone(),
            Duration::from_millis(self.poll.interval_ms),
            self.command_policy(),
        )
    }

    pub fn coordinator(&self) -> MotionCoordinator {
        MotionCoordinator::new(
            self.motion.confirmations,
            Duration::from_secs(self.motion.operation_timeout_s),
        )
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError(message.to_string())
}
