//! Prelude module for common re-exports.
//!
//! ```rust
//! use rfbench_common::prelude::*;
//! ```

// ─── Axes & samples ─────────────────────────────────────────────────
pub use crate::axis::{Axis, AxisParseError, AxisState, AxisStates};
pub use crate::sample::{AxisReadout, MotionField, SourceParam, SourceReadout, StatusSample};

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig};

// ─── Calibration ────────────────────────────────────────────────────
pub use crate::compensation::{Compensation, NoCompensation, TableCompensation};

// ─── Constants ──────────────────────────────────────────────────────
pub use crate::consts::{AXIS_COUNT, CONFIRMATIONS_REQUIRED, OPERATION_TIMEOUT};
