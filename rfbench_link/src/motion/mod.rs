//! Motion operations: feed and home, one at a time.
//!
//! ## Architecture
//!
//! [`MotionCoordinator`] is a pure state machine. It never touches the link
//! or the clock itself: callers hand it the current [`Instant`] and execute
//! the [`MotionAction`]s it returns. [`MotionService`] is the async driver
//! that owns the timer, feeds it status samples and dispatches commands
//! through the command gate.
//!
//! ## Lifecycle
//!
//! 1. `request_feed` / `request_home` queue an [`OperationRequest`]
//! 2. When idle, the head of the queue starts: axis → `Reaching`/`Homing`,
//!    deadline armed, [`MotionAction::Dispatch`] returned. A feed that
//!    reaches the head while another axis is `Reached` goes back behind a
//!    home of that axis instead.
//! 3. Each sample for the axis either confirms (field contains `OK`) or
//!    resets the confirmation counter
//! 4. Enough consecutive confirmations, a dispatch failure or the deadline
//!    completes the operation and the next one starts
//!
//! [`Instant`]: tokio::time::Instant

pub mod coordinator;
pub mod service;

pub use coordinator::MotionCoordinator;
pub use service::{MotionHandle, MotionService};

use crate::error::MotionError;
use crate::protocol;
use rfbench_common::axis::{Axis, AxisState, AxisStates};
use rfbench_common::sample::MotionField;
use serde::Serialize;
use std::fmt;

/// Kind of physical motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Drive the axis to its operating position.
    Feed,
    /// Drive the axis back to its home position.
    Home,
}

impl OperationKind {
    /// Sample field that confirms this kind of operation.
    pub const fn field(self) -> MotionField {
        match self {
            OperationKind::Feed => MotionField::Reach,
            OperationKind::Home => MotionField::Home,
        }
    }

    pub const fn in_progress_state(self) -> AxisState {
        match self {
            OperationKind::Feed => AxisState::Reaching,
            OperationKind::Home => AxisState::Homing,
        }
    }

    pub const fn done_state(self) -> AxisState {
        match self {
            OperationKind::Feed => AxisState::Reached,
            OperationKind::Home => AxisState::Homed,
        }
    }

    /// Wire command starting this operation on `axis`.
    pub fn command(self, axis: Axis) -> String {
        match self {
            OperationKind::Feed => protocol::feed_command(axis),
            OperationKind::Home => protocol::home_command(axis),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationKind::Feed => "feed",
            OperationKind::Home => "home",
        })
    }
}

/// A queued or running operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OperationRequest {
    pub kind: OperationKind,
    pub axis: Axis,
    /// Consecutive confirmations seen so far.
    pub confirmations: u32,
}

impl OperationRequest {
    pub const fn new(kind: OperationKind, axis: Axis) -> Self {
        Self {
            kind,
            axis,
            confirmations: 0,
        }
    }

    pub const fn feed(axis: Axis) -> Self {
        Self::new(OperationKind::Feed, axis)
    }

    pub const fn home(axis: Axis) -> Self {
        Self::new(OperationKind::Home, axis)
    }
}

/// How an operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OperationOutcome {
    /// Required confirmations observed.
    Confirmed,
    /// Deadline passed first.
    TimedOut,
    /// The command never reached the instrument.
    DispatchFailed,
}

/// Emitted once per finished operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationCompleted {
    pub axis: Axis,
    pub kind: OperationKind,
    pub outcome: OperationOutcome,
    /// Failure detail; `None` on success.
    pub error: Option<MotionError>,
}

impl OperationCompleted {
    pub fn confirmed(axis: Axis, kind: OperationKind) -> Self {
        Self {
            axis,
            kind,
            outcome: OperationOutcome::Confirmed,
            error: None,
        }
    }

    pub fn failed(axis: Axis, kind: OperationKind, outcome: OperationOutcome, error: MotionError) -> Self {
        Self {
            axis,
            kind,
            outcome,
            error: Some(error),
        }
    }

    #[inline]
    pub fn success(&self) -> bool {
        self.outcome == OperationOutcome::Confirmed
    }
}

/// Side effect requested by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MotionAction {
    /// Send `command` through the gate.
    Dispatch {
        axis: Axis,
        kind: OperationKind,
        command: String,
    },
    /// Publish a completion event.
    Completed(OperationCompleted),
}

/// Point-in-time view for status display.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct MotionSnapshot {
    pub states: AxisStates,
    pub current: Option<OperationRequest>,
    pub queued: usize,
    /// "Ready", "Feeding X..." or "Homing X...".
    pub status: String,
}
