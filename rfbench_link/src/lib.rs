//! # rfbench Link Library
//!
//! Instrument link-layer and motion coordination for the RF test bench.
//!
//! One TCP connection carries two producers: a background status poller and
//! foreground commands. The command gate guarantees exactly one request is
//! ever in flight; the motion coordinator turns feed/home requests into
//! commands and watches the status samples for confirmation.
//!
//! # Module Structure
//!
//! - [`transport`] - TCP link with per-attempt timeouts and backoff
//! - [`protocol`] - Line framing and command vocabulary
//! - [`poller`] - Background status poller
//! - [`gate`] - Single-flight foreground commands
//! - [`motion`] - Feed/home state machine and its async driver
//! - [`session`] - Facade wiring the above together
//! - [`config`] - `link.toml` configuration
//! - [`sim`] - Simulated instrument
//! - [`error`] - Error types
//!
//! # Architecture
//!
//! ```text
//!   send_command        request_feed / request_home
//!        │                          │
//!        ▼                          ▼
//!  ┌─────────────┐  dispatch  ┌───────────────┐
//!  │ CommandGate │◄───────────│ MotionService │
//!  └──────┬──────┘            └───────▲───────┘
//!  pause, │ lock                      │ StatusSample
//!  ┌──────▼────────┐   lock   ┌───────┴───────┐
//!  │ TransportLink │◄─────────│ StatusPoller  │
//!  └───────────────┘          └───────────────┘
//! ```

pub mod config;
pub mod error;
pub mod gate;
pub mod motion;
pub mod poller;
pub mod protocol;
pub mod session;
pub mod sim;
pub mod transport;

#[cfg(test)]
mod testing;

pub use crate::error::{LinkError, LinkResult, MotionError, TransportCause};
pub use crate::gate::{CommandGate, Reply};
pub use crate::motion::{MotionCoordinator, OperationCompleted, OperationKind, OperationOutcome};
pub use crate::poller::{PollSchedule, StatusPoller};
pub use crate::session::Session;
pub use crate::transport::{RetryPolicy, Transport, TransportLink};
