//! rfbench Common Library
//!
//! Shared types and configuration loading for the rfbench workspace crates.
//!
//! # Module Structure
//!
//! - [`axis`] - Fixed axis set and per-axis motion state
//! - [`sample`] - Typed status samples published by the poller
//! - [`compensation`] - Calibration collaborator and power formatting
//! - [`config`] - Configuration loading traits and types
//! - [`consts`] - Workspace-wide constants
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use rfbench_common::prelude::*;
//!
//! let axis: Axis = "theta".parse().unwrap();
//! assert_eq!(axis.to_string(), "THETA");
//! ```

pub mod axis;
pub mod compensation;
pub mod config;
pub mod consts;
pub mod prelude;
pub mod sample;
