//! Drive subsystem: control state machine and consumer loop
//!
//! - [`state`] - Control flags, integration step and fixed bindings
//! - [`drive_loop`] - Queue consumer issuing gateway commands on each tick

pub mod drive_loop;
pub mod state;

pub use drive_loop::{DriveLoop, DrivePhase, DriveSettings, DriveStats};
pub use state::{ControlState, DriveCommand, DriveLimits, Transition};

use crate::gateway::GatewayError;

#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("Failed to connect to vehicle gateway: {0}")]
    Connect(#[source] GatewayError),

    #[error("{failed} of {total} commands failed this tick")]
    Commands { failed: usize, total: usize },

    #[error("Drive task failed: {0}")]
    Task(String),
}
