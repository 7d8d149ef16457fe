//! Joystick to vehicle drive pipeline
//!
//! A blocking [`joystick::DeviceReader`] feeds raw joydev records through a
//! bounded queue into the [`drive::DriveLoop`], which keeps the control state
//! and sends speed and lane commands to a [`gateway::VehicleGateway`].

pub mod config;
pub mod drive;
pub mod gateway;
pub mod joystick;
pub mod pipeline;
