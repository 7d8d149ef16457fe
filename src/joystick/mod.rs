//! Joystick subsystem for raw joydev input
//!
//! Producer half of the drive pipeline:
//!
//! 1. [`device`] - Device discovery and capability query
//! 2. [`names`] - Axis/button code tables and index maps
//! 3. [`event`] - 8-byte record decoding
//! 4. [`reader`] - Blocking read loop feeding the bounded queue
//!
//! # Architecture
//!
//! ```text
//! /dev/input/jsN ──► DeviceReader ──► [bounded queue] ──► DriveLoop
//!                    (blocking thread)  (8-byte records)
//! ```

pub mod device;
pub mod event;
pub mod names;
pub mod reader;

pub use device::{DeviceError, DeviceInfo};
pub use event::{DecodeError, RawEvent, Record};
pub use names::{AxisMap, ButtonMap};
pub use reader::{DeviceReader, ReaderError, ReaderSummary};
