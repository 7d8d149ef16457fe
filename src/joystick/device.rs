//! Joystick device discovery and capability query
//!
//! Talks to the Linux joydev driver: lists `/dev/input/js*` nodes and asks an
//! opened device for its name and its axis/button code maps. The maps are
//! turned into [`AxisMap`]/[`ButtonMap`] once and handed to the drive loop.

use crate::joystick::names::{AxisMap, ButtonMap};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const INPUT_DIR: &str = "/dev/input";

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Failed to open device {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Capability query {request} failed: {source}")]
    Query {
        request: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to list input devices: {0}")]
    Listing(#[from] std::io::Error),

    #[error("Joystick capability queries are only supported on Linux")]
    Unsupported,
}

/// Name and index maps reported by the driver
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub name: String,
    pub axes: AxisMap,
    pub buttons: ButtonMap,
}

/// Joystick nodes under `/dev/input`, sorted by path
pub fn list_devices() -> Result<Vec<PathBuf>, DeviceError> {
    list_devices_in(Path::new(INPUT_DIR))
}

pub fn list_devices_in(dir: &Path) -> Result<Vec<PathBuf>, DeviceError> {
    let mut devices = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with("js") {
            devices.push(entry.path());
        }
    }
    devices.sort();
    debug!("Found {} joystick nodes in {}", devices.len(), dir.display());
    Ok(devices)
}

pub fn open(path: &Path) -> Result<File, DeviceError> {
    info!("Opening {}", path.display());
    File::open(path).map_err(|source| DeviceError::Open {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(target_os = "linux")]
mod ioctl {
    use super::DeviceError;
    use std::fs::File;
    use std::os::fd::AsRawFd;

    // BTN_MISC..=KEY_MAX
    pub const BUTTON_MAP_LEN: usize = 0x2ff - 0x100 + 1;
    // ABS_CNT
    pub const AXIS_MAP_LEN: usize = 0x40;
    pub const NAME_LEN: usize = 128;

    /// `_IOR('j', nr, size)`
    pub const fn read_request(nr: u8, size: usize) -> u64 {
        (2 << 30) | ((size as u64) << 16) | ((b'j' as u64) << 8) | nr as u64
    }

    pub const JSIOCGAXES: u64 = read_request(0x11, 1);
    pub const JSIOCGBUTTONS: u64 = read_request(0x12, 1);
    pub const JSIOCGAXMAP: u64 = read_request(0x32, AXIS_MAP_LEN);
    pub const JSIOCGBTNMAP: u64 = read_request(0x34, BUTTON_MAP_LEN * 2);

    pub fn jsiocgname(len: usize) -> u64 {
        read_request(0x13, len)
    }

    /// Issue a read ioctl filling `buf`
    ///
    /// # Safety
    ///
    /// `request` must encode a size no larger than `size_of_val(buf)`.
    pub unsafe fn read_into<T>(
        file: &File,
        request: u64,
        name: &'static str,
        buf: &mut [T],
    ) -> Result<(), DeviceError> {
        let rc = libc::ioctl(file.as_raw_fd(), request as _, buf.as_mut_ptr());
        if rc < 0 {
            return Err(DeviceError::Query {
                request: name,
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(())
    }
}

impl DeviceInfo {
    #[cfg(target_os = "linux")]
    pub fn query(file: &File) -> Result<Self, DeviceError> {
        use ioctl::*;

        let mut name_buf = [0u8; NAME_LEN];
        let mut axes = [0u8; 1];
        let mut buttons = [0u8; 1];
        let mut axis_codes = [0u8; AXIS_MAP_LEN];
        let mut button_codes = [0u16; BUTTON_MAP_LEN];

        // SAFETY: every request encodes exactly the size of its buffer
        unsafe {
            read_into(file, jsiocgname(NAME_LEN), "JSIOCGNAME", &mut name_buf)?;
            read_into(file, JSIOCGAXES, "JSIOCGAXES", &mut axes)?;
            read_into(file, JSIOCGBUTTONS, "JSIOCGBUTTONS", &mut buttons)?;
            read_into(file, JSIOCGAXMAP, "JSIOCGAXMAP", &mut axis_codes)?;
            read_into(file, JSIOCGBTNMAP, "JSIOCGBTNMAP", &mut button_codes)?;
        }

        let end = name_buf.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        let name = String::from_utf8_lossy(&name_buf[..end]).into_owned();

        let num_axes = (axes[0] as usize).min(AXIS_MAP_LEN);
        let num_buttons = (buttons[0] as usize).min(BUTTON_MAP_LEN);

        Ok(Self {
            name,
            axes: AxisMap::from_codes(&axis_codes[..num_axes]),
            buttons: ButtonMap::from_codes(&button_codes[..num_buttons]),
        })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn query(_file: &File) -> Result<Self, DeviceError> {
        Err(DeviceError::Unsupported)
    }

    pub fn log_summary(&self) {
        info!("Device name: {}", self.name);
        info!("{} axes found: {}", self.axes.len(), self.axes);
        info!("{} buttons found: {}", self.buttons.len(), self.buttons);
    }
}
