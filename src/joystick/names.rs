//! Code to name tables for joystick axes and buttons
//!
//! The joydev driver reports axes and buttons by index; the index maps to an
//! input-subsystem code (`ABS_*` / `BTN_*` from `linux/input.h`). The maps in
//! this module are built once at startup and never change afterwards.

use std::fmt;

/// Name of an axis code, if it is one we know
pub fn axis_name(code: u8) -> Option<&'static str> {
    let name = match code {
        0x00 => "x",
        0x01 => "y",
        0x02 => "z",
        0x03 => "rx",
        0x04 => "ry",
        0x05 => "rz",
        0x06 => "throttle",
        0x07 => "rudder",
        0x08 => "wheel",
        0x09 => "gas",
        0x0a => "brake",
        0x10 => "hat0x",
        0x11 => "hat0y",
        0x12 => "hat1x",
        0x13 => "hat1y",
        0x14 => "hat2x",
        0x15 => "hat2y",
        0x16 => "hat3x",
        0x17 => "hat3y",
        0x18 => "pressure",
        0x19 => "distance",
        0x1a => "tilt_x",
        0x1b => "tilt_y",
        0x1c => "tool_width",
        0x20 => "volume",
        0x28 => "misc",
        _ => return None,
    };
    Some(name)
}

/// Name of a button code, if it is one we know
pub fn button_name(code: u16) -> Option<&'static str> {
    let name = match code {
        0x120 => "trigger",
        0x121 => "thumb",
        0x122 => "thumb2",
        0x123 => "top",
        0x124 => "top2",
        0x125 => "pinkie",
        0x126 => "base",
        0x127 => "base2",
        0x128 => "base3",
        0x129 => "base4",
        0x12a => "base5",
        0x12b => "base6",
        0x12f => "dead",
        0x130 => "a",
        0x131 => "b",
        0x132 => "c",
        0x133 => "x",
        0x134 => "y",
        0x135 => "z",
        0x136 => "tl",
        0x137 => "tr",
        0x138 => "tl2",
        0x139 => "tr2",
        0x13a => "select",
        0x13b => "start",
        0x13c => "mode",
        0x13d => "thumbl",
        0x13e => "thumbr",
        0x220 => "dpad_up",
        0x221 => "dpad_down",
        0x222 => "dpad_left",
        0x223 => "dpad_right",
        // XBox 360 controllers report the dpad on these codes
        0x2c0 => "dpad_left",
        0x2c1 => "dpad_right",
        0x2c2 => "dpad_up",
        0x2c3 => "dpad_down",
        _ => return None,
    };
    Some(name)
}

/// Axis names ordered by device index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AxisMap {
    names: Vec<String>,
}

impl AxisMap {
    pub fn from_codes(codes: &[u8]) -> Self {
        let names = codes
            .iter()
            .map(|&code| match axis_name(code) {
                Some(name) => name.to_string(),
                None => format!("unknown(0x{:02x})", code),
            })
            .collect();
        Self { names }
    }

    pub fn get(&self, index: u8) -> Option<&str> {
        self.names.get(index as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl fmt::Display for AxisMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.names.join(", "))
    }
}

/// Button names ordered by device index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ButtonMap {
    names: Vec<String>,
}

impl ButtonMap {
    pub fn from_codes(codes: &[u16]) -> Self {
        let names = codes
            .iter()
            .map(|&code| match button_name(code) {
                Some(name) => name.to_string(),
                None => format!("unknown(0x{:03x})", code),
            })
            .collect();
        Self { names }
    }

    pub fn get(&self, index: u8) -> Option<&str> {
        self.names.get(index as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl fmt::Display for ButtonMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_map_keeps_device_order() {
        let map = AxisMap::from_codes(&[0x01, 0x00, 0x10]);
        assert_eq!(map.len(), 3);
        assert_eq!(map.get(0), Some("y"));
        assert_eq!(map.get(1), Some("x"));
        assert_eq!(map.get(2), Some("hat0x"));
        assert_eq!(map.get(3), None);
    }

    #[test]
    fn unknown_codes_get_fallback_names() {
        let axes = AxisMap::from_codes(&[0x3f]);
        assert_eq!(axes.get(0), Some("unknown(0x3f)"));

        let buttons = ButtonMap::from_codes(&[0x121, 0x2ff]);
        assert_eq!(buttons.get(0), Some("thumb"));
        assert_eq!(buttons.get(1), Some("unknown(0x2ff)"));
    }

    #[test]
    fn display_joins_names() {
        let buttons = ButtonMap::from_codes(&[0x120, 0x121, 0x122]);
        assert_eq!(buttons.to_string(), "trigger, thumb, thumb2");
        assert!(ButtonMap::default().is_empty());
    }
}
