use std::fmt;

/// Size of one joydev event record in bytes.
pub const RECORD_SIZE: usize = 8;

/// Full deflection reported by the joydev driver.
pub const AXIS_MAX: f32 = 32767.0;

/// One raw record as it travels through the queue.
pub type Record = [u8; RECORD_SIZE];

// Event kind bitmask
pub const KIND_BUTTON: u8 = 0x01;
pub const KIND_AXIS: u8 = 0x02;
pub const KIND_INITIAL: u8 = 0x80;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Malformed record: expected {RECORD_SIZE} bytes, got {0}")]
    Length(usize),
}

/// Decoded joydev event
///
/// Layout on the wire: `u32` time in milliseconds, `i16` value, `u8` kind
/// bitmask, `u8` index, all in native byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    pub timestamp: u32,
    pub value: i16,
    pub kind: u8,
    pub index: u8,
}

impl RawEvent {
    pub fn decode(record: &Record) -> Self {
        Self {
            timestamp: u32::from_ne_bytes([record[0], record[1], record[2], record[3]]),
            value: i16::from_ne_bytes([record[4], record[5]]),
            kind: record[6],
            index: record[7],
        }
    }

    pub fn encode(&self) -> Record {
        let mut record = [0u8; RECORD_SIZE];
        record[0..4].copy_from_slice(&self.timestamp.to_ne_bytes());
        record[4..6].copy_from_slice(&self.value.to_ne_bytes());
        record[6] = self.kind;
        record[7] = self.index;
        record
    }

    pub fn is_button(&self) -> bool {
        self.kind & KIND_BUTTON != 0
    }

    pub fn is_axis(&self) -> bool {
        self.kind & KIND_AXIS != 0
    }

    /// Synthetic event emitted by the driver on open to report current state
    pub fn is_initial(&self) -> bool {
        self.kind & KIND_INITIAL != 0
    }

    /// Axis value scaled to roughly [-1.0, 1.0]
    pub fn normalized(&self) -> f32 {
        self.value as f32 / AXIS_MAX
    }
}

impl TryFrom<&[u8]> for RawEvent {
    type Error = DecodeError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let record: &Record = bytes
            .try_into()
            .map_err(|_| DecodeError::Length(bytes.len()))?;
        Ok(Self::decode(record))
    }
}

impl fmt::Display for RawEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let initial = if self.is_initial() { "(initial) " } else { "" };
        write!(
            f,
            "{}kind=0x{:02x} index={} value={} t={}ms",
            initial, self.kind, self.index, self.value, self.timestamp
        )
    }
}
