//! Fixed-format command reports for the keyboard control endpoint.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Every report sent to the endpoint has this exact length.
pub const REPORT_LEN: usize = 64;

/// Offset of the brightness level byte inside a brightness report.
pub const BRIGHTNESS_BYTE_INDEX: usize = 4;

const BRIGHTNESS_PREFIX: [u8; 4] = [0x5A, 0xBA, 0xC5, 0xC4];
const TOUCHPAD_TOGGLE_PREFIX: [u8; 3] = [0x5A, 0xF4, 0x6B];

// The endpoint rejects all commands until this sequence has been sent,
// in order, once per opened handle.
const INIT_STAGES: [&[u8]; 3] = [
    &[0x5A, 0x89],
    &[
        0x5A, 0x41, 0x53, 0x55, 0x53, 0x20, 0x54, 0x65, 0x63, 0x68, 0x2E, 0x49, 0x6E, 0x63, 0x2E,
    ],
    &[0x5A, 0x05, 0x20, 0x31, 0x00, 0x08],
];

/// Length of the input reports carrying key presses.
pub const KEY_EVENT_LEN: usize = 6;

/// Report id prefixing every vendor report, input and output alike.
const REPORT_ID: u8 = 0x5A;

/// Extracts the key code from an input report, if it is one.
///
/// Key releases and reports from other collections arrive on the same
/// endpoint with a zero code byte or a different id; both yield `None`.
pub fn decode_key_event(report: &[u8]) -> Option<u32> {
    match report {
        [REPORT_ID, code, ..] if *code != 0 => Some(u32::from(*code)),
        _ => None,
    }
}

/// Keyboard backlight brightness, totally ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Level {
    Off = 0x00,
    Low = 0x01,
    Medium = 0x02,
    High = 0x03,
}

impl Level {
    /// The next level up, or `None` at `High`.
    pub fn up(self) -> Option<Level> {
        match self {
            Level::Off => Some(Level::Low),
            Level::Low => Some(Level::Medium),
            Level::Medium => Some(Level::High),
            Level::High => None,
        }
    }

    /// The next level down, or `None` at `Off`.
    pub fn down(self) -> Option<Level> {
        match self {
            Level::Off => None,
            Level::Low => Some(Level::Off),
            Level::Medium => Some(Level::Low),
            Level::High => Some(Level::Medium),
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(raw: u8) -> Result<Level, Error> {
        match raw {
            0x00 => Ok(Level::Off),
            0x01 => Ok(Level::Low),
            0x02 => Ok(Level::Medium),
            0x03 => Ok(Level::High),
            other => Err(Error::Decode {
                name: "Level",
                reason: format!("invalid brightness byte {other:#04x}"),
            }),
        }
    }
}

/// Commands the endpoint accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// One stage of the initialization handshake.
    Initialize { stage: usize },
    /// Set the backlight to an exact level.
    SetBrightness(Level),
    /// Flip the touchpad between enabled and disabled. The hardware keeps
    /// the only record of which; there is no query command.
    ToggleTouchpad,
}

impl Command {
    /// The initialization handshake, in send order.
    pub fn init_sequence() -> impl Iterator<Item = Command> {
        (0..INIT_STAGES.len()).map(|stage| Command::Initialize { stage })
    }

    /// Builds the fixed-length report for this command: the payload
    /// prefix, zero padding to [`REPORT_LEN`], and for brightness the
    /// level byte at [`BRIGHTNESS_BYTE_INDEX`].
    pub fn to_report(self) -> [u8; REPORT_LEN] {
        let mut report = [0u8; REPORT_LEN];
        match self {
            Command::Initialize { stage } => {
                let payload = INIT_STAGES[stage.min(INIT_STAGES.len() - 1)];
                report[..payload.len()].copy_from_slice(payload);
            }
            Command::SetBrightness(level) => {
                report[..BRIGHTNESS_PREFIX.len()].copy_from_slice(&BRIGHTNESS_PREFIX);
                report[BRIGHTNESS_BYTE_INDEX] = level.as_byte();
            }
            Command::ToggleTouchpad => {
                report[..TOUCHPAD_TOGGLE_PREFIX.len()].copy_from_slice(&TOUCHPAD_TOGGLE_PREFIX);
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn brightness_report_layout() {
        let report = Command::SetBrightness(Level::Medium).to_report();
        assert_eq!(report.len(), REPORT_LEN);
        assert_eq!(&report[..4], &BRIGHTNESS_PREFIX);
        assert_eq!(report[BRIGHTNESS_BYTE_INDEX], 0x02);
        assert!(report[5..].iter().all(|&b| b == 0));
    }

    #[test]
    fn touchpad_report_layout() {
        let report = Command::ToggleTouchpad.to_report();
        assert_eq!(&report[..3], &TOUCHPAD_TOGGLE_PREFIX);
        assert!(report[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn init_sequence_is_ordered_and_padded() {
        let reports: Vec<_> = Command::init_sequence().map(Command::to_report).collect();
        assert_eq!(reports.len(), 3);
        for (report, payload) in reports.iter().zip(INIT_STAGES) {
            assert_eq!(report.len(), REPORT_LEN);
            assert_eq!(&report[..payload.len()], payload);
            assert!(report[payload.len()..].iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn key_events_decode_only_vendor_reports_with_a_code() {
        assert_eq!(decode_key_event(&[0x5A, 0xC4, 0, 0, 0, 0]), Some(0xC4));
        assert_eq!(decode_key_event(&[0x5A, 0x00, 0, 0, 0, 0]), None);
        assert_eq!(decode_key_event(&[0x01, 0xC4, 0, 0, 0, 0]), None);
        assert_eq!(decode_key_event(&[]), None);
    }

    #[test]
    fn level_saturates_at_both_ends() {
        assert_eq!(Level::High.up(), None);
        assert_eq!(Level::Off.down(), None);
        assert_eq!(Level::Off.up(), Some(Level::Low));
        assert_eq!(Level::High.down(), Some(Level::Medium));
    }

    #[test]
    fn level_byte_round_trip() {
        for level in [Level::Off, Level::Low, Level::Medium, Level::High] {
            assert_eq!(Level::from_byte(level.as_byte()).unwrap(), level);
        }
        assert!(Level::from_byte(0x04).is_err());
    }
}
