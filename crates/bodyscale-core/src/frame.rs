//! Measurement frame decoding.
//!
//! # Frame layout (13 bytes minimum)
//!
//! ```text
//! [0]     : Control flags
//!           bit 1: impedance sweep complete
//!           bit 5: weight stabilized
//! [1-2]   : Weight (u16 big-endian, 0.1 kg units)
//! [3-4]   : Impedance (u16 big-endian, ohms)
//! [5-12]  : Timestamp and checksum (not used for derived metrics)
//! ```
//!
//! Decoding is pure: the same bytes always produce the same result.

use thiserror::Error;

use crate::types::DecodedReading;

/// Smallest frame this protocol version emits.
pub const MIN_FRAME_LEN: usize = 13;

/// Reasons a notification payload is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Fewer bytes than a complete frame, typically a split BLE packet.
    #[error("frame too short: {len} bytes (need at least {MIN_FRAME_LEN})")]
    TooShort {
        /// Length of the rejected payload.
        len: usize,
    },

    /// Long enough, but a field carries a value no reading can have.
    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// Result type for frame decoding.
pub type FrameResult<T> = std::result::Result<T, FrameError>;

/// Decode one notification payload.
///
/// # Errors
///
/// - [`FrameError::TooShort`] when `buffer` holds fewer than
///   [`MIN_FRAME_LEN`] bytes.
/// - [`FrameError::Malformed`] when the weight field is zero (nothing on the
///   platform) or the impedance field is zero (no bioimpedance contact).
pub fn parse(buffer: &[u8]) -> FrameResult<DecodedReading> {
    if buffer.len() < MIN_FRAME_LEN {
        return Err(FrameError::TooShort { len: buffer.len() });
    }

    let control_byte = buffer[0];
    let weight_raw = u16::from_be_bytes([buffer[1], buffer[2]]);
    let impedance_raw = u16::from_be_bytes([buffer[3], buffer[4]]);

    if weight_raw == 0 {
        return Err(FrameError::Malformed("weight field is zero".into()));
    }
    if impedance_raw == 0 {
        return Err(FrameError::Malformed("impedance field is zero".into()));
    }

    Ok(DecodedReading {
        control_byte,
        weight_raw,
        impedance_raw,
    })
}

/// Build a frame carrying the given fields. Trailing bytes are zeroed.
///
/// Used by the simulation path and by tests to produce wire-accurate input.
#[must_use]
pub fn encode(reading: &DecodedReading) -> [u8; MIN_FRAME_LEN] {
    let mut frame = [0u8; MIN_FRAME_LEN];
    frame[0] = reading.control_byte;
    frame[1..3].copy_from_slice(&reading.weight_raw.to_be_bytes());
    frame[3..5].copy_from_slice(&reading.impedance_raw.to_be_bytes());
    frame
}
