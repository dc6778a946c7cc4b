//! Error types for the section demultiplexer.
//!
//! Stream imperfections (continuity gaps, CRC mismatches, truncated sections)
//! are not errors: they are counted in [`crate::PidDiagnostics`]. The types
//! below cover caller mistakes and packets that cannot be parsed at all.

use thiserror::Error;

/// Errors raised while parsing a raw transport packet.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Buffer is shorter than one transport packet.
    #[error("Packet too short: {0} bytes (need 188)")]
    TooShort(usize),

    /// First byte is not the 0x47 sync byte.
    #[error("Invalid sync byte: 0x{0:02X}")]
    InvalidSync(u8),

    /// Adaptation field length runs past the end of the packet.
    #[error("Adaptation field length {0} overruns packet")]
    AdaptationFieldOverrun(u8),
}

/// Usage errors reported by [`crate::SectionDemux`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DemuxError {
    /// PID does not fit in 13 bits.
    #[error("Invalid PID: 0x{0:04X} (max 0x1FFF)")]
    InvalidPid(u16),

    /// Operation targets a PID that is not tracked.
    #[error("PID 0x{0:04X} is not tracked")]
    ChannelNotTracked(u16),
}

/// Reasons a fully accumulated section is rejected by [`crate::Section::from_bytes`].
///
/// Inside the demux they only select the diagnostic counter to bump.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SectionError {
    /// Header or length fields are inconsistent.
    #[error("Malformed section: {0}")]
    Malformed(&'static str),

    /// section_number is beyond last_section_number.
    #[error("Section number {number} exceeds last section number {last}")]
    IndexOutOfRange { number: u8, last: u8 },

    /// CRC32 trailer does not match the section bytes.
    #[error("CRC32 mismatch: stored 0x{stored:08X}, computed 0x{computed:08X}")]
    CrcMismatch { stored: u32, computed: u32 },
}
