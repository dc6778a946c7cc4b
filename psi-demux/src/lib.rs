//! PSI/SI section and table demultiplexer for MPEG transport streams.
//!
//! Signalling tables (PAT, PMT, NIT, SDT, EIT, ...) are carried as sections
//! split across 188-byte transport packets. This crate reassembles those
//! sections per PID, checks their length and CRC, groups them into versioned
//! tables and notifies registered handlers exactly once per new section and
//! per complete table.
//!
//! The section payload is kept as opaque bytes: decoding the individual table
//! types is left to the handlers.
//!
//! # Usage
//! ```
//! use psi_demux::{DemuxConfig, DemuxContext, DemuxEvent, FnHandler, SectionDemux, pid};
//!
//! let mut demux = SectionDemux::new(DemuxConfig::default());
//! demux.track(pid::PAT).unwrap();
//! demux.register_handler(FnHandler(|_: &mut DemuxContext, event: DemuxEvent<'_>| {
//!     if let DemuxEvent::Table(table) = event {
//!         println!("table 0x{:02X} v{:?} complete", table.table_id(), table.version());
//!     }
//! }));
//!
//! let ts_data: Vec<u8> = Vec::new();
//! demux.feed_bytes(&ts_data);
//! ```

mod config;
mod demux;
mod diagnostics;
mod error;
mod extractor;
mod handler;
mod packet;
mod section;
mod table;
mod tracker;

pub use config::DemuxConfig;
pub use demux::SectionDemux;
pub use diagnostics::PidDiagnostics;
pub use error::{DemuxError, PacketError, SectionError};
pub use extractor::SectionExtractor;
pub use handler::{DemuxContext, DemuxEvent, FnHandler, HandlerId, SectionHandler};
pub use packet::{AdaptationField, TsHeader, TsPacket, TsPacketIterator, SYNC_BYTE, TS_PACKET_SIZE};
pub use section::{
    crc32_mpeg2, Integrity, Section, SectionHeader, MAX_PRIVATE_SECTION_SIZE, MAX_PSI_SECTION_SIZE,
};
pub use table::{is_newer_version, Aggregation, Table, TableAggregator, TableKey, VERSION_WINDOW};
pub use tracker::{PayloadRun, PayloadRuns, PidTracker, ReassemblyState};

/// Well-known PIDs in MPEG-TS.
pub mod pid {
    /// Program Association Table PID.
    pub const PAT: u16 = 0x0000;
    /// Conditional Access Table PID.
    pub const CAT: u16 = 0x0001;
    /// Transport Stream Description Table PID.
    pub const TSDT: u16 = 0x0002;
    /// Network Information Table PID.
    pub const NIT: u16 = 0x0010;
    /// Service Description / Bouquet Association Table PID.
    pub const SDT: u16 = 0x0011;
    /// Event Information Table PID.
    pub const EIT: u16 = 0x0012;
    /// Time and Date / Time Offset Table PID.
    pub const TDT: u16 = 0x0014;
    /// Null packet PID (stuffing).
    pub const NULL: u16 = 0x1FFF;
    /// Largest PID value (13 bits).
    pub const MAX: u16 = 0x1FFF;
}

/// Table IDs for PSI/SI tables.
pub mod table_id {
    /// Program Association Section.
    pub const PAT: u8 = 0x00;
    /// Conditional Access Section.
    pub const CAT: u8 = 0x01;
    /// Program Map Section.
    pub const PMT: u8 = 0x02;
    /// Transport Stream Description Section.
    pub const TSDT: u8 = 0x03;
    /// First table id outside MPEG PSI; sections from here on may reach 4096 bytes.
    pub const FIRST_SI: u8 = 0x40;
    /// Network Information Section - actual.
    pub const NIT_ACTUAL: u8 = 0x40;
    /// Network Information Section - other.
    pub const NIT_OTHER: u8 = 0x41;
    /// Service Description Section - actual.
    pub const SDT_ACTUAL: u8 = 0x42;
    /// Service Description Section - other.
    pub const SDT_OTHER: u8 = 0x46;
    /// Bouquet Association Section.
    pub const BAT: u8 = 0x4A;
    /// Event Information Section - actual, present/following.
    pub const EIT_PF_ACTUAL: u8 = 0x4E;
    /// Event Information Section - other, present/following.
    pub const EIT_PF_OTHER: u8 = 0x4F;
    /// Time and Date Section.
    pub const TDT: u8 = 0x70;
    /// Time Offset Section (short section with CRC).
    pub const TOT: u8 = 0x73;

    /// Short human readable name of a table id.
    pub fn name(table_id: u8) -> &'static str {
        match table_id {
            PAT => "PAT",
            CAT => "CAT",
            PMT => "PMT",
            TSDT => "TSDT",
            NIT_ACTUAL | NIT_OTHER => "NIT",
            SDT_ACTUAL | SDT_OTHER => "SDT",
            BAT => "BAT",
            EIT_PF_ACTUAL | EIT_PF_OTHER | 0x50..=0x6F => "EIT",
            TDT => "TDT",
            TOT => "TOT",
            _ => "Unknown",
        }
    }
}
