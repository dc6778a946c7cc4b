//! Demultiplexer configuration.

use serde::Deserialize;

use crate::section::{MAX_PRIVATE_SECTION_SIZE, MAX_PSI_SECTION_SIZE};
use crate::table_id;

/// Configuration for [`crate::SectionDemux`].
///
/// Deserializable so that it can sit in a `[demux]` section of a TOML file;
/// missing keys take their default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DemuxConfig {
    /// Accept sections whose current_next_indicator is 0.
    pub include_next: bool,
    /// Table ids of short sections that carry a CRC32 trailer.
    pub crc_short_table_ids: Vec<u8>,
    /// Maximum total size of an MPEG PSI section (table_id < 0x40).
    pub max_psi_section_size: usize,
    /// Maximum total size of any other section.
    pub max_private_section_size: usize,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            include_next: false,
            crc_short_table_ids: vec![table_id::TOT],
            max_psi_section_size: MAX_PSI_SECTION_SIZE,
            max_private_section_size: MAX_PRIVATE_SECTION_SIZE,
        }
    }
}

impl DemuxConfig {
    /// Largest legal total size for a section of `table_id`.
    pub fn max_section_size(&self, table_id: u8) -> usize {
        if table_id < table_id::FIRST_SI {
            self.max_psi_section_size
        } else {
            self.max_private_section_size
        }
    }

    /// Whether a short section of `table_id` ends with a CRC32.
    pub fn short_section_has_crc(&self, table_id: u8) -> bool {
        self.crc_short_table_ids.contains(&table_id)
    }
}
