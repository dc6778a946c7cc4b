//! PSI section header parsing and CRC validation.
//!
//! A [`Section`] is only ever built from a byte range whose length matches
//! the declared `section_length`, and only after its integrity check has
//! passed.

use bytes::Bytes;

use crate::error::SectionError;
use crate::table::TableKey;

/// Size of the header common to every section (table_id + length).
pub const SHORT_HEADER_SIZE: usize = 3;
/// Size of the header of a long (syntax indicator = 1) section.
pub const LONG_HEADER_SIZE: usize = 8;
/// Size of the CRC32 trailer.
pub const CRC_SIZE: usize = 4;
/// Maximum total size of an MPEG PSI section (table_id 0x00-0x3F).
pub const MAX_PSI_SECTION_SIZE: usize = 1024;
/// Maximum total size of a private / SI section.
pub const MAX_PRIVATE_SECTION_SIZE: usize = 4096;
/// Table id value used as stuffing after the last section of a packet.
pub const STUFFING_BYTE: u8 = 0xFF;

/// Smallest legal section_length of a long section (extension + CRC).
const MIN_LONG_SECTION_LENGTH: u16 = (LONG_HEADER_SIZE - SHORT_HEADER_SIZE + CRC_SIZE) as u16;

/// PSI section header (common to all PSI tables).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SectionHeader {
    /// Table ID.
    pub table_id: u8,
    /// Section syntax indicator.
    pub section_syntax_indicator: bool,
    /// Section length (12 bits).
    pub section_length: u16,
    /// Table ID extension (for long sections).
    pub table_id_extension: u16,
    /// Version number (5 bits).
    pub version_number: u8,
    /// Current/next indicator.
    pub current_next_indicator: bool,
    /// Section number.
    pub section_number: u8,
    /// Last section number.
    pub last_section_number: u8,
}

impl SectionHeader {
    /// Read the declared section length from the first three bytes.
    ///
    /// Returns `None` until three bytes are available.
    pub fn peek_length(data: &[u8]) -> Option<u16> {
        if data.len() < SHORT_HEADER_SIZE {
            return None;
        }
        Some(((data[1] as u16 & 0x0F) << 8) | data[2] as u16)
    }

    /// Parse a section header from raw bytes starting at table_id.
    pub fn parse(data: &[u8]) -> Result<Self, SectionError> {
        let section_length =
            Self::peek_length(data).ok_or(SectionError::Malformed("section too short for header"))?;

        let table_id = data[0];
        let section_syntax_indicator = data[1] & 0x80 != 0;

        let header = if section_syntax_indicator {
            if data.len() < LONG_HEADER_SIZE {
                return Err(SectionError::Malformed("section too short for extended header"));
            }

            SectionHeader {
                table_id,
                section_syntax_indicator,
                section_length,
                table_id_extension: ((data[3] as u16) << 8) | data[4] as u16,
                version_number: (data[5] >> 1) & 0x1F,
                current_next_indicator: data[5] & 0x01 != 0,
                section_number: data[6],
                last_section_number: data[7],
            }
        } else {
            // Short sections have no extended header: they are always
            // "current" and form a table of their own.
            SectionHeader {
                table_id,
                section_syntax_indicator,
                section_length,
                table_id_extension: 0,
                version_number: 0,
                current_next_indicator: true,
                section_number: 0,
                last_section_number: 0,
            }
        };

        Ok(header)
    }

    /// Total section size including header and CRC.
    pub fn total_length(&self) -> usize {
        SHORT_HEADER_SIZE + self.section_length as usize
    }

    /// Size of the header preceding the section payload.
    pub fn header_length(&self) -> usize {
        if self.section_syntax_indicator {
            LONG_HEADER_SIZE
        } else {
            SHORT_HEADER_SIZE
        }
    }
}

/// Outcome of the integrity check of an accepted section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Integrity {
    /// CRC32 trailer present and verified.
    Crc32Verified,
    /// Short section without a CRC trailer.
    NotPresent,
}

/// A complete, length-validated and integrity-checked section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pid: u16,
    header: SectionHeader,
    integrity: Integrity,
    /// Header and payload, CRC trailer excluded.
    data: Bytes,
}

impl Section {
    /// Validate an exactly sized section buffer.
    ///
    /// `short_crc` tells whether a short section of this table id carries a
    /// CRC32 trailer. Long sections always do.
    pub fn from_bytes(pid: u16, raw: Bytes, short_crc: bool) -> Result<Self, SectionError> {
        let header = SectionHeader::parse(&raw)?;
        let total_length = header.total_length();

        if raw.len() != total_length {
            return Err(SectionError::Malformed("length field does not match section size"));
        }

        if header.section_syntax_indicator {
            if header.section_length < MIN_LONG_SECTION_LENGTH {
                return Err(SectionError::Malformed("long section length too small"));
            }
            if header.section_number > header.last_section_number {
                return Err(SectionError::IndexOutOfRange {
                    number: header.section_number,
                    last: header.last_section_number,
                });
            }
        }

        let has_crc = header.section_syntax_indicator || short_crc;
        let (integrity, data_end) = if has_crc {
            if (header.section_length as usize) < CRC_SIZE {
                return Err(SectionError::Malformed("section too short for CRC"));
            }
            let crc_offset = total_length - CRC_SIZE;
            let stored = u32::from_be_bytes([
                raw[crc_offset],
                raw[crc_offset + 1],
                raw[crc_offset + 2],
                raw[crc_offset + 3],
            ]);
            let computed = crc32_mpeg2(&raw[..crc_offset]);
            if stored != computed {
                return Err(SectionError::CrcMismatch { stored, computed });
            }
            (Integrity::Crc32Verified, crc_offset)
        } else {
            (Integrity::NotPresent, total_length)
        };

        Ok(Section {
            pid,
            header,
            integrity,
            data: raw.slice(..data_end),
        })
    }

    /// PID the section was carried on.
    pub fn pid(&self) -> u16 {
        self.pid
    }

    /// Parsed section header.
    pub fn header(&self) -> &SectionHeader {
        &self.header
    }

    pub fn table_id(&self) -> u8 {
        self.header.table_id
    }

    /// Whether this is a long (versioned) section.
    pub fn is_long(&self) -> bool {
        self.header.section_syntax_indicator
    }

    /// Version number; `None` for short sections.
    pub fn version(&self) -> Option<u8> {
        self.is_long().then_some(self.header.version_number)
    }

    pub fn table_id_extension(&self) -> u16 {
        self.header.table_id_extension
    }

    pub fn section_number(&self) -> u8 {
        self.header.section_number
    }

    pub fn last_section_number(&self) -> u8 {
        self.header.last_section_number
    }

    /// Whether the section applies now (current_next_indicator = 1).
    pub fn is_current(&self) -> bool {
        self.header.current_next_indicator
    }

    pub fn integrity(&self) -> Integrity {
        self.integrity
    }

    /// Header and payload bytes, without the CRC trailer.
    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    /// Payload bytes following the (short or long) header.
    pub fn payload(&self) -> &[u8] {
        &self.data[self.header.header_length()..]
    }

    /// Key of the table this section belongs to.
    pub fn table_key(&self) -> TableKey {
        TableKey {
            pid: self.pid,
            table_id: self.header.table_id,
            table_id_extension: self.header.table_id_extension,
        }
    }
}

/// Calculate CRC32 for MPEG-2 (polynomial 0x04C11DB7).
pub fn crc32_mpeg2(data: &[u8]) -> u32 {
    static CRC_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = (i as u32) << 24;
            let mut j = 0;
            while j < 8 {
                if crc & 0x80000000 != 0 {
                    crc = (crc << 1) ^ 0x04C11DB7;
                } else {
                    crc <<= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFFFFFFu32;
    for &byte in data {
        let index = ((crc >> 24) ^ byte as u32) as usize;
        crc = (crc << 8) ^ CRC_TABLE[index];
    }
    crc
}

/// Test fixtures shared by the module tests of this crate.
#[cfg(test)]
pub(crate) mod testing {
    use super::crc32_mpeg2;

    /// Build a long section with a valid CRC.
    pub fn long_section(
        table_id: u8,
        table_id_extension: u16,
        version: u8,
        section_number: u8,
        last_section_number: u8,
        payload: &[u8],
    ) -> Vec<u8> {
        let section_length = 5 + payload.len() + 4;
        let mut data = vec![
            table_id,
            0xB0 | ((section_length >> 8) as u8 & 0x0F),
            section_length as u8,
            (table_id_extension >> 8) as u8,
            table_id_extension as u8,
            0xC1 | ((version & 0x1F) << 1),
            section_number,
            last_section_number,
        ];
        data.extend_from_slice(payload);
        let crc = crc32_mpeg2(&data);
        data.extend_from_slice(&crc.to_be_bytes());
        data
    }

    /// Build a short section without CRC.
    pub fn short_section(table_id: u8, payload: &[u8]) -> Vec<u8> {
        let mut data = vec![
            table_id,
            0x70 | ((payload.len() >> 8) as u8 & 0x0F),
            payload.len() as u8,
        ];
        data.extend_from_slice(payload);
        data
    }
}
