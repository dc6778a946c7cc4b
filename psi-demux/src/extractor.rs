//! Section extraction from accumulated payload bytes.
//!
//! Payload runs are appended to the PID's accumulation buffer; every complete
//! section at the front of the buffer is split off, validated and emitted.
//! Leftover bytes stay buffered until the next run.

use log::{debug, trace};

use crate::config::DemuxConfig;
use crate::diagnostics::PidDiagnostics;
use crate::error::SectionError;
use crate::section::{Section, SectionHeader, CRC_SIZE, LONG_HEADER_SIZE, SHORT_HEADER_SIZE, STUFFING_BYTE};
use crate::tracker::{PayloadRun, ReassemblyState};

/// Splits validated sections out of a PID's accumulation buffer.
#[derive(Debug, Clone, Copy)]
pub struct SectionExtractor<'c> {
    config: &'c DemuxConfig,
}

impl<'c> SectionExtractor<'c> {
    pub fn new(config: &'c DemuxConfig) -> Self {
        Self { config }
    }

    /// Append `run` to `state` and push every section it completes to `out`.
    pub fn consume(
        &self,
        pid: u16,
        state: &mut ReassemblyState,
        diagnostics: &mut PidDiagnostics,
        run: PayloadRun<'_>,
        out: &mut Vec<Section>,
    ) {
        match run {
            PayloadRun::SectionStart(bytes) => {
                if !state.buffer.is_empty() {
                    diagnostics.truncated_sections += 1;
                    debug!(
                        "[SectionExtractor] PID 0x{:04X}: truncated section, {} bytes discarded",
                        pid,
                        state.buffer.len()
                    );
                    state.buffer.clear();
                }
                state.synchronized = true;
                state.buffer.extend_from_slice(bytes);
            }
            PayloadRun::Continuation(bytes) => {
                if !state.synchronized {
                    return;
                }
                state.buffer.extend_from_slice(bytes);
            }
        }

        self.extract(pid, state, diagnostics, out);
    }

    fn extract(
        &self,
        pid: u16,
        state: &mut ReassemblyState,
        diagnostics: &mut PidDiagnostics,
        out: &mut Vec<Section>,
    ) {
        while state.synchronized && !state.buffer.is_empty() {
            let table_id = state.buffer[0];
            if table_id == STUFFING_BYTE {
                // Nothing but stuffing until the next section start.
                state.desync();
                break;
            }

            let Some(section_length) = SectionHeader::peek_length(&state.buffer) else {
                break;
            };
            let total_length = SHORT_HEADER_SIZE + section_length as usize;
            let long = state.buffer[1] & 0x80 != 0;

            if total_length > self.config.max_section_size(table_id)
                || (long && total_length < LONG_HEADER_SIZE + CRC_SIZE)
            {
                diagnostics.malformed_sections += 1;
                debug!(
                    "[SectionExtractor] PID 0x{:04X}: invalid section length {} for table 0x{:02X}",
                    pid, section_length, table_id
                );
                state.desync();
                break;
            }

            if state.buffer.len() < total_length {
                break;
            }

            let raw = state.buffer.split_to(total_length).freeze();
            match Section::from_bytes(pid, raw, self.config.short_section_has_crc(table_id)) {
                Ok(section) => {
                    trace!(
                        "[SectionExtractor] PID 0x{:04X}: section table 0x{:02X}, {} bytes",
                        pid,
                        table_id,
                        total_length
                    );
                    out.push(section);
                }
                Err(SectionError::CrcMismatch { stored, computed }) => {
                    diagnostics.crc_errors += 1;
                    debug!(
                        "[SectionExtractor] PID 0x{:04X}: CRC error on table 0x{:02X} (0x{:08X} != 0x{:08X})",
                        pid, table_id, stored, computed
                    );
                }
                Err(e) => {
                    diagnostics.malformed_sections += 1;
                    debug!("[SectionExtractor] PID 0x{:04X}: {}", pid, e);
                }
            }
        }
    }
}
