//! Minimal PAT decoding, enough to find the PMT PIDs to follow.

use std::collections::BTreeMap;

use psi_demux::{table_id, Table};

/// Size of one program loop entry.
const ENTRY_SIZE: usize = 4;

/// Program association of one transport stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatTable {
    pub transport_stream_id: u16,
    pub version: Option<u8>,
    /// program_number -> PMT PID, program 0 excluded.
    pub programs: BTreeMap<u16, u16>,
    /// Network PID announced as program 0.
    pub nit_pid: Option<u16>,
}

impl PatTable {
    /// Decode the program loops of every section of a complete PAT.
    pub fn parse(table: &Table) -> Result<Self, &'static str> {
        if table.table_id() != table_id::PAT {
            return Err("Not a PAT table");
        }

        let mut pat = PatTable {
            transport_stream_id: table.table_id_extension(),
            version: table.version(),
            ..Default::default()
        };

        for section in table.sections() {
            let entries = section.payload().chunks_exact(ENTRY_SIZE);
            if !entries.remainder().is_empty() {
                return Err("Invalid PAT data length");
            }

            for entry in entries {
                let program_number = u16::from_be_bytes([entry[0], entry[1]]);
                let pid = u16::from_be_bytes([entry[2] & 0x1F, entry[3]]);
                match program_number {
                    0 => pat.nit_pid = Some(pid),
                    _ => {
                        pat.programs.insert(program_number, pid);
                    }
                }
            }
        }

        Ok(pat)
    }

    /// Distinct PMT PIDs, ascending.
    pub fn pmt_pids(&self) -> Vec<u16> {
        let mut pids: Vec<u16> = self.programs.values().copied().collect();
        pids.sort_unstable();
        pids.dedup();
        pids
    }
}
