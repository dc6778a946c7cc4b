//! Section and table logger.
//!
//! Writes one line per event, as text or as JSON, and follows the PAT so that
//! every announced PMT PID gets tracked too.

use std::collections::BTreeSet;
use std::io::Write;

use log::{debug, info, warn};
use psi_demux::{pid, table_id, DemuxContext, Integrity, Section, SectionHandler, Table};
use serde::Serialize;

use crate::pat::PatTable;

/// PIDs below this carry fixed PSI/SI tables and stay tracked once followed.
const FIXED_PID_END: u16 = 0x0020;

/// What the logger reports.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggerOptions {
    /// Log every new section, not only complete tables.
    pub all_sections: bool,
    /// JSON lines instead of text.
    pub json: bool,
    /// Track PMT PIDs announced by the PAT.
    pub follow_pat: bool,
}

/// One output record.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Record {
    Section {
        packet: u64,
        pid: u16,
        table_id: u8,
        table: &'static str,
        table_id_extension: u16,
        version: Option<u8>,
        section_number: u8,
        last_section_number: u8,
        current: bool,
        integrity: Integrity,
        size: usize,
    },
    Table {
        packet: u64,
        pid: u16,
        table_id: u8,
        table: &'static str,
        table_id_extension: u16,
        version: Option<u8>,
        sections: usize,
        payload_size: usize,
    },
    VersionChanged {
        packet: u64,
        pid: u16,
        table_id: u8,
        table: &'static str,
        table_id_extension: u16,
        previous: Option<u8>,
        current: Option<u8>,
    },
}

impl Record {
    fn section(packet: u64, section: &Section) -> Self {
        Record::Section {
            packet,
            pid: section.pid(),
            table_id: section.table_id(),
            table: table_id::name(section.table_id()),
            table_id_extension: section.table_id_extension(),
            version: section.version(),
            section_number: section.section_number(),
            last_section_number: section.last_section_number(),
            current: section.is_current(),
            integrity: section.integrity(),
            size: section.bytes().len(),
        }
    }

    fn table(packet: u64, table: &Table) -> Self {
        Record::Table {
            packet,
            pid: table.pid(),
            table_id: table.table_id(),
            table: table_id::name(table.table_id()),
            table_id_extension: table.table_id_extension(),
            version: table.version(),
            sections: table.section_count(),
            payload_size: table.payload_size(),
        }
    }

    fn version_changed(packet: u64, previous: &Table, current: &Table) -> Self {
        Record::VersionChanged {
            packet,
            pid: current.pid(),
            table_id: current.table_id(),
            table: table_id::name(current.table_id()),
            table_id_extension: current.table_id_extension(),
            previous: previous.version(),
            current: current.version(),
        }
    }

    fn to_text(&self) -> String {
        match self {
            Record::Section {
                packet,
                pid,
                table,
                table_id_extension,
                version,
                section_number,
                last_section_number,
                current,
                size,
                ..
            } => format!(
                "#{} PID 0x{:04X} {} section ext=0x{:04X} v{} {}/{}{} size={}",
                packet,
                pid,
                table,
                table_id_extension,
                version_text(*version),
                section_number,
                last_section_number,
                if *current { "" } else { " (next)" },
                size
            ),
            Record::Table {
                packet,
                pid,
                table,
                table_id_extension,
                version,
                sections,
                payload_size,
                ..
            } => format!(
                "#{} PID 0x{:04X} {} table ext=0x{:04X} v{} sections={} payload={}",
                packet,
                pid,
                table,
                table_id_extension,
                version_text(*version),
                sections,
                payload_size
            ),
            Record::VersionChanged {
                packet,
                pid,
                table,
                table_id_extension,
                previous,
                current,
                ..
            } => format!(
                "#{} PID 0x{:04X} {} version ext=0x{:04X} v{} -> v{}",
                packet,
                pid,
                table,
                table_id_extension,
                version_text(*previous),
                version_text(*current)
            ),
        }
    }
}

fn version_text(version: Option<u8>) -> String {
    version.map_or_else(|| "-".to_string(), |v| v.to_string())
}

/// [`SectionHandler`] writing records to `out`.
pub struct PsiLogger<W> {
    options: LoggerOptions,
    out: W,
    followed: BTreeSet<u16>,
}

impl<W: Write> PsiLogger<W> {
    pub fn new(options: LoggerOptions, out: W) -> Self {
        Self {
            options,
            out,
            followed: BTreeSet::new(),
        }
    }

    fn emit(&mut self, record: &Record) {
        let result = if self.options.json {
            serde_json::to_writer(&mut self.out, record)
                .map_err(std::io::Error::from)
                .and_then(|_| writeln!(self.out))
        } else {
            writeln!(self.out, "{}", record.to_text())
        };
        if let Err(e) = result {
            warn!("[PsiLogger] Failed to write record: {}", e);
        }
    }

    fn follow_pat(&mut self, ctx: &mut DemuxContext, table: &Table) {
        let pat = match PatTable::parse(table) {
            Ok(pat) => pat,
            Err(e) => {
                warn!("[PsiLogger] PID 0x{:04X}: {}", table.pid(), e);
                return;
            }
        };

        debug!(
            "[PsiLogger] PAT tsid=0x{:04X} v{}: {} programs",
            pat.transport_stream_id,
            version_text(pat.version),
            pat.programs.len()
        );

        let announced: BTreeSet<u16> = pat
            .pmt_pids()
            .into_iter()
            .chain(pat.nit_pid)
            .filter(|&announced_pid| announced_pid != pid::NULL)
            .collect();

        for &dropped in self.followed.difference(&announced) {
            if dropped < FIXED_PID_END {
                continue;
            }
            info!("[PsiLogger] PID 0x{:04X} no longer in PAT, untracking", dropped);
            ctx.untrack_pid(dropped);
        }
        for &added in announced.difference(&self.followed) {
            info!("[PsiLogger] Following PID 0x{:04X} from PAT", added);
            ctx.track_pid(added);
        }

        self.followed
            .retain(|&followed| followed < FIXED_PID_END || announced.contains(&followed));
        self.followed.extend(announced);
    }

    #[cfg(test)]
    fn output(&self) -> &W {
        &self.out
    }
}

impl<W: Write> SectionHandler for PsiLogger<W> {
    fn on_section(&mut self, ctx: &mut DemuxContext, section: &Section) {
        if self.options.all_sections {
            self.emit(&Record::section(ctx.packet_index(), section));
        }
    }

    fn on_table(&mut self, ctx: &mut DemuxContext, table: &Table) {
        self.emit(&Record::table(ctx.packet_index(), table));

        if self.options.follow_pat && table.pid() == pid::PAT && table.table_id() == table_id::PAT {
            self.follow_pat(ctx, table);
        }
    }

    fn on_table_version_changed(&mut self, ctx: &mut DemuxContext, previous: &Table, current: &Table) {
        self.emit(&Record::version_changed(ctx.packet_index(), previous, current));
    }
}
