//! Table aggregation.
//!
//! Sections sharing a [`TableKey`] and a version are collected into a
//! [`Table`] until every section index up to `last_section_number` is
//! present. A different version, or a different section count at the same
//! version, replaces the table wholesale.

use std::collections::{BTreeMap, HashMap};

use log::{debug, info, warn};
use serde::Serialize;

use crate::section::Section;

/// Number of versions ahead of the current one considered a forward step.
/// Anything further away (modulo 32) is a rollback, such as after a
/// multiplexer restart.
pub const VERSION_WINDOW: u8 = 15;

/// Identity of a table within the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TableKey {
    /// PID carrying the table.
    pub pid: u16,
    /// Table ID.
    pub table_id: u8,
    /// Table ID extension (service, network, transport stream...).
    pub table_id_extension: u16,
}

/// One or more sections sharing key and version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    key: TableKey,
    long: bool,
    version: u8,
    last_section_number: u8,
    sections: BTreeMap<u8, Section>,
}

impl Table {
    /// Start a table from its first section.
    pub fn new(section: Section) -> Self {
        let mut sections = BTreeMap::new();
        let key = section.table_key();
        let long = section.is_long();
        let version = section.header().version_number;
        let last_section_number = section.last_section_number();
        sections.insert(section.section_number(), section);

        Self {
            key,
            long,
            version,
            last_section_number,
            sections,
        }
    }

    pub fn key(&self) -> TableKey {
        self.key
    }

    pub fn pid(&self) -> u16 {
        self.key.pid
    }

    pub fn table_id(&self) -> u8 {
        self.key.table_id
    }

    pub fn table_id_extension(&self) -> u16 {
        self.key.table_id_extension
    }

    /// Version number; `None` for tables made of a short section.
    pub fn version(&self) -> Option<u8> {
        self.long.then_some(self.version)
    }

    pub fn last_section_number(&self) -> u8 {
        self.last_section_number
    }

    /// Whether every section 0..=last_section_number is present.
    pub fn is_complete(&self) -> bool {
        self.sections.len() == self.last_section_number as usize + 1
    }

    /// Number of sections collected so far.
    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn section(&self, number: u8) -> Option<&Section> {
        self.sections.get(&number)
    }

    /// Collected sections in section number order.
    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.values()
    }

    /// Section numbers still missing.
    pub fn missing_sections(&self) -> Vec<u8> {
        (0..=self.last_section_number)
            .filter(|n| !self.sections.contains_key(n))
            .collect()
    }

    /// Total payload size of the collected sections.
    pub fn payload_size(&self) -> usize {
        self.sections.values().map(|s| s.payload().len()).sum()
    }
}

/// Result of handing a section to the [`TableAggregator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Aggregation {
    /// Section stored, table still incomplete.
    SectionAdded,
    /// Section stored and the table is now complete.
    TableCompleted,
    /// A different version replaced `previous`; collection restarted with
    /// this section, which alone completes the new table when `completed` is
    /// set.
    VersionChanged { previous: Table, completed: bool },
    /// Same version but a different `last_section_number`: the section
    /// belongs to another table, which replaced `previous`.
    LayoutChanged { previous: Table, completed: bool },
    /// Identical section already held.
    Duplicate,
    /// Same version, layout and index with different content; the first-seen
    /// content is kept.
    Conflict,
    /// Short section: a complete table of its own, not retained.
    Standalone(Table),
}

impl Aggregation {
    /// Whether the section was surfaced (not rejected or ignored).
    pub fn is_accepted(&self) -> bool {
        matches!(
            self,
            Aggregation::SectionAdded
                | Aggregation::TableCompleted
                | Aggregation::VersionChanged { .. }
                | Aggregation::LayoutChanged { .. }
                | Aggregation::Standalone(_)
        )
    }
}

/// Whether `candidate` is ahead of `current` by a forward distance of
/// 1..=[`VERSION_WINDOW`] modulo 32.
pub fn is_newer_version(candidate: u8, current: u8) -> bool {
    let distance = candidate.wrapping_sub(current) & 0x1F;
    distance != 0 && distance <= VERSION_WINDOW
}

/// Collects long sections into tables, one per [`TableKey`].
#[derive(Debug, Default)]
pub struct TableAggregator {
    tables: HashMap<TableKey, Table>,
}

impl TableAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `section` to its table.
    ///
    /// The stream is authoritative: any version other than the held one
    /// replaces the table, including backward jumps.
    pub fn accept(&mut self, section: Section) -> Aggregation {
        if !section.is_long() {
            return Aggregation::Standalone(Table::new(section));
        }

        let key = section.table_key();
        let Some(table) = self.tables.get_mut(&key) else {
            let table = Table::new(section);
            let complete = table.is_complete();
            self.tables.insert(key, table);
            return if complete {
                Aggregation::TableCompleted
            } else {
                Aggregation::SectionAdded
            };
        };

        let version = section.header().version_number;
        if version != table.version {
            if is_newer_version(version, table.version) {
                debug!(
                    "[TableAggregator] {:?}: version {} -> {}",
                    key, table.version, version
                );
            } else {
                info!(
                    "[TableAggregator] {:?}: version rolled back {} -> {}",
                    key, table.version, version
                );
            }
            let previous = std::mem::replace(table, Table::new(section));
            let completed = table.is_complete();
            return Aggregation::VersionChanged {
                previous,
                completed,
            };
        }

        if section.last_section_number() != table.last_section_number {
            debug!(
                "[TableAggregator] {:?} v{}: last section number {} -> {}, restarting",
                key,
                version,
                table.last_section_number,
                section.last_section_number()
            );
            let previous = std::mem::replace(table, Table::new(section));
            let completed = table.is_complete();
            return Aggregation::LayoutChanged {
                previous,
                completed,
            };
        }

        let number = section.section_number();
        match table.sections.get(&number) {
            Some(existing) if existing.bytes() == section.bytes() => Aggregation::Duplicate,
            Some(_) => {
                warn!(
                    "[TableAggregator] {:?} v{}: section {} content changed without version change, keeping first",
                    key, version, number
                );
                Aggregation::Conflict
            }
            None => {
                table.sections.insert(number, section);
                if table.is_complete() {
                    Aggregation::TableCompleted
                } else {
                    Aggregation::SectionAdded
                }
            }
        }
    }

    pub fn table(&self, key: &TableKey) -> Option<&Table> {
        self.tables.get(key)
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Drop every table carried on `pid`.
    pub fn remove_pid(&mut self, pid: u16) {
        self.tables.retain(|key, _| key.pid != pid);
    }

    pub fn clear(&mut self) {
        self.tables.clear();
    }
}
