//! Section demultiplexer - main engine.
//!
//! [`SectionDemux`] wires the PID tracker, section extractor, table
//! aggregator and handler dispatch together. Each call to [`SectionDemux::feed`]
//! runs one packet to completion, including every handler callback it causes.

use log::{trace, warn};

use crate::config::DemuxConfig;
use crate::diagnostics::PidDiagnostics;
use crate::error::DemuxError;
use crate::extractor::SectionExtractor;
use crate::handler::{DemuxContext, Dispatcher, HandlerId, PidCommand, SectionHandler};
use crate::packet::{TsPacket, TsPacketIterator};
use crate::section::Section;
use crate::table::{Aggregation, Table, TableAggregator, TableKey};
use crate::tracker::{PidTracker, ReassemblyState};

/// PSI/SI section and table demultiplexer.
///
/// Not thread-safe: handlers carry no `Send` bound, so an instance is created
/// and driven on one thread.
#[derive(Debug, Default)]
pub struct SectionDemux {
    config: DemuxConfig,
    tracker: PidTracker,
    aggregator: TableAggregator,
    dispatcher: Dispatcher,
    context: DemuxContext,
    /// Scratch buffer reused between packets.
    pending: Vec<Section>,
    packets: u64,
}

impl SectionDemux {
    /// Create a demux with the given configuration and no tracked PID.
    pub fn new(config: DemuxConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &DemuxConfig {
        &self.config
    }

    /// Start collecting sections on `pid`.
    pub fn track(&mut self, pid: u16) -> Result<(), DemuxError> {
        self.tracker.track(pid)
    }

    /// Stop collecting sections on `pid`, dropping its partial sections and
    /// tables. Returns the PID's final counters.
    pub fn untrack(&mut self, pid: u16) -> Result<PidDiagnostics, DemuxError> {
        let diagnostics = self.tracker.untrack(pid)?;
        self.aggregator.remove_pid(pid);
        Ok(diagnostics)
    }

    pub fn is_tracked(&self, pid: u16) -> bool {
        self.tracker.is_tracked(pid)
    }

    /// Tracked PIDs in ascending order.
    pub fn tracked_pids(&self) -> Vec<u16> {
        self.tracker.pids()
    }

    /// Attach a handler; it is called after previously registered ones.
    pub fn register_handler<H: SectionHandler + 'static>(&mut self, handler: H) -> HandlerId {
        self.dispatcher.register(Box::new(handler))
    }

    /// Detach a handler. Returns false if `id` is unknown.
    pub fn unregister_handler(&mut self, id: HandlerId) -> bool {
        self.dispatcher.unregister(id).is_some()
    }

    pub fn handler_count(&self) -> usize {
        self.dispatcher.len()
    }

    /// Process one transport packet.
    pub fn feed(&mut self, packet: &TsPacket<'_>) {
        self.packets += 1;
        self.context.begin_packet(self.packets);

        let pid = packet.header.pid;
        let Some(channel) = self.tracker.channel_mut(pid) else {
            return;
        };

        let runs = channel.accept(packet);
        if !runs.is_empty() {
            let extractor = SectionExtractor::new(&self.config);
            let mut sections = std::mem::take(&mut self.pending);
            for run in runs {
                extractor.consume(pid, &mut channel.state, &mut channel.diagnostics, run, &mut sections);
            }

            for section in sections.drain(..) {
                self.deliver(section);
            }
            self.pending = sections;
        }

        self.apply_commands();
    }

    /// Process every packet found in `data`, skipping bytes out of sync.
    ///
    /// Returns the number of packets processed.
    pub fn feed_bytes(&mut self, data: &[u8]) -> usize {
        let mut count = 0;
        for packet in TsPacketIterator::new(data) {
            self.feed(&packet);
            count += 1;
        }
        count
    }

    /// Route one extracted section through aggregation and dispatch.
    fn deliver(&mut self, section: Section) {
        let pid = section.pid();

        if !section.is_current() && !self.config.include_next {
            trace!(
                "[SectionDemux] PID 0x{:04X}: ignoring next section of table 0x{:02X}",
                pid,
                section.table_id()
            );
            self.bump(pid, |d| d.next_ignored += 1);
            return;
        }

        let key = section.table_key();
        let outcome = self.aggregator.accept(section.clone());
        let ctx = &mut self.context;
        let dispatcher = &mut self.dispatcher;

        let mut tables = 0;
        match &outcome {
            Aggregation::SectionAdded => {
                dispatcher.section(ctx, &section);
            }
            Aggregation::TableCompleted => {
                dispatcher.section(ctx, &section);
                if let Some(table) = self.aggregator.table(&key) {
                    dispatcher.table(ctx, table);
                    tables += 1;
                }
            }
            Aggregation::VersionChanged { previous, completed } => {
                dispatcher.section(ctx, &section);
                if let Some(current) = self.aggregator.table(&key) {
                    dispatcher.version_changed(ctx, previous, current);
                    if *completed {
                        dispatcher.table(ctx, current);
                        tables += 1;
                    }
                }
            }
            Aggregation::LayoutChanged { completed, .. } => {
                dispatcher.section(ctx, &section);
                if *completed {
                    if let Some(current) = self.aggregator.table(&key) {
                        dispatcher.table(ctx, current);
                        tables += 1;
                    }
                }
            }
            Aggregation::Standalone(table) => {
                dispatcher.section(ctx, &section);
                dispatcher.table(ctx, table);
                tables += 1;
            }
            Aggregation::Duplicate | Aggregation::Conflict => {}
        }

        let accepted = outcome.is_accepted();
        self.bump(pid, |d| {
            match outcome {
                Aggregation::Duplicate => d.duplicate_sections += 1,
                Aggregation::Conflict => d.conflicts += 1,
                Aggregation::VersionChanged { .. } => d.version_changes += 1,
                Aggregation::LayoutChanged { .. } => d.layout_changes += 1,
                _ => {}
            }
            if accepted {
                d.sections += 1;
            }
            d.tables += tables;
        });
    }

    fn bump(&mut self, pid: u16, f: impl FnOnce(&mut PidDiagnostics)) {
        if let Some(diagnostics) = self.tracker.diagnostics_mut(pid) {
            f(diagnostics);
        }
    }

    /// Apply the PID changes handlers requested during the last packet.
    fn apply_commands(&mut self) {
        for command in self.context.take_commands() {
            match command {
                PidCommand::Track(pid) => {
                    if let Err(e) = self.track(pid) {
                        warn!("[SectionDemux] Handler track request rejected: {}", e);
                    }
                }
                PidCommand::Untrack(pid) => {
                    if let Err(e) = self.untrack(pid) {
                        warn!("[SectionDemux] Handler untrack request rejected: {}", e);
                    }
                }
            }
        }
    }

    /// Packets fed so far, tracked or not.
    pub fn packet_count(&self) -> u64 {
        self.packets
    }

    pub fn diagnostics(&self, pid: u16) -> Option<&PidDiagnostics> {
        self.tracker.diagnostics(pid)
    }

    /// Sum of the counters of all tracked PIDs.
    pub fn total_diagnostics(&self) -> PidDiagnostics {
        self.tracker.total_diagnostics()
    }

    pub fn reassembly_state(&self, pid: u16) -> Option<&ReassemblyState> {
        self.tracker.state(pid)
    }

    /// Table currently held for `key`, complete or not.
    pub fn table(&self, key: &TableKey) -> Option<&Table> {
        self.aggregator.table(key)
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.aggregator.tables()
    }

    /// Drop all partial sections, tables and counters. Tracked PIDs and
    /// handlers are kept.
    pub fn reset(&mut self) {
        self.tracker.reset();
        self.aggregator.clear();
        self.pending.clear();
        self.packets = 0;
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::handler::{DemuxEvent, FnHandler};
    use crate::packet::{SYNC_BYTE, TS_PACKET_SIZE};
    use crate::section::testing::{long_section, short_section};

    const PID: u16 = 0x0100;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Section { table_id: u8, version: Option<u8>, number: u8 },
        Table { table_id: u8, version: Option<u8>, sections: usize },
        Changed { from: Option<u8>, to: Option<u8> },
    }

    fn recorder(demux: &mut SectionDemux) -> Rc<RefCell<Vec<Event>>> {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        demux.register_handler(FnHandler(move |_: &mut DemuxContext, ev: DemuxEvent<'_>| {
            let event = match ev {
                DemuxEvent::Section(s) => Event::Section {
                    table_id: s.table_id(),
                    version: s.version(),
                    number: s.section_number(),
                },
                DemuxEvent::Table(t) => Event::Table {
                    table_id: t.table_id(),
                    version: t.version(),
                    sections: t.section_count(),
                },
                DemuxEvent::TableVersionChanged { previous, current } => Event::Changed {
                    from: previous.version(),
                    to: current.version(),
                },
            };
            sink.borrow_mut().push(event);
        }));
        events
    }

    /// Build one raw packet.
    fn ts_packet(pid: u16, cc: u8, start: bool, payload: &[u8]) -> [u8; TS_PACKET_SIZE] {
        assert!(payload.len() <= 184);
        let mut packet = [0xFFu8; TS_PACKET_SIZE];
        packet[0] = SYNC_BYTE;
        packet[1] = (if start { 0x40 } else { 0 }) | (pid >> 8) as u8 & 0x1F;
        packet[2] = pid as u8;
        packet[3] = 0x10 | (cc & 0x0F);
        packet[4..4 + payload.len()].copy_from_slice(payload);
        packet
    }

    /// Split a section stream into packets, pointer field first.
    fn packetize(pid: u16, first_cc: u8, sections: &[u8]) -> Vec<[u8; TS_PACKET_SIZE]> {
        let mut packets = Vec::new();
        let mut head = vec![0u8];
        head.extend_from_slice(&sections[..sections.len().min(183)]);
        packets.push(ts_packet(pid, first_cc, true, &head));

        let mut cc = first_cc;
        for chunk in sections[sections.len().min(183)..].chunks(184) {
            cc = (cc + 1) & 0x0F;
            packets.push(ts_packet(pid, cc, false, chunk));
        }
        packets
    }

    fn feed_all(demux: &mut SectionDemux, packets: &[[u8; TS_PACKET_SIZE]]) {
        for raw in packets {
            demux.feed(&TsPacket::parse(raw).unwrap());
        }
    }

    fn tracked_demux() -> SectionDemux {
        let mut demux = SectionDemux::new(DemuxConfig::default());
        demux.track(PID).unwrap();
        demux
    }

    #[test]
    fn test_two_section_table_completes() {
        let mut demux = tracked_demux();
        let events = recorder(&mut demux);

        let mut stream = long_section(0x42, 1, 1, 0, 1, &[0xA0; 10]);
        stream.extend(long_section(0x42, 1, 1, 1, 1, &[0xA1; 10]));
        feed_all(&mut demux, &packetize(PID, 0, &stream));

        assert_eq!(
            *events.borrow(),
            vec![
                Event::Section { table_id: 0x42, version: Some(1), number: 0 },
                Event::Section { table_id: 0x42, version: Some(1), number: 1 },
                Event::Table { table_id: 0x42, version: Some(1), sections: 2 },
            ]
        );
        let diagnostics = demux.diagnostics(PID).unwrap();
        assert_eq!(diagnostics.sections, 2);
        assert_eq!(diagnostics.tables, 1);
    }

    #[test]
    fn test_second_section_new_version_changes_table() {
        let mut demux = tracked_demux();
        let events = recorder(&mut demux);

        let mut stream = long_section(0x42, 1, 1, 0, 1, &[0xA0; 10]);
        stream.extend(long_section(0x42, 1, 2, 1, 1, &[0xA1; 10]));
        feed_all(&mut demux, &packetize(PID, 0, &stream));

        assert_eq!(
            *events.borrow(),
            vec![
                Event::Section { table_id: 0x42, version: Some(1), number: 0 },
                Event::Section { table_id: 0x42, version: Some(2), number: 1 },
                Event::Changed { from: Some(1), to: Some(2) },
            ]
        );

        let key = TableKey { pid: PID, table_id: 0x42, table_id_extension: 1 };
        let table = demux.table(&key).unwrap();
        assert_eq!(table.version(), Some(2));
        assert_eq!(table.section_count(), 1);
        assert!(!table.is_complete());
    }

    #[test]
    fn test_section_count_change_surfaces_new_table() {
        let mut demux = tracked_demux();
        let events = recorder(&mut demux);

        let mut stream = long_section(0x42, 1, 1, 0, 1, &[0xA0; 10]);
        stream.extend(long_section(0x42, 1, 1, 0, 0, &[0xB0; 10]));
        feed_all(&mut demux, &packetize(PID, 0, &stream));

        assert_eq!(
            *events.borrow(),
            vec![
                Event::Section { table_id: 0x42, version: Some(1), number: 0 },
                Event::Section { table_id: 0x42, version: Some(1), number: 0 },
                Event::Table { table_id: 0x42, version: Some(1), sections: 1 },
            ]
        );
        let diagnostics = demux.diagnostics(PID).unwrap();
        assert_eq!(diagnostics.layout_changes, 1);
        assert_eq!(diagnostics.conflicts, 0);
        assert_eq!(diagnostics.tables, 1);
    }

    #[test]
    fn test_multi_packet_section_is_byte_identical() {
        let mut demux = tracked_demux();
        let received = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&received);
        demux.register_handler(FnHandler(move |_: &mut DemuxContext, ev: DemuxEvent<'_>| {
            if let DemuxEvent::Section(s) = ev {
                sink.borrow_mut().push(s.bytes().to_vec());
            }
        }));

        let payload: Vec<u8> = (0..900u32).map(|i| i as u8).collect();
        let raw = long_section(0x50, 0x0400, 3, 0, 0, &payload);
        let packets = packetize(PID, 14, &raw);
        assert!(packets.len() > 4);
        feed_all(&mut demux, &packets);

        let received = received.borrow();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0], raw[..raw.len() - 4].to_vec());
    }

    #[test]
    fn test_gap_discards_section() {
        let mut demux = tracked_demux();
        let events = recorder(&mut demux);

        let raw = long_section(0x50, 0x0400, 3, 0, 0, &[0x33; 400]);
        let mut packets = packetize(PID, 0, &raw);
        packets.remove(1);
        feed_all(&mut demux, &packets);

        assert!(events.borrow().is_empty());
        let diagnostics = demux.diagnostics(PID).unwrap();
        assert_eq!(diagnostics.discontinuities, 1);
        assert_eq!(diagnostics.sections, 0);
        assert_eq!(demux.reassembly_state(PID).unwrap().buffered(), 0);
    }

    #[test]
    fn test_recovers_at_next_unit_start_after_gap() {
        let mut demux = tracked_demux();
        let events = recorder(&mut demux);

        let lost = long_section(0x50, 0x0400, 3, 0, 0, &[0x33; 400]);
        let mut packets = packetize(PID, 0, &lost);
        assert_eq!(packets.len(), 3);
        packets.remove(1);

        let fresh = long_section(0x42, 1, 7, 0, 0, &[0x55; 20]);
        packets.extend(packetize(PID, 3, &fresh));
        feed_all(&mut demux, &packets);

        assert_eq!(
            *events.borrow(),
            vec![
                Event::Section { table_id: 0x42, version: Some(7), number: 0 },
                Event::Table { table_id: 0x42, version: Some(7), sections: 1 },
            ]
        );
        let diagnostics = demux.diagnostics(PID).unwrap();
        assert_eq!(diagnostics.discontinuities, 1);
        assert_eq!(diagnostics.sections, 1);
        assert_eq!(diagnostics.tables, 1);
    }

    #[test]
    fn test_repeated_section_notified_once() {
        let mut demux = tracked_demux();
        let events = recorder(&mut demux);

        let raw = long_section(0x00, 0x7FE1, 5, 0, 0, &[0x01, 0x01, 0xE1, 0x00]);
        feed_all(&mut demux, &packetize(PID, 0, &raw));
        feed_all(&mut demux, &packetize(PID, 1, &raw));

        assert_eq!(events.borrow().len(), 2); // one section, one table
        assert_eq!(demux.diagnostics(PID).unwrap().duplicate_sections, 1);
    }

    #[test]
    fn test_duplicate_packet_suppressed() {
        let mut demux = tracked_demux();
        let events = recorder(&mut demux);

        let raw = long_section(0x50, 0x0400, 3, 0, 0, &[0x44; 300]);
        let packets = packetize(PID, 0, &raw);
        let doubled = vec![packets[0], packets[1], packets[1]];
        feed_all(&mut demux, &doubled);

        assert_eq!(events.borrow().len(), 2);
        let diagnostics = demux.diagnostics(PID).unwrap();
        assert_eq!(diagnostics.duplicates, 1);
        assert_eq!(diagnostics.discontinuities, 0);
    }

    #[test]
    fn test_short_sections_share_packet() {
        let mut demux = tracked_demux();
        let events = recorder(&mut demux);

        let tdt = short_section(0x70, &[0xE8, 0x1B, 0x12, 0x00, 0x00]);
        let mut stream = tdt.clone();
        stream.extend_from_slice(&tdt);
        feed_all(&mut demux, &packetize(PID, 0, &stream));

        // Short sections have no identity: each one is surfaced.
        assert_eq!(
            *events.borrow(),
            vec![
                Event::Section { table_id: 0x70, version: None, number: 0 },
                Event::Table { table_id: 0x70, version: None, sections: 1 },
                Event::Section { table_id: 0x70, version: None, number: 0 },
                Event::Table { table_id: 0x70, version: None, sections: 1 },
            ]
        );
    }

    #[test]
    fn test_tail_before_pointer_completes_section() {
        let mut demux = tracked_demux();
        let events = recorder(&mut demux);

        let first = long_section(0x42, 1, 0, 0, 0, &[0x55; 190]);
        let second = long_section(0x46, 2, 0, 0, 0, &[0x66; 4]);

        // Packet 1 carries the first 183 bytes of `first`.
        let mut head = vec![0u8];
        head.extend_from_slice(&first[..183]);
        // Packet 2: pointer to `second` after the remaining tail of `first`.
        let tail = &first[183..];
        let mut next = vec![tail.len() as u8];
        next.extend_from_slice(tail);
        next.extend_from_slice(&second);

        feed_all(
            &mut demux,
            &[ts_packet(PID, 0, true, &head), ts_packet(PID, 1, true, &next)],
        );

        let tables: Vec<u8> = events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Table { table_id, .. } => Some(*table_id),
                _ => None,
            })
            .collect();
        assert_eq!(tables, vec![0x42, 0x46]);
        assert_eq!(demux.diagnostics(PID).unwrap().truncated_sections, 0);
    }

    #[test]
    fn test_untracked_pid_ignored() {
        let mut demux = tracked_demux();
        let events = recorder(&mut demux);

        let raw = long_section(0x00, 1, 0, 0, 0, &[0, 1, 0xE1, 0]);
        feed_all(&mut demux, &packetize(0x0000, 0, &raw));

        assert!(events.borrow().is_empty());
        assert_eq!(demux.packet_count(), 1);
        assert!(demux.diagnostics(0x0000).is_none());
    }

    #[test]
    fn test_next_sections_ignored_by_default() {
        let mut raw = long_section(0x02, 0x0101, 0, 0, 0, &[0xE1, 0x00, 0xF0, 0x00]);
        // Clear current_next_indicator and recompute the CRC.
        raw[5] &= !0x01;
        let crc_offset = raw.len() - 4;
        let crc = crate::section::crc32_mpeg2(&raw[..crc_offset]);
        raw[crc_offset..].copy_from_slice(&crc.to_be_bytes());

        let mut demux = tracked_demux();
        let events = recorder(&mut demux);
        feed_all(&mut demux, &packetize(PID, 0, &raw));
        assert!(events.borrow().is_empty());
        assert_eq!(demux.diagnostics(PID).unwrap().next_ignored, 1);

        let mut demux = SectionDemux::new(DemuxConfig {
            include_next: true,
            ..Default::default()
        });
        demux.track(PID).unwrap();
        let events = recorder(&mut demux);
        feed_all(&mut demux, &packetize(PID, 0, &raw));
        assert_eq!(events.borrow().len(), 2);
    }

    #[test]
    fn test_handler_requests_pid() {
        let mut demux = SectionDemux::new(DemuxConfig::default());
        demux.track(0x0000).unwrap();
        demux.register_handler(FnHandler(|ctx: &mut DemuxContext, ev: DemuxEvent<'_>| {
            if let DemuxEvent::Table(table) = ev {
                if table.table_id() == 0x00 {
                    ctx.track_pid(PID);
                    ctx.track_pid(0x4000);
                }
            }
        }));

        let raw = long_section(0x00, 1, 0, 0, 0, &[0x00, 0x01, 0xE1, 0x00]);
        feed_all(&mut demux, &packetize(0x0000, 0, &raw));

        assert_eq!(demux.tracked_pids(), vec![0x0000, PID]);
    }

    #[test]
    fn test_untrack_drops_tables() {
        let mut demux = tracked_demux();
        let raw = long_section(0x42, 1, 0, 0, 1, &[0x01]);
        feed_all(&mut demux, &packetize(PID, 0, &raw));
        assert_eq!(demux.tables().count(), 1);

        let diagnostics = demux.untrack(PID).unwrap();
        assert_eq!(diagnostics.sections, 1);
        assert_eq!(demux.tables().count(), 0);
        assert_eq!(demux.untrack(PID), Err(DemuxError::ChannelNotTracked(PID)));
    }

    #[test]
    fn test_feed_bytes_and_reset() {
        let mut demux = tracked_demux();
        let events = recorder(&mut demux);

        let raw = long_section(0x00, 1, 0, 0, 0, &[0x00, 0x01, 0xE1, 0x00]);
        let mut data = vec![0x00, 0x00];
        for packet in packetize(PID, 0, &raw) {
            data.extend_from_slice(&packet);
        }
        assert_eq!(demux.feed_bytes(&data), 1);
        assert_eq!(events.borrow().len(), 2);

        demux.reset();
        assert_eq!(demux.packet_count(), 0);
        assert_eq!(demux.tables().count(), 0);
        assert!(demux.is_tracked(PID));
        assert_eq!(demux.total_diagnostics(), PidDiagnostics::default());
        assert_eq!(demux.handler_count(), 1);
    }
}
