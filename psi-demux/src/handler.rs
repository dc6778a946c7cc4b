//! Consumer notification.
//!
//! Handlers are invoked synchronously from within
//! [`crate::SectionDemux::feed`], in registration order, for every event in
//! the order it is produced. A handler cannot feed the demux it is called
//! from: the demux is mutably borrowed for the whole call. Handlers that need
//! to change the tracked PID set do so through [`DemuxContext`].

use crate::section::Section;
use crate::table::Table;

/// An event delivered to a [`FnHandler`].
#[derive(Debug, Clone, Copy)]
pub enum DemuxEvent<'a> {
    /// A new section was accepted.
    Section(&'a Section),
    /// A table is complete.
    Table(&'a Table),
    /// A table was superseded by a newer version.
    TableVersionChanged {
        previous: &'a Table,
        current: &'a Table,
    },
}

/// Receiver of demultiplexer notifications.
///
/// Every method has an empty default, so a handler only implements the events
/// it cares about.
pub trait SectionHandler {
    /// Called once for every newly accepted section.
    fn on_section(&mut self, _ctx: &mut DemuxContext, _section: &Section) {}

    /// Called once when a table (or a version of it) becomes complete.
    fn on_table(&mut self, _ctx: &mut DemuxContext, _table: &Table) {}

    /// Called when a newer version replaces a table. `current` holds the
    /// sections of the new version collected so far.
    fn on_table_version_changed(
        &mut self,
        _ctx: &mut DemuxContext,
        _previous: &Table,
        _current: &Table,
    ) {
    }
}

/// Adapts a closure to [`SectionHandler`].
pub struct FnHandler<F>(pub F);

impl<F> SectionHandler for FnHandler<F>
where
    F: FnMut(&mut DemuxContext, DemuxEvent<'_>),
{
    fn on_section(&mut self, ctx: &mut DemuxContext, section: &Section) {
        (self.0)(ctx, DemuxEvent::Section(section));
    }

    fn on_table(&mut self, ctx: &mut DemuxContext, table: &Table) {
        (self.0)(ctx, DemuxEvent::Table(table));
    }

    fn on_table_version_changed(&mut self, ctx: &mut DemuxContext, previous: &Table, current: &Table) {
        (self.0)(ctx, DemuxEvent::TableVersionChanged { previous, current });
    }
}

/// PID set change requested by a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PidCommand {
    Track(u16),
    Untrack(u16),
}

/// Context passed to handlers during dispatch.
///
/// PID changes requested here are applied after the current packet has been
/// fully processed.
#[derive(Debug, Default)]
pub struct DemuxContext {
    packet_index: u64,
    commands: Vec<PidCommand>,
}

impl DemuxContext {
    /// 1-based arrival index of the packet being processed.
    pub fn packet_index(&self) -> u64 {
        self.packet_index
    }

    /// Request tracking of `pid` once the current packet is done.
    pub fn track_pid(&mut self, pid: u16) {
        self.commands.push(PidCommand::Track(pid));
    }

    /// Request untracking of `pid` once the current packet is done.
    pub fn untrack_pid(&mut self, pid: u16) {
        self.commands.push(PidCommand::Untrack(pid));
    }

    pub(crate) fn begin_packet(&mut self, packet_index: u64) {
        self.packet_index = packet_index;
    }

    pub(crate) fn take_commands(&mut self) -> Vec<PidCommand> {
        std::mem::take(&mut self.commands)
    }
}

/// Identifier returned by [`crate::SectionDemux::register_handler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Registered handlers, in registration order.
#[derive(Default)]
pub(crate) struct Dispatcher {
    handlers: Vec<(HandlerId, Box<dyn SectionHandler>)>,
    next_id: u64,
}

impl Dispatcher {
    pub(crate) fn register(&mut self, handler: Box<dyn SectionHandler>) -> HandlerId {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        self.handlers.push((id, handler));
        id
    }

    pub(crate) fn unregister(&mut self, id: HandlerId) -> Option<Box<dyn SectionHandler>> {
        let index = self.handlers.iter().position(|(h, _)| *h == id)?;
        Some(self.handlers.remove(index).1)
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers.len()
    }

    pub(crate) fn section(&mut self, ctx: &mut DemuxContext, section: &Section) {
        for (_, handler) in &mut self.handlers {
            handler.on_section(ctx, section);
        }
    }

    pub(crate) fn table(&mut self, ctx: &mut DemuxContext, table: &Table) {
        for (_, handler) in &mut self.handlers {
            handler.on_table(ctx, table);
        }
    }

    pub(crate) fn version_changed(&mut self, ctx: &mut DemuxContext, previous: &Table, current: &Table) {
        for (_, handler) in &mut self.handlers {
            handler.on_table_version_changed(ctx, previous, current);
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
