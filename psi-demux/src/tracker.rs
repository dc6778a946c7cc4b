//! Per-PID reassembly state and continuity tracking.
//!
//! The tracker owns one [`ReassemblyState`] per tracked PID. For every packet
//! it checks the continuity counter and splits the payload into runs that the
//! extractor appends to the accumulation buffer.

use std::collections::HashMap;

use bytes::BytesMut;
use log::{debug, trace};

use crate::diagnostics::PidDiagnostics;
use crate::error::DemuxError;
use crate::packet::TsPacket;
use crate::pid;

/// Section reassembly state for one PID.
#[derive(Debug, Default)]
pub struct ReassemblyState {
    /// Bytes of the section being accumulated.
    pub(crate) buffer: BytesMut,
    /// Continuity counter of the last packet with payload.
    last_cc: Option<u8>,
    /// Whether buffered bytes and continuations belong to a known section.
    pub(crate) synchronized: bool,
}

impl ReassemblyState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    /// Number of bytes waiting for the rest of their section.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn last_continuity_counter(&self) -> Option<u8> {
        self.last_cc
    }

    /// Drop the accumulation and wait for the next section start.
    pub(crate) fn desync(&mut self) {
        self.buffer.clear();
        self.synchronized = false;
    }
}

/// A slice of packet payload, tagged with its position in the section stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadRun<'a> {
    /// Bytes continuing the section in progress.
    Continuation(&'a [u8]),
    /// Bytes starting at the first byte of a new section.
    SectionStart(&'a [u8]),
}

/// The runs extracted from one packet: at most a continuation tail followed
/// by a section start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PayloadRuns<'a> {
    tail: Option<&'a [u8]>,
    head: Option<&'a [u8]>,
}

impl<'a> PayloadRuns<'a> {
    pub fn is_empty(&self) -> bool {
        self.tail.is_none() && self.head.is_none()
    }
}

impl<'a> Iterator for PayloadRuns<'a> {
    type Item = PayloadRun<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(tail) = self.tail.take() {
            return Some(PayloadRun::Continuation(tail));
        }
        self.head.take().map(PayloadRun::SectionStart)
    }
}

/// State and counters of one tracked PID.
#[derive(Debug, Default)]
pub(crate) struct Channel {
    pub(crate) state: ReassemblyState,
    pub(crate) diagnostics: PidDiagnostics,
}

impl Channel {
    /// Run continuity checks for `packet` and return its payload runs.
    pub(crate) fn accept<'a>(&mut self, packet: &TsPacket<'a>) -> PayloadRuns<'a> {
        let header = &packet.header;
        self.diagnostics.packets += 1;

        if header.transport_error {
            self.diagnostics.transport_errors += 1;
            return PayloadRuns::default();
        }
        if header.is_scrambled() {
            self.diagnostics.scrambled += 1;
            return PayloadRuns::default();
        }
        // Packets without payload do not advance the continuity counter.
        if !header.has_payload() {
            return PayloadRuns::default();
        }

        let cc = header.continuity_counter;
        if let Some(last) = self.state.last_cc {
            let expected = (last + 1) & 0x0F;
            if cc != expected {
                if packet.discontinuity() {
                    self.diagnostics.signalled_discontinuities += 1;
                    trace!("[PidTracker] PID 0x{:04X}: signalled discontinuity, CC {} -> {}", header.pid, last, cc);
                } else if cc == last {
                    self.diagnostics.duplicates += 1;
                    return PayloadRuns::default();
                } else {
                    self.diagnostics.discontinuities += 1;
                    debug!(
                        "[PidTracker] PID 0x{:04X}: continuity gap, expected CC {} got {} ({} bytes dropped)",
                        header.pid,
                        expected,
                        cc,
                        self.state.buffered()
                    );
                    self.state.desync();
                }
            }
        }
        self.state.last_cc = Some(cc);

        let payload = packet.payload;
        if header.payload_unit_start {
            let Some((&pointer, rest)) = payload.split_first() else {
                self.diagnostics.malformed_sections += 1;
                self.state.desync();
                return PayloadRuns::default();
            };
            let pointer = pointer as usize;
            if pointer > rest.len() {
                debug!("[PidTracker] PID 0x{:04X}: pointer field {} overruns payload", header.pid, pointer);
                self.diagnostics.malformed_sections += 1;
                self.state.desync();
                return PayloadRuns::default();
            }

            let (tail, head) = rest.split_at(pointer);
            PayloadRuns {
                tail: (self.state.synchronized && !tail.is_empty()).then_some(tail),
                head: Some(head),
            }
        } else if self.state.synchronized {
            PayloadRuns {
                tail: Some(payload),
                head: None,
            }
        } else {
            PayloadRuns::default()
        }
    }
}

/// Reassembly state for every tracked PID.
///
/// Only PIDs explicitly tracked hold state, which bounds memory regardless
/// of what the stream carries.
#[derive(Debug, Default)]
pub struct PidTracker {
    channels: HashMap<u16, Channel>,
}

impl PidTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `pid`. Tracking an already tracked PID keeps its state.
    pub fn track(&mut self, pid: u16) -> Result<(), DemuxError> {
        if pid > pid::MAX {
            return Err(DemuxError::InvalidPid(pid));
        }
        self.channels.entry(pid).or_default();
        Ok(())
    }

    /// Stop tracking `pid`, returning its final counters.
    pub fn untrack(&mut self, pid: u16) -> Result<PidDiagnostics, DemuxError> {
        self.channels
            .remove(&pid)
            .map(|channel| channel.diagnostics)
            .ok_or(DemuxError::ChannelNotTracked(pid))
    }

    pub fn is_tracked(&self, pid: u16) -> bool {
        self.channels.contains_key(&pid)
    }

    /// Tracked PIDs in ascending order.
    pub fn pids(&self) -> Vec<u16> {
        let mut pids: Vec<u16> = self.channels.keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    pub fn state(&self, pid: u16) -> Option<&ReassemblyState> {
        self.channels.get(&pid).map(|c| &c.state)
    }

    pub fn diagnostics(&self, pid: u16) -> Option<&PidDiagnostics> {
        self.channels.get(&pid).map(|c| &c.diagnostics)
    }

    pub(crate) fn diagnostics_mut(&mut self, pid: u16) -> Option<&mut PidDiagnostics> {
        self.channels.get_mut(&pid).map(|c| &mut c.diagnostics)
    }

    pub(crate) fn channel_mut(&mut self, pid: u16) -> Option<&mut Channel> {
        self.channels.get_mut(&pid)
    }

    /// Sum of the counters of all tracked PIDs.
    pub fn total_diagnostics(&self) -> PidDiagnostics {
        let mut total = PidDiagnostics::default();
        for channel in self.channels.values() {
            total += &channel.diagnostics;
        }
        total
    }

    /// Clear state and counters, keeping the tracked PID set.
    pub fn reset(&mut self) {
        for channel in self.channels.values_mut() {
            *channel = Channel::default();
        }
    }
}
