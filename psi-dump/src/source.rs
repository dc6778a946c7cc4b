//! Packet-aligned reading from a byte stream.

use std::io::{self, Read};

use psi_demux::{SYNC_BYTE, TS_PACKET_SIZE};

/// Bytes requested from the underlying reader per fill.
const READ_CHUNK: usize = TS_PACKET_SIZE * 512;

/// Reads 188-byte packets from any [`Read`], re-aligning on the sync byte
/// when garbage is found between packets.
pub struct PacketReader<R> {
    inner: R,
    buffer: Vec<u8>,
    pos: usize,
    packets: u64,
    skipped: u64,
}

impl<R: Read> PacketReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: Vec::with_capacity(READ_CHUNK),
            pos: 0,
            packets: 0,
            skipped: 0,
        }
    }

    /// Next packet, or `None` at end of stream. A trailing partial packet is
    /// counted as skipped.
    pub fn next_packet(&mut self) -> io::Result<Option<&[u8]>> {
        loop {
            while self.pos < self.buffer.len() && self.buffer[self.pos] != SYNC_BYTE {
                self.pos += 1;
                self.skipped += 1;
            }

            if self.buffer.len() - self.pos >= TS_PACKET_SIZE {
                let start = self.pos;
                self.pos += TS_PACKET_SIZE;
                self.packets += 1;
                return Ok(Some(&self.buffer[start..start + TS_PACKET_SIZE]));
            }

            if !self.fill()? {
                self.skipped += (self.buffer.len() - self.pos) as u64;
                self.pos = self.buffer.len();
                return Ok(None);
            }
        }
    }

    /// Packets returned so far.
    pub fn packets(&self) -> u64 {
        self.packets
    }

    /// Bytes dropped while looking for sync.
    pub fn skipped_bytes(&self) -> u64 {
        self.skipped
    }

    /// Append more input; `false` at end of stream.
    fn fill(&mut self) -> io::Result<bool> {
        self.buffer.drain(..self.pos);
        self.pos = 0;

        let filled = self.buffer.len();
        self.buffer.resize(filled + READ_CHUNK, 0);
        let read = loop {
            match self.inner.read(&mut self.buffer[filled..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.buffer.truncate(filled);
                    return Err(e);
                }
            }
        };
        self.buffer.truncate(filled + read);
        Ok(read > 0)
    }
}
