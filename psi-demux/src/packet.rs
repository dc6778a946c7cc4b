//! Transport packet parsing.
//!
//! Only the header, the adaptation field flags and the payload boundaries are
//! decoded: that is all section reassembly needs.

use crate::error::PacketError;

/// Size of one transport packet.
pub const TS_PACKET_SIZE: usize = 188;

/// First byte of every transport packet.
pub const SYNC_BYTE: u8 = 0x47;

/// Size of the fixed packet header.
const HEADER_SIZE: usize = 4;

/// The fixed 4-byte packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsHeader {
    /// TEI: the packet was received with uncorrectable errors.
    pub transport_error: bool,
    /// PUSI: a section starts in this packet (after the pointer field).
    pub payload_unit_start: bool,
    pub transport_priority: bool,
    /// 13-bit packet identifier.
    pub pid: u16,
    /// Non-zero when the payload is scrambled.
    pub scrambling_control: u8,
    /// Bit 1: adaptation field present. Bit 0: payload present.
    pub adaptation_field_control: u8,
    /// 4-bit counter incremented per packet with payload.
    pub continuity_counter: u8,
}

impl TsHeader {
    /// Decode the header from the first four packet bytes.
    pub fn parse(bytes: [u8; HEADER_SIZE]) -> Self {
        let [_, b1, b2, b3] = bytes;
        Self {
            transport_error: b1 & 0x80 != 0,
            payload_unit_start: b1 & 0x40 != 0,
            transport_priority: b1 & 0x20 != 0,
            pid: u16::from_be_bytes([b1 & 0x1F, b2]),
            scrambling_control: b3 >> 6,
            adaptation_field_control: (b3 >> 4) & 0x03,
            continuity_counter: b3 & 0x0F,
        }
    }

    pub fn has_adaptation_field(&self) -> bool {
        self.adaptation_field_control & 0x02 != 0
    }

    pub fn has_payload(&self) -> bool {
        self.adaptation_field_control & 0x01 != 0
    }

    pub fn is_scrambled(&self) -> bool {
        self.scrambling_control != 0
    }
}

/// Adaptation field flags relevant to section reassembly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdaptationField {
    /// Number of bytes following the length byte.
    pub length: u8,
    /// The continuity counter may jump at this packet.
    pub discontinuity: bool,
    pub random_access: bool,
    pub pcr_flag: bool,
}

impl AdaptationField {
    /// Decode the field starting at its length byte. `field` must hold at
    /// least `length + 1` bytes.
    fn parse(field: &[u8]) -> Self {
        let length = field[0];
        let flags = if length > 0 { field[1] } else { 0 };
        Self {
            length,
            discontinuity: flags & 0x80 != 0,
            random_access: flags & 0x40 != 0,
            pcr_flag: flags & 0x10 != 0,
        }
    }
}

/// A transport packet borrowed from its input buffer.
#[derive(Debug, Clone)]
pub struct TsPacket<'a> {
    pub header: TsHeader,
    pub adaptation_field: Option<AdaptationField>,
    /// Bytes after the header and adaptation field; empty without payload.
    pub payload: &'a [u8],
}

impl<'a> TsPacket<'a> {
    /// Parse the packet held in the first 188 bytes of `data`.
    pub fn parse(data: &'a [u8]) -> Result<Self, PacketError> {
        let Some(packet) = data.get(..TS_PACKET_SIZE) else {
            return Err(PacketError::TooShort(data.len()));
        };
        if packet[0] != SYNC_BYTE {
            return Err(PacketError::InvalidSync(packet[0]));
        }

        let header = TsHeader::parse([packet[0], packet[1], packet[2], packet[3]]);

        let (adaptation_field, payload_start) = if header.has_adaptation_field() {
            let length = packet[HEADER_SIZE];
            let end = HEADER_SIZE + 1 + length as usize;
            if end > TS_PACKET_SIZE {
                return Err(PacketError::AdaptationFieldOverrun(length));
            }
            (Some(AdaptationField::parse(&packet[HEADER_SIZE..end])), end)
        } else {
            (None, HEADER_SIZE)
        };

        let payload = if header.has_payload() {
            &packet[payload_start..]
        } else {
            &[]
        };

        Ok(Self {
            header,
            adaptation_field,
            payload,
        })
    }

    /// Whether the encoder flagged this packet as a discontinuity point.
    pub fn discontinuity(&self) -> bool {
        self.adaptation_field.map_or(false, |af| af.discontinuity)
    }
}

/// Walks the packets of an in-memory buffer.
///
/// Bytes that do not start a parsable packet are skipped one at a time until
/// the next sync byte.
pub struct TsPacketIterator<'a> {
    rest: &'a [u8],
    skipped: usize,
}

impl<'a> TsPacketIterator<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            rest: data,
            skipped: 0,
        }
    }

    /// Bytes dropped so far while looking for sync.
    pub fn skipped_bytes(&self) -> usize {
        self.skipped
    }

    fn skip(&mut self, count: usize) {
        self.rest = &self.rest[count..];
        self.skipped += count;
    }
}

impl<'a> Iterator for TsPacketIterator<'a> {
    type Item = TsPacket<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let sync = self.rest.iter().position(|&b| b == SYNC_BYTE);
            self.skip(sync.unwrap_or(self.rest.len()));

            if self.rest.len() < TS_PACKET_SIZE {
                return None;
            }

            let rest = self.rest;
            match TsPacket::parse(rest) {
                Ok(packet) => {
                    self.rest = &rest[TS_PACKET_SIZE..];
                    return Some(packet);
                }
                Err(_) => self.skip(1),
            }
        }
    }
}
