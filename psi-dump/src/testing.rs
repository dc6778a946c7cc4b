//! Section and table builders for unit tests.

use psi_demux::{crc32_mpeg2, Aggregation, Section, Table, TableAggregator};

/// Raw long section with a valid CRC32 trailer.
pub fn long_section(table_id: u8, ext: u16, version: u8, number: u8, last: u8, payload: &[u8]) -> Vec<u8> {
    let section_length = 5 + payload.len() + 4;
    let mut data = vec![
        table_id,
        0xB0 | ((section_length >> 8) as u8 & 0x0F),
        section_length as u8,
        (ext >> 8) as u8,
        ext as u8,
        0xC1 | ((version & 0x1F) << 1),
        number,
        last,
    ];
    data.extend_from_slice(payload);
    let crc = crc32_mpeg2(&data);
    data.extend_from_slice(&crc.to_be_bytes());
    data
}

/// Complete table on `pid` with one section per payload.
pub fn table(pid: u16, table_id: u8, ext: u16, version: u8, payloads: &[&[u8]]) -> Table {
    let last = (payloads.len() - 1) as u8;
    let mut aggregator = TableAggregator::new();
    let mut key = None;
    for (n, payload) in payloads.iter().enumerate() {
        let raw = long_section(table_id, ext, version, n as u8, last, payload);
        let section = Section::from_bytes(pid, raw.into(), false).unwrap();
        key = Some(section.table_key());
        aggregator.accept(section);
    }
    aggregator.table(&key.unwrap()).unwrap().clone()
}

/// Standalone table built from a short section.
pub fn short_table(pid: u16, table_id: u8, payload: &[u8]) -> Table {
    let mut data = vec![table_id, 0x70 | ((payload.len() >> 8) as u8 & 0x0F), payload.len() as u8];
    data.extend_from_slice(payload);
    let section = Section::from_bytes(pid, data.into(), false).unwrap();
    match TableAggregator::new().accept(section) {
        Aggregation::Standalone(table) => table,
        other => panic!("unexpected {:?}", other),
    }
}
