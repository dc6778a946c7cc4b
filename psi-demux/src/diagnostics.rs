//! Per-PID diagnostic counters.
//!
//! Transport streams are lossy by nature: gaps, repeats and corrupt sections
//! are steady-state traffic. They are recorded here instead of being reported
//! as errors.

use std::ops::AddAssign;

use serde::Serialize;

/// Counters for one tracked PID.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PidDiagnostics {
    /// Packets seen on the PID while tracked.
    pub packets: u64,
    /// Repeated packets (same continuity counter) whose payload was ignored.
    pub duplicates: u64,
    /// Unflagged continuity gaps.
    pub discontinuities: u64,
    /// Continuity gaps flagged by the discontinuity indicator.
    pub signalled_discontinuities: u64,
    /// Packets dropped for the transport error indicator.
    pub transport_errors: u64,
    /// Packets dropped because they are scrambled.
    pub scrambled: u64,
    /// Sections cut short by the start of the next one.
    pub truncated_sections: u64,
    /// Bad pointer fields, lengths or section indices.
    pub malformed_sections: u64,
    /// Sections dropped on CRC mismatch.
    pub crc_errors: u64,
    /// Sections surfaced to handlers.
    pub sections: u64,
    /// Tables surfaced to handlers as complete.
    pub tables: u64,
    /// Repeated sections already held by their table.
    pub duplicate_sections: u64,
    /// Same version and index with different content.
    pub conflicts: u64,
    /// Tables replaced by a different version.
    pub version_changes: u64,
    /// Tables restarted on a new section count at the same version.
    pub layout_changes: u64,
    /// Sections ignored for current_next_indicator = 0.
    pub next_ignored: u64,
}

impl PidDiagnostics {
    /// Count of anomalies of any kind.
    pub fn anomalies(&self) -> u64 {
        self.discontinuities
            + self.transport_errors
            + self.truncated_sections
            + self.malformed_sections
            + self.crc_errors
            + self.conflicts
    }
}

impl AddAssign<&PidDiagnostics> for PidDiagnostics {
    fn add_assign(&mut self, other: &PidDiagnostics) {
        self.packets += other.packets;
        self.duplicates += other.duplicates;
        self.discontinuities += other.discontinuities;
        self.signalled_discontinuities += other.signalled_discontinuities;
        self.transport_errors += other.transport_errors;
        self.scrambled += other.scrambled;
        self.truncated_sections += other.truncated_sections;
        self.malformed_sections += other.malformed_sections;
        self.crc_errors += other.crc_errors;
        self.sections += other.sections;
        self.tables += other.tables;
        self.duplicate_sections += other.duplicate_sections;
        self.conflicts += other.conflicts;
        self.version_changes += other.version_changes;
        self.layout_changes += other.layout_changes;
        self.next_ignored += other.next_ignored;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum_and_anomalies() {
        let a = PidDiagnostics {
            packets: 10,
            crc_errors: 1,
            discontinuities: 2,
            ..Default::default()
        };
        let b = PidDiagnostics {
            packets: 5,
            conflicts: 1,
            duplicates: 3,
            ..Default::default()
        };

        let mut total = PidDiagnostics::default();
        total += &a;
        total += &b;

        assert_eq!(total.packets, 15);
        assert_eq!(total.duplicates, 3);
        // Duplicate packets are not anomalies.
        assert_eq!(total.anomalies(), 4);
    }
}
