//! Serializable result of one scan.

use serde::Serialize;

use crate::collector::handles::{HandleScanSummary, ProcessBucket};
use crate::collector::recorder::RecordOutcome;
use crate::collector::session::ScanSession;
use crate::storage::interner::StringTable;
use crate::storage::lookup::HashLookupArray;
use crate::storage::record::ProcessDescriptorRecord;

/// How many processes ended in each [`RecordOutcome`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub recorded: u32,
    pub skipped_terminated: u32,
    pub insufficient_buffer: u32,
    pub arena_full: u32,
}

impl OutcomeCounts {
    pub fn add(&mut self, outcome: RecordOutcome) {
        let counter = match outcome {
            RecordOutcome::Recorded => &mut self.recorded,
            RecordOutcome::SkippedTerminated => &mut self.skipped_terminated,
            RecordOutcome::InsufficientBuffer => &mut self.insufficient_buffer,
            RecordOutcome::ArenaFull => &mut self.arena_full,
        };
        *counter += 1;
    }
}

/// One string table entry with its text resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StringEntry {
    pub hash: u32,
    /// `None` when the arena had no room for the text.
    pub text: Option<String>,
    pub reference_count: u32,
}

/// Contents and usage of one string table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StringTableStats {
    pub entries: usize,
    pub arena_used: usize,
    pub strings: Vec<StringEntry>,
}

impl From<&StringTable> for StringTableStats {
    fn from(table: &StringTable) -> Self {
        let strings = table
            .entries()
            .iter()
            .map(|entry| StringEntry {
                hash: entry.hash,
                text: table
                    .resolve(entry.hash)
                    .map(|bytes| String::from_utf8_lossy(bytes).into_owned()),
                reference_count: entry.reference_count,
            })
            .collect();
        Self {
            entries: table.len(),
            arena_used: table.arena_used(),
            strings,
        }
    }
}

/// Size of one lookup array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LookupStats {
    pub len: usize,
    pub capacity: usize,
    pub growth_events: usize,
}

impl From<&HashLookupArray> for LookupStats {
    fn from(array: &HashLookupArray) -> Self {
        Self {
            len: array.len(),
            capacity: array.capacity(),
            growth_events: array.growth_events(),
        }
    }
}

/// Everything one scan produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Unix timestamp (seconds since epoch) when the scan finished.
    pub timestamp: i64,
    pub summary: HandleScanSummary,
    pub outcomes: OutcomeCounts,
    pub opened_processes: u32,
    pub buckets: Vec<ProcessBucket>,
    pub records: Vec<ProcessDescriptorRecord>,
    /// CRC32 of the serialized record arena.
    pub arena_checksum: u32,
    pub arena_bytes: usize,
    pub paths: StringTableStats,
    pub directories: StringTableStats,
    pub path_lookup: LookupStats,
    pub directory_lookup: LookupStats,
}

impl ScanReport {
    /// Captures the state of `session` after a scan.
    pub fn from_session(session: &ScanSession, outcomes: OutcomeCounts, timestamp: i64) -> Self {
        let records = session.records();
        Self {
            timestamp,
            summary: session.summary(),
            outcomes,
            opened_processes: records.opened_processes(),
            buckets: session.processes().iter().copied().collect(),
            records: records.iter().collect(),
            arena_checksum: records.checksum(),
            arena_bytes: records.as_bytes().len(),
            paths: session.paths().into(),
            directories: session.directories().into(),
            path_lookup: session.path_lookup().into(),
            directory_lookup: session.directory_lookup().into(),
        }
    }
}
