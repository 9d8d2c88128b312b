//! Mutable state of one scan.

use crate::collector::config::ScanConfig;
use crate::collector::handles::{HandleScanSummary, ProcessTable};
use crate::collector::path::SplitPath;
use crate::storage::interner::StringTable;
use crate::storage::lookup::HashLookupArray;
use crate::storage::record::DescriptorArena;
use crate::util::hash::path_hash;

/// Hashes produced for one interned image path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathHashes {
    pub path: u32,
    pub directory: u32,
}

/// Tables, arrays and the record arena shared by every stage of a scan.
///
/// Owned by one scan and handed around by `&mut`.
#[derive(Debug, Clone)]
pub struct ScanSession {
    processes: ProcessTable,
    paths: StringTable,
    directories: StringTable,
    path_lookup: HashLookupArray,
    directory_lookup: HashLookupArray,
    records: DescriptorArena,
    summary: HandleScanSummary,
}

impl ScanSession {
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            processes: ProcessTable::with_capacity(config.max_process_count),
            paths: StringTable::new(),
            directories: StringTable::new(),
            path_lookup: HashLookupArray::new(),
            directory_lookup: HashLookupArray::new(),
            records: DescriptorArena::with_capacity(config.arena_records),
            summary: HandleScanSummary::default(),
        }
    }

    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    pub fn processes_mut(&mut self) -> &mut ProcessTable {
        &mut self.processes
    }

    pub fn paths(&self) -> &StringTable {
        &self.paths
    }

    pub fn directories(&self) -> &StringTable {
        &self.directories
    }

    pub fn path_lookup(&self) -> &HashLookupArray {
        &self.path_lookup
    }

    pub fn directory_lookup(&self) -> &HashLookupArray {
        &self.directory_lookup
    }

    pub fn records(&self) -> &DescriptorArena {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut DescriptorArena {
        &mut self.records
    }

    pub fn summary(&self) -> HandleScanSummary {
        self.summary
    }

    pub fn set_summary(&mut self, summary: HandleScanSummary) {
        self.summary = summary;
    }

    /// Whether the record arena can absorb `string_bytes` more string bytes
    /// on top of what both string arenas already use, plus one record.
    pub fn has_room_for(&self, string_bytes: usize) -> bool {
        let needed = string_bytes
            .saturating_add(self.paths.arena_used())
            .saturating_add(self.directories.arena_used())
            .saturating_add(2);
        needed <= self.records.remaining_bytes()
    }

    /// Hashes both halves of `path`, interns them and logs the hashes.
    pub fn intern_path(&mut self, path: &SplitPath) -> PathHashes {
        let hashes = PathHashes {
            path: path_hash(path.full.as_bytes()),
            directory: path_hash(path.directory.as_bytes()),
        };
        self.paths
            .intern(hashes.path, Some(path.full.as_bytes()), path.full.len());
        self.directories.intern(
            hashes.directory,
            Some(path.directory.as_bytes()),
            path.directory.len(),
        );
        self.path_lookup.append(hashes.path);
        self.directory_lookup.append(hashes.directory);
        hashes
    }

    /// Clears everything for the next snapshot.
    pub fn reset(&mut self) {
        self.processes.clear();
        self.paths.clear();
        self.directories.clear();
        self.path_lookup = HashLookupArray::new();
        self.directory_lookup = HashLookupArray::new();
        self.records.reset();
        self.summary = HandleScanSummary::default();
    }
}
