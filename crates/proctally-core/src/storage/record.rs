//! Fixed-layout process descriptor records and the arena that holds them.
//!
//! Record layout (28 bytes, little-endian):
//! ```text
//! ┌────────┬──────────────────────────┐
//! │ offset │ field                    │
//! ├────────┼──────────────────────────┤
//! │   0    │ path_hash: u32           │
//! │   4    │ process_id: u32          │
//! │   8    │ directory_hash: u32      │
//! │  12    │ access_flags: u32        │
//! │  16    │ parent_process_id: u32   │
//! │  20    │ additional_flags: u32    │
//! │  24    │ creation_time_or_error   │
//! └────────┴──────────────────────────┘
//! ```
//!
//! Records are handled field by field in memory; bytes only exist inside
//! the arena.

use serde::Serialize;

/// Size of one serialized record.
pub const RECORD_SIZE: usize = 28;

/// Record slots in the reference arena layout.
pub const DEFAULT_ARENA_RECORDS: usize = 143;

/// Largest arena a session will allocate.
pub const MAX_ARENA_RECORDS: usize = 65_536;

/// Set in `access_flags` when the process could not be opened.
pub const FLAG_OPEN_FAILED: u32 = 0x8000_0000;

/// Set in `access_flags` when an exited process was recorded anyway.
pub const FLAG_TERMINATED: u32 = 0x2000_0000;

/// One analyzed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ProcessDescriptorRecord {
    pub path_hash: u32,
    pub process_id: u32,
    pub directory_hash: u32,
    pub access_flags: u32,
    pub parent_process_id: u32,
    pub additional_flags: u32,
    /// Uptime in seconds, or the OS error code when the process could not
    /// be opened.
    pub creation_time_or_error: u32,
}

impl ProcessDescriptorRecord {
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        let fields = [
            self.path_hash,
            self.process_id,
            self.directory_hash,
            self.access_flags,
            self.parent_process_id,
            self.additional_flags,
            self.creation_time_or_error,
        ];
        for (chunk, value) in out.chunks_exact_mut(4).zip(fields) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8; RECORD_SIZE]) -> Self {
        let field = |i: usize| {
            u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]])
        };
        Self {
            path_hash: field(0),
            process_id: field(4),
            directory_hash: field(8),
            access_flags: field(12),
            parent_process_id: field(16),
            additional_flags: field(20),
            creation_time_or_error: field(24),
        }
    }

    pub fn open_failed(&self) -> bool {
        self.access_flags & FLAG_OPEN_FAILED != 0
    }

    pub fn terminated(&self) -> bool {
        self.access_flags & FLAG_TERMINATED != 0
    }
}

/// Append-only, capped region of serialized records.
#[derive(Debug, Clone)]
pub struct DescriptorArena {
    bytes: Vec<u8>,
    capacity: usize,
    opened_processes: u32,
}

impl Default for DescriptorArena {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_ARENA_RECORDS)
    }
}

impl DescriptorArena {
    /// Creates an arena with room for `capacity` records, capped at
    /// [`MAX_ARENA_RECORDS`].
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.min(MAX_ARENA_RECORDS);
        Self {
            bytes: Vec::with_capacity(capacity.saturating_mul(RECORD_SIZE)),
            capacity,
            opened_processes: 0,
        }
    }

    /// Appends `record` at the cursor.
    ///
    /// Returns `false` and leaves the arena untouched when it is full.
    pub fn push(&mut self, record: &ProcessDescriptorRecord) -> bool {
        if self.is_full() {
            return false;
        }
        self.bytes.extend_from_slice(&record.to_bytes());
        true
    }

    /// Record at `index`, decoded from the arena bytes.
    pub fn get(&self, index: usize) -> Option<ProcessDescriptorRecord> {
        let start = index.checked_mul(RECORD_SIZE)?;
        let chunk = self.bytes.get(start..start.checked_add(RECORD_SIZE)?)?;
        let raw: &[u8; RECORD_SIZE] = chunk.try_into().ok()?;
        Some(ProcessDescriptorRecord::from_bytes(raw))
    }

    pub fn iter(&self) -> impl Iterator<Item = ProcessDescriptorRecord> + '_ {
        self.bytes.chunks_exact(RECORD_SIZE).filter_map(|chunk| {
            let raw: &[u8; RECORD_SIZE] = chunk.try_into().ok()?;
            Some(ProcessDescriptorRecord::from_bytes(raw))
        })
    }

    /// Number of records written.
    pub fn count(&self) -> usize {
        self.bytes.len() / RECORD_SIZE
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.count())
    }

    pub fn is_full(&self) -> bool {
        self.count() >= self.capacity
    }

    /// Free space in bytes.
    pub fn remaining_bytes(&self) -> usize {
        self.remaining().saturating_mul(RECORD_SIZE)
    }

    /// Serialized records, in write order.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// CRC32 of the serialized records.
    pub fn checksum(&self) -> u32 {
        crc32fast::hash(&self.bytes)
    }

    /// Counts a process that was successfully opened.
    pub fn note_opened(&mut self) {
        self.opened_processes = self.opened_processes.saturating_add(1);
    }

    pub fn opened_processes(&self) -> u32 {
        self.opened_processes
    }

    /// Rewinds the cursor between snapshots.
    pub fn reset(&mut self) {
        self.bytes.clear();
        self.opened_processes = 0;
    }
}
