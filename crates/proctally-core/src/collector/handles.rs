//! System handle snapshot acquisition and per-process bucketing.
//!
//! The snapshot is a count-prefixed array of fixed 16-byte handle records:
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ handle_count: u32                        │
//! ├──────────────────────────────────────────┤
//! │ per handle (16 bytes):                   │
//! │   owning_process_id: u32                 │
//! │   object_type_index: u8                  │
//! │   handle_attributes: u8                  │
//! │   handle_value: u16                      │
//! │   object_pointer: u32                    │
//! │   granted_access: u32                    │
//! └──────────────────────────────────────────┘
//! ```
//!
//! Each handle is folded into the bucket of its owning process in a fixed
//! open-addressing table. A full table drops handles of unseen processes.

use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

use crate::collector::platform::{HandleSource, QueryStatus};

/// Size of the snapshot count prefix.
pub const SNAPSHOT_HEADER_SIZE: usize = 4;

/// Size of one serialized handle record.
pub const HANDLE_RECORD_SIZE: usize = 16;

/// Hard ceiling on tracked processes.
pub const MAX_TRACKED_PROCESSES: usize = 500;

/// Type indices at or above this value contribute no mask bits.
pub const UNTRACKED_TYPE_INDEX: u8 = 0x37;

/// First type index that lands in the flags word.
const FLAGS_TYPE_BASE: u8 = 0x20;

/// Added to the flags word per handle while below [`HANDLE_COUNTER_SATURATION`].
pub const HANDLE_COUNTER_UNIT: u32 = 0x0100_0000;

/// Flags-word value at which the handle counter stops advancing.
pub const HANDLE_COUNTER_SATURATION: u32 = 0xFF00_0000;

/// One entry of the system handle snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandleRecord {
    pub owning_process_id: u32,
    pub object_type_index: u8,
    pub handle_attributes: u8,
    pub handle_value: u16,
    /// Opaque kernel object reference.
    pub object_pointer: u32,
    pub granted_access: u32,
}

impl HandleRecord {
    fn write_to(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.owning_process_id.to_le_bytes());
        out[4] = self.object_type_index;
        out[5] = self.handle_attributes;
        out[6..8].copy_from_slice(&self.handle_value.to_le_bytes());
        out[8..12].copy_from_slice(&self.object_pointer.to_le_bytes());
        out[12..16].copy_from_slice(&self.granted_access.to_le_bytes());
    }

    fn read_from(raw: &[u8]) -> Self {
        let u32_at = |i: usize| u32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]);
        Self {
            owning_process_id: u32_at(0),
            object_type_index: raw[4],
            handle_attributes: raw[5],
            handle_value: u16::from_le_bytes([raw[6], raw[7]]),
            object_pointer: u32_at(8),
            granted_access: u32_at(12),
        }
    }
}

/// Error type for snapshot acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    /// The privileged query could not be resolved. Not retryable.
    CapabilityUnavailable,
    /// The query failed with a status other than "buffer too small".
    QueryFailed(u32),
    /// The buffer reached the policy limit and was still too small.
    BufferLimitExceeded(usize),
    /// The reported count does not fit the returned buffer.
    Truncated { count: u32, len: usize },
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::CapabilityUnavailable => {
                write!(f, "system handle query is unavailable")
            }
            SnapshotError::QueryFailed(status) => {
                write!(f, "system handle query failed with status {:#010x}", status)
            }
            SnapshotError::BufferLimitExceeded(limit) => {
                write!(f, "handle snapshot does not fit in {} bytes", limit)
            }
            SnapshotError::Truncated { count, len } => {
                write!(f, "snapshot claims {} handles but buffer holds {} bytes", count, len)
            }
        }
    }
}

impl std::error::Error for SnapshotError {}

/// Buffer growth policy for snapshot acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotPolicy {
    pub initial_buffer: usize,
    pub growth_step: usize,
    pub max_buffer: usize,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            initial_buffer: 1024 * 1024,
            growth_step: 1024 * 1024,
            max_buffer: 64 * 1024 * 1024,
        }
    }
}

/// Serializes `records` into `buffer` in snapshot wire form.
///
/// Helper for [`HandleSource`] implementations.
pub fn encode_handle_snapshot(records: &[HandleRecord], buffer: &mut [u8]) -> QueryStatus {
    let needed = SNAPSHOT_HEADER_SIZE + records.len() * HANDLE_RECORD_SIZE;
    if buffer.len() < needed {
        return QueryStatus::BufferTooSmall;
    }
    buffer[..SNAPSHOT_HEADER_SIZE].copy_from_slice(&(records.len() as u32).to_le_bytes());
    for (record, out) in records
        .iter()
        .zip(buffer[SNAPSHOT_HEADER_SIZE..needed].chunks_exact_mut(HANDLE_RECORD_SIZE))
    {
        record.write_to(out);
    }
    QueryStatus::Success
}

/// Parses a count-prefixed snapshot buffer.
pub fn decode_handle_snapshot(buffer: &[u8]) -> Result<Vec<HandleRecord>, SnapshotError> {
    let header = buffer
        .get(..SNAPSHOT_HEADER_SIZE)
        .ok_or(SnapshotError::Truncated {
            count: 0,
            len: buffer.len(),
        })?;
    let count = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let end = (count as usize)
        .checked_mul(HANDLE_RECORD_SIZE)
        .and_then(|n| n.checked_add(SNAPSHOT_HEADER_SIZE))
        .filter(|&end| end <= buffer.len())
        .ok_or(SnapshotError::Truncated {
            count,
            len: buffer.len(),
        })?;

    Ok(buffer[SNAPSHOT_HEADER_SIZE..end]
        .chunks_exact(HANDLE_RECORD_SIZE)
        .map(HandleRecord::read_from)
        .collect())
}

/// Queries `source` until the snapshot fits, growing the buffer linearly.
pub fn acquire_handle_snapshot<S: HandleSource + ?Sized>(
    source: &mut S,
    policy: &SnapshotPolicy,
) -> Result<Vec<HandleRecord>, SnapshotError> {
    let mut size = policy.initial_buffer;
    loop {
        if size > policy.max_buffer {
            return Err(SnapshotError::BufferLimitExceeded(policy.max_buffer));
        }
        let mut buffer = vec![0u8; size];
        match source.query_handles(&mut buffer) {
            QueryStatus::Success => return decode_handle_snapshot(&buffer),
            QueryStatus::BufferTooSmall => {
                debug!(size, "handle snapshot buffer too small");
                size = size.saturating_add(policy.growth_step.max(1));
            }
            QueryStatus::Unavailable => return Err(SnapshotError::CapabilityUnavailable),
            QueryStatus::Failed(status) => return Err(SnapshotError::QueryFailed(status)),
        }
    }
}

/// Bits one handle contributes to its bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TypeMasks {
    pub access_mask: u32,
    pub type_flags: u32,
}

/// Derives the mask bits for an object type index.
///
/// Together the two words form a 64-bit type bitmap truncated below bit
/// 0x37: indices 0x00..0x20 set bit `index` of the access word, indices
/// 0x20..0x37 set bit `index - 0x20` of the flags word, anything higher
/// sets nothing. Downstream consumers match these exact patterns.
pub fn derive_type_masks(object_type_index: u8) -> TypeMasks {
    match object_type_index {
        0x00..FLAGS_TYPE_BASE => TypeMasks {
            access_mask: 1 << object_type_index,
            type_flags: 0,
        },
        FLAGS_TYPE_BASE..UNTRACKED_TYPE_INDEX => TypeMasks {
            access_mask: 0,
            type_flags: 1 << (object_type_index - FLAGS_TYPE_BASE),
        },
        _ => TypeMasks::default(),
    }
}

/// Aggregate of all handles owned by one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessBucket {
    pub process_id: u32,
    pub access_mask_accumulator: u32,
    /// Type bits in the low bytes, saturating handle counter in the top byte.
    pub type_flags_bitmap: u32,
}

impl ProcessBucket {
    fn new(process_id: u32) -> Self {
        Self {
            process_id,
            access_mask_accumulator: 0,
            type_flags_bitmap: 0,
        }
    }

    fn absorb(&mut self, masks: TypeMasks) {
        if self.type_flags_bitmap < HANDLE_COUNTER_SATURATION {
            self.type_flags_bitmap += HANDLE_COUNTER_UNIT;
        }
        self.type_flags_bitmap |= masks.type_flags;
        self.access_mask_accumulator |= masks.access_mask;
    }

    /// Handles seen for this process, saturating at 255.
    pub fn handle_count(&self) -> u32 {
        self.type_flags_bitmap >> 24
    }
}

enum Probe {
    Found(usize),
    Vacant(usize),
    Full,
}

/// Fixed-capacity open-addressing table of process buckets.
///
/// Probing starts at `pid % capacity` and walks forward with wrap-around.
/// Slot assignment depends on insertion order; the first vacant slot on
/// the probe path wins.
#[derive(Debug, Clone)]
pub struct ProcessTable {
    slots: Vec<Option<ProcessBucket>>,
    len: usize,
}

impl ProcessTable {
    /// Creates a table with `max_process_count` slots, capped at
    /// [`MAX_TRACKED_PROCESSES`].
    pub fn with_capacity(max_process_count: usize) -> Self {
        let capacity = max_process_count.min(MAX_TRACKED_PROCESSES);
        Self {
            slots: vec![None; capacity],
            len: 0,
        }
    }

    fn probe(&self, process_id: u32) -> Probe {
        let capacity = self.slots.len();
        if capacity == 0 {
            return Probe::Full;
        }
        let start = process_id as usize % capacity;
        for step in 0..capacity {
            let slot = (start + step) % capacity;
            match &self.slots[slot] {
                Some(bucket) if bucket.process_id == process_id => return Probe::Found(slot),
                Some(_) => continue,
                None => return Probe::Vacant(slot),
            }
        }
        Probe::Full
    }

    /// Slot for `process_id`, creating its bucket if there is room.
    ///
    /// Returns the slot and whether it was created by this call.
    pub fn slot_for(&mut self, process_id: u32) -> Option<(usize, bool)> {
        match self.probe(process_id) {
            Probe::Found(slot) => Some((slot, false)),
            Probe::Vacant(slot) => {
                self.slots[slot] = Some(ProcessBucket::new(process_id));
                self.len += 1;
                Some((slot, true))
            }
            Probe::Full => None,
        }
    }

    /// Registers a known process before the snapshot is bucketed.
    ///
    /// Returns `false` when the table has no room for it.
    pub fn seed(&mut self, process_id: u32) -> bool {
        self.slot_for(process_id).is_some()
    }

    pub fn get(&self, process_id: u32) -> Option<&ProcessBucket> {
        match self.probe(process_id) {
            Probe::Found(slot) => self.slots[slot].as_ref(),
            _ => None,
        }
    }

    pub fn bucket(&self, slot: usize) -> Option<&ProcessBucket> {
        self.slots.get(slot)?.as_ref()
    }

    /// Occupied buckets in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &ProcessBucket> {
        self.slots.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.slots.len()
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.len = 0;
    }
}

/// Counts produced by one bucketing pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct HandleScanSummary {
    /// Buckets created during this pass.
    pub unique_process_count: u32,
    /// Handles in the snapshot.
    pub total_handle_count: u32,
    /// Handles whose process found no room in the table.
    pub dropped_handle_count: u32,
}

/// Folds every handle into its owning process's bucket.
pub fn bucket_handles(records: &[HandleRecord], table: &mut ProcessTable) -> HandleScanSummary {
    let mut summary = HandleScanSummary {
        total_handle_count: records.len() as u32,
        ..HandleScanSummary::default()
    };

    for record in records {
        let Some((slot, created)) = table.slot_for(record.owning_process_id) else {
            summary.dropped_handle_count += 1;
            continue;
        };
        if created {
            summary.unique_process_count += 1;
        }
        if let Some(bucket) = table.slots[slot].as_mut() {
            bucket.absorb(derive_type_masks(record.object_type_index));
        }
    }

    if summary.dropped_handle_count > 0 {
        warn!(
            dropped = summary.dropped_handle_count,
            capacity = table.capacity(),
            "process table full, handles dropped"
        );
    }

    summary
}

/// Acquires a snapshot from `source` and buckets it into `table`.
pub fn collect_handle_snapshot<S: HandleSource + ?Sized>(
    source: &mut S,
    table: &mut ProcessTable,
    policy: &SnapshotPolicy,
) -> Result<HandleScanSummary, SnapshotError> {
    let records = acquire_handle_snapshot(source, policy)?;
    let summary = bucket_handles(&records, table);
    debug!(
        handles = summary.total_handle_count,
        processes = summary.unique_process_count,
        "handle snapshot bucketed"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(pid: u32, type_index: u8) -> HandleRecord {
        HandleRecord {
            owning_process_id: pid,
            object_type_index: type_index,
            ..HandleRecord::default()
        }
    }

    /// Source that reports "too small" until the buffer reaches `needed` bytes.
    struct SizedSource {
        records: Vec<HandleRecord>,
        needed: usize,
        queries: Vec<usize>,
    }

    impl HandleSource for SizedSource {
        fn query_handles(&mut self, buffer: &mut [u8]) -> QueryStatus {
            self.queries.push(buffer.len());
            if buffer.len() < self.needed {
                return QueryStatus::BufferTooSmall;
            }
            encode_handle_snapshot(&self.records, buffer)
        }
    }

    struct StatusSource(QueryStatus);

    impl HandleSource for StatusSource {
        fn query_handles(&mut self, _buffer: &mut [u8]) -> QueryStatus {
            self.0
        }
    }

    /// Literal three-step derivation on 32-bit words with x86 shift masking.
    fn literal_masks(index: u8) -> TypeMasks {
        let index = u32::from(index);
        let mut flags = 0u32;
        let mut access = 0u32;
        if index < 0x37 {
            if index >= 0x20 {
                flags = 1u32.wrapping_shl(index);
            }
            access = flags ^ 1u32.wrapping_shl(index);
            if index >= 0x40 {
                flags ^= 1u32.wrapping_shl(index);
            }
        }
        TypeMasks {
            access_mask: access,
            type_flags: flags,
        }
    }

    #[test]
    fn test_rule_table_matches_literal_derivation() {
        for index in 0..=u8::MAX {
            assert_eq!(derive_type_masks(index), literal_masks(index), "index {index:#x}");
        }
    }

    #[test]
    fn test_mask_bit_patterns() {
        assert_eq!(
            derive_type_masks(0x05),
            TypeMasks {
                access_mask: 0x0000_0020,
                type_flags: 0
            }
        );
        assert_eq!(
            derive_type_masks(0x1F),
            TypeMasks {
                access_mask: 0x8000_0000,
                type_flags: 0
            }
        );
        assert_eq!(
            derive_type_masks(0x20),
            TypeMasks {
                access_mask: 0,
                type_flags: 0x0000_0001
            }
        );
        assert_eq!(
            derive_type_masks(0x30),
            TypeMasks {
                access_mask: 0,
                type_flags: 0x0001_0000
            }
        );
        assert_eq!(
            derive_type_masks(0x36),
            TypeMasks {
                access_mask: 0,
                type_flags: 0x0040_0000
            }
        );
        assert_eq!(derive_type_masks(0x37), TypeMasks::default());
        assert_eq!(derive_type_masks(0x41), TypeMasks::default());
    }

    #[test]
    fn test_three_handle_snapshot() {
        let records = [handle(10, 0x05), handle(10, 0x30), handle(20, 0x41)];
        let mut table = ProcessTable::with_capacity(MAX_TRACKED_PROCESSES);

        let summary = bucket_handles(&records, &mut table);

        assert_eq!(summary.unique_process_count, 2);
        assert_eq!(summary.total_handle_count, 3);
        assert_eq!(summary.dropped_handle_count, 0);

        let p10 = table.get(10).unwrap();
        assert_eq!(p10.access_mask_accumulator, 0x0000_0020);
        assert_eq!(p10.type_flags_bitmap, 0x0201_0000);
        assert_eq!(p10.handle_count(), 2);

        let p20 = table.get(20).unwrap();
        assert_eq!(p20.access_mask_accumulator, 0);
        assert_eq!(p20.type_flags_bitmap, 0x0100_0000);
    }

    #[test]
    fn test_unique_buckets_up_to_capacity() {
        let mut table = ProcessTable::with_capacity(MAX_TRACKED_PROCESSES);
        // Multiples of the capacity all hash to slot 0 and must probe.
        let records: Vec<HandleRecord> = (0..MAX_TRACKED_PROCESSES as u32)
            .map(|i| handle(i * 500 + 4, 0x25))
            .collect();

        let summary = bucket_handles(&records, &mut table);

        assert_eq!(summary.unique_process_count, 500);
        assert_eq!(table.len(), 500);
        let mut pids: Vec<u32> = table.iter().map(|b| b.process_id).collect();
        pids.sort_unstable();
        pids.dedup();
        assert_eq!(pids.len(), 500);
    }

    #[test]
    fn test_linear_probe_wraps() {
        let mut table = ProcessTable::with_capacity(4);
        assert_eq!(table.slot_for(3), Some((3, true)));
        assert_eq!(table.slot_for(7), Some((0, true)));
        assert_eq!(table.slot_for(7), Some((0, false)));
        assert_eq!(table.get(7).unwrap().process_id, 7);
    }

    #[test]
    fn test_full_table_drops_new_process() {
        let mut table = ProcessTable::with_capacity(2);
        bucket_handles(&[handle(1, 0x05), handle(2, 0x06)], &mut table);
        let before: Vec<ProcessBucket> = table.iter().copied().collect();

        let summary = bucket_handles(&[handle(3, 0x07)], &mut table);

        assert_eq!(summary.unique_process_count, 0);
        assert_eq!(summary.dropped_handle_count, 1);
        assert!(table.get(3).is_none());
        let after: Vec<ProcessBucket> = table.iter().copied().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_full_table_still_updates_known_process() {
        let mut table = ProcessTable::with_capacity(1);
        bucket_handles(&[handle(1, 0x05)], &mut table);
        let summary = bucket_handles(&[handle(1, 0x06)], &mut table);

        assert_eq!(summary.dropped_handle_count, 0);
        assert_eq!(table.get(1).unwrap().access_mask_accumulator, 0x60);
    }

    #[test]
    fn test_capacity_is_capped() {
        let table = ProcessTable::with_capacity(10_000);
        assert_eq!(table.capacity(), MAX_TRACKED_PROCESSES);
    }

    #[test]
    fn test_seeded_process_is_not_newly_observed() {
        let mut table = ProcessTable::with_capacity(8);
        assert!(table.seed(42));
        let summary = bucket_handles(&[handle(42, 0x05)], &mut table);
        assert_eq!(summary.unique_process_count, 0);
        assert_eq!(table.get(42).unwrap().handle_count(), 1);
    }

    #[test]
    fn test_handle_counter_saturates() {
        let mut bucket = ProcessBucket::new(1);
        for _ in 0..300 {
            bucket.absorb(derive_type_masks(0x20));
        }
        assert_eq!(bucket.handle_count(), 0xFF);
        assert_eq!(bucket.type_flags_bitmap, 0xFF00_0001);
    }

    #[test]
    fn test_snapshot_wire_format() {
        let record = HandleRecord {
            owning_process_id: 0x0102_0304,
            object_type_index: 0x25,
            handle_attributes: 0x02,
            handle_value: 0x0A0B,
            object_pointer: 0xFFFF_0000,
            granted_access: 0x0012_019F,
        };
        let mut buffer = vec![0u8; 64];
        assert_eq!(encode_handle_snapshot(&[record], &mut buffer), QueryStatus::Success);
        assert_eq!(&buffer[0..4], &1u32.to_le_bytes());
        assert_eq!(&buffer[4..8], &0x0102_0304u32.to_le_bytes());
        assert_eq!(buffer[8], 0x25);
        assert_eq!(buffer[9], 0x02);

        assert_eq!(decode_handle_snapshot(&buffer).unwrap(), vec![record]);
    }

    #[test]
    fn test_decode_rejects_truncated_buffer() {
        let mut buffer = vec![0u8; 20];
        buffer[0..4].copy_from_slice(&2u32.to_le_bytes());
        assert_eq!(
            decode_handle_snapshot(&buffer),
            Err(SnapshotError::Truncated { count: 2, len: 20 })
        );
        assert!(decode_handle_snapshot(&[0u8; 2]).is_err());
    }

    #[test]
    fn test_acquire_grows_linearly() {
        let mut source = SizedSource {
            records: vec![handle(4, 0x05); 3],
            needed: 3 * 1024 * 1024,
            queries: Vec::new(),
        };

        let records = acquire_handle_snapshot(&mut source, &SnapshotPolicy::default()).unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(
            source.queries,
            vec![1024 * 1024, 2 * 1024 * 1024, 3 * 1024 * 1024]
        );
    }

    #[test]
    fn test_acquire_respects_limit() {
        let mut source = SizedSource {
            records: Vec::new(),
            needed: usize::MAX,
            queries: Vec::new(),
        };
        let policy = SnapshotPolicy {
            initial_buffer: 16,
            growth_step: 16,
            max_buffer: 64,
        };

        let result = acquire_handle_snapshot(&mut source, &policy);

        assert_eq!(result, Err(SnapshotError::BufferLimitExceeded(64)));
        assert_eq!(source.queries, vec![16, 32, 48, 64]);
    }

    #[test]
    fn test_acquire_hard_failures() {
        let policy = SnapshotPolicy::default();
        assert_eq!(
            acquire_handle_snapshot(&mut StatusSource(QueryStatus::Unavailable), &policy),
            Err(SnapshotError::CapabilityUnavailable)
        );
        assert_eq!(
            acquire_handle_snapshot(&mut StatusSource(QueryStatus::Failed(0xC000_0022)), &policy),
            Err(SnapshotError::QueryFailed(0xC000_0022))
        );
    }

    #[test]
    fn test_collect_handle_snapshot() {
        let mut source = SizedSource {
            records: vec![handle(10, 0x05), handle(10, 0x30), handle(20, 0x41)],
            needed: 0,
            queries: Vec::new(),
        };
        let mut table = ProcessTable::with_capacity(16);

        let summary =
            collect_handle_snapshot(&mut source, &mut table, &SnapshotPolicy::default()).unwrap();

        assert_eq!(summary.unique_process_count, 2);
        assert_eq!(summary.total_handle_count, 3);
        assert_eq!(source.queries.len(), 1);
    }
}
