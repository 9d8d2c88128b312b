//! Scan configuration.

use crate::collector::handles::{MAX_TRACKED_PROCESSES, SnapshotPolicy};
use crate::collector::platform::ProcessAccess;
use crate::storage::record::{DEFAULT_ARENA_RECORDS, MAX_ARENA_RECORDS};

/// Admits processes whose uptime lies in `[reference - threshold, reference]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UptimeFilter {
    /// Width of the admitted window, in seconds.
    pub threshold: u32,
    /// Upper bound of the admitted window, in seconds.
    pub reference: u32,
}

impl UptimeFilter {
    pub fn new(threshold: u32, reference: u32) -> Self {
        Self {
            threshold,
            reference,
        }
    }

    pub fn admits(&self, uptime: u32) -> bool {
        uptime <= self.reference && uptime >= self.reference.saturating_sub(self.threshold)
    }
}

/// Options for one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// Process table size, capped at 500.
    pub max_process_count: usize,
    /// Access level requested first when opening processes.
    pub preferred_access: ProcessAccess,
    /// Record processes that have already exited.
    pub include_terminated: bool,
    pub uptime_filter: Option<UptimeFilter>,
    /// Reserve arena room for the interned strings of every record.
    pub detailed_analysis: bool,
    /// Retry with full query access on systems without the restricted level.
    pub legacy_access_fallback: bool,
    pub snapshot: SnapshotPolicy,
    /// Record slots in the descriptor arena, capped at 65536.
    pub arena_records: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_process_count: MAX_TRACKED_PROCESSES,
            preferred_access: ProcessAccess::QueryLimitedInformation,
            include_terminated: false,
            uptime_filter: None,
            detailed_analysis: false,
            legacy_access_fallback: true,
            snapshot: SnapshotPolicy::default(),
            arena_records: DEFAULT_ARENA_RECORDS,
        }
    }
}

impl ScanConfig {
    pub fn with_max_process_count(mut self, count: usize) -> Self {
        self.max_process_count = count.min(MAX_TRACKED_PROCESSES);
        self
    }

    pub fn with_preferred_access(mut self, access: ProcessAccess) -> Self {
        self.preferred_access = access;
        self
    }

    pub fn with_include_terminated(mut self, include: bool) -> Self {
        self.include_terminated = include;
        self
    }

    pub fn with_uptime_filter(mut self, filter: Option<UptimeFilter>) -> Self {
        self.uptime_filter = filter;
        self
    }

    pub fn with_detailed_analysis(mut self, detailed: bool) -> Self {
        self.detailed_analysis = detailed;
        self
    }

    pub fn with_legacy_access_fallback(mut self, fallback: bool) -> Self {
        self.legacy_access_fallback = fallback;
        self
    }

    pub fn with_snapshot_policy(mut self, policy: SnapshotPolicy) -> Self {
        self.snapshot = policy;
        self
    }

    pub fn with_arena_records(mut self, records: usize) -> Self {
        self.arena_records = records.min(MAX_ARENA_RECORDS);
        self
    }
}
