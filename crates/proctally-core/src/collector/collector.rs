//! Scan orchestration.
//!
//! The `Collector` runs one full scan against a [`Platform`]: it acquires
//! and buckets the handle snapshot, then records a descriptor for every
//! bucketed process and returns a [`ScanReport`].

use std::fmt;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info};

use crate::collector::config::ScanConfig;
use crate::collector::handles::{SnapshotError, collect_handle_snapshot};
use crate::collector::platform::Platform;
use crate::collector::recorder::{ProcessRequest, record_process};
use crate::collector::session::ScanSession;
use crate::storage::model::{OutcomeCounts, ScanReport};

/// Timing information for each scan phase.
#[derive(Debug, Clone, Default)]
pub struct CollectorTiming {
    /// Total scan time.
    pub total: Duration,
    /// Time to acquire and bucket the handle snapshot.
    pub handles: Duration,
    /// Time to record every bucketed process.
    pub processes: Duration,
}

/// Error type for scan failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    /// The handle snapshot could not be acquired.
    Snapshot(SnapshotError),
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::Snapshot(e) => write!(f, "handle snapshot failed: {}", e),
        }
    }
}

impl std::error::Error for ScanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScanError::Snapshot(e) => Some(e),
        }
    }
}

impl From<SnapshotError> for ScanError {
    fn from(e: SnapshotError) -> Self {
        ScanError::Snapshot(e)
    }
}

/// Runs scans against a platform.
pub struct Collector<P: Platform> {
    platform: P,
    config: ScanConfig,
    session: ScanSession,
    /// Timing information from the last collect_snapshot call.
    last_timing: Option<CollectorTiming>,
}

impl<P: Platform> Collector<P> {
    pub fn new(platform: P, config: ScanConfig) -> Self {
        let session = ScanSession::new(&config);
        Self {
            platform,
            config,
            session,
            last_timing: None,
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// State left by the last scan.
    pub fn session(&self) -> &ScanSession {
        &self.session
    }

    pub fn last_timing(&self) -> Option<&CollectorTiming> {
        self.last_timing.as_ref()
    }

    /// Runs one scan.
    ///
    /// Only a failed snapshot aborts; per-process problems end up as
    /// degraded records or outcome counts in the report. A failed scan
    /// leaves an empty session and no timing.
    pub fn collect_snapshot(&mut self) -> Result<ScanReport, ScanError> {
        let start = Instant::now();
        let mut timing = CollectorTiming::default();
        self.session.reset();
        self.last_timing = None;

        let t = Instant::now();
        let summary = collect_handle_snapshot(
            &mut self.platform,
            self.session.processes_mut(),
            &self.config.snapshot,
        )?;
        self.session.set_summary(summary);
        timing.handles = t.elapsed();

        let access_flags = self.config.preferred_access.bits();
        let requests: Vec<ProcessRequest> = self
            .session
            .processes()
            .iter()
            .map(|bucket| ProcessRequest {
                process_id: bucket.process_id,
                access_flags,
                parent_process_id: self
                    .platform
                    .parent_process_id(bucket.process_id)
                    .unwrap_or(0),
                additional_flags: bucket.type_flags_bitmap,
            })
            .collect();

        let t = Instant::now();
        let mut outcomes = OutcomeCounts::default();
        for request in &requests {
            let outcome = record_process(&self.platform, &mut self.session, &self.config, request);
            debug!(pid = request.process_id, ?outcome, "process recorded");
            outcomes.add(outcome);
        }
        timing.processes = t.elapsed();
        timing.total = start.elapsed();

        info!(
            processes = summary.unique_process_count,
            handles = summary.total_handle_count,
            dropped = summary.dropped_handle_count,
            recorded = outcomes.recorded,
            elapsed_ms = timing.total.as_millis() as u64,
            "scan complete"
        );
        self.last_timing = Some(timing);

        Ok(ScanReport::from_session(
            &self.session,
            outcomes,
            Utc::now().timestamp(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::handles::SnapshotPolicy;
    use crate::collector::mock::{MockFs, MockPlatform};
    use crate::collector::platform::{ERROR_ACCESS_DENIED, QueryStatus};
    use crate::collector::procfs::ProcfsPlatform;
    use crate::storage::record::FLAG_OPEN_FAILED;

    #[test]
    fn test_typical_desktop_scan() {
        let mut collector = Collector::new(MockPlatform::typical_desktop(), ScanConfig::default());
        let report = collector.collect_snapshot().unwrap();

        assert_eq!(report.summary.unique_process_count, 4);
        assert_eq!(report.summary.total_handle_count, 9);
        assert_eq!(report.summary.dropped_handle_count, 0);
        assert_eq!(report.outcomes.recorded, 3);
        assert_eq!(report.outcomes.skipped_terminated, 1);
        assert_eq!(report.opened_processes, 3);

        // Slot order: 4 % 500, 2048 % 500, 612 % 500.
        let pids: Vec<u32> = report.records.iter().map(|r| r.process_id).collect();
        assert_eq!(pids, vec![4, 2048, 612]);

        let system = &report.records[0];
        assert_eq!(system.access_flags, 0x1000 | FLAG_OPEN_FAILED);
        assert_eq!(system.creation_time_or_error, ERROR_ACCESS_DENIED);

        let explorer = &report.records[2];
        assert_eq!(explorer.path_hash, 0xCE31_2553);
        assert_eq!(explorer.directory_hash, 0xA7DE_7B16);
        assert_eq!(explorer.parent_process_id, 580);
        assert_eq!(explorer.additional_flags, 0x0301_0020);
        assert_eq!(explorer.creation_time_or_error, 7200);

        let steam_dir = report
            .directories
            .strings
            .iter()
            .find_map(|s| s.text.clone())
            .unwrap();
        assert_eq!(steam_dir, r"D:\Games\Steam");
        assert_eq!(report.path_lookup.len, 2);
        assert_eq!(report.arena_bytes, 3 * 28);
    }

    #[test]
    fn test_timing_recorded() {
        let mut collector = Collector::new(MockPlatform::typical_desktop(), ScanConfig::default());
        assert!(collector.last_timing().is_none());
        collector.collect_snapshot().unwrap();
        let timing = collector.last_timing().unwrap();
        assert!(timing.total >= timing.handles);
    }

    #[test]
    fn test_session_reset_between_scans() {
        let mut collector = Collector::new(MockPlatform::typical_desktop(), ScanConfig::default());
        let first = collector.collect_snapshot().unwrap();
        let second = collector.collect_snapshot().unwrap();

        assert_eq!(first.records, second.records);
        assert_eq!(first.arena_checksum, second.arena_checksum);
        assert_eq!(second.paths.strings[0].reference_count, 1);
    }

    #[test]
    fn test_snapshot_failure_aborts() {
        let platform = MockPlatform::new(0).with_query_status(QueryStatus::Unavailable);
        let mut collector = Collector::new(platform, ScanConfig::default());

        let err = collector.collect_snapshot().unwrap_err();
        assert_eq!(err, ScanError::Snapshot(SnapshotError::CapabilityUnavailable));
        assert!(collector.last_timing().is_none());
    }

    #[test]
    fn test_failed_scan_clears_previous_timing() {
        let platform = MockPlatform::new(0)
            .with_query_status(QueryStatus::Success)
            .with_query_status(QueryStatus::Failed(0xC000_0001));
        let mut collector = Collector::new(platform, ScanConfig::default());

        collector.collect_snapshot().unwrap();
        assert!(collector.last_timing().is_some());

        let err = collector.collect_snapshot().unwrap_err();
        assert_eq!(err, ScanError::Snapshot(SnapshotError::QueryFailed(0xC000_0001)));
        assert!(collector.last_timing().is_none());
        assert!(collector.session().processes().is_empty());
        assert_eq!(collector.session().records().count(), 0);
    }

    #[test]
    fn test_snapshot_buffer_grows() {
        let platform = MockPlatform::typical_desktop().with_min_buffer(2 * 1024 * 1024 + 1);
        let mut collector = Collector::new(platform, ScanConfig::default());
        collector.collect_snapshot().unwrap();

        assert_eq!(
            collector.platform().queries(),
            &[1024 * 1024, 2 * 1024 * 1024, 3 * 1024 * 1024]
        );
    }

    #[test]
    fn test_buffer_limit_is_reported() {
        let platform = MockPlatform::typical_desktop().with_min_buffer(usize::MAX);
        let config = ScanConfig::default().with_snapshot_policy(SnapshotPolicy {
            initial_buffer: 1024,
            growth_step: 1024,
            max_buffer: 4096,
        });
        let mut collector = Collector::new(platform, config);

        assert_eq!(
            collector.collect_snapshot().unwrap_err(),
            ScanError::Snapshot(SnapshotError::BufferLimitExceeded(4096))
        );
    }

    #[test]
    fn test_small_process_table_drops_handles() {
        let config = ScanConfig::default().with_max_process_count(2);
        let mut collector = Collector::new(MockPlatform::typical_desktop(), config);
        let report = collector.collect_snapshot().unwrap();

        assert_eq!(report.summary.unique_process_count, 2);
        assert_eq!(report.buckets.len(), 2);
        assert!(report.summary.dropped_handle_count > 0);
    }

    #[test]
    fn test_procfs_scan() {
        let platform = ProcfsPlatform::new(MockFs::typical_system(), "/proc");
        let mut collector = Collector::new(platform, ScanConfig::default());
        let report = collector.collect_snapshot().unwrap();

        // The zombie holds no descriptors and never gets a bucket.
        assert_eq!(report.summary.unique_process_count, 3);
        assert_eq!(report.summary.total_handle_count, 10);
        assert_eq!(report.outcomes.recorded, 3);

        let bash = report.records.iter().find(|r| r.process_id == 1234).unwrap();
        assert_eq!(bash.path_hash, 0xAD15_F510);
        assert_eq!(bash.directory_hash, 0xE947_0283);
        assert_eq!(bash.parent_process_id, 1);
    }
}
