//! Per-process descriptor recording.
//!
//! Each requested process walks through open, time query, path
//! normalization and hashing before its record is written. Every failure
//! along the way degrades the record instead of aborting the scan:
//!
//! ```text
//! open ──fail──────────────────────────────► degraded (0x80000000, error code)
//!  │
//! times ──exited, not included─────────────► SkippedTerminated
//!  │    ──outside uptime window────────────► degraded (uptime only)
//!  │
//! image path ──missing or too long─────────► degraded (uptime only)
//!  │
//! room check ──detailed, no room──────────► InsufficientBuffer
//!  │         ──arena full─────────────────► ArenaFull
//!  │
//! hash + intern ──────────────────────────► Recorded
//! ```

use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::collector::config::ScanConfig;
use crate::collector::path::normalize_image_path;
use crate::collector::platform::{
    Clock, DeviceMap, OsError, ProcessAccess, ProcessApi, ProcessHandle,
};
use crate::collector::session::ScanSession;
use crate::storage::record::{FLAG_OPEN_FAILED, FLAG_TERMINATED, ProcessDescriptorRecord};
use crate::util::time::uptime_seconds;

/// One process to record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessRequest {
    pub process_id: u32,
    /// Caller-supplied bits copied into the record's access flags.
    pub access_flags: u32,
    pub parent_process_id: u32,
    pub additional_flags: u32,
}

/// Result of [`record_process`]. None of these abort the scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordOutcome {
    Recorded,
    SkippedTerminated,
    /// Detailed mode found no room for the record and its strings.
    InsufficientBuffer,
    /// The record arena has no free slot.
    ArenaFull,
}

/// Opens `pid` with the preferred access, falling back to full query access
/// when the restricted level does not exist on this system.
pub fn open_for_query<P: ProcessApi + ?Sized>(
    platform: &P,
    pid: u32,
    config: &ScanConfig,
) -> Result<ProcessHandle, OsError> {
    match platform.open_process(pid, config.preferred_access) {
        Err(e)
            if e.is_invalid_parameter()
                && config.legacy_access_fallback
                && config.preferred_access == ProcessAccess::QueryLimitedInformation
                && !platform.supports_limited_query() =>
        {
            debug!(pid, "restricted query access unsupported, retrying with full access");
            platform.open_process(pid, ProcessAccess::QueryInformation)
        }
        other => other,
    }
}

/// Analyzes one process and appends its descriptor record to the session.
pub fn record_process<P>(
    platform: &P,
    session: &mut ScanSession,
    config: &ScanConfig,
    request: &ProcessRequest,
) -> RecordOutcome
where
    P: ProcessApi + DeviceMap + Clock + ?Sized,
{
    let pid = request.process_id;
    let mut record = ProcessDescriptorRecord {
        process_id: pid,
        access_flags: request.access_flags,
        parent_process_id: request.parent_process_id,
        additional_flags: request.additional_flags,
        ..ProcessDescriptorRecord::default()
    };

    let handle = match open_for_query(platform, pid, config) {
        Ok(handle) => handle,
        Err(e) => {
            debug!(pid, error = %e, "process open failed, recording degraded entry");
            record.access_flags |= FLAG_OPEN_FAILED;
            record.creation_time_or_error = e.code();
            return commit(session, config, record);
        }
    };
    session.records_mut().note_opened();

    let outcome = record_opened(platform, session, config, record, &handle);
    platform.close_process(handle);
    outcome
}

fn record_opened<P>(
    platform: &P,
    session: &mut ScanSession,
    config: &ScanConfig,
    mut record: ProcessDescriptorRecord,
    handle: &ProcessHandle,
) -> RecordOutcome
where
    P: ProcessApi + DeviceMap + Clock + ?Sized,
{
    let pid = record.process_id;
    let image_path = platform.image_path(handle);

    match platform.process_times(handle) {
        Ok(times) => {
            if times.has_exited() {
                if !config.include_terminated {
                    trace!(pid, "process exited, skipping");
                    return RecordOutcome::SkippedTerminated;
                }
                record.access_flags |= FLAG_TERMINATED;
            }
            let uptime = uptime_seconds(platform.now_ticks(), times.creation);
            record.creation_time_or_error = uptime;
            if config.uptime_filter.is_some_and(|f| !f.admits(uptime)) {
                trace!(pid, uptime, "uptime outside filter window");
                return commit(session, config, record);
            }
        }
        Err(e) => {
            debug!(pid, error = %e, "process times unavailable");
        }
    }

    let Some(path) = image_path.and_then(|p| normalize_image_path(&p, platform)) else {
        debug!(pid, "no usable image path");
        return commit(session, config, record);
    };

    let string_bytes = path.full.len() + path.directory.len();
    if let Some(refused) = admit(session, config, string_bytes) {
        return refused;
    }

    let hashes = session.intern_path(&path);
    record.path_hash = hashes.path;
    record.directory_hash = hashes.directory;
    write(session, record)
}

/// Refusal outcome if the arena cannot take a record with `string_bytes`.
fn admit(session: &ScanSession, config: &ScanConfig, string_bytes: usize) -> Option<RecordOutcome> {
    if config.detailed_analysis {
        if !session.has_room_for(string_bytes) {
            warn!(
                remaining = session.records().remaining_bytes(),
                string_bytes, "descriptor arena too small for detailed record"
            );
            return Some(RecordOutcome::InsufficientBuffer);
        }
    } else if session.records().is_full() {
        warn!(capacity = session.records().capacity(), "descriptor arena full");
        return Some(RecordOutcome::ArenaFull);
    }
    None
}

fn commit(
    session: &mut ScanSession,
    config: &ScanConfig,
    record: ProcessDescriptorRecord,
) -> RecordOutcome {
    if let Some(refused) = admit(session, config, 0) {
        return refused;
    }
    write(session, record)
}

fn write(session: &mut ScanSession, record: ProcessDescriptorRecord) -> RecordOutcome {
    if !session.records_mut().push(&record) {
        return RecordOutcome::ArenaFull;
    }
    RecordOutcome::Recorded
}
