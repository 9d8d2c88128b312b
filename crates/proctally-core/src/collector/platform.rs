//! Operating-system collaborators consumed by the scan.
//!
//! The scan never talks to the OS directly. Everything it needs (the
//! system-wide handle snapshot, process handles and their times and image
//! paths, the drive map, the clock) comes through these traits so the same
//! pipeline runs against `/proc` or the in-memory mocks used in tests.

use std::fmt;

/// Windows `ERROR_ACCESS_DENIED`.
pub const ERROR_ACCESS_DENIED: u32 = 5;
/// Windows `ERROR_INVALID_PARAMETER`, also returned for vanished PIDs.
pub const ERROR_INVALID_PARAMETER: u32 = 87;

/// Numeric OS error code reported by a collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsError(pub u32);

impl OsError {
    pub fn code(self) -> u32 {
        self.0
    }

    pub fn is_invalid_parameter(self) -> bool {
        self.0 == ERROR_INVALID_PARAMETER
    }
}

impl fmt::Display for OsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "os error {}", self.0)
    }
}

impl std::error::Error for OsError {}

/// Access level requested when opening a process for query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessAccess {
    /// Full query access (`PROCESS_QUERY_INFORMATION`).
    #[default]
    QueryInformation,
    /// Restricted query access (`PROCESS_QUERY_LIMITED_INFORMATION`).
    QueryLimitedInformation,
}

impl ProcessAccess {
    /// Access-rights bits as recorded in descriptor records.
    pub fn bits(self) -> u32 {
        match self {
            ProcessAccess::QueryInformation => 0x0400,
            ProcessAccess::QueryLimitedInformation => 0x1000,
        }
    }
}

/// Opaque token for an opened process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
    pub access: ProcessAccess,
}

/// The four FILETIME timestamps of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessTimes {
    pub creation: u64,
    /// Zero while the process is still running.
    pub exit: u64,
    pub kernel: u64,
    pub user: u64,
}

impl ProcessTimes {
    pub fn has_exited(&self) -> bool {
        self.exit != 0
    }
}

/// Outcome of one system handle query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// The buffer holds a count-prefixed handle array.
    Success,
    /// The buffer was too small for the current handle population.
    BufferTooSmall,
    /// The query entry point could not be resolved.
    Unavailable,
    /// Any other non-success status.
    Failed(u32),
}

/// Privileged, size-sensitive system handle query.
pub trait HandleSource {
    /// Fills `buffer` with a count-prefixed handle array.
    ///
    /// Returns [`QueryStatus::BufferTooSmall`] when the snapshot does not fit;
    /// the buffer content is then unspecified.
    fn query_handles(&mut self, buffer: &mut [u8]) -> QueryStatus;
}

/// Per-process query primitives.
pub trait ProcessApi {
    fn open_process(&self, pid: u32, access: ProcessAccess) -> Result<ProcessHandle, OsError>;

    fn process_times(&self, handle: &ProcessHandle) -> Result<ProcessTimes, OsError>;

    /// Device-form image path, if the handle grants enough access to read it.
    fn image_path(&self, handle: &ProcessHandle) -> Option<String>;

    fn close_process(&self, _handle: ProcessHandle) {}

    /// Parent process ID, when the platform can tell.
    fn parent_process_id(&self, _pid: u32) -> Option<u32> {
        None
    }

    /// Whether the restricted query access level exists on this system.
    fn supports_limited_query(&self) -> bool {
        true
    }
}

/// Drive-letter to device mapping.
pub trait DeviceMap {
    /// Drive letters currently present, in enumeration order.
    fn logical_drives(&self) -> Vec<char>;

    /// Device target of the `X:` drive root.
    fn query_dos_device(&self, drive: char) -> Option<String>;
}

/// Wall clock in FILETIME ticks.
pub trait Clock {
    fn now_ticks(&self) -> u64;
}

/// Everything a full scan needs.
pub trait Platform: HandleSource + ProcessApi + DeviceMap + Clock {}

impl<T: HandleSource + ProcessApi + DeviceMap + Clock> Platform for T {}
