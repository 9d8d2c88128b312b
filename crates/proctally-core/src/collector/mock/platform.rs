//! In-memory scan platform with canned processes and scripted snapshot
//! behaviour.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::collector::handles::{HandleRecord, encode_handle_snapshot};
use crate::collector::platform::{
    Clock, DeviceMap, ERROR_INVALID_PARAMETER, HandleSource, OsError, ProcessAccess, ProcessApi,
    ProcessHandle, ProcessTimes, QueryStatus,
};
use crate::util::time::TICKS_PER_SECOND;

/// A process known to [`MockPlatform`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockProcess {
    pub pid: u32,
    pub parent_pid: Option<u32>,
    pub image_path: Option<String>,
    pub times: ProcessTimes,
}

impl MockProcess {
    pub fn new(pid: u32, image_path: &str) -> Self {
        Self {
            pid,
            parent_pid: None,
            image_path: Some(image_path.to_string()),
            times: ProcessTimes::default(),
        }
    }

    pub fn with_parent(mut self, ppid: u32) -> Self {
        self.parent_pid = Some(ppid);
        self
    }

    pub fn with_creation(mut self, creation: u64) -> Self {
        self.times.creation = creation;
        self
    }

    /// Sets the creation time `secs` seconds before `now`.
    pub fn started_secs_ago(self, now: u64, secs: u64) -> Self {
        self.with_creation(now.saturating_sub(secs * TICKS_PER_SECOND))
    }

    /// Marks the process as exited one second after it started.
    pub fn exited(mut self) -> Self {
        self.times.exit = self.times.creation + TICKS_PER_SECOND;
        self
    }

    pub fn without_image(mut self) -> Self {
        self.image_path = None;
        self
    }
}

/// Scan platform backed by in-memory state.
///
/// Unknown PIDs fail to open with `ERROR_INVALID_PARAMETER`, the way a
/// vanished process does.
#[derive(Debug, Default)]
pub struct MockPlatform {
    now: u64,
    processes: BTreeMap<u32, MockProcess>,
    handles: Vec<HandleRecord>,
    drives: Vec<(char, String)>,
    open_errors: HashMap<u32, u32>,
    times_errors: HashMap<u32, u32>,
    limited_query: bool,
    /// Statuses returned, in order, before the handles are served.
    scripted: VecDeque<QueryStatus>,
    /// Smallest buffer the snapshot is served into.
    min_buffer: usize,
    queries: Vec<usize>,
    open_attempts: RefCell<Vec<(u32, ProcessAccess)>>,
    closed: Cell<usize>,
}

impl MockPlatform {
    pub fn new(now: u64) -> Self {
        Self {
            now,
            limited_query: true,
            ..Self::default()
        }
    }

    pub fn with_process(mut self, process: MockProcess) -> Self {
        self.processes.insert(process.pid, process);
        self
    }

    pub fn with_handles(mut self, handles: Vec<HandleRecord>) -> Self {
        self.handles = handles;
        self
    }

    pub fn with_drive(mut self, drive: char, device: &str) -> Self {
        self.drives.push((drive, device.to_string()));
        self
    }

    pub fn with_open_error(mut self, pid: u32, code: u32) -> Self {
        self.open_errors.insert(pid, code);
        self
    }

    pub fn with_times_error(mut self, pid: u32, code: u32) -> Self {
        self.times_errors.insert(pid, code);
        self
    }

    /// Simulates a system without the restricted query access level.
    pub fn without_limited_query(mut self) -> Self {
        self.limited_query = false;
        self
    }

    pub fn with_query_status(mut self, status: QueryStatus) -> Self {
        self.scripted.push_back(status);
        self
    }

    pub fn with_min_buffer(mut self, bytes: usize) -> Self {
        self.min_buffer = bytes;
        self
    }

    pub fn handles(&self) -> &[HandleRecord] {
        &self.handles
    }

    /// Buffer sizes passed to each handle query.
    pub fn queries(&self) -> &[usize] {
        &self.queries
    }

    pub fn open_attempts(&self) -> Vec<(u32, ProcessAccess)> {
        self.open_attempts.borrow().clone()
    }

    pub fn closed_handles(&self) -> usize {
        self.closed.get()
    }
}

impl HandleSource for MockPlatform {
    fn query_handles(&mut self, buffer: &mut [u8]) -> QueryStatus {
        self.queries.push(buffer.len());
        if let Some(status) = self.scripted.pop_front() {
            return status;
        }
        if buffer.len() < self.min_buffer {
            return QueryStatus::BufferTooSmall;
        }
        encode_handle_snapshot(&self.handles, buffer)
    }
}

impl ProcessApi for MockPlatform {
    fn open_process(&self, pid: u32, access: ProcessAccess) -> Result<ProcessHandle, OsError> {
        self.open_attempts.borrow_mut().push((pid, access));
        if access == ProcessAccess::QueryLimitedInformation && !self.limited_query {
            return Err(OsError(ERROR_INVALID_PARAMETER));
        }
        if let Some(&code) = self.open_errors.get(&pid) {
            return Err(OsError(code));
        }
        if !self.processes.contains_key(&pid) {
            return Err(OsError(ERROR_INVALID_PARAMETER));
        }
        Ok(ProcessHandle { pid, access })
    }

    fn process_times(&self, handle: &ProcessHandle) -> Result<ProcessTimes, OsError> {
        if let Some(&code) = self.times_errors.get(&handle.pid) {
            return Err(OsError(code));
        }
        self.processes
            .get(&handle.pid)
            .map(|p| p.times)
            .ok_or(OsError(ERROR_INVALID_PARAMETER))
    }

    fn image_path(&self, handle: &ProcessHandle) -> Option<String> {
        self.processes.get(&handle.pid)?.image_path.clone()
    }

    fn close_process(&self, _handle: ProcessHandle) {
        self.closed.set(self.closed.get() + 1);
    }

    fn parent_process_id(&self, pid: u32) -> Option<u32> {
        self.processes.get(&pid)?.parent_pid
    }

    fn supports_limited_query(&self) -> bool {
        self.limited_query
    }
}

impl DeviceMap for MockPlatform {
    fn logical_drives(&self) -> Vec<char> {
        self.drives.iter().map(|(drive, _)| *drive).collect()
    }

    fn query_dos_device(&self, drive: char) -> Option<String> {
        self.drives
            .iter()
            .find(|(d, _)| *d == drive)
            .map(|(_, device)| device.clone())
    }
}

impl Clock for MockPlatform {
    fn now_ticks(&self) -> u64 {
        self.now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::handles::decode_handle_snapshot;

    #[test]
    fn test_scripted_statuses_come_first() {
        let mut platform = MockPlatform::new(0)
            .with_query_status(QueryStatus::BufferTooSmall)
            .with_handles(vec![HandleRecord::default()]);
        let mut buffer = vec![0u8; 64];

        assert_eq!(platform.query_handles(&mut buffer), QueryStatus::BufferTooSmall);
        assert_eq!(platform.query_handles(&mut buffer), QueryStatus::Success);
        assert_eq!(decode_handle_snapshot(&buffer).unwrap().len(), 1);
        assert_eq!(platform.queries(), &[64, 64]);
    }

    #[test]
    fn test_min_buffer() {
        let mut platform = MockPlatform::new(0).with_min_buffer(128);
        assert_eq!(platform.query_handles(&mut [0u8; 64]), QueryStatus::BufferTooSmall);
        assert_eq!(platform.query_handles(&mut [0u8; 128]), QueryStatus::Success);
    }

    #[test]
    fn test_open_rules() {
        let platform = MockPlatform::new(0)
            .with_process(MockProcess::new(1, "/sbin/init"))
            .without_limited_query();

        assert_eq!(
            platform.open_process(1, ProcessAccess::QueryLimitedInformation),
            Err(OsError(ERROR_INVALID_PARAMETER))
        );
        assert!(platform.open_process(1, ProcessAccess::QueryInformation).is_ok());
        assert!(platform.open_process(2, ProcessAccess::QueryInformation).is_err());
        assert_eq!(platform.open_attempts().len(), 3);
    }

    #[test]
    fn test_exited_process() {
        let process = MockProcess::new(9, "/bin/true").with_creation(100).exited();
        assert!(process.times.has_exited());
    }
}
