//! Linux implementation of the scan collaborators on top of `/proc`.
//!
//! Open descriptors stand in for handles: every `/proc/[pid]/fd/N` link
//! becomes one handle record whose object type is derived from the link
//! target and whose access bits come from the `fdinfo` open flags.

use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};

use crate::collector::handles::{HandleRecord, encode_handle_snapshot};
use crate::collector::platform::{
    Clock, DeviceMap, ERROR_ACCESS_DENIED, ERROR_INVALID_PARAMETER, HandleSource, OsError,
    ProcessAccess, ProcessApi, ProcessHandle, ProcessTimes, QueryStatus,
};
use crate::collector::procfs::parser::{
    ProcStat, ParseError, classify_fd_target, parse_boot_time, parse_fdinfo, parse_proc_stat,
};
use crate::collector::traits::FileSystem;
use crate::util::time::{TICKS_PER_SECOND, now_ticks, unix_secs_to_ticks};

/// Clock ticks per second (USER_HZ). Standard value for Linux.
const CLK_TCK: u64 = 100;

/// Handle attribute set on descriptors that survive `exec`.
pub const HANDLE_ATTRIBUTE_INHERIT: u8 = 0x02;

const O_CLOEXEC: u32 = 0o2_000_000;

/// Scan platform reading `/proc` through a [`FileSystem`].
pub struct ProcfsPlatform<F: FileSystem> {
    fs: F,
    proc_path: String,
    /// System boot time (seconds since epoch) from `/proc/stat`.
    boot_time: u64,
    /// Snapshot kept across "buffer too small" retries.
    pending: Option<Vec<HandleRecord>>,
}

impl<F: FileSystem> ProcfsPlatform<F> {
    /// Creates a platform rooted at `proc_path` (usually `/proc`).
    ///
    /// Boot time is read once here; without it creation times are relative
    /// to the epoch and every uptime is huge.
    pub fn new(fs: F, proc_path: impl Into<String>) -> Self {
        let proc_path = proc_path.into();
        let boot_time = fs
            .read_to_string(&Path::new(&proc_path).join("stat"))
            .map_err(|e| ParseError::new(e.to_string()))
            .and_then(|content| parse_boot_time(&content))
            .unwrap_or_else(|e| {
                warn!(error = %e, "boot time unavailable");
                0
            });

        Self {
            fs,
            proc_path,
            boot_time,
            pending: None,
        }
    }

    pub fn boot_time(&self) -> u64 {
        self.boot_time
    }

    fn pid_dir(&self, pid: u32) -> PathBuf {
        Path::new(&self.proc_path).join(pid.to_string())
    }

    fn read_stat(&self, pid: u32) -> Result<ProcStat, OsError> {
        let content = self
            .fs
            .read_to_string(&self.pid_dir(pid).join("stat"))
            .map_err(|e| os_error_from_io(&e))?;
        parse_proc_stat(&content).map_err(|e| {
            debug!(pid, error = %e, "unparsable stat");
            OsError(ERROR_INVALID_PARAMETER)
        })
    }

    /// Numeric entries of the proc root.
    fn list_pids(&self) -> Option<Vec<u32>> {
        let entries = self.fs.read_dir(Path::new(&self.proc_path)).ok()?;
        let mut pids: Vec<u32> = entries
            .iter()
            .filter_map(|p| p.file_name()?.to_str()?.parse().ok())
            .collect();
        pids.sort_unstable();
        Some(pids)
    }

    fn process_handles(&self, pid: u32, out: &mut Vec<HandleRecord>) {
        let base = self.pid_dir(pid);
        let fds = match self.fs.read_dir(&base.join("fd")) {
            Ok(fds) => fds,
            Err(e) => {
                trace!(pid, error = %e, "fd directory unreadable");
                return;
            }
        };

        let mut numbered: Vec<(u32, PathBuf)> = fds
            .into_iter()
            .filter_map(|p| Some((p.file_name()?.to_str()?.parse().ok()?, p)))
            .collect();
        numbered.sort_unstable_by_key(|(fd, _)| *fd);

        for (fd, link) in numbered {
            // The descriptor may close between listing and reading.
            let Ok(target) = self.fs.read_link(&link) else {
                continue;
            };
            let info = self
                .fs
                .read_to_string(&base.join("fdinfo").join(fd.to_string()))
                .ok()
                .and_then(|content| parse_fdinfo(&content).ok())
                .unwrap_or_default();

            let attributes = if info.flags & O_CLOEXEC == 0 {
                HANDLE_ATTRIBUTE_INHERIT
            } else {
                0
            };
            out.push(HandleRecord {
                owning_process_id: pid,
                object_type_index: classify_fd_target(&target.to_string_lossy()),
                handle_attributes: attributes,
                handle_value: fd as u16,
                object_pointer: info.ino as u32,
                granted_access: info.flags,
            });
        }
    }

    fn enumerate_handles(&self) -> Option<Vec<HandleRecord>> {
        let pids = self.list_pids()?;
        let mut records = Vec::new();
        for pid in pids {
            self.process_handles(pid, &mut records);
        }
        debug!(handles = records.len(), "enumerated open descriptors");
        Some(records)
    }
}

impl<F: FileSystem> HandleSource for ProcfsPlatform<F> {
    fn query_handles(&mut self, buffer: &mut [u8]) -> QueryStatus {
        let records = match self.pending.take() {
            Some(records) => records,
            None => match self.enumerate_handles() {
                Some(records) => records,
                None => return QueryStatus::Unavailable,
            },
        };

        let status = encode_handle_snapshot(&records, buffer);
        if status == QueryStatus::BufferTooSmall {
            self.pending = Some(records);
        }
        status
    }
}

impl<F: FileSystem> ProcessApi for ProcfsPlatform<F> {
    fn open_process(&self, pid: u32, access: ProcessAccess) -> Result<ProcessHandle, OsError> {
        if !self.fs.exists(&self.pid_dir(pid).join("stat")) {
            return Err(OsError(ERROR_INVALID_PARAMETER));
        }
        Ok(ProcessHandle { pid, access })
    }

    fn process_times(&self, handle: &ProcessHandle) -> Result<ProcessTimes, OsError> {
        let stat = self.read_stat(handle.pid)?;
        let jiffies = |ticks: u64| ticks.saturating_mul(TICKS_PER_SECOND) / CLK_TCK;
        let creation = unix_secs_to_ticks(self.boot_time).saturating_add(jiffies(stat.starttime));

        Ok(ProcessTimes {
            creation,
            exit: if stat.has_exited() { self.now_ticks() } else { 0 },
            kernel: jiffies(stat.stime),
            user: jiffies(stat.utime),
        })
    }

    fn image_path(&self, handle: &ProcessHandle) -> Option<String> {
        let target = self.fs.read_link(&self.pid_dir(handle.pid).join("exe")).ok()?;
        Some(target.to_string_lossy().into_owned())
    }

    fn parent_process_id(&self, pid: u32) -> Option<u32> {
        self.read_stat(pid).ok().map(|stat| stat.ppid)
    }
}

/// Linux has no drive letters; paths pass through unchanged.
impl<F: FileSystem> DeviceMap for ProcfsPlatform<F> {
    fn logical_drives(&self) -> Vec<char> {
        Vec::new()
    }

    fn query_dos_device(&self, _drive: char) -> Option<String> {
        None
    }
}

impl<F: FileSystem> Clock for ProcfsPlatform<F> {
    fn now_ticks(&self) -> u64 {
        now_ticks()
    }
}

/// Maps an I/O error from `/proc` onto the OS error codes records carry.
pub fn os_error_from_io(e: &std::io::Error) -> OsError {
    match e.kind() {
        std::io::ErrorKind::PermissionDenied => OsError(ERROR_ACCESS_DENIED),
        _ => OsError(ERROR_INVALID_PARAMETER),
    }
}
