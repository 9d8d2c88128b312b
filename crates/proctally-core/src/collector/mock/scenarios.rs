//! Pre-built mock scenarios for testing.
//!
//! `MockFs` scenarios describe a `/proc` tree for the procfs platform;
//! `MockPlatform` scenarios describe a Windows-style system with device-form
//! image paths and a drive map.

use super::filesystem::MockFs;
use super::platform::{MockPlatform, MockProcess};
use crate::collector::handles::HandleRecord;

/// 2024-01-01T00:00:00Z in FILETIME ticks.
pub const SCENARIO_NOW: u64 = 133_485_408_000_000_000;

const O_RDWR: u32 = 0o2;
const O_LARGEFILE: u32 = 0o100_000;
const O_CLOEXEC: u32 = 0o2_000_000;
const O_NONBLOCK: u32 = 0o4_000;

fn stat_line(pid: u32, comm: &str, state: char, ppid: u32, starttime: u64) -> String {
    format!(
        "{pid} ({comm}) {state} {ppid} {pid} {pid} 0 -1 4194304 500 0 0 0 150 30 0 0 20 0 1 0 {starttime} 12345678 1000 18446744073709551615 0 0 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0"
    )
}

impl MockFs {
    /// A small Linux system.
    ///
    /// - PID 1 `init` with an eventpoll, a signalfd and a socket
    /// - PID 800 `sshd` with a listening socket, a pipe and a timerfd
    /// - PID 1234 `bash` on a terminal with its history file open
    /// - PID 4321 a zombie with no executable and no descriptors
    pub fn typical_system() -> Self {
        let mut fs = Self::new();

        fs.add_file(
            "/proc/stat",
            "\
cpu  10000 500 3000 80000 1000 200 100 0 0 0
cpu0 2500 125 750 20000 250 50 25 0 0 0
intr 1000000 50 0 0 0 0 0 0 0 1 0 0 0 100 0 0 1000
ctxt 500000
btime 1700000000
processes 10000
procs_running 2
procs_blocked 0
",
        );

        fs.add_process(1, &stat_line(1, "init", 'S', 0, 10), Some("/sbin/init"));
        fs.add_fd(1, 4, "anon_inode:[eventpoll]", O_RDWR | O_CLOEXEC, 11);
        fs.add_fd(1, 5, "anon_inode:[signalfd]", O_RDWR | O_CLOEXEC, 11);
        fs.add_fd(1, 7, "socket:[16384]", O_RDWR | O_CLOEXEC, 16384);

        fs.add_process(800, &stat_line(800, "sshd", 'S', 1, 1200), Some("/usr/sbin/sshd"));
        fs.add_fd(800, 3, "socket:[20480]", O_RDWR, 20480);
        fs.add_fd(800, 4, "pipe:[20500]", O_NONBLOCK, 20500);
        fs.add_fd(800, 5, "anon_inode:[timerfd]", O_RDWR | O_CLOEXEC, 11);

        fs.add_process(
            1234,
            &stat_line(1234, "bash", 'S', 1, 5000),
            Some("/usr/bin/bash"),
        );
        fs.add_fd(1234, 0, "/dev/pts/0", O_RDWR | O_LARGEFILE, 3);
        fs.add_fd(1234, 1, "/dev/pts/0", O_RDWR | O_LARGEFILE, 3);
        fs.add_fd(1234, 2, "/dev/pts/0", O_RDWR | O_LARGEFILE, 3);
        fs.add_fd(
            1234,
            255,
            "/home/user/.bash_history",
            O_LARGEFILE | O_CLOEXEC,
            131_074,
        );

        fs.add_process(4321, &stat_line(4321, "defunct", 'Z', 1234, 9000), None);

        fs
    }
}

fn handle(pid: u32, object_type_index: u8, handle_value: u16) -> HandleRecord {
    HandleRecord {
        owning_process_id: pid,
        object_type_index,
        handle_attributes: 0,
        handle_value,
        object_pointer: 0x8000_0000 | (pid << 8) | u32::from(handle_value),
        granted_access: 0x001F_0003,
    }
}

impl MockPlatform {
    /// A Windows desktop with two volumes.
    ///
    /// - `C:` is `\Device\HarddiskVolume3`, `D:` is `\Device\HarddiskVolume5`
    /// - PID 4 `System` cannot be opened (access denied)
    /// - PID 612 `explorer.exe` and PID 2048 `steam.exe` are running
    /// - PID 3100 `updater.exe` has exited
    pub fn typical_desktop() -> Self {
        Self::new(SCENARIO_NOW)
            .with_drive('C', r"\Device\HarddiskVolume3")
            .with_drive('D', r"\Device\HarddiskVolume5")
            .with_process(MockProcess::new(4, "").without_image())
            .with_open_error(4, crate::collector::platform::ERROR_ACCESS_DENIED)
            .with_process(
                MockProcess::new(612, r"\Device\HarddiskVolume3\Windows\explorer.exe")
                    .with_parent(580)
                    .started_secs_ago(SCENARIO_NOW, 7200),
            )
            .with_process(
                MockProcess::new(
                    2048,
                    r"\Device\HarddiskVolume5\Games\Steam\steam.exe",
                )
                .with_parent(612)
                .started_secs_ago(SCENARIO_NOW, 1800),
            )
            .with_process(
                MockProcess::new(
                    3100,
                    r"\Device\HarddiskVolume3\Program Files\Updater\updater.exe",
                )
                .with_parent(612)
                .started_secs_ago(SCENARIO_NOW, 30)
                .exited(),
            )
            .with_handles(vec![
                handle(4, 0x07, 4),
                handle(4, 0x25, 8),
                handle(612, 0x05, 4),
                handle(612, 0x25, 8),
                handle(612, 0x30, 12),
                handle(2048, 0x07, 4),
                handle(2048, 0x1F, 8),
                handle(2048, 0x41, 12),
                handle(3100, 0x25, 4),
            ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::platform::{DeviceMap, ProcessAccess, ProcessApi};
    use std::path::Path;
    use crate::collector::traits::FileSystem;

    #[test]
    fn test_typical_system_layout() {
        let fs = MockFs::typical_system();
        assert!(fs.exists(Path::new("/proc/1/stat")));
        assert!(fs.exists(Path::new("/proc/1234/fd/255")));
        assert!(!fs.exists(Path::new("/proc/4321/exe")));
        assert_eq!(fs.read_dir(Path::new("/proc/800/fd")).unwrap().len(), 3);
    }

    #[test]
    fn test_typical_desktop() {
        let platform = MockPlatform::typical_desktop();
        assert_eq!(platform.logical_drives(), vec!['C', 'D']);
        assert!(platform.open_process(4, ProcessAccess::QueryInformation).is_err());
        assert!(platform.open_process(612, ProcessAccess::QueryInformation).is_ok());
        assert_eq!(platform.handles().len(), 9);
    }
}
