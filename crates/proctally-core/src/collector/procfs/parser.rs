//! Parsers for the `/proc` files the procfs platform reads.

/// Error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// Fields of `/proc/[pid]/stat` used for process times and parentage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcStat {
    pub pid: u32,
    pub comm: String,
    pub state: char,
    pub ppid: u32,
    /// User time in clock ticks.
    pub utime: u64,
    /// System time in clock ticks.
    pub stime: u64,
    /// Start time in clock ticks after boot.
    pub starttime: u64,
}

impl ProcStat {
    /// Zombie or dead.
    pub fn has_exited(&self) -> bool {
        matches!(self.state, 'Z' | 'X' | 'x')
    }
}

/// Parses `/proc/[pid]/stat` content.
///
/// The comm field may contain spaces and parentheses, so it is delimited by
/// the first `(` and the last `)`.
pub fn parse_proc_stat(content: &str) -> Result<ProcStat, ParseError> {
    let content = content.trim();

    let open_paren = content
        .find('(')
        .ok_or_else(|| ParseError::new("missing '(' in stat"))?;
    let close_paren = content
        .rfind(')')
        .ok_or_else(|| ParseError::new("missing ')' in stat"))?;
    if close_paren <= open_paren {
        return Err(ParseError::new("invalid parentheses in stat"));
    }

    let pid: u32 = content[..open_paren]
        .trim()
        .parse()
        .map_err(|_| ParseError::new("invalid pid"))?;
    let comm = content[open_paren + 1..close_paren].to_string();

    // Indices below are relative to the field after the comm.
    let fields: Vec<&str> = content[close_paren + 1..].split_whitespace().collect();
    if fields.len() < 20 {
        return Err(ParseError::new(format!(
            "not enough fields in stat: expected 20+, got {}",
            fields.len()
        )));
    }

    let parse_field = |idx: usize, name: &str| -> Result<u64, ParseError> {
        fields[idx]
            .parse()
            .map_err(|_| ParseError::new(format!("invalid {}", name)))
    };

    Ok(ProcStat {
        pid,
        comm,
        state: fields[0].chars().next().unwrap_or('?'),
        ppid: parse_field(1, "ppid")? as u32,
        utime: parse_field(11, "utime")?,
        stime: parse_field(12, "stime")?,
        starttime: parse_field(19, "starttime")?,
    })
}

/// Extracts `btime` (boot time, seconds since the epoch) from `/proc/stat`.
pub fn parse_boot_time(content: &str) -> Result<u64, ParseError> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("btime "))
        .ok_or_else(|| ParseError::new("missing btime in stat"))?
        .trim()
        .parse()
        .map_err(|_| ParseError::new("invalid btime"))
}

/// Fields of `/proc/[pid]/fdinfo/[fd]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FdInfo {
    /// Open flags (`O_*`), printed in octal by the kernel.
    pub flags: u32,
    pub ino: u64,
}

/// Parses `/proc/[pid]/fdinfo/[fd]` content.
pub fn parse_fdinfo(content: &str) -> Result<FdInfo, ParseError> {
    let mut info = FdInfo::default();
    let mut seen_flags = false;

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "flags" => {
                info.flags = u32::from_str_radix(value.trim(), 8)
                    .map_err(|_| ParseError::new("invalid fdinfo flags"))?;
                seen_flags = true;
            }
            "ino" => {
                info.ino = value
                    .trim()
                    .parse()
                    .map_err(|_| ParseError::new("invalid fdinfo ino"))?;
            }
            _ => {}
        }
    }

    if !seen_flags {
        return Err(ParseError::new("missing flags in fdinfo"));
    }
    Ok(info)
}

/// Object type indices assigned to descriptor targets.
pub mod object_type {
    pub const PIDFD: u8 = 0x07;
    pub const EVENTFD: u8 = 0x10;
    pub const TIMERFD: u8 = 0x12;
    pub const SIGNALFD: u8 = 0x1E;
    pub const EVENTPOLL: u8 = 0x21;
    pub const FILE: u8 = 0x25;
    pub const DEVICE: u8 = 0x26;
    pub const PIPE: u8 = 0x28;
    pub const SOCKET: u8 = 0x29;
    pub const ANON_INODE: u8 = 0x2A;
    /// Past the tracked range, contributes no mask bits.
    pub const UNKNOWN: u8 = 0x3F;
}

/// Maps an `fd/N` link target to an object type index.
pub fn classify_fd_target(target: &str) -> u8 {
    if target.starts_with("pipe:") {
        return object_type::PIPE;
    }
    if target.starts_with("socket:") {
        return object_type::SOCKET;
    }
    if let Some(kind) = target.strip_prefix("anon_inode:") {
        let kind = kind.trim_start_matches('[').trim_end_matches(']');
        return match kind {
            "pidfd" => object_type::PIDFD,
            "eventfd" => object_type::EVENTFD,
            "timerfd" => object_type::TIMERFD,
            "signalfd" => object_type::SIGNALFD,
            "eventpoll" => object_type::EVENTPOLL,
            _ => object_type::ANON_INODE,
        };
    }
    if target.starts_with("/dev/") {
        return object_type::DEVICE;
    }
    if target.starts_with('/') {
        return object_type::FILE;
    }
    object_type::UNKNOWN
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASH_STAT: &str = "1234 (bash) S 1 1234 1234 34816 1234 4194304 1000 0 0 0 150 30 0 0 20 0 1 0 5000 12345678 1000 18446744073709551615 0 0 0 0 0 0 65536 4 65536 1 0 0 17 2 0 0 0 0 0";

    #[test]
    fn test_parse_proc_stat() {
        let stat = parse_proc_stat(BASH_STAT).unwrap();
        assert_eq!(stat.pid, 1234);
        assert_eq!(stat.comm, "bash");
        assert_eq!(stat.state, 'S');
        assert_eq!(stat.ppid, 1);
        assert_eq!(stat.utime, 150);
        assert_eq!(stat.stime, 30);
        assert_eq!(stat.starttime, 5000);
        assert!(!stat.has_exited());
    }

    #[test]
    fn test_parse_proc_stat_comm_with_parens() {
        let content = "42 (my (weird) proc) Z 7 42 42 0 -1 0 0 0 0 0 1 2 0 0 20 0 1 0 900 0 0";
        let stat = parse_proc_stat(content).unwrap();
        assert_eq!(stat.comm, "my (weird) proc");
        assert_eq!(stat.ppid, 7);
        assert_eq!(stat.starttime, 900);
        assert!(stat.has_exited());
    }

    #[test]
    fn test_parse_proc_stat_errors() {
        assert!(parse_proc_stat("1234 bash S").is_err());
        assert!(parse_proc_stat("1234 (bash) S 1 2 3").is_err());
        assert!(parse_proc_stat("x (bash) S").is_err());
    }

    #[test]
    fn test_parse_boot_time() {
        let content = "cpu  10 0 3 80 1 0 0 0 0 0\nctxt 500000\nbtime 1700000000\nprocesses 10\n";
        assert_eq!(parse_boot_time(content).unwrap(), 1_700_000_000);
        assert!(parse_boot_time("cpu 1 2 3\n").is_err());
    }

    #[test]
    fn test_parse_fdinfo() {
        let info = parse_fdinfo("pos:\t0\nflags:\t02100002\nmnt_id:\t15\nino:\t98765\n").unwrap();
        assert_eq!(info.flags, 0o2100002);
        assert_eq!(info.ino, 98765);

        assert!(parse_fdinfo("pos:\t0\n").is_err());
        assert!(parse_fdinfo("flags:\t09\n").is_err());
    }

    #[test]
    fn test_classify_fd_target() {
        assert_eq!(classify_fd_target("pipe:[1234]"), object_type::PIPE);
        assert_eq!(classify_fd_target("socket:[5678]"), object_type::SOCKET);
        assert_eq!(classify_fd_target("anon_inode:[eventfd]"), object_type::EVENTFD);
        assert_eq!(classify_fd_target("anon_inode:[timerfd]"), object_type::TIMERFD);
        assert_eq!(classify_fd_target("anon_inode:[signalfd]"), object_type::SIGNALFD);
        assert_eq!(classify_fd_target("anon_inode:[eventpoll]"), object_type::EVENTPOLL);
        assert_eq!(classify_fd_target("anon_inode:[pidfd]"), object_type::PIDFD);
        assert_eq!(classify_fd_target("anon_inode:inotify"), object_type::ANON_INODE);
        assert_eq!(classify_fd_target("/dev/pts/0"), object_type::DEVICE);
        assert_eq!(classify_fd_target("/var/log/syslog"), object_type::FILE);
        assert_eq!(classify_fd_target("net:[4026531840]"), object_type::UNKNOWN);
    }
}
