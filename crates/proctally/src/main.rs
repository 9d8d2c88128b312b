//! proctally - process and handle telemetry scanner.
//!
//! Runs one scan: buckets the system handle snapshot per process, records a
//! descriptor for every process found and prints the report.

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::process::ExitCode;

use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing::{Level, debug, error, info};
use tracing_subscriber::EnvFilter;

#[cfg(target_os = "linux")]
use proctally_core::collector::{ProcfsPlatform, RealFs};
use proctally_core::collector::handles::SnapshotPolicy;
use proctally_core::collector::{
    Collector, CollectorTiming, MockPlatform, Platform, ProcessAccess, ScanConfig, UptimeFilter,
};
use proctally_core::storage::ScanReport;
use proctally_core::storage::record::MAX_ARENA_RECORDS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Process and handle telemetry scanner.
#[derive(Parser)]
#[command(name = "proctally", about = "Process and handle telemetry scanner", version)]
struct Args {
    /// Path to /proc filesystem (for testing/mocking).
    #[arg(long, default_value = "/proc")]
    proc_path: String,

    /// Scan the built-in demo system instead of the live one.
    #[arg(long)]
    mock: bool,

    /// Maximum number of processes to track (capped at 500).
    #[arg(long, default_value = "500")]
    max_processes: usize,

    /// Record processes that have already exited.
    #[arg(long)]
    include_terminated: bool,

    /// Width of the admitted uptime window in seconds.
    #[arg(long, requires = "uptime_reference")]
    uptime_threshold: Option<u32>,

    /// Upper bound of the admitted uptime window in seconds.
    #[arg(long, requires = "uptime_threshold")]
    uptime_reference: Option<u32>,

    /// Reserve record space for interned path strings.
    #[arg(long)]
    detailed: bool,

    /// Open processes with full query access instead of the restricted level.
    #[arg(long)]
    full_access: bool,

    /// Do not retry with full access when the restricted level is missing.
    #[arg(long)]
    no_legacy_fallback: bool,

    /// Record slots in the descriptor arena (1 to 65536).
    #[arg(
        long,
        default_value = "143",
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new()
            .range(1..=MAX_ARENA_RECORDS as u64)
    )]
    arena_records: usize,

    /// Largest handle snapshot buffer (e.g., "64M", "1G", "1048576").
    #[arg(long, default_value = "64M", value_parser = parse_size)]
    max_buffer: u64,

    /// Output format.
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is warn level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn scan_config(&self) -> ScanConfig {
        let access = if self.full_access {
            ProcessAccess::QueryInformation
        } else {
            ProcessAccess::QueryLimitedInformation
        };
        let uptime_filter = self
            .uptime_threshold
            .zip(self.uptime_reference)
            .map(|(threshold, reference)| UptimeFilter::new(threshold, reference));
        let snapshot = SnapshotPolicy {
            max_buffer: usize::try_from(self.max_buffer).unwrap_or(usize::MAX),
            ..SnapshotPolicy::default()
        };

        ScanConfig::default()
            .with_max_process_count(self.max_processes)
            .with_preferred_access(access)
            .with_include_terminated(self.include_terminated)
            .with_uptime_filter(uptime_filter)
            .with_detailed_analysis(self.detailed)
            .with_legacy_access_fallback(!self.no_legacy_fallback)
            .with_arena_records(self.arena_records)
            .with_snapshot_policy(snapshot)
    }
}

/// Parses a human-readable size string (e.g., "1G", "64M", "1024K") into bytes.
fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".to_string());
    }

    let (num_str, multiplier) = if let Some(num) = s.strip_suffix('G') {
        (num, 1024 * 1024 * 1024)
    } else if let Some(num) = s.strip_suffix('M') {
        (num, 1024 * 1024)
    } else if let Some(num) = s.strip_suffix('K') {
        (num, 1024)
    } else {
        (s, 1)
    };

    num_str
        .trim()
        .parse::<u64>()
        .map_err(|e| format!("invalid size '{}': {}", s, e))?
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size '{}' is too large", s))
}

/// Initializes the tracing subscriber. Default level is WARN so the report
/// stays readable; -v and -vv raise it, -q limits output to errors.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::WARN,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["proctally", "proctally_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    version: &'static str,
    scanned_at: String,
    elapsed_ms: Option<u64>,
    report: &'a ScanReport,
}

fn format_timestamp(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

/// Renders the report as a plain-text table.
fn render_text(report: &ScanReport) -> String {
    let mut out = String::new();
    let summary = &report.summary;
    out.push_str(&format!("scanned at {}\n", format_timestamp(report.timestamp)));
    out.push_str(&format!(
        "processes: {}  handles: {}  dropped: {}\n",
        summary.unique_process_count, summary.total_handle_count, summary.dropped_handle_count
    ));
    out.push_str(&format!(
        "recorded: {}  skipped: {}  no room: {}  arena full: {}  opened: {}\n",
        report.outcomes.recorded,
        report.outcomes.skipped_terminated,
        report.outcomes.insufficient_buffer,
        report.outcomes.arena_full,
        report.opened_processes
    ));
    out.push_str(&format!(
        "arena: {} bytes, crc32 {:08x}\n\n",
        report.arena_bytes, report.arena_checksum
    ));

    out.push_str(&format!(
        "{:>7} {:>7} {:>10} {:>10} {:>10}  {}\n",
        "PID", "PPID", "ACCESS", "FLAGS", "UPTIME", "PATH"
    ));
    for record in &report.records {
        let path = report
            .paths
            .strings
            .iter()
            .find(|s| s.hash == record.path_hash && record.path_hash != 0)
            .and_then(|s| s.text.as_deref())
            .unwrap_or("-");
        let uptime = if record.open_failed() {
            format!("err {}", record.creation_time_or_error)
        } else {
            format!("{}s", record.creation_time_or_error)
        };
        out.push_str(&format!(
            "{:>7} {:>7} {:>#10x} {:>#10x} {:>10}  {}\n",
            record.process_id,
            record.parent_process_id,
            record.access_flags,
            record.additional_flags,
            uptime,
            path
        ));
    }
    out
}

fn run<P: Platform>(
    platform: P,
    config: ScanConfig,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut collector = Collector::new(platform, config);
    let report = collector.collect_snapshot()?;
    let elapsed_ms = collector
        .last_timing()
        .map(|t: &CollectorTiming| t.total.as_millis() as u64);
    debug!(?elapsed_ms, "report ready");

    match format {
        OutputFormat::Text => print!("{}", render_text(&report)),
        OutputFormat::Json => {
            let output = JsonOutput {
                version: env!("CARGO_PKG_VERSION"),
                scanned_at: format_timestamp(report.timestamp),
                elapsed_ms,
                report: &report,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let config = args.scan_config();
    info!("proctally {} starting", env!("CARGO_PKG_VERSION"));
    debug!(?config, "scan configuration");

    let result = if args.mock {
        run(MockPlatform::typical_desktop(), config, args.format)
    } else {
        #[cfg(target_os = "linux")]
        {
            run(
                ProcfsPlatform::new(RealFs::new(), &args.proc_path),
                config,
                args.format,
            )
        }
        #[cfg(not(target_os = "linux"))]
        {
            info!(proc_path = %args.proc_path, "no /proc on this system, scanning demo data");
            run(MockPlatform::typical_desktop(), config, args.format)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "scan failed");
            ExitCode::FAILURE
        }
    }
}
