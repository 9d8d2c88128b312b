//! Process and handle telemetry collection.
//!
//! One scan takes a system-wide handle snapshot, folds it into per-process
//! buckets and then records a fixed-layout descriptor for every bucketed
//! process, interning image paths along the way.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Collector                           │
//! │  ┌─────────────────────┐   ┌─────────────────────────────┐  │
//! │  │  handles            │   │  recorder                   │  │
//! │  │  - snapshot retry   │──►│  - open / times / path      │  │
//! │  │  - ProcessTable     │   │  - hash + intern            │  │
//! │  └──────────┬──────────┘   └──────────────┬──────────────┘  │
//! │             └───────────┬─────────────────┘                 │
//! │                  ┌──────▼──────┐                            │
//! │                  │ ScanSession │ tables, arrays, arena      │
//! │                  └─────────────┘                            │
//! │                  ┌─────────────┐                            │
//! │                  │  Platform   │ (trait)                    │
//! │                  └──────┬──────┘                            │
//! └─────────────────────────┼───────────────────────────────────┘
//!              ┌────────────┴────────────┐
//!       ┌──────▼────────┐         ┌──────▼───────┐
//!       │ ProcfsPlatform│         │ MockPlatform │
//!       │ (Linux /proc) │         │ (Testing)    │
//!       └──────┬────────┘         └──────────────┘
//!       ┌──────▼──────┐
//!       │  FileSystem │ RealFs / MockFs
//!       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ## Production (Linux)
//!
//! ```ignore
//! use proctally_core::collector::{Collector, ProcfsPlatform, RealFs, ScanConfig};
//!
//! let platform = ProcfsPlatform::new(RealFs::new(), "/proc");
//! let mut collector = Collector::new(platform, ScanConfig::default());
//! let report = collector.collect_snapshot().unwrap();
//! ```
//!
//! ## Testing (with MockPlatform)
//!
//! ```
//! use proctally_core::collector::{Collector, MockPlatform, ScanConfig};
//!
//! let mut collector = Collector::new(MockPlatform::typical_desktop(), ScanConfig::default());
//! let report = collector.collect_snapshot().unwrap();
//! assert_eq!(report.summary.unique_process_count, 4);
//! ```

#[allow(clippy::module_inception)]
mod collector;
pub mod config;
pub mod handles;
pub mod mock;
pub mod path;
pub mod platform;
pub mod procfs;
pub mod recorder;
pub mod session;
pub mod traits;

pub use collector::{Collector, CollectorTiming, ScanError};
pub use config::{ScanConfig, UptimeFilter};
pub use handles::{HandleScanSummary, ProcessTable, SnapshotError, SnapshotPolicy};
pub use mock::{MockFs, MockPlatform};
pub use platform::{OsError, Platform, ProcessAccess};
pub use procfs::ProcfsPlatform;
pub use recorder::{ProcessRequest, RecordOutcome, record_process};
pub use session::ScanSession;
pub use traits::{FileSystem, RealFs};
