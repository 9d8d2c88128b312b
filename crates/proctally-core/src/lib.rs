//! proctally-core — process and handle telemetry aggregation.
//!
//! Provides:
//! - `collector` — handle snapshot bucketing, process descriptor recording,
//!   scan orchestration and the `/proc` and in-memory platforms
//! - `storage` — string tables, hash lookup arrays, the record arena and the
//!   serializable scan report
//! - `util` — path hash and FILETIME arithmetic

pub mod collector;
pub mod storage;
pub mod util;
