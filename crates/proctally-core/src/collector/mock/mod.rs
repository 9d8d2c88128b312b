//! In-memory platforms for running scans without a live system.

mod filesystem;
mod platform;
mod scenarios;

pub use filesystem::MockFs;
pub use platform::{MockPlatform, MockProcess};
pub use scenarios::SCENARIO_NOW;
