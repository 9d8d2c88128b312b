//! Utility modules for proctally.

pub mod hash;
pub mod time;

pub use hash::path_hash;
