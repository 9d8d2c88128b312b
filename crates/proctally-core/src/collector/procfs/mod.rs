//! Scan platform for the Linux `/proc` filesystem.

pub mod parser;
pub mod platform;

pub use parser::ParseError;
pub use platform::ProcfsPlatform;
