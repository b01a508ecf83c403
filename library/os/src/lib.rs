//! Async execution of external tools, always from an explicit argument vector.
pub mod process;
