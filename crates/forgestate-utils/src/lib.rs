//! Foundation utilities shared by every forgestate crate: atomic file
//! writes, logging setup, and path conventions.

pub mod atomic_write;
pub mod logging;
pub mod paths;

pub use atomic_write::{AtomicWriteResult, write_file_atomic};
