//! # Error Types
//!
//! Central error type for the engine, following the taxonomy in the design
//! docs: config errors fail module init, transient I/O is retried silently,
//! framing/continuity anomalies are counted and do not propagate, capacity
//! overflows are flushed and logged, and fatal invariant violations abort.
//!
//! ## Example Usage
//!
//! ```rust
//! use relayts::error::{EngineError, Result};
//!
//! fn validate_pid(pid: u16) -> Result<()> {
//!     if pid > 8191 {
//!         return Err(EngineError::InvalidData(format!("pid {} out of range", pid)));
//!     }
//!     Ok(())
//! }
//! ```

use std::num::ParseIntError;
use thiserror::Error;

/// Primary error type for the engine.
///
/// Variants line up with the error taxonomy: `Config` and `InvalidData`
/// fail an operation outright, `Io` wraps transient and fatal I/O alike
/// (callers decide which based on `ErrorKind`), and `Fatal` marks an
/// internal invariant violation that should abort the process.
#[derive(Error, Debug)]
pub enum EngineError {
    /// I/O errors from file, socket, or child-process operations
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing module configuration option
    #[error("config error: {0}")]
    Config(String),

    /// TS/PES/T2-MI framing error: sync loss, malformed header, CRC mismatch
    #[error("framing error: {0}")]
    Framing(String),

    /// Generic malformed or out-of-range data
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Deferred job queue or sync buffer capacity exceeded
    #[error("capacity overflow: {0}")]
    CapacityOverflow(String),

    /// Internal invariant violation; the caller should treat this as fatal
    #[error("fatal invariant violation: {0}")]
    Fatal(String),

    /// A spawned child process exited abnormally
    #[error("child process exited abnormally: {0}")]
    ChildExit(String),

    /// Errors that occur during integer parsing of option strings
    #[error("parse int error: {0}")]
    ParseInt(#[from] ParseIntError),
}

/// A specialized `Result` type used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;
