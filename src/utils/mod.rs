//! # Utility Types
//!
//! Common building blocks used throughout the engine:
//!
//! - [`crc`] — MPEG-2 CRC32 calculation for PSI sections.
//! - [`list`] — cursor-safe ordered list (C14), used for a module's child
//!   list in the streaming graph.
//! - [`ring`] — bounded, mutex-protected byte ring (C14), used to hand
//!   data from a worker thread back to the main thread.
//!
//! ## CRC Calculation
//!
//! ```rust
//! use relayts::utils::Crc32Mpeg2;
//!
//! let data = b"Hello, world!";
//! let crc = Crc32Mpeg2::new().calculate(data);
//! println!("CRC32: {:08x}", crc);
//! ```

/// CRC calculation implementations
pub mod crc;

/// Cursor-safe ordered list
pub mod list;

/// Bounded byte ring buffer
pub mod ring;

pub use crc::Crc32Mpeg2;
pub use list::CursorList;
pub use ring::ByteRing;
