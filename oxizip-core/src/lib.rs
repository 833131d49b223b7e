//! # OxiZip Core
//!
//! Shared primitives for the OxiZip archive engine.
//!
//! - [`crc`]: CRC-32 checksum unit and checksumming stream adapters
//! - [`dostime`]: DOS and NTFS timestamp conversion
//! - [`progress`]: Progress events, handlers and cancellation
//! - [`error`]: Error types
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Container (oxizip)                                      │
//! │     ZipWriter / ZipReader, central directory, Zip64     │
//! ├─────────────────────────────────────────────────────────┤
//! │ Cipher + Codec (oxizip)                                 │
//! │     ZipCrypto, WinZip AES, stored / deflate             │
//! ├─────────────────────────────────────────────────────────┤
//! │ Core (this crate)                                       │
//! │     CRC-32, DOS time, progress channel, errors          │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use oxizip_core::crc::Crc32;
//! use oxizip_core::progress::{ByteThrottle, DEFAULT_PROGRESS_INTERVAL};
//!
//! let crc = Crc32::compute(b"Hello, World!");
//! assert_eq!(crc, 0xEC4AC3D0);
//!
//! let mut throttle = ByteThrottle::new(DEFAULT_PROGRESS_INTERVAL);
//! assert!(!throttle.advance(1024));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod crc;
pub mod dostime;
pub mod error;
pub mod progress;

// Re-exports for convenience
pub use crc::{Crc32, CrcReader, CrcWriter};
pub use dostime::DosDateTime;
pub use error::{Result, ZipError};
pub use progress::{
    ByteThrottle, ChannelProgress, Flow, NoProgress, Operation, ProgressEvent, ProgressHandler,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::crc::Crc32;
    pub use crate::dostime::DosDateTime;
    pub use crate::error::{Result, ZipError};
    pub use crate::progress::{Flow, ProgressEvent, ProgressHandler};
}
