//! # OxiZip
//!
//! Streaming ZIP archive engine.
//!
//! - **Writing**: [`ZipWriter`] on seekable sinks (headers patched in place)
//!   or write-only sinks (data descriptors)
//! - **Reading**: [`ZipReader`] with CRC verification and local header checks
//! - **Zip64**: `Always`, `Never` or `AsNecessary` via [`Zip64Policy`]
//! - **Encryption**: legacy ZipCrypto and WinZip AES-128/192/256
//! - **Progress**: [`ProgressHandler`] callbacks that can cancel at any
//!   entry or byte milestone
//!
//! ## Example
//!
//! ```rust
//! use oxizip::{EncryptionMethod, EntryOptions, SaveOptions, ZipReader, ZipWriter};
//! use std::io::Cursor;
//!
//! let options = SaveOptions::default().comment("demo");
//! let mut writer = ZipWriter::new(Cursor::new(Vec::new()), options)?;
//! writer.add_file("readme.txt", b"plain text")?;
//! writer.add_entry(
//!     EntryOptions::new("secret.txt")
//!         .encryption(EncryptionMethod::Aes256)
//!         .password("correct horse"),
//!     &mut &b"classified"[..],
//! )?;
//! let (_, sink) = writer.finish()?;
//!
//! let mut reader = ZipReader::new(Cursor::new(sink.into_inner()))?;
//! reader.set_entry_password("secret.txt", "correct horse")?;
//! assert_eq!(reader.extract_by_name("secret.txt")?, b"classified");
//! # Ok::<(), oxizip::ZipError>(())
//! ```
//!
//! ## Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`header`] | Fixed binary records |
//! | [`extra`] | Extra field blocks (Zip64, AES, NTFS, Unix time) |
//! | [`crypto`] | Legacy PKWARE stream cipher |
//! | [`aes`] | WinZip AES (AES-CTR + HMAC-SHA1) |
//! | [`cipher`] | Per-entry encryption dispatch |
//! | [`codec`] | Stored / deflate stage |
//! | [`model`] | Entries, archive, Zip64 policy |
//! | [`options`] | Save, entry and read options |

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod aes;
pub mod cipher;
pub mod codec;
pub mod crypto;
pub mod extra;
pub mod header;
pub mod model;
pub mod options;
pub mod reader;
pub mod writer;

// Re-exports
pub use model::{
    Archive, CompressionMethod, EncryptionMethod, Password, Zip64Policy, ZipEntry,
};
pub use options::{
    CompressionLevel, EntryOptions, ErrorPolicy, HeaderStrategy, ReadOptions, SaveOptions,
};
pub use oxizip_core::{
    ChannelProgress, Flow, NoProgress, Operation, ProgressEvent, ProgressHandler, Result, ZipError,
};
pub use reader::{ExtractReport, ZipReader};
pub use writer::ZipWriter;
