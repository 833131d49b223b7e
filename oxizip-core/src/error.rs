//! Error types for OxiZip operations.
//!
//! Every failure the engine can report is a variant of [`ZipError`]. Structural
//! problems with an archive surface as [`ZipError::Format`], damaged content
//! as [`ZipError::CrcMismatch`] (an AES authentication code that fails to
//! verify included), and a caller-requested abort as [`ZipError::Cancelled`].

use std::io;
use thiserror::Error;

/// The main error type for OxiZip operations.
#[derive(Debug, Error)]
pub enum ZipError {
    /// I/O error from the underlying reader or writer.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed or unrecognized archive structure.
    #[error("Invalid archive: {message}")]
    Format {
        /// Description of the structural problem.
        message: String,
    },

    /// A size, offset or count does not fit the field width allowed by the
    /// active Zip64 policy.
    #[error("{field} of {value} exceeds the limit of {limit}")]
    Overflow {
        /// Which field overflowed.
        field: &'static str,
        /// The value that did not fit.
        value: u64,
        /// Largest value the field can hold.
        limit: u64,
    },

    /// Unsupported compression method or encryption scheme.
    #[error("Unsupported method: {method}")]
    UnsupportedMethod {
        /// Description of the method.
        method: String,
    },

    /// The password was missing or failed the fast verification check.
    #[error("Bad or missing password for entry: {name}")]
    BadPassword {
        /// Name of the entry being decrypted.
        name: String,
    },

    /// Extracted content does not match the recorded CRC-32, or an AES
    /// entry's authentication code does not verify.
    #[error("CRC mismatch in {name}: expected {expected:#010x}, computed {computed:#010x}")]
    CrcMismatch {
        /// Name of the entry.
        name: String,
        /// CRC recorded in the central directory.
        expected: u32,
        /// CRC computed over the extracted bytes.
        computed: u32,
    },

    /// The sink lacks a capability (seeking) the requested operation needs.
    #[error("Stream capability missing: {message}")]
    StreamCapability {
        /// What was attempted.
        message: String,
    },

    /// A progress handler asked for the operation to stop.
    #[error("Operation cancelled")]
    Cancelled,

    /// Entry not found in archive.
    #[error("Entry not found: {name}")]
    EntryNotFound {
        /// Name of the missing entry.
        name: String,
    },
}

/// Result type alias for OxiZip operations.
pub type Result<T> = std::result::Result<T, ZipError>;

impl ZipError {
    /// Create a format error.
    pub fn format(message: impl Into<String>) -> Self {
        Self::Format {
            message: message.into(),
        }
    }

    /// Create a format error for an unexpected record signature.
    pub fn invalid_signature(record: &str, expected: u32, found: u32) -> Self {
        Self::Format {
            message: format!("{record}: expected signature {expected:#010x}, found {found:#010x}"),
        }
    }

    /// Create an overflow error.
    pub fn overflow(field: &'static str, value: u64, limit: u64) -> Self {
        Self::Overflow {
            field,
            value,
            limit,
        }
    }

    /// Create an unsupported method error.
    pub fn unsupported_method(method: impl Into<String>) -> Self {
        Self::UnsupportedMethod {
            method: method.into(),
        }
    }

    /// Create a bad password error.
    pub fn bad_password(name: impl Into<String>) -> Self {
        Self::BadPassword { name: name.into() }
    }

    /// Create a CRC mismatch error.
    pub fn crc_mismatch(name: impl Into<String>, expected: u32, computed: u32) -> Self {
        Self::CrcMismatch {
            name: name.into(),
            expected,
            computed,
        }
    }

    /// Create a stream capability error.
    pub fn stream_capability(message: impl Into<String>) -> Self {
        Self::StreamCapability {
            message: message.into(),
        }
    }

    /// Create an entry not found error.
    pub fn entry_not_found(name: impl Into<String>) -> Self {
        Self::EntryNotFound { name: name.into() }
    }

    /// Whether this error reports damaged entry content rather than a
    /// structural, password or I/O problem.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::CrcMismatch { .. })
    }

    /// Whether the operation was stopped by a progress handler.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ZipError::invalid_signature("local file header", 0x04034B50, 0x08074B50);
        assert!(err.to_string().contains("0x04034b50"));

        let err = ZipError::crc_mismatch("a.txt", 0x12345678, 0xDEADBEEF);
        assert!(err.to_string().contains("CRC mismatch in a.txt"));

        let err = ZipError::unsupported_method("LZMA (14)");
        assert!(err.to_string().contains("LZMA"));

        let err = ZipError::overflow("uncompressed size", 1 << 33, u32::MAX as u64);
        assert_eq!(
            err.to_string(),
            "uncompressed size of 8589934592 exceeds the limit of 4294967295"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: ZipError = io_err.into();
        assert!(matches!(err, ZipError::Io(_)));
    }

    #[test]
    fn test_classification() {
        assert!(ZipError::crc_mismatch("x", 1, 2).is_corruption());
        assert!(!ZipError::bad_password("x").is_corruption());
        assert!(ZipError::Cancelled.is_cancelled());
        assert!(!ZipError::format("x").is_cancelled());
    }
}
