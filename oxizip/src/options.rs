//! Configuration for saving and reading archives.
//!
//! All option types are plain builders; a writer or reader takes a snapshot
//! when it is constructed.

use crate::model::{EncryptionMethod, Password, Zip64Policy};
use chrono::NaiveDateTime;
use oxizip_core::progress::DEFAULT_PROGRESS_INTERVAL;

/// Compression level for deflated entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CompressionLevel {
    /// Store without compression (method 0).
    Store,
    /// Fast compression (deflate level 1).
    Fast,
    /// Normal compression (deflate level 6).
    #[default]
    Normal,
    /// Best compression (deflate level 9).
    Best,
    /// Explicit deflate level, clamped to 0..=9.
    Level(u32),
}

impl CompressionLevel {
    /// Whether the entry should be stored as-is.
    pub fn is_store(self) -> bool {
        matches!(self, Self::Store)
    }

    /// The equivalent `flate2` level.
    pub fn to_flate2(self) -> flate2::Compression {
        match self {
            Self::Store => flate2::Compression::none(),
            Self::Fast => flate2::Compression::fast(),
            Self::Normal => flate2::Compression::default(),
            Self::Best => flate2::Compression::best(),
            Self::Level(level) => flate2::Compression::new(level.min(9)),
        }
    }

    /// Deflate option bits (1 and 2) of the general purpose flags.
    pub(crate) fn deflate_flag_bits(self) -> u16 {
        match self {
            Self::Best | Self::Level(8..) => 0b010,
            Self::Fast | Self::Level(1) => 0b110,
            Self::Level(2) => 0b100,
            Self::Store | Self::Normal | Self::Level(_) => 0,
        }
    }
}

/// How local headers learn an entry's sizes and CRC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HeaderStrategy {
    /// Patch in place when the sink can seek, descriptor otherwise.
    #[default]
    Auto,
    /// Seek back and rewrite the header after the data. Requires a seekable
    /// sink.
    PatchInPlace,
    /// Zero the header fields and append a data descriptor.
    DataDescriptor,
}

/// What `extract_all` does when an entry fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorPolicy {
    /// Return the first error.
    #[default]
    StopOnFirstError,
    /// Record the failure and move on to the next entry.
    Continue,
}

/// Archive-wide settings for a save.
#[derive(Debug, Clone)]
pub struct SaveOptions {
    /// Zip64 policy.
    pub zip64: Zip64Policy,
    /// Header strategy.
    pub header_strategy: HeaderStrategy,
    /// Default compression level.
    pub compression: CompressionLevel,
    /// Default encryption.
    pub encryption: EncryptionMethod,
    /// Default password for encrypted entries.
    pub password: Option<Password>,
    /// Archive comment.
    pub comment: String,
    /// Bytes between progress notifications.
    pub progress_interval: u64,
    /// Write NTFS timestamp extras.
    pub ntfs_timestamps: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            zip64: Zip64Policy::default(),
            header_strategy: HeaderStrategy::default(),
            compression: CompressionLevel::default(),
            encryption: EncryptionMethod::None,
            password: None,
            comment: String::new(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            ntfs_timestamps: false,
        }
    }
}

impl SaveOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the Zip64 policy.
    pub fn zip64(mut self, policy: Zip64Policy) -> Self {
        self.zip64 = policy;
        self
    }

    /// Set the header strategy.
    pub fn header_strategy(mut self, strategy: HeaderStrategy) -> Self {
        self.header_strategy = strategy;
        self
    }

    /// Set the default compression level.
    pub fn compression(mut self, level: CompressionLevel) -> Self {
        self.compression = level;
        self
    }

    /// Encrypt every entry with `method` and `password` unless the entry
    /// says otherwise.
    pub fn encryption(mut self, method: EncryptionMethod, password: impl Into<Password>) -> Self {
        self.encryption = method;
        self.password = Some(password.into());
        self
    }

    /// Set the archive comment.
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Set the progress byte interval.
    pub fn progress_interval(mut self, bytes: u64) -> Self {
        self.progress_interval = bytes.max(1);
        self
    }

    /// Write NTFS timestamp extras.
    pub fn ntfs_timestamps(mut self, enabled: bool) -> Self {
        self.ntfs_timestamps = enabled;
        self
    }
}

/// Per-entry settings. Unset fields fall back to [`SaveOptions`].
#[derive(Debug, Clone, Default)]
pub struct EntryOptions {
    /// Entry name; a trailing `/` makes a directory.
    pub name: String,
    /// Modification time; defaults to now.
    pub modified: Option<NaiveDateTime>,
    /// Compression level override.
    pub compression: Option<CompressionLevel>,
    /// Encryption override.
    pub encryption: Option<EncryptionMethod>,
    /// Password override.
    pub password: Option<Password>,
    /// Expected content size, if known.
    pub size_hint: Option<u64>,
    /// Reserve a Zip64 extra in the local header.
    pub large_file: bool,
    /// Entry comment.
    pub comment: String,
    /// Unix permission bits (without file type).
    pub unix_mode: Option<u32>,
}

impl EntryOptions {
    /// Options for an entry named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the modification time.
    pub fn modified(mut self, modified: NaiveDateTime) -> Self {
        self.modified = Some(modified);
        self
    }

    /// Override the compression level.
    pub fn compression(mut self, level: CompressionLevel) -> Self {
        self.compression = Some(level);
        self
    }

    /// Override encryption.
    pub fn encryption(mut self, method: EncryptionMethod) -> Self {
        self.encryption = Some(method);
        self
    }

    /// Override the password.
    pub fn password(mut self, password: impl Into<Password>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Declare the expected content size.
    pub fn size_hint(mut self, size: u64) -> Self {
        self.size_hint = Some(size);
        self
    }

    /// Reserve room for 64-bit sizes in the local header.
    pub fn large_file(mut self, large: bool) -> Self {
        self.large_file = large;
        self
    }

    /// Set the entry comment.
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Set Unix permission bits.
    pub fn unix_mode(mut self, mode: u32) -> Self {
        self.unix_mode = Some(mode & 0o7777);
        self
    }
}

/// Settings for reading an archive.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Password for encrypted entries without their own.
    pub password: Option<Password>,
    /// Failure handling in `extract_all`.
    pub error_policy: ErrorPolicy,
    /// Bytes between progress notifications.
    pub progress_interval: u64,
    /// Compare local headers with their central records.
    pub check_local_headers: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            password: None,
            error_policy: ErrorPolicy::default(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            check_local_headers: true,
        }
    }
}

impl ReadOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the archive-wide password.
    pub fn password(mut self, password: impl Into<Password>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the error policy.
    pub fn error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Set the progress byte interval.
    pub fn progress_interval(mut self, bytes: u64) -> Self {
        self.progress_interval = bytes.max(1);
        self
    }

    /// Enable or disable local header comparison.
    pub fn check_local_headers(mut self, enabled: bool) -> Self {
        self.check_local_headers = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_mapping() {
        assert_eq!(CompressionLevel::Store.to_flate2().level(), 0);
        assert_eq!(CompressionLevel::Fast.to_flate2().level(), 1);
        assert_eq!(CompressionLevel::Normal.to_flate2().level(), 6);
        assert_eq!(CompressionLevel::Best.to_flate2().level(), 9);
        assert_eq!(CompressionLevel::Level(42).to_flate2().level(), 9);
        assert!(CompressionLevel::Store.is_store());
        assert!(!CompressionLevel::Level(0).is_store());
    }

    #[test]
    fn test_deflate_flag_bits() {
        assert_eq!(CompressionLevel::Normal.deflate_flag_bits(), 0);
        assert_eq!(CompressionLevel::Best.deflate_flag_bits(), 0b010);
        assert_eq!(CompressionLevel::Fast.deflate_flag_bits(), 0b110);
        assert_eq!(CompressionLevel::Level(9).deflate_flag_bits(), 0b010);
    }

    #[test]
    fn test_save_options_builder() {
        let opts = SaveOptions::new()
            .zip64(Zip64Policy::Always)
            .header_strategy(HeaderStrategy::DataDescriptor)
            .compression(CompressionLevel::Best)
            .encryption(EncryptionMethod::Aes256, "pw")
            .comment("hello")
            .progress_interval(0);

        assert_eq!(opts.zip64, Zip64Policy::Always);
        assert_eq!(opts.header_strategy, HeaderStrategy::DataDescriptor);
        assert_eq!(opts.encryption, EncryptionMethod::Aes256);
        assert_eq!(opts.password, Some(Password::new("pw")));
        assert_eq!(opts.comment, "hello");
        assert_eq!(opts.progress_interval, 1);
    }

    #[test]
    fn test_entry_options_builder() {
        let opts = EntryOptions::new("a.txt")
            .size_hint(10)
            .large_file(true)
            .unix_mode(0o100755);
        assert_eq!(opts.name, "a.txt");
        assert_eq!(opts.size_hint, Some(10));
        assert!(opts.large_file);
        assert_eq!(opts.unix_mode, Some(0o755));
        assert!(opts.compression.is_none());
    }

    #[test]
    fn test_read_options_defaults() {
        let opts = ReadOptions::default();
        assert_eq!(opts.error_policy, ErrorPolicy::StopOnFirstError);
        assert_eq!(opts.progress_interval, DEFAULT_PROGRESS_INTERVAL);
        assert!(opts.check_local_headers);
        assert!(opts.password.is_none());
    }
}
