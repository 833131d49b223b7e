//! Archive data model: entries, the archive that owns them, and the
//! policies that decide how they are laid out on disk.

use crate::aes::AesStrength;
use crate::extra::Zip64Extra;
use crate::header::{
    FLAG_DATA_DESCRIPTOR, FLAG_ENCRYPTED, FLAG_STRONG_ENCRYPTION, FLAG_UTF8, ZIP64_MARKER_16,
    ZIP64_MARKER_32,
};
use chrono::NaiveDateTime;
use oxizip_core::{DosDateTime, Result, ZipError};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use zeroize::Zeroizing;

/// Largest value a 32-bit header field can hold without the Zip64 sentinel.
pub const MAX_32: u64 = ZIP64_MARKER_32 as u64 - 1;

/// Largest entry count the classic end record can hold.
pub const MAX_16: u64 = ZIP64_MARKER_16 as u64 - 1;

/// Compression method recorded for an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CompressionMethod {
    /// No compression.
    Stored,
    /// Raw deflate.
    #[default]
    Deflate,
    /// Any other method ID.
    Unknown(u16),
}

impl CompressionMethod {
    /// Map a header method ID.
    pub fn from_u16(id: u16) -> Self {
        match id {
            0 => Self::Stored,
            8 => Self::Deflate,
            other => Self::Unknown(other),
        }
    }

    /// Header method ID.
    pub fn to_u16(self) -> u16 {
        match self {
            Self::Stored => 0,
            Self::Deflate => 8,
            Self::Unknown(id) => id,
        }
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stored => "Stored",
            Self::Deflate => "Deflate",
            Self::Unknown(_) => "Unknown",
        }
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(id) => write!(f, "Unknown({})", id),
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// Encryption applied to an entry's compressed bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EncryptionMethod {
    /// Plain entry.
    #[default]
    None,
    /// Legacy PKWARE stream cipher.
    ZipCrypto,
    /// WinZip AES with a 128-bit key.
    Aes128,
    /// WinZip AES with a 192-bit key.
    Aes192,
    /// WinZip AES with a 256-bit key.
    Aes256,
}

impl EncryptionMethod {
    /// Whether any encryption is applied.
    pub fn is_encrypted(self) -> bool {
        !matches!(self, Self::None)
    }

    /// AES key strength, for the AES variants.
    pub fn aes_strength(self) -> Option<AesStrength> {
        match self {
            Self::Aes128 => Some(AesStrength::Aes128),
            Self::Aes192 => Some(AesStrength::Aes192),
            Self::Aes256 => Some(AesStrength::Aes256),
            Self::None | Self::ZipCrypto => None,
        }
    }

    /// Bytes the scheme adds around the compressed data.
    pub fn overhead(self) -> u64 {
        match self {
            Self::None => 0,
            Self::ZipCrypto => crate::crypto::HEADER_LEN as u64,
            Self::Aes128 | Self::Aes192 | Self::Aes256 => {
                self.aes_strength().map_or(0, AesStrength::overhead)
            }
        }
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::ZipCrypto => "ZipCrypto",
            Self::Aes128 => "AES-128",
            Self::Aes192 => "AES-192",
            Self::Aes256 => "AES-256",
        }
    }
}

impl From<AesStrength> for EncryptionMethod {
    fn from(strength: AesStrength) -> Self {
        match strength {
            AesStrength::Aes128 => Self::Aes128,
            AesStrength::Aes192 => Self::Aes192,
            AesStrength::Aes256 => Self::Aes256,
        }
    }
}

impl fmt::Display for EncryptionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// When to emit Zip64 records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Zip64Policy {
    /// Zip64 extras on every header plus the Zip64 end records.
    Always,
    /// Never emit Zip64; anything that does not fit is an error.
    Never,
    /// Only for fields that overflow.
    #[default]
    AsNecessary,
}

impl Zip64Policy {
    /// Whether a local header should reserve a Zip64 extra before the
    /// entry's sizes are known.
    pub fn reserve_local_extra(self, large_file: bool, size_hint: Option<u64>) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::AsNecessary => large_file || size_hint.is_some_and(|size| size > MAX_32),
        }
    }

    /// Fail with [`ZipError::Overflow`] when `value` needs Zip64 and the
    /// policy forbids it.
    pub fn check_fits(self, field: &'static str, value: u64, limit: u64) -> Result<()> {
        if self == Self::Never && value > limit {
            return Err(ZipError::overflow(field, value, limit));
        }
        Ok(())
    }

    /// The Zip64 extra a central record needs for the given values.
    ///
    /// `Always` records every 64-bit value; the other policies record only
    /// the ones that overflow.
    pub fn central_extra(self, uncompressed: u64, compressed: u64, offset: u64) -> Zip64Extra {
        let pick = |value: u64| match self {
            Self::Always => Some(value),
            Self::Never | Self::AsNecessary => (value > MAX_32).then_some(value),
        };
        Zip64Extra {
            uncompressed_size: pick(uncompressed),
            compressed_size: pick(compressed),
            header_offset: pick(offset),
            disk_start: None,
        }
    }

    /// Whether the Zip64 end-of-central-directory record and locator are
    /// required.
    pub fn end_record_required(self, entries: u64, cd_size: u64, cd_offset: u64) -> Result<bool> {
        match self {
            Self::Always => Ok(true),
            Self::Never => {
                self.check_fits("entry count", entries, MAX_16)?;
                self.check_fits("central directory size", cd_size, MAX_32)?;
                self.check_fits("central directory offset", cd_offset, MAX_32)?;
                Ok(false)
            }
            Self::AsNecessary => Ok(entries > MAX_16 || cd_size > MAX_32 || cd_offset > MAX_32),
        }
    }
}

/// A password held in memory for the duration of an operation.
///
/// The buffer is wiped on drop and never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(Zeroizing<String>);

impl Password {
    /// Wrap a password.
    pub fn new(password: impl Into<String>) -> Self {
        Self(Zeroizing::new(password.into()))
    }

    /// Raw password bytes fed to the key schedules.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(..)")
    }
}

impl From<&str> for Password {
    fn from(password: &str) -> Self {
        Self::new(password)
    }
}

impl From<String> for Password {
    fn from(password: String) -> Self {
        Self::new(password)
    }
}

/// One archive member.
///
/// Sizes and CRC are authoritative once the entry has been fully written
/// or its central record parsed.
#[derive(Debug, Clone, Default)]
pub struct ZipEntry {
    /// Forward-slash path; directories end with `/`.
    pub name: String,
    /// Size of the content.
    pub uncompressed_size: u64,
    /// Bytes stored on disk, encryption overhead included.
    pub compressed_size: u64,
    /// Packed DOS modification time.
    pub modified: DosDateTime,
    /// Precise modification time from an NTFS or extended timestamp field,
    /// or the caller-supplied time on the write path.
    pub modified_precise: Option<NaiveDateTime>,
    /// CRC-32 of the content.
    pub crc32: u32,
    /// Compression method of the content.
    pub method: CompressionMethod,
    /// Encryption scheme.
    pub encryption: EncryptionMethod,
    /// AE-1 or AE-2 for AES entries.
    pub aes_vendor_version: Option<u16>,
    /// Offset of the local file header.
    pub header_offset: u64,
    /// General purpose bit flags.
    pub flags: u16,
    /// Version made by.
    pub version_made_by: u16,
    /// Version needed to extract.
    pub version_needed: u16,
    /// External attributes (Unix mode in the high word).
    pub external_attributes: u32,
    /// Internal attributes.
    pub internal_attributes: u16,
    /// Entry comment.
    pub comment: String,
    /// Raw central extra field.
    pub extra: Vec<u8>,
    /// Whether the central record carried a Zip64 extra.
    pub zip64: bool,
    pub(crate) password: Option<Password>,
}

impl ZipEntry {
    /// Whether this is a directory.
    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }

    /// Whether this is a regular file.
    pub fn is_file(&self) -> bool {
        !self.is_dir()
    }

    /// Whether the entry is encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0 || self.encryption.is_encrypted()
    }

    /// Whether the entry uses PKWARE strong encryption (unsupported).
    pub fn uses_strong_encryption(&self) -> bool {
        self.flags & FLAG_STRONG_ENCRYPTION != 0
    }

    /// Whether sizes and CRC follow the data in a descriptor.
    pub fn uses_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }

    /// Whether the name is flagged as UTF-8.
    pub fn is_utf8(&self) -> bool {
        self.flags & FLAG_UTF8 != 0
    }

    /// Whether a password was attached with
    /// [`ZipReader::set_entry_password`](crate::ZipReader::set_entry_password).
    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    /// Encryption header and trailer bytes included in `compressed_size`.
    pub fn encryption_overhead(&self) -> u64 {
        self.encryption.overhead()
    }

    /// Length of the compressed stream alone.
    pub fn compressed_data_size(&self) -> u64 {
        self.compressed_size.saturating_sub(self.encryption_overhead())
    }

    /// Modification time, preferring the precise value.
    pub fn modified(&self) -> Option<NaiveDateTime> {
        self.modified_precise.or_else(|| self.modified.to_naive())
    }

    /// Unix permission bits when the entry was made on a Unix host.
    pub fn unix_mode(&self) -> Option<u32> {
        match self.version_made_by >> 8 {
            3 if self.external_attributes >> 16 != 0 => Some(self.external_attributes >> 16),
            _ => None,
        }
    }

    /// Compressed size as a fraction of the content size.
    pub fn compression_ratio(&self) -> f64 {
        if self.uncompressed_size == 0 {
            1.0
        } else {
            self.compressed_size as f64 / self.uncompressed_size as f64
        }
    }

    /// Space savings as a percentage.
    pub fn space_savings(&self) -> f64 {
        if self.uncompressed_size == 0 {
            0.0
        } else {
            (1.0 - self.compression_ratio()) * 100.0
        }
    }

    /// The name as a relative path that stays inside an extraction root.
    ///
    /// Returns `None` for absolute paths, `..` components, and names
    /// containing NUL.
    pub fn enclosed_name(&self) -> Option<PathBuf> {
        if self.name.contains('\0') {
            return None;
        }
        let path = Path::new(&self.name);
        let mut out = PathBuf::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => out.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return None;
                }
            }
        }
        Some(out)
    }

    /// A best-effort safe name: drops `.`, `..` and root components and
    /// replaces NUL with `_`.
    pub fn sanitized_name(&self) -> String {
        let mut result = String::new();
        for component in Path::new(&self.name).components() {
            if let Component::Normal(part) = component {
                if !result.is_empty() {
                    result.push('/');
                }
                result.push_str(&part.to_string_lossy().replace('\0', "_"));
            }
        }
        result
    }
}

impl fmt::Display for ZipEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let type_char = if self.is_dir() { 'd' } else { '-' };
        let lock = if self.is_encrypted() { '*' } else { ' ' };
        write!(
            f,
            "{}{:>10} {:>10} {:>6.1}% {:<8}{}{}",
            type_char,
            self.uncompressed_size,
            self.compressed_size,
            self.space_savings(),
            self.method.name(),
            lock,
            self.name
        )
    }
}

/// The ordered set of entries that make up one archive.
#[derive(Debug, Clone, Default)]
pub struct Archive {
    pub(crate) entries: Vec<ZipEntry>,
    pub(crate) comment: String,
    pub(crate) zip64_policy: Zip64Policy,
    pub(crate) output_used_zip64: bool,
}

impl Archive {
    pub(crate) fn new(zip64_policy: Zip64Policy, comment: String) -> Self {
        Self {
            entries: Vec::new(),
            comment,
            zip64_policy,
            output_used_zip64: false,
        }
    }

    /// Entries in on-disk order.
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    /// Find an entry by exact name.
    pub fn entry_by_name(&self, name: &str) -> Option<&ZipEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the archive has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Archive comment.
    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// Zip64 policy the archive was written or read with.
    pub fn zip64_policy(&self) -> Zip64Policy {
        self.zip64_policy
    }

    /// Whether any Zip64 record was written (or found, on read).
    pub fn output_used_zip64(&self) -> bool {
        self.output_used_zip64
    }

    /// Sum of content sizes.
    pub fn total_uncompressed(&self) -> u64 {
        self.entries.iter().map(|e| e.uncompressed_size).sum()
    }

    /// Sum of stored sizes.
    pub fn total_compressed(&self) -> u64 {
        self.entries.iter().map(|e| e.compressed_size).sum()
    }
}
