//! Extra field codecs.
//!
//! An extra field is a sequence of `[id: u16][size: u16][data: size]`
//! blocks. The blocks understood here:
//!
//! | ID       | Block                          |
//! |----------|--------------------------------|
//! | `0x0001` | Zip64 extended information     |
//! | `0x000A` | NTFS timestamps                |
//! | `0x5455` | Extended timestamp (read only) |
//! | `0x9901` | WinZip AES                     |

use log::warn;

use oxizip_core::error::{Result, ZipError};

use crate::aes::AesStrength;
use crate::header::{le_u16, le_u32, le_u64};

/// Zip64 extended information block ID.
pub const ZIP64_EXTRA_ID: u16 = 0x0001;

/// NTFS timestamps block ID.
pub const NTFS_EXTRA_ID: u16 = 0x000A;

/// Extended timestamp block ID.
pub const EXTENDED_TIMESTAMP_ID: u16 = 0x5455;

/// WinZip AES block ID.
pub const AES_EXTRA_ID: u16 = 0x9901;

/// One block of an extra field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtraBlock<'a> {
    /// Block ID.
    pub id: u16,
    /// Block payload.
    pub data: &'a [u8],
}

/// Iterator over the blocks of an extra field.
///
/// A trailing block whose declared size runs past the end ends iteration;
/// some writers pad extra fields with garbage.
#[derive(Debug, Clone)]
pub struct ExtraBlocks<'a> {
    rest: &'a [u8],
}

/// Iterate the blocks of `extra`.
pub fn blocks(extra: &[u8]) -> ExtraBlocks<'_> {
    ExtraBlocks { rest: extra }
}

impl<'a> Iterator for ExtraBlocks<'a> {
    type Item = ExtraBlock<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.len() < 4 {
            return None;
        }
        let id = le_u16(self.rest, 0);
        let size = le_u16(self.rest, 2) as usize;
        let Some(data) = self.rest.get(4..4 + size) else {
            warn!("extra block {id:#06x} declares {size} bytes past the end of the field");
            self.rest = &[];
            return None;
        };
        self.rest = &self.rest[4 + size..];
        Some(ExtraBlock { id, data })
    }
}

/// Find the first block with `id`.
pub fn find(extra: &[u8], id: u16) -> Option<&[u8]> {
    blocks(extra).find(|b| b.id == id).map(|b| b.data)
}

fn push_block(out: &mut Vec<u8>, id: u16, data: &[u8]) {
    out.extend_from_slice(&id.to_le_bytes());
    out.extend_from_slice(&(data.len() as u16).to_le_bytes());
    out.extend_from_slice(data);
}

/// Zip64 extended information.
///
/// Each value is present only when the corresponding standard header field
/// holds the sentinel; order on disk is fixed: uncompressed size, compressed
/// size, local header offset, disk start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Zip64Extra {
    /// Uncompressed size.
    pub uncompressed_size: Option<u64>,
    /// Compressed size.
    pub compressed_size: Option<u64>,
    /// Local header offset.
    pub header_offset: Option<u64>,
    /// Disk start number.
    pub disk_start: Option<u32>,
}

impl Zip64Extra {
    /// Whether no value is present.
    pub fn is_empty(&self) -> bool {
        self.uncompressed_size.is_none()
            && self.compressed_size.is_none()
            && self.header_offset.is_none()
            && self.disk_start.is_none()
    }

    /// Serialize as a complete block (ID and size included). Empty when no
    /// value is present.
    pub fn to_bytes(&self) -> Vec<u8> {
        if self.is_empty() {
            return Vec::new();
        }
        let mut data = Vec::with_capacity(28);
        for value in [self.uncompressed_size, self.compressed_size, self.header_offset]
            .into_iter()
            .flatten()
        {
            data.extend_from_slice(&value.to_le_bytes());
        }
        if let Some(disk) = self.disk_start {
            data.extend_from_slice(&disk.to_le_bytes());
        }

        let mut out = Vec::with_capacity(4 + data.len());
        push_block(&mut out, ZIP64_EXTRA_ID, &data);
        out
    }

    /// Parse a block payload, reading only the values whose standard field
    /// held the sentinel.
    pub fn parse(
        data: &[u8],
        uncompressed: bool,
        compressed: bool,
        offset: bool,
        disk: bool,
    ) -> Result<Self> {
        let mut pos = 0;
        let mut next_u64 = |wanted: bool, field: &str| -> Result<Option<u64>> {
            if !wanted {
                return Ok(None);
            }
            if pos + 8 > data.len() {
                return Err(ZipError::format(format!(
                    "Zip64 extra field too short for {field}"
                )));
            }
            let value = le_u64(data, pos);
            pos += 8;
            Ok(Some(value))
        };

        let uncompressed_size = next_u64(uncompressed, "uncompressed size")?;
        let compressed_size = next_u64(compressed, "compressed size")?;
        let header_offset = next_u64(offset, "local header offset")?;

        let disk_start = if disk {
            if pos + 4 > data.len() {
                return Err(ZipError::format("Zip64 extra field too short for disk start"));
            }
            Some(le_u32(data, pos))
        } else {
            None
        };

        Ok(Self {
            uncompressed_size,
            compressed_size,
            header_offset,
            disk_start,
        })
    }
}

/// WinZip AES extra block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AesExtra {
    /// Vendor version: 1 (AE-1, CRC stored) or 2 (AE-2, CRC zero).
    pub vendor_version: u16,
    /// Key strength.
    pub strength: AesStrength,
    /// Compression method applied before encryption.
    pub compression_method: u16,
}

impl AesExtra {
    /// Payload size.
    pub const DATA_LEN: usize = 7;

    /// Serialize as a complete block.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(Self::DATA_LEN);
        data.extend_from_slice(&self.vendor_version.to_le_bytes());
        data.extend_from_slice(b"AE");
        data.push(self.strength as u8);
        data.extend_from_slice(&self.compression_method.to_le_bytes());

        let mut out = Vec::with_capacity(4 + Self::DATA_LEN);
        push_block(&mut out, AES_EXTRA_ID, &data);
        out
    }

    /// Parse a block payload.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::DATA_LEN {
            return Err(ZipError::format("AES extra field too short"));
        }
        if &data[2..4] != b"AE" {
            return Err(ZipError::format("AES extra field has unknown vendor ID"));
        }
        let strength = AesStrength::from_u8(data[4]).ok_or_else(|| {
            ZipError::unsupported_method(format!("AES strength {}", data[4]))
        })?;

        Ok(Self {
            vendor_version: le_u16(data, 0),
            strength,
            compression_method: le_u16(data, 5),
        })
    }
}

/// NTFS timestamps (tag 1), in 100 ns ticks since 1601-01-01 UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NtfsTimes {
    /// Last modification.
    pub modified: u64,
    /// Last access.
    pub accessed: u64,
    /// Creation.
    pub created: u64,
}

impl NtfsTimes {
    /// Serialize as a complete block.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(32);
        // Reserved
        data.extend_from_slice(&0u32.to_le_bytes());
        // Tag 1, 24 bytes
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&24u16.to_le_bytes());
        data.extend_from_slice(&self.modified.to_le_bytes());
        data.extend_from_slice(&self.accessed.to_le_bytes());
        data.extend_from_slice(&self.created.to_le_bytes());

        let mut out = Vec::with_capacity(36);
        push_block(&mut out, NTFS_EXTRA_ID, &data);
        out
    }

    /// Parse a block payload. Returns `None` when tag 1 is absent or short.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let mut rest = data.get(4..)?;
        while rest.len() >= 4 {
            let tag = le_u16(rest, 0);
            let size = le_u16(rest, 2) as usize;
            let body = rest.get(4..4 + size)?;
            if tag == 1 && size >= 24 {
                return Some(Self {
                    modified: le_u64(body, 0),
                    accessed: le_u64(body, 8),
                    created: le_u64(body, 16),
                });
            }
            rest = &rest[4 + size..];
        }
        None
    }
}

/// Modification time from an extended timestamp block, in Unix seconds.
pub fn parse_extended_timestamp(data: &[u8]) -> Option<i64> {
    let flags = *data.first()?;
    if flags & 0x01 == 0 || data.len() < 5 {
        return None;
    }
    Some(le_u32(data, 1) as i32 as i64)
}
