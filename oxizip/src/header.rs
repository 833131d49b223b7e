//! Fixed-layout ZIP records.
//!
//! Every multi-byte field is little-endian. Each record knows how to read and
//! write itself; interpretation (Zip64 resolution, name decoding, timestamps)
//! happens in the reader and writer.

use std::io::{self, Read, Write};

use oxizip_core::dostime::DosDateTime;
use oxizip_core::error::{Result, ZipError};

/// Local file header signature (`PK\x03\x04`).
pub const LOCAL_FILE_HEADER_SIG: u32 = 0x04034B50;

/// Central directory header signature (`PK\x01\x02`).
pub const CENTRAL_DIR_HEADER_SIG: u32 = 0x02014B50;

/// End of central directory signature (`PK\x05\x06`).
pub const END_OF_CENTRAL_DIR_SIG: u32 = 0x06054B50;

/// Zip64 end of central directory signature (`PK\x06\x06`).
pub const ZIP64_END_OF_CENTRAL_DIR_SIG: u32 = 0x06064B50;

/// Zip64 end of central directory locator signature (`PK\x06\x07`).
pub const ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIG: u32 = 0x07064B50;

/// Data descriptor signature (`PK\x07\x08`).
pub const DATA_DESCRIPTOR_SIG: u32 = 0x08074B50;

/// Sentinel for 32-bit fields whose value lives in the Zip64 extra field.
pub const ZIP64_MARKER_32: u32 = 0xFFFF_FFFF;

/// Sentinel for 16-bit fields whose value lives in the Zip64 EOCD record.
pub const ZIP64_MARKER_16: u16 = 0xFFFF;

/// General purpose flag: entry is encrypted.
pub const FLAG_ENCRYPTED: u16 = 1 << 0;

/// General purpose flag: CRC and sizes follow the data in a descriptor.
pub const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;

/// General purpose flag: strong (certificate-based) encryption.
pub const FLAG_STRONG_ENCRYPTION: u16 = 1 << 6;

/// General purpose flag: name and comment are UTF-8.
pub const FLAG_UTF8: u16 = 1 << 11;

/// Method ID recorded in place of the real method for AES entries.
pub const METHOD_AES: u16 = 99;

/// Version needed for stored entries.
pub const VERSION_DEFAULT: u16 = 10;

/// Version needed for deflate, directories and ZipCrypto.
pub const VERSION_DEFLATE: u16 = 20;

/// Version needed when Zip64 records are used.
pub const VERSION_ZIP64: u16 = 45;

/// Version needed for WinZip AES.
pub const VERSION_AES: u16 = 51;

/// Version made by: Unix host, specification 6.3.
pub const VERSION_MADE_BY: u16 = (3 << 8) | 63;

/// Fixed part of the local file header.
pub const LOCAL_FILE_HEADER_LEN: u64 = 30;

/// Fixed part of a central directory header.
pub const CENTRAL_DIR_HEADER_LEN: u64 = 46;

/// Fixed part of the end of central directory record.
pub const END_OF_CENTRAL_DIR_LEN: u64 = 22;

/// Length of the Zip64 end of central directory record (without extensible data).
pub const ZIP64_END_OF_CENTRAL_DIR_LEN: u64 = 56;

/// Length of the Zip64 end of central directory locator.
pub const ZIP64_LOCATOR_LEN: u64 = 20;

/// Offset of the version-needed field inside the local file header.
pub const LOCAL_VERSION_OFFSET: u64 = 4;

/// Offset of the CRC-32 field inside the local file header.
pub const LOCAL_CRC_OFFSET: u64 = 14;

#[inline]
pub(crate) fn le_u16(buf: &[u8], pos: usize) -> u16 {
    u16::from_le_bytes([buf[pos], buf[pos + 1]])
}

#[inline]
pub(crate) fn le_u32(buf: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]])
}

#[inline]
pub(crate) fn le_u64(buf: &[u8], pos: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[pos..pos + 8]);
    u64::from_le_bytes(bytes)
}

/// Read exactly `buf.len()` bytes, reporting truncation as a format error.
pub(crate) fn read_record<R: Read>(reader: &mut R, buf: &mut [u8], record: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            ZipError::format(format!("Truncated {record}"))
        } else {
            ZipError::Io(e)
        }
    })
}

fn read_vec<R: Read>(reader: &mut R, len: usize, record: &str) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    read_record(reader, &mut buf, record)?;
    Ok(buf)
}

fn len_u16(len: usize, field: &'static str) -> io::Result<u16> {
    u16::try_from(len).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{field} length {len} exceeds 65535 bytes"),
        )
    })
}

/// Local file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileHeader {
    /// Minimum version needed to extract.
    pub version_needed: u16,
    /// General purpose bit flag.
    pub flags: u16,
    /// Compression method as stored (99 for AES).
    pub method: u16,
    /// Last modification time.
    pub modified: DosDateTime,
    /// CRC-32 of uncompressed data (zero when deferred).
    pub crc32: u32,
    /// Compressed size, or sentinel.
    pub compressed_size: u32,
    /// Uncompressed size, or sentinel.
    pub uncompressed_size: u32,
    /// Raw file name.
    pub name: Vec<u8>,
    /// Extra field.
    pub extra: Vec<u8>,
}

impl LocalFileHeader {
    /// Read a local file header, signature included.
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; LOCAL_FILE_HEADER_LEN as usize];
        read_record(reader, &mut buf, "local file header")?;

        let signature = le_u32(&buf, 0);
        if signature != LOCAL_FILE_HEADER_SIG {
            return Err(ZipError::invalid_signature(
                "local file header",
                LOCAL_FILE_HEADER_SIG,
                signature,
            ));
        }

        let name_len = le_u16(&buf, 26) as usize;
        let extra_len = le_u16(&buf, 28) as usize;

        Ok(Self {
            version_needed: le_u16(&buf, 4),
            flags: le_u16(&buf, 6),
            method: le_u16(&buf, 8),
            modified: DosDateTime::new(le_u16(&buf, 10), le_u16(&buf, 12)),
            crc32: le_u32(&buf, 14),
            compressed_size: le_u32(&buf, 18),
            uncompressed_size: le_u32(&buf, 22),
            name: read_vec(reader, name_len, "local file name")?,
            extra: read_vec(reader, extra_len, "local extra field")?,
        })
    }

    /// Write the header.
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let name_len = len_u16(self.name.len(), "file name")?;
        let extra_len = len_u16(self.extra.len(), "extra field")?;

        let mut buf = Vec::with_capacity(self.written_len() as usize);
        // Signature
        buf.extend_from_slice(&LOCAL_FILE_HEADER_SIG.to_le_bytes());
        // Version needed
        buf.extend_from_slice(&self.version_needed.to_le_bytes());
        // Flags
        buf.extend_from_slice(&self.flags.to_le_bytes());
        // Compression method
        buf.extend_from_slice(&self.method.to_le_bytes());
        // Modification time and date
        buf.extend_from_slice(&self.modified.time.to_le_bytes());
        buf.extend_from_slice(&self.modified.date.to_le_bytes());
        // CRC-32
        buf.extend_from_slice(&self.crc32.to_le_bytes());
        // Sizes
        buf.extend_from_slice(&self.compressed_size.to_le_bytes());
        buf.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        // Variable field lengths
        buf.extend_from_slice(&name_len.to_le_bytes());
        buf.extend_from_slice(&extra_len.to_le_bytes());
        buf.extend_from_slice(&self.name);
        buf.extend_from_slice(&self.extra);
        writer.write_all(&buf)
    }

    /// Size of the header when written.
    pub fn written_len(&self) -> u64 {
        LOCAL_FILE_HEADER_LEN + self.name.len() as u64 + self.extra.len() as u64
    }

    /// Whether a data descriptor follows the entry data.
    pub fn has_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }
}

/// CRC and sizes written after entry data when they were unknown up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDescriptor {
    /// CRC-32 of uncompressed data.
    pub crc32: u32,
    /// Compressed size.
    pub compressed_size: u64,
    /// Uncompressed size.
    pub uncompressed_size: u64,
}

impl DataDescriptor {
    /// Write the descriptor with its signature; sizes are 8 bytes wide when
    /// `zip64` is set.
    pub fn write<W: Write>(&self, writer: &mut W, zip64: bool) -> io::Result<()> {
        let mut buf = Vec::with_capacity(24);
        buf.extend_from_slice(&DATA_DESCRIPTOR_SIG.to_le_bytes());
        buf.extend_from_slice(&self.crc32.to_le_bytes());
        if zip64 {
            buf.extend_from_slice(&self.compressed_size.to_le_bytes());
            buf.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        } else {
            buf.extend_from_slice(&(self.compressed_size as u32).to_le_bytes());
            buf.extend_from_slice(&(self.uncompressed_size as u32).to_le_bytes());
        }
        writer.write_all(&buf)
    }

    /// Size of the descriptor when written with its signature.
    pub fn written_len(zip64: bool) -> u64 {
        if zip64 { 24 } else { 16 }
    }

    /// Read a descriptor. The signature is optional.
    pub fn read<R: Read>(reader: &mut R, zip64: bool) -> Result<Self> {
        let mut word = [0u8; 4];
        read_record(reader, &mut word, "data descriptor")?;

        let first = u32::from_le_bytes(word);
        let crc32 = if first == DATA_DESCRIPTOR_SIG {
            read_record(reader, &mut word, "data descriptor")?;
            u32::from_le_bytes(word)
        } else {
            first
        };

        let (compressed_size, uncompressed_size) = if zip64 {
            let mut buf = [0u8; 16];
            read_record(reader, &mut buf, "data descriptor")?;
            (le_u64(&buf, 0), le_u64(&buf, 8))
        } else {
            let mut buf = [0u8; 8];
            read_record(reader, &mut buf, "data descriptor")?;
            (le_u32(&buf, 0) as u64, le_u32(&buf, 4) as u64)
        };

        Ok(Self {
            crc32,
            compressed_size,
            uncompressed_size,
        })
    }
}

/// Central directory file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralDirectoryHeader {
    /// Version made by.
    pub version_made_by: u16,
    /// Version needed to extract.
    pub version_needed: u16,
    /// General purpose bit flag.
    pub flags: u16,
    /// Compression method as stored (99 for AES).
    pub method: u16,
    /// Last modification time.
    pub modified: DosDateTime,
    /// CRC-32 of uncompressed data.
    pub crc32: u32,
    /// Compressed size, or sentinel.
    pub compressed_size: u32,
    /// Uncompressed size, or sentinel.
    pub uncompressed_size: u32,
    /// Disk number start, or sentinel.
    pub disk_start: u16,
    /// Internal file attributes.
    pub internal_attr: u16,
    /// External file attributes.
    pub external_attr: u32,
    /// Relative offset of the local header, or sentinel.
    pub local_header_offset: u32,
    /// Raw file name.
    pub name: Vec<u8>,
    /// Extra field.
    pub extra: Vec<u8>,
    /// Raw file comment.
    pub comment: Vec<u8>,
}

impl CentralDirectoryHeader {
    /// Read a central directory header, signature included.
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; CENTRAL_DIR_HEADER_LEN as usize];
        read_record(reader, &mut buf, "central directory header")?;

        let signature = le_u32(&buf, 0);
        if signature != CENTRAL_DIR_HEADER_SIG {
            return Err(ZipError::invalid_signature(
                "central directory header",
                CENTRAL_DIR_HEADER_SIG,
                signature,
            ));
        }

        let name_len = le_u16(&buf, 28) as usize;
        let extra_len = le_u16(&buf, 30) as usize;
        let comment_len = le_u16(&buf, 32) as usize;

        Ok(Self {
            version_made_by: le_u16(&buf, 4),
            version_needed: le_u16(&buf, 6),
            flags: le_u16(&buf, 8),
            method: le_u16(&buf, 10),
            modified: DosDateTime::new(le_u16(&buf, 12), le_u16(&buf, 14)),
            crc32: le_u32(&buf, 16),
            compressed_size: le_u32(&buf, 20),
            uncompressed_size: le_u32(&buf, 24),
            disk_start: le_u16(&buf, 34),
            internal_attr: le_u16(&buf, 36),
            external_attr: le_u32(&buf, 38),
            local_header_offset: le_u32(&buf, 42),
            name: read_vec(reader, name_len, "central file name")?,
            extra: read_vec(reader, extra_len, "central extra field")?,
            comment: read_vec(reader, comment_len, "file comment")?,
        })
    }

    /// Write the header.
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let name_len = len_u16(self.name.len(), "file name")?;
        let extra_len = len_u16(self.extra.len(), "extra field")?;
        let comment_len = len_u16(self.comment.len(), "file comment")?;

        let mut buf = Vec::with_capacity(self.written_len() as usize);
        // Signature
        buf.extend_from_slice(&CENTRAL_DIR_HEADER_SIG.to_le_bytes());
        // Versions
        buf.extend_from_slice(&self.version_made_by.to_le_bytes());
        buf.extend_from_slice(&self.version_needed.to_le_bytes());
        // Flags
        buf.extend_from_slice(&self.flags.to_le_bytes());
        // Compression method
        buf.extend_from_slice(&self.method.to_le_bytes());
        // Modification time and date
        buf.extend_from_slice(&self.modified.time.to_le_bytes());
        buf.extend_from_slice(&self.modified.date.to_le_bytes());
        // CRC-32
        buf.extend_from_slice(&self.crc32.to_le_bytes());
        // Sizes
        buf.extend_from_slice(&self.compressed_size.to_le_bytes());
        buf.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        // Variable field lengths
        buf.extend_from_slice(&name_len.to_le_bytes());
        buf.extend_from_slice(&extra_len.to_le_bytes());
        buf.extend_from_slice(&comment_len.to_le_bytes());
        // Disk number start
        buf.extend_from_slice(&self.disk_start.to_le_bytes());
        // Attributes
        buf.extend_from_slice(&self.internal_attr.to_le_bytes());
        buf.extend_from_slice(&self.external_attr.to_le_bytes());
        // Relative offset of local header
        buf.extend_from_slice(&self.local_header_offset.to_le_bytes());
        buf.extend_from_slice(&self.name);
        buf.extend_from_slice(&self.extra);
        buf.extend_from_slice(&self.comment);
        writer.write_all(&buf)
    }

    /// Size of the header when written.
    pub fn written_len(&self) -> u64 {
        CENTRAL_DIR_HEADER_LEN
            + self.name.len() as u64
            + self.extra.len() as u64
            + self.comment.len() as u64
    }
}

/// End of central directory record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EndOfCentralDirectory {
    /// Number of this disk.
    pub disk_number: u16,
    /// Disk where the central directory starts.
    pub cd_disk: u16,
    /// Central directory records on this disk, or sentinel.
    pub entries_on_disk: u16,
    /// Total central directory records, or sentinel.
    pub total_entries: u16,
    /// Size of the central directory, or sentinel.
    pub cd_size: u32,
    /// Offset of the central directory, or sentinel.
    pub cd_offset: u32,
    /// Raw archive comment.
    pub comment: Vec<u8>,
}

impl EndOfCentralDirectory {
    /// Parse from a buffer starting at the signature.
    ///
    /// Returns `None` unless the fixed part and the whole comment fit inside
    /// `buf`, which rejects signature bytes that happen to appear in data.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < END_OF_CENTRAL_DIR_LEN as usize
            || le_u32(buf, 0) != END_OF_CENTRAL_DIR_SIG
        {
            return None;
        }
        let comment_len = le_u16(buf, 20) as usize;
        let comment = buf.get(22..22 + comment_len)?.to_vec();

        Some(Self {
            disk_number: le_u16(buf, 4),
            cd_disk: le_u16(buf, 6),
            entries_on_disk: le_u16(buf, 8),
            total_entries: le_u16(buf, 10),
            cd_size: le_u32(buf, 12),
            cd_offset: le_u32(buf, 16),
            comment,
        })
    }

    /// Write the record.
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let comment_len = len_u16(self.comment.len(), "archive comment")?;

        let mut buf = Vec::with_capacity(END_OF_CENTRAL_DIR_LEN as usize + self.comment.len());
        buf.extend_from_slice(&END_OF_CENTRAL_DIR_SIG.to_le_bytes());
        buf.extend_from_slice(&self.disk_number.to_le_bytes());
        buf.extend_from_slice(&self.cd_disk.to_le_bytes());
        buf.extend_from_slice(&self.entries_on_disk.to_le_bytes());
        buf.extend_from_slice(&self.total_entries.to_le_bytes());
        buf.extend_from_slice(&self.cd_size.to_le_bytes());
        buf.extend_from_slice(&self.cd_offset.to_le_bytes());
        buf.extend_from_slice(&comment_len.to_le_bytes());
        buf.extend_from_slice(&self.comment);
        writer.write_all(&buf)
    }
}

/// Zip64 end of central directory record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Zip64EndOfCentralDirectory {
    /// Version made by.
    pub version_made_by: u16,
    /// Version needed to extract.
    pub version_needed: u16,
    /// Number of this disk.
    pub disk_number: u32,
    /// Disk where the central directory starts.
    pub cd_disk: u32,
    /// Central directory records on this disk.
    pub entries_on_disk: u64,
    /// Total central directory records.
    pub total_entries: u64,
    /// Size of the central directory.
    pub cd_size: u64,
    /// Offset of the central directory.
    pub cd_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    /// Read the record, signature included. Extensible data is ignored.
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; ZIP64_END_OF_CENTRAL_DIR_LEN as usize];
        read_record(reader, &mut buf, "Zip64 end of central directory")?;

        let signature = le_u32(&buf, 0);
        if signature != ZIP64_END_OF_CENTRAL_DIR_SIG {
            return Err(ZipError::invalid_signature(
                "Zip64 end of central directory",
                ZIP64_END_OF_CENTRAL_DIR_SIG,
                signature,
            ));
        }

        Ok(Self {
            version_made_by: le_u16(&buf, 12),
            version_needed: le_u16(&buf, 14),
            disk_number: le_u32(&buf, 16),
            cd_disk: le_u32(&buf, 20),
            entries_on_disk: le_u64(&buf, 24),
            total_entries: le_u64(&buf, 32),
            cd_size: le_u64(&buf, 40),
            cd_offset: le_u64(&buf, 48),
        })
    }

    /// Write the record.
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let mut buf = Vec::with_capacity(ZIP64_END_OF_CENTRAL_DIR_LEN as usize);
        buf.extend_from_slice(&ZIP64_END_OF_CENTRAL_DIR_SIG.to_le_bytes());
        // Size of the remaining record
        buf.extend_from_slice(&(ZIP64_END_OF_CENTRAL_DIR_LEN - 12).to_le_bytes());
        buf.extend_from_slice(&self.version_made_by.to_le_bytes());
        buf.extend_from_slice(&self.version_needed.to_le_bytes());
        buf.extend_from_slice(&self.disk_number.to_le_bytes());
        buf.extend_from_slice(&self.cd_disk.to_le_bytes());
        buf.extend_from_slice(&self.entries_on_disk.to_le_bytes());
        buf.extend_from_slice(&self.total_entries.to_le_bytes());
        buf.extend_from_slice(&self.cd_size.to_le_bytes());
        buf.extend_from_slice(&self.cd_offset.to_le_bytes());
        writer.write_all(&buf)
    }
}

/// Zip64 end of central directory locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Zip64Locator {
    /// Disk holding the Zip64 EOCD record.
    pub disk: u32,
    /// Offset of the Zip64 EOCD record.
    pub offset: u64,
    /// Total number of disks.
    pub total_disks: u32,
}

impl Zip64Locator {
    /// Parse from a 20-byte buffer. Returns `None` when the signature differs.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < ZIP64_LOCATOR_LEN as usize
            || le_u32(buf, 0) != ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIG
        {
            return None;
        }
        Some(Self {
            disk: le_u32(buf, 4),
            offset: le_u64(buf, 8),
            total_disks: le_u32(buf, 16),
        })
    }

    /// Write the locator.
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let mut buf = Vec::with_capacity(ZIP64_LOCATOR_LEN as usize);
        buf.extend_from_slice(&ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIG.to_le_bytes());
        buf.extend_from_slice(&self.disk.to_le_bytes());
        buf.extend_from_slice(&self.offset.to_le_bytes());
        buf.extend_from_slice(&self.total_disks.to_le_bytes());
        writer.write_all(&buf)
    }
}
