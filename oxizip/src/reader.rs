//! Archive reader.
//!
//! Opening an archive parses the end records and the whole central
//! directory into an [`Archive`]. Extraction seeks to each local header and
//! runs
//!
//! ```text
//! source -> Take(stored size) -> EntryDecryptor -> Decompressor -> CrcWriter -> sink
//! ```
//!
//! verifying the CRC (and, for AES entries, the authentication code) at the
//! end.

use crate::cipher::EntryDecryptor;
use crate::codec::{Decompressor, is_corrupt_stream};
use crate::extra::{
    self, AES_EXTRA_ID, AesExtra, EXTENDED_TIMESTAMP_ID, NTFS_EXTRA_ID, NtfsTimes, ZIP64_EXTRA_ID,
    Zip64Extra, parse_extended_timestamp,
};
use crate::header::{
    CentralDirectoryHeader, END_OF_CENTRAL_DIR_LEN, END_OF_CENTRAL_DIR_SIG, EndOfCentralDirectory,
    FLAG_DATA_DESCRIPTOR, FLAG_ENCRYPTED, FLAG_UTF8, LocalFileHeader, METHOD_AES, ZIP64_LOCATOR_LEN,
    ZIP64_MARKER_16, ZIP64_MARKER_32, Zip64EndOfCentralDirectory, Zip64Locator, read_record,
};
use crate::model::{Archive, CompressionMethod, EncryptionMethod, Password, Zip64Policy, ZipEntry};
use crate::options::{ErrorPolicy, ReadOptions};
use codepage_437::{BorrowFromCp437, CP437_CONTROL};
use log::{debug, trace, warn};
use oxizip_core::dostime::{ntfs_to_naive, unix_to_naive};
use oxizip_core::{
    ByteThrottle, CrcWriter, NoProgress, Operation, ProgressEvent, ProgressHandler, Result,
    ZipError,
};
use std::borrow::Cow;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Bytes decompressed per step.
const CHUNK_SIZE: usize = 64 * 1024;

/// Outcome of [`ZipReader::extract_all`].
#[derive(Debug, Default)]
pub struct ExtractReport {
    /// Names of the entries written to their sinks.
    pub extracted: Vec<String>,
    /// Names of the entries the sink factory declined.
    pub skipped: Vec<String>,
    /// Content bytes written.
    pub bytes: u64,
    /// Entries that failed, with their errors ([`ErrorPolicy::Continue`]).
    pub failures: Vec<(String, ZipError)>,
}

impl ExtractReport {
    /// Whether every attempted entry was extracted.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Reads entries from a ZIP archive.
///
/// # Example
///
/// ```rust
/// use oxizip::{SaveOptions, ZipReader, ZipWriter};
/// use std::io::Cursor;
///
/// let mut writer = ZipWriter::new(Cursor::new(Vec::new()), SaveOptions::default())?;
/// writer.add_file("hello.txt", b"Hello, World!")?;
/// let (_, sink) = writer.finish()?;
///
/// let mut reader = ZipReader::new(Cursor::new(sink.into_inner()))?;
/// let entry = reader.entries()[0].clone();
/// assert_eq!(reader.extract(&entry)?, b"Hello, World!");
/// # Ok::<(), oxizip::ZipError>(())
/// ```
pub struct ZipReader<R: Read + Seek, P: ProgressHandler = NoProgress> {
    source: R,
    archive: Archive,
    options: ReadOptions,
    progress: P,
}

impl<R: Read + Seek> ZipReader<R> {
    /// Open an archive with default options.
    pub fn new(source: R) -> Result<Self> {
        Self::with_options(source, ReadOptions::default())
    }

    /// Open an archive.
    pub fn with_options(mut source: R, options: ReadOptions) -> Result<Self> {
        let archive = read_archive(&mut source)?;
        debug!(
            "Opened archive: {} entries{}",
            archive.len(),
            if archive.output_used_zip64() { " (Zip64)" } else { "" }
        );
        Ok(Self {
            source,
            archive,
            options,
            progress: NoProgress,
        })
    }
}

impl<R: Read + Seek, P: ProgressHandler> ZipReader<R, P> {
    /// Report progress to `handler` from now on.
    pub fn with_progress<Q: ProgressHandler>(self, handler: Q) -> ZipReader<R, Q> {
        ZipReader {
            source: self.source,
            archive: self.archive,
            options: self.options,
            progress: handler,
        }
    }

    /// Entries in central directory order.
    pub fn entries(&self) -> &[ZipEntry] {
        self.archive.entries()
    }

    /// The parsed archive model.
    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    /// Archive comment.
    pub fn comment(&self) -> &str {
        self.archive.comment()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.archive.len()
    }

    /// Whether the archive has no entries.
    pub fn is_empty(&self) -> bool {
        self.archive.is_empty()
    }

    /// Find an entry by exact name.
    pub fn entry_by_name(&self, name: &str) -> Option<&ZipEntry> {
        self.archive.entry_by_name(name)
    }

    /// Attach a password to one entry; it takes precedence over
    /// [`ReadOptions::password`].
    pub fn set_entry_password(&mut self, name: &str, password: impl Into<Password>) -> Result<()> {
        let entry = self
            .archive
            .entries
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or_else(|| ZipError::entry_not_found(name))?;
        entry.password = Some(password.into());
        Ok(())
    }

    /// Extract an entry into memory.
    pub fn extract(&mut self, entry: &ZipEntry) -> Result<Vec<u8>> {
        let capacity = entry.uncompressed_size.min(1 << 20) as usize;
        let mut out = Vec::with_capacity(capacity);
        self.extract_to(entry, &mut out)?;
        Ok(out)
    }

    /// Extract the entry named `name` into memory.
    pub fn extract_by_name(&mut self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .entry_by_name(name)
            .cloned()
            .ok_or_else(|| ZipError::entry_not_found(name))?;
        self.extract(&entry)
    }

    /// Extract an entry into `sink`, returning the content length.
    pub fn extract_to<W: Write + ?Sized>(&mut self, entry: &ZipEntry, sink: &mut W) -> Result<u64> {
        let password = self.password_for(entry);
        let index = self.index_of(entry)?;
        self.extract_entry(index, entry, password.as_ref(), sink)
            .map(|(bytes, _)| bytes)
    }

    /// Extract an entry with an explicit password.
    pub fn extract_with_password<W: Write + ?Sized>(
        &mut self,
        entry: &ZipEntry,
        password: impl Into<Password>,
        sink: &mut W,
    ) -> Result<u64> {
        let password = password.into();
        let index = self.index_of(entry)?;
        self.extract_entry(index, entry, Some(&password), sink)
            .map(|(bytes, _)| bytes)
    }

    /// Extract every entry into sinks supplied by `sink_factory`.
    ///
    /// The factory may return `Ok(None)` to skip an entry. Failures are
    /// handled according to [`ReadOptions::error_policy`]; cancellation
    /// always stops before the next entry.
    pub fn extract_all<F, W>(&mut self, mut sink_factory: F) -> Result<ExtractReport>
    where
        F: FnMut(&ZipEntry) -> Result<Option<W>>,
        W: Write,
    {
        let entries = self.archive.entries.clone();
        let started = ProgressEvent::Started {
            operation: Operation::Extract,
            total_entries: Some(entries.len() as u64),
        };
        if self.progress.on_event(&started).is_cancel() {
            return Err(ZipError::Cancelled);
        }

        let mut report = ExtractReport::default();
        for (index, entry) in entries.iter().enumerate() {
            let outcome = sink_factory(entry).and_then(|sink| match sink {
                Some(mut sink) => {
                    let password = self.password_for(entry);
                    self.extract_entry(index, entry, password.as_ref(), &mut sink)
                        .map(Some)
                }
                None => Ok(None),
            });

            match outcome {
                Ok(Some((bytes, cancel))) => {
                    report.extracted.push(entry.name.clone());
                    report.bytes += bytes;
                    if cancel {
                        return Err(ZipError::Cancelled);
                    }
                }
                Ok(None) => report.skipped.push(entry.name.clone()),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => match self.options.error_policy {
                    ErrorPolicy::StopOnFirstError => return Err(e),
                    ErrorPolicy::Continue => {
                        warn!("Failed to extract {}: {}", entry.name, e);
                        report.failures.push((entry.name.clone(), e));
                    }
                },
            }
        }

        // Cancelling at this point has nothing left to stop.
        let _ = self.progress.on_event(&ProgressEvent::Completed {
            operation: Operation::Extract,
            entries: report.extracted.len() as u64,
        });
        Ok(report)
    }

    /// Return the underlying source.
    pub fn into_inner(self) -> R {
        self.source
    }

    /// Entry password, then the password attached to the archive's copy of
    /// the entry, then the archive-wide password.
    fn password_for(&self, entry: &ZipEntry) -> Option<Password> {
        entry
            .password
            .clone()
            .or_else(|| {
                self.archive
                    .entries
                    .iter()
                    .find(|e| e.header_offset == entry.header_offset && e.name == entry.name)
                    .and_then(|e| e.password.clone())
            })
            .or_else(|| self.options.password.clone())
    }

    /// Position of `entry` in this archive, matched on name and offset.
    fn index_of(&self, entry: &ZipEntry) -> Result<usize> {
        self.archive
            .entries
            .iter()
            .position(|e| e.header_offset == entry.header_offset && e.name == entry.name)
            .ok_or_else(|| ZipError::entry_not_found(&entry.name))
    }

    /// Extract one entry. Returns the content length and whether the
    /// handler asked to stop once the entry was done.
    fn extract_entry<W: Write + ?Sized>(
        &mut self,
        index: usize,
        entry: &ZipEntry,
        password: Option<&Password>,
        sink: &mut W,
    ) -> Result<(u64, bool)> {
        if entry.uses_strong_encryption() {
            return Err(ZipError::unsupported_method(format!(
                "{}: strong encryption",
                entry.name
            )));
        }
        if let CompressionMethod::Unknown(id) = entry.method {
            return Err(ZipError::unsupported_method(format!(
                "{}: compression method {}",
                entry.name, id
            )));
        }
        if entry.is_encrypted() && password.is_none() {
            return Err(ZipError::bad_password(&entry.name));
        }

        let event = ProgressEvent::EntryStarted {
            operation: Operation::Extract,
            index,
            name: entry.name.clone(),
            total_bytes: Some(entry.uncompressed_size),
        };
        if self.progress.on_event(&event).is_cancel() {
            return Err(ZipError::Cancelled);
        }

        self.source.seek(SeekFrom::Start(entry.header_offset))?;
        let local = LocalFileHeader::read(&mut self.source)?;
        self.check_local_header(entry, &local)?;

        let bounded = (&mut self.source).take(entry.compressed_size);
        let decryptor = EntryDecryptor::new(bounded, entry, password)?;
        let mut decompressor = Decompressor::new(decryptor, entry.method)?;
        let mut out = CrcWriter::new(sink);
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut throttle = ByteThrottle::new(self.options.progress_interval);
        let mut stream_error = None;

        loop {
            let n = match decompressor.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    stream_error = Some(e);
                    break;
                }
            };
            out.write_all(&buf[..n])?;
            if throttle.advance(n as u64) {
                let event = ProgressEvent::Bytes {
                    operation: Operation::Extract,
                    index,
                    name: entry.name.clone(),
                    transferred: throttle.transferred(),
                    total: Some(entry.uncompressed_size),
                };
                if self.progress.on_event(&event).is_cancel() {
                    return Err(ZipError::Cancelled);
                }
            }
        }

        if let Some(e) = stream_error {
            if !is_corrupt_stream(&e) {
                return Err(e.into());
            }
            return Err(ZipError::crc_mismatch(&entry.name, entry.crc32, out.crc()));
        }
        let (_, authentic) = decompressor.into_inner().finish()?;

        let computed = out.crc();
        let written = out.count();
        // AE-2 entries store no CRC and rely on the authentication code.
        let crc_stored = entry.aes_vendor_version != Some(2);
        if !authentic
            || written != entry.uncompressed_size
            || (crc_stored && computed != entry.crc32)
        {
            return Err(ZipError::crc_mismatch(&entry.name, entry.crc32, computed));
        }

        if throttle.has_pending() {
            throttle.mark_reported();
            let event = ProgressEvent::Bytes {
                operation: Operation::Extract,
                index,
                name: entry.name.clone(),
                transferred: throttle.transferred(),
                total: Some(entry.uncompressed_size),
            };
            if self.progress.on_event(&event).is_cancel() {
                return Err(ZipError::Cancelled);
            }
        }

        debug!(
            "Extracted {} ({} -> {} bytes)",
            entry.name, entry.compressed_size, written
        );
        let event = ProgressEvent::EntryCompleted {
            operation: Operation::Extract,
            index,
            name: entry.name.clone(),
            bytes: written,
        };
        let cancel = self.progress.on_event(&event).is_cancel();
        Ok((written, cancel))
    }

    /// The name must match; flag and timestamp differences are only logged.
    fn check_local_header(&self, entry: &ZipEntry, local: &LocalFileHeader) -> Result<()> {
        let local_name = decode_text(&local.name, entry.is_utf8());
        if local_name != entry.name {
            return Err(ZipError::format(format!(
                "local header name {:?} does not match central name {:?}",
                local_name, entry.name
            )));
        }
        if !self.options.check_local_headers {
            return Ok(());
        }

        let relevant = FLAG_ENCRYPTED | FLAG_DATA_DESCRIPTOR | FLAG_UTF8;
        if local.flags & relevant != entry.flags & relevant {
            warn!(
                "{}: local flags {:#06x} differ from central flags {:#06x}",
                entry.name, local.flags, entry.flags
            );
        }
        if local.modified != entry.modified {
            warn!(
                "{}: local timestamp differs from the central directory",
                entry.name
            );
        }
        Ok(())
    }
}

/// Parse the end records and the central directory.
fn read_archive<R: Read + Seek>(source: &mut R) -> Result<Archive> {
    let file_len = source.seek(SeekFrom::End(0))?;
    if file_len < END_OF_CENTRAL_DIR_LEN {
        return Err(ZipError::format(format!(
            "{file_len} bytes is too small for a ZIP archive"
        )));
    }

    let (eocd_pos, eocd) = find_end_record(source, file_len)?;
    trace!(
        "End of central directory at {}: {} entries, {} bytes at {}",
        eocd_pos, eocd.total_entries, eocd.cd_size, eocd.cd_offset
    );

    let mut total_entries = eocd.total_entries as u64;
    let mut cd_size = eocd.cd_size as u64;
    let mut cd_offset = eocd.cd_offset as u64;
    let mut cd_end = eocd_pos;
    let mut used_zip64 = false;

    if let Some(locator_pos) = eocd_pos.checked_sub(ZIP64_LOCATOR_LEN) {
        source.seek(SeekFrom::Start(locator_pos))?;
        let mut buf = [0u8; ZIP64_LOCATOR_LEN as usize];
        read_record(source, &mut buf, "Zip64 locator")?;
        if let Some(locator) = Zip64Locator::parse(&buf) {
            if locator.offset >= locator_pos {
                return Err(ZipError::format(format!(
                    "Zip64 end record offset {} points past its locator",
                    locator.offset
                )));
            }
            source.seek(SeekFrom::Start(locator.offset))?;
            let record = Zip64EndOfCentralDirectory::read(source)?;
            trace!(
                "Zip64 end of central directory at {}: {} entries, {} bytes at {}",
                locator.offset, record.total_entries, record.cd_size, record.cd_offset
            );
            total_entries = record.total_entries;
            cd_size = record.cd_size;
            cd_offset = record.cd_offset;
            cd_end = locator.offset;
            used_zip64 = true;
        } else if eocd.total_entries == ZIP64_MARKER_16
            || eocd.cd_size == ZIP64_MARKER_32
            || eocd.cd_offset == ZIP64_MARKER_32
        {
            warn!("End record holds Zip64 sentinels but no Zip64 locator precedes it");
        }
    }

    if cd_offset.checked_add(cd_size).is_none_or(|end| end > cd_end) {
        return Err(ZipError::format(format!(
            "central directory ({cd_size} bytes at {cd_offset}) extends past its end record at {cd_end}"
        )));
    }

    source.seek(SeekFrom::Start(cd_offset))?;
    let mut directory = vec![0u8; cd_size as usize];
    read_record(source, &mut directory, "central directory")?;

    let capacity = total_entries.min(cd_size / crate::header::CENTRAL_DIR_HEADER_LEN);
    let mut entries = Vec::with_capacity(capacity as usize);
    let mut cursor = &directory[..];
    for _ in 0..total_entries {
        let header = CentralDirectoryHeader::read(&mut cursor)?;
        let entry = entry_from_central(header)?;
        used_zip64 |= entry.zip64;
        entries.push(entry);
    }

    let comment = match String::from_utf8(eocd.comment) {
        Ok(comment) => comment,
        Err(e) => decode_text(e.as_bytes(), false),
    };

    let mut archive = Archive::new(Zip64Policy::AsNecessary, comment);
    archive.entries = entries;
    archive.output_used_zip64 = used_zip64;
    Ok(archive)
}

/// Scan backwards for the end of central directory record.
fn find_end_record<R: Read + Seek>(
    source: &mut R,
    file_len: u64,
) -> Result<(u64, EndOfCentralDirectory)> {
    let window = file_len.min(END_OF_CENTRAL_DIR_LEN + u16::MAX as u64);
    let start = file_len - window;
    source.seek(SeekFrom::Start(start))?;
    let mut buf = vec![0u8; window as usize];
    read_record(source, &mut buf, "end of central directory")?;

    let signature = END_OF_CENTRAL_DIR_SIG.to_le_bytes();
    let last = buf.len() - END_OF_CENTRAL_DIR_LEN as usize;
    for pos in (0..=last).rev() {
        if buf[pos..pos + 4] != signature {
            continue;
        }
        if let Some(record) = EndOfCentralDirectory::parse(&buf[pos..]) {
            return Ok((start + pos as u64, record));
        }
    }
    Err(ZipError::format("end of central directory record not found"))
}

/// Build an entry from its central record, resolving Zip64 sentinels and
/// decoding the AES and timestamp extras.
fn entry_from_central(header: CentralDirectoryHeader) -> Result<ZipEntry> {
    let utf8 = header.flags & FLAG_UTF8 != 0;
    let name = decode_text(&header.name, utf8);
    let comment = decode_text(&header.comment, utf8);

    let mut uncompressed_size = header.uncompressed_size as u64;
    let mut compressed_size = header.compressed_size as u64;
    let mut header_offset = header.local_header_offset as u64;
    let wants_uncompressed = header.uncompressed_size == ZIP64_MARKER_32;
    let wants_compressed = header.compressed_size == ZIP64_MARKER_32;
    let wants_offset = header.local_header_offset == ZIP64_MARKER_32;
    let wants_disk = header.disk_start == ZIP64_MARKER_16;

    let mut zip64 = false;
    if let Some(data) = extra::find(&header.extra, ZIP64_EXTRA_ID) {
        let values = Zip64Extra::parse(
            data,
            wants_uncompressed,
            wants_compressed,
            wants_offset,
            wants_disk,
        )?;
        uncompressed_size = values.uncompressed_size.unwrap_or(uncompressed_size);
        compressed_size = values.compressed_size.unwrap_or(compressed_size);
        header_offset = values.header_offset.unwrap_or(header_offset);
        zip64 = true;
    } else if wants_uncompressed || wants_compressed || wants_offset {
        warn!("{name}: Zip64 sentinel without a Zip64 extra field; using it literally");
    }

    let (method, encryption, aes_vendor_version) = if header.method == METHOD_AES {
        let data = extra::find(&header.extra, AES_EXTRA_ID).ok_or_else(|| {
            ZipError::format(format!("{name}: AES entry without its 0x9901 extra field"))
        })?;
        match AesExtra::parse(data) {
            Ok(aes) => (
                CompressionMethod::from_u16(aes.compression_method),
                EncryptionMethod::from(aes.strength),
                Some(aes.vendor_version),
            ),
            // Listed, but refused at extraction.
            Err(ZipError::UnsupportedMethod { method }) => {
                warn!("{name}: {method}");
                (CompressionMethod::Unknown(METHOD_AES), EncryptionMethod::None, None)
            }
            Err(e) => return Err(e),
        }
    } else if header.flags & FLAG_ENCRYPTED != 0 {
        (
            CompressionMethod::from_u16(header.method),
            EncryptionMethod::ZipCrypto,
            None,
        )
    } else {
        (CompressionMethod::from_u16(header.method), EncryptionMethod::None, None)
    };

    let modified_precise = extra::find(&header.extra, NTFS_EXTRA_ID)
        .and_then(NtfsTimes::parse)
        .and_then(|times| ntfs_to_naive(times.modified))
        .or_else(|| {
            extra::find(&header.extra, EXTENDED_TIMESTAMP_ID)
                .and_then(parse_extended_timestamp)
                .and_then(unix_to_naive)
        });

    trace!(
        "Central record {}: {} {} -> {} bytes at {}",
        name, method, compressed_size, uncompressed_size, header_offset
    );

    Ok(ZipEntry {
        name,
        uncompressed_size,
        compressed_size,
        modified: header.modified,
        modified_precise,
        crc32: header.crc32,
        method,
        encryption,
        aes_vendor_version,
        header_offset,
        flags: header.flags,
        version_made_by: header.version_made_by,
        version_needed: header.version_needed,
        external_attributes: header.external_attr,
        internal_attributes: header.internal_attr,
        comment,
        extra: header.extra,
        zip64,
        password: None,
    })
}

/// Names and comments are UTF-8 when flagged, CP437 otherwise.
fn decode_text(bytes: &[u8], utf8: bool) -> String {
    if utf8 {
        return match std::str::from_utf8(bytes) {
            Ok(text) => text.to_string(),
            Err(_) => {
                warn!("Text flagged as UTF-8 is not valid UTF-8");
                String::from_utf8_lossy(bytes).into_owned()
            }
        };
    }
    let text: Cow<str> = Cow::borrow_from_cp437(bytes, &CP437_CONTROL);
    text.into_owned()
}
