//! Streaming archive writer.
//!
//! Each entry flows through
//!
//! ```text
//! source -> CrcReader -> Compressor -> EntryEncryptor -> CountingWriter -> sink
//! ```
//!
//! and its central record is buffered in the [`Archive`] until
//! [`ZipWriter::finish`] writes the central directory.
//!
//! Seekable sinks get their local headers patched once sizes are known.
//! Write-only sinks (and any entry using the legacy cipher) get a data
//! descriptor after the data instead, as does an entry that grows past 4 GiB
//! without a Zip64 field reserved in its local header.

use crate::cipher::EntryEncryptor;
use crate::codec::Compressor;
use crate::extra::{AesExtra, NtfsTimes, Zip64Extra};
use crate::header::{
    CentralDirectoryHeader, DataDescriptor, EndOfCentralDirectory, FLAG_DATA_DESCRIPTOR,
    FLAG_ENCRYPTED, FLAG_UTF8, LOCAL_CRC_OFFSET, LOCAL_FILE_HEADER_LEN, LOCAL_VERSION_OFFSET,
    LocalFileHeader, METHOD_AES, VERSION_AES, VERSION_DEFAULT, VERSION_DEFLATE, VERSION_MADE_BY,
    VERSION_ZIP64, ZIP64_MARKER_16, ZIP64_MARKER_32, Zip64EndOfCentralDirectory, Zip64Locator,
};
use crate::model::{
    Archive, CompressionMethod, EncryptionMethod, MAX_16, MAX_32, Password, Zip64Policy, ZipEntry,
};
use crate::options::{CompressionLevel, EntryOptions, HeaderStrategy, SaveOptions};
use chrono::NaiveDateTime;
use log::{debug, trace, warn};
use oxizip_core::dostime::naive_to_ntfs;
use oxizip_core::{
    ByteThrottle, CrcReader, DosDateTime, NoProgress, Operation, ProgressEvent, ProgressHandler,
    Result, ZipError,
};
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Bytes read from a content source per step.
const CHUNK_SIZE: usize = 64 * 1024;

/// Unix file type bits.
const S_IFREG: u32 = 0o100000;
const S_IFDIR: u32 = 0o040000;

/// MS-DOS directory attribute.
const DOS_DIRECTORY: u32 = 0x10;

type SeekFn<W> = fn(&mut W, SeekFrom) -> io::Result<u64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Finished,
    Cancelled,
    Failed,
}

/// Counts bytes on their way to the sink.
struct CountingWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Everything decided about an entry before any byte is written.
struct PendingEntry {
    name: String,
    index: usize,
    is_dir: bool,
    level: CompressionLevel,
    encryption: EncryptionMethod,
    password: Option<Password>,
    modified: DosDateTime,
    modified_precise: NaiveDateTime,
    size_hint: Option<u64>,
    reserve_zip64: bool,
    external_attributes: u32,
    comment: String,
}

/// Writes a ZIP archive entry by entry.
///
/// # Example
///
/// ```rust
/// use oxizip::{SaveOptions, ZipWriter};
/// use std::io::Cursor;
///
/// let mut writer = ZipWriter::new(Cursor::new(Vec::new()), SaveOptions::default())?;
/// writer.add_file("hello.txt", b"Hello, World!")?;
/// writer.add_directory("docs/")?;
/// let (archive, sink) = writer.finish()?;
///
/// assert_eq!(archive.len(), 2);
/// assert!(!sink.into_inner().is_empty());
/// # Ok::<(), oxizip::ZipError>(())
/// ```
pub struct ZipWriter<W: Write, P: ProgressHandler = NoProgress> {
    sink: Option<W>,
    seeker: Option<SeekFn<W>>,
    options: SaveOptions,
    archive: Archive,
    progress: P,
    offset: u64,
    started: bool,
    state: State,
}

impl<W: Write + Seek> ZipWriter<W> {
    /// Create a writer on a seekable sink.
    ///
    /// Offsets are absolute positions in the sink, so the archive may
    /// follow bytes already written to it.
    pub fn new(mut sink: W, options: SaveOptions) -> Result<Self> {
        let offset = sink.stream_position()?;
        let seeker: SeekFn<W> = <W as Seek>::seek;
        Self::build(sink, Some(seeker), offset, options)
    }
}

impl<W: Write> ZipWriter<W> {
    /// Create a writer on a write-only sink.
    ///
    /// Every entry is followed by a data descriptor. Fails with
    /// [`ZipError::StreamCapability`] when `options` ask for headers to be
    /// patched in place.
    pub fn new_streaming(sink: W, options: SaveOptions) -> Result<Self> {
        if options.header_strategy == HeaderStrategy::PatchInPlace {
            return Err(ZipError::stream_capability(
                "patching local headers needs a seekable sink",
            ));
        }
        Self::build(sink, None, 0, options)
    }

    fn build(sink: W, seeker: Option<SeekFn<W>>, offset: u64, options: SaveOptions) -> Result<Self> {
        if options.comment.len() > u16::MAX as usize {
            return Err(ZipError::format(format!(
                "archive comment is {} bytes, the limit is 65535",
                options.comment.len()
            )));
        }
        let archive = Archive::new(options.zip64, options.comment.clone());
        Ok(Self {
            sink: Some(sink),
            seeker,
            options,
            archive,
            progress: NoProgress,
            offset,
            started: false,
            state: State::Open,
        })
    }
}

impl<W: Write, P: ProgressHandler> ZipWriter<W, P> {
    /// Report progress to `handler` from now on.
    pub fn with_progress<Q: ProgressHandler>(mut self, handler: Q) -> ZipWriter<W, Q> {
        let writer = ZipWriter {
            sink: self.sink.take(),
            seeker: self.seeker,
            options: self.options.clone(),
            archive: std::mem::take(&mut self.archive),
            progress: handler,
            offset: self.offset,
            started: self.started,
            state: self.state,
        };
        // Nothing left for the old value's drop to finalize.
        self.state = State::Finished;
        writer
    }

    /// Entries written so far.
    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    /// Whether the sink can seek.
    pub fn is_seekable(&self) -> bool {
        self.seeker.is_some()
    }

    /// Add a file from an in-memory buffer.
    pub fn add_file(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let mut source = data;
        self.add_entry(
            EntryOptions::new(name).size_hint(data.len() as u64),
            &mut source,
        )
    }

    /// Add a directory entry. A trailing `/` is appended when missing.
    pub fn add_directory(&mut self, name: &str) -> Result<()> {
        let name = if name.ends_with('/') {
            name.to_string()
        } else {
            format!("{name}/")
        };
        self.add_entry(EntryOptions::new(name), &mut io::empty())
    }

    /// Add an entry whose content is read from `source` until EOF.
    ///
    /// On cancellation the central directory is written for the entries
    /// completed so far and [`ZipError::Cancelled`] is returned.
    pub fn add_entry<R: Read + ?Sized>(
        &mut self,
        options: EntryOptions,
        source: &mut R,
    ) -> Result<()> {
        self.ensure_open()?;
        if self.begin_save() {
            return self.finish_cancelled();
        }

        let pending = self.prepare(options)?;
        match self.write_entry(pending, source) {
            Ok(()) => Ok(()),
            Err(ZipError::Cancelled) => self.finish_cancelled(),
            Err(e) => {
                self.state = State::Failed;
                Err(e)
            }
        }
    }

    /// Write the central directory and return the archive model and sink.
    pub fn finish(mut self) -> Result<(Archive, W)> {
        self.finalize()?;
        let sink = self
            .sink
            .take()
            .ok_or_else(|| ZipError::format("archive sink already taken"))?;
        Ok((std::mem::take(&mut self.archive), sink))
    }

    /// Finish the archive and return the sink.
    pub fn into_inner(self) -> Result<W> {
        self.finish().map(|(_, sink)| sink)
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            State::Open => Ok(()),
            State::Finished => Err(ZipError::format("archive already finished")),
            State::Cancelled => Err(ZipError::Cancelled),
            State::Failed => Err(ZipError::format("archive writer failed earlier")),
        }
    }

    /// Emit `Started` once. Returns `true` when the handler cancels.
    fn begin_save(&mut self) -> bool {
        if self.started {
            return false;
        }
        self.started = true;
        self.progress
            .on_event(&ProgressEvent::Started {
                operation: Operation::Save,
                total_entries: None,
            })
            .is_cancel()
    }

    /// Resolve entry options against the save options and check limits.
    fn prepare(&self, options: EntryOptions) -> Result<PendingEntry> {
        let name = normalize_name(&options.name);
        if name.is_empty() || name == "/" {
            return Err(ZipError::format("entry name is empty"));
        }
        if name.len() > u16::MAX as usize || options.comment.len() > u16::MAX as usize {
            return Err(ZipError::format(format!(
                "{name}: name or comment longer than 65535 bytes"
            )));
        }

        let policy = self.archive.zip64_policy;
        let index = self.archive.entries.len();
        policy.check_fits("entry count", index as u64 + 1, MAX_16)?;
        policy.check_fits("local header offset", self.offset, MAX_32)?;
        if let Some(hint) = options.size_hint {
            policy.check_fits("uncompressed size", hint, MAX_32)?;
        }

        let is_dir = name.ends_with('/');
        let encryption = if is_dir {
            EncryptionMethod::None
        } else {
            options.encryption.unwrap_or(self.options.encryption)
        };
        let password = options.password.or_else(|| self.options.password.clone());
        if encryption.is_encrypted() && password.is_none() {
            return Err(ZipError::bad_password(&name));
        }

        let modified_precise = options
            .modified
            .unwrap_or_else(|| chrono::Local::now().naive_local());
        let external_attributes = if is_dir {
            ((S_IFDIR | options.unix_mode.unwrap_or(0o755)) << 16) | DOS_DIRECTORY
        } else {
            (S_IFREG | options.unix_mode.unwrap_or(0o644)) << 16
        };

        Ok(PendingEntry {
            index,
            is_dir,
            level: options.compression.unwrap_or(self.options.compression),
            encryption,
            password,
            modified: DosDateTime::from_naive(&modified_precise),
            modified_precise,
            size_hint: options.size_hint,
            reserve_zip64: policy.reserve_local_extra(options.large_file, options.size_hint),
            external_attributes,
            comment: options.comment,
            name,
        })
    }

    fn write_entry<R: Read + ?Sized>(&mut self, pending: PendingEntry, source: &mut R) -> Result<()> {
        let PendingEntry {
            name,
            index,
            is_dir,
            level,
            encryption,
            password,
            modified,
            modified_precise,
            size_hint,
            reserve_zip64,
            external_attributes,
            comment,
        } = pending;

        let event = ProgressEvent::EntryStarted {
            operation: Operation::Save,
            index,
            name: name.clone(),
            total_bytes: size_hint,
        };
        if self.progress.on_event(&event).is_cancel() {
            return Err(ZipError::Cancelled);
        }

        let mut source = CrcReader::new(source);
        let mut buf = Vec::new();
        let first_len = if is_dir {
            0
        } else {
            buf.resize(CHUNK_SIZE, 0);
            read_chunk(&mut source, &mut buf)?
        };

        let method = if is_dir || first_len == 0 || level.is_store() {
            CompressionMethod::Stored
        } else {
            CompressionMethod::Deflate
        };
        // Directories and empty plain files have nothing left to learn.
        let known_up_front = first_len == 0 && !encryption.is_encrypted();
        let mut descriptor = !known_up_front
            && (self.seeker.is_none()
                || self.options.header_strategy == HeaderStrategy::DataDescriptor
                || encryption == EncryptionMethod::ZipCrypto);
        let patch = !known_up_front && !descriptor;

        let mut flags = 0;
        if !name.is_ascii() || !comment.is_ascii() {
            flags |= FLAG_UTF8;
        }
        if encryption.is_encrypted() {
            flags |= FLAG_ENCRYPTED;
        }
        if descriptor {
            flags |= FLAG_DATA_DESCRIPTOR;
        }
        if method == CompressionMethod::Deflate {
            flags |= level.deflate_flag_bits();
        }

        let aes_extra = encryption.aes_strength().map(|strength| AesExtra {
            vendor_version: 1,
            strength,
            compression_method: method.to_u16(),
        });
        let mut kept_extra = Vec::new();
        if let Some(aes) = &aes_extra {
            kept_extra.extend_from_slice(&aes.to_bytes());
        }
        if self.options.ntfs_timestamps {
            let ticks = naive_to_ntfs(&modified_precise);
            let times = NtfsTimes {
                modified: ticks,
                accessed: ticks,
                created: ticks,
            };
            kept_extra.extend_from_slice(&times.to_bytes());
        }

        let mut local_extra = Vec::new();
        if reserve_zip64 {
            let reserved = Zip64Extra {
                uncompressed_size: Some(0),
                compressed_size: Some(0),
                ..Default::default()
            };
            local_extra.extend_from_slice(&reserved.to_bytes());
        }
        local_extra.extend_from_slice(&kept_extra);

        let header_method = if aes_extra.is_some() {
            METHOD_AES
        } else {
            method.to_u16()
        };
        let local_size = if reserve_zip64 { ZIP64_MARKER_32 } else { 0 };
        let header = LocalFileHeader {
            version_needed: version_needed(method, encryption, is_dir, reserve_zip64),
            flags,
            method: header_method,
            modified,
            crc32: 0,
            compressed_size: local_size,
            uncompressed_size: local_size,
            name: name.as_bytes().to_vec(),
            extra: local_extra,
        };

        let header_offset = self.offset;
        let data_start = header_offset + header.written_len();
        let seeker = self.seeker;
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| ZipError::format("archive sink already taken"))?;
        header.write(sink)?;
        trace!("{}: local header at {} ({} bytes)", name, header_offset, header.written_len());

        let counting = CountingWriter {
            inner: &mut *sink,
            written: 0,
        };
        let encryptor = EntryEncryptor::new(
            counting,
            encryption,
            password.as_ref(),
            modified.check_byte(),
            &name,
        )?;
        let mut compressor = Compressor::new(encryptor, method, level)?;

        let policy = self.archive.zip64_policy;
        let mut throttle = ByteThrottle::new(self.options.progress_interval);
        let mut cancelled = false;
        let mut n = first_len;
        while n > 0 {
            policy.check_fits("uncompressed size", source.count(), MAX_32)?;
            compressor.write_all(&buf[..n])?;
            if throttle.advance(n as u64) {
                let event = ProgressEvent::Bytes {
                    operation: Operation::Save,
                    index,
                    name: name.clone(),
                    transferred: throttle.transferred(),
                    total: size_hint,
                };
                if self.progress.on_event(&event).is_cancel() {
                    cancelled = true;
                    break;
                }
            }
            n = read_chunk(&mut source, &mut buf)?;
        }
        if !cancelled && throttle.has_pending() {
            throttle.mark_reported();
            let event = ProgressEvent::Bytes {
                operation: Operation::Save,
                index,
                name: name.clone(),
                transferred: throttle.transferred(),
                total: size_hint,
            };
            cancelled = self.progress.on_event(&event).is_cancel();
        }

        let counting = compressor.finish()?.finish()?;
        let stored_len = counting.written;
        self.offset = data_start + stored_len;

        if cancelled {
            debug!("{}: cancelled after {} stored bytes", name, stored_len);
            return Err(ZipError::Cancelled);
        }

        let crc32 = source.crc();
        let size = source.count();
        policy.check_fits("uncompressed size", size, MAX_32)?;
        policy.check_fits("compressed size", stored_len, MAX_32)?;
        let overflow = size > MAX_32 || stored_len > MAX_32;

        if patch {
            let seek = seeker.ok_or_else(|| {
                ZipError::stream_capability("patching local headers needs a seekable sink")
            })?;
            if overflow && !reserve_zip64 {
                // No room for 64-bit sizes in the local header; they follow
                // the data in a Zip64 descriptor instead.
                flags |= FLAG_DATA_DESCRIPTOR;
                descriptor = true;
                let version = version_needed(method, encryption, is_dir, true);
                mark_local_descriptor(sink, seek, header_offset, version, flags, self.offset)?;
                debug!("{}: outgrew its local header, sizes moved to a descriptor", name);
            } else {
                let fixup = LocalPatch {
                    header_offset,
                    name_len: name.len() as u64,
                    zip64: reserve_zip64,
                    crc32,
                    compressed_size: stored_len,
                    uncompressed_size: size,
                };
                fixup.apply(sink, seek, self.offset)?;
            }
        }

        let descriptor_zip64 = reserve_zip64 || overflow;
        if descriptor {
            let record = DataDescriptor {
                crc32,
                compressed_size: stored_len,
                uncompressed_size: size,
            };
            record.write(sink, descriptor_zip64)?;
            self.offset += DataDescriptor::written_len(descriptor_zip64);
        }
        if reserve_zip64 || (descriptor && descriptor_zip64) {
            self.archive.output_used_zip64 = true;
        }

        let mut entry = ZipEntry {
            name,
            uncompressed_size: size,
            compressed_size: stored_len,
            modified,
            modified_precise: Some(modified_precise),
            crc32,
            method,
            encryption,
            aes_vendor_version: aes_extra.map(|aes| aes.vendor_version),
            header_offset,
            flags,
            version_made_by: VERSION_MADE_BY,
            version_needed: 0,
            external_attributes,
            internal_attributes: 0,
            comment,
            extra: kept_extra,
            zip64: false,
            password: None,
        };
        complete_central_fields(&mut entry, policy);
        if entry.zip64 {
            self.archive.output_used_zip64 = true;
        }

        debug!(
            "Wrote {} ({} -> {} bytes, {}{})",
            entry.name,
            size,
            stored_len,
            method,
            if encryption.is_encrypted() {
                format!(", {}", encryption)
            } else {
                String::new()
            }
        );

        let event = ProgressEvent::EntryCompleted {
            operation: Operation::Save,
            index,
            name: entry.name.clone(),
            bytes: size,
        };
        self.archive.entries.push(entry);
        if self.progress.on_event(&event).is_cancel() {
            return Err(ZipError::Cancelled);
        }
        Ok(())
    }

    /// Write the central directory for the completed entries and report
    /// cancellation.
    fn finish_cancelled(&mut self) -> Result<()> {
        match self.write_central_directory() {
            Ok(()) => {
                self.state = State::Cancelled;
                debug!(
                    "Save cancelled; archive closed with {} entries",
                    self.archive.len()
                );
                Err(ZipError::Cancelled)
            }
            Err(e) => {
                self.state = State::Failed;
                Err(e)
            }
        }
    }

    fn finalize(&mut self) -> Result<()> {
        match self.state {
            State::Finished | State::Cancelled => return Ok(()),
            State::Failed => return Err(ZipError::format("archive writer failed earlier")),
            State::Open => {}
        }
        self.begin_save();
        if let Err(e) = self.write_central_directory() {
            self.state = State::Failed;
            return Err(e);
        }
        self.state = State::Finished;

        // Cancelling at this point has nothing left to undo.
        let _ = self.progress.on_event(&ProgressEvent::Completed {
            operation: Operation::Save,
            entries: self.archive.len() as u64,
        });
        Ok(())
    }

    fn write_central_directory(&mut self) -> Result<()> {
        let policy = self.archive.zip64_policy;
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| ZipError::format("archive sink already taken"))?;

        let cd_offset = self.offset;
        let mut cd_size = 0u64;
        for entry in &self.archive.entries {
            let record = central_record(entry, policy);
            record.write(sink)?;
            cd_size += record.written_len();
        }

        let count = self.archive.entries.len() as u64;
        let zip64_end = policy.end_record_required(count, cd_size, cd_offset)?;
        if zip64_end {
            let record = Zip64EndOfCentralDirectory {
                version_made_by: VERSION_MADE_BY,
                version_needed: VERSION_ZIP64,
                disk_number: 0,
                cd_disk: 0,
                entries_on_disk: count,
                total_entries: count,
                cd_size,
                cd_offset,
            };
            record.write(sink)?;
            let locator = Zip64Locator {
                disk: 0,
                offset: cd_offset + cd_size,
                total_disks: 1,
            };
            locator.write(sink)?;
            self.archive.output_used_zip64 = true;
        }

        let entries = u16::try_from(count).unwrap_or(ZIP64_MARKER_16);
        let end = EndOfCentralDirectory {
            disk_number: 0,
            cd_disk: 0,
            entries_on_disk: entries,
            total_entries: entries,
            cd_size: u32::try_from(cd_size).unwrap_or(ZIP64_MARKER_32),
            cd_offset: u32::try_from(cd_offset).unwrap_or(ZIP64_MARKER_32),
            comment: self.archive.comment.as_bytes().to_vec(),
        };
        end.write(sink)?;
        sink.flush()?;

        debug!(
            "Central directory: {} entries, {} bytes at {}{}",
            count,
            cd_size,
            cd_offset,
            if zip64_end { " (Zip64)" } else { "" }
        );
        Ok(())
    }
}

impl<W: Write, P: ProgressHandler> Drop for ZipWriter<W, P> {
    fn drop(&mut self) {
        if self.state == State::Open && self.sink.is_some() {
            if let Err(e) = self.finalize() {
                warn!("Failed to finish archive on drop: {}", e);
            }
        }
    }
}

/// Values written back into a local header once the data is done.
struct LocalPatch {
    header_offset: u64,
    name_len: u64,
    zip64: bool,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
}

impl LocalPatch {
    fn apply<W: Write>(&self, sink: &mut W, seek: SeekFn<W>, resume_at: u64) -> io::Result<()> {
        seek(sink, SeekFrom::Start(self.header_offset + LOCAL_CRC_OFFSET))?;
        let (compressed, uncompressed) = if self.zip64 {
            (ZIP64_MARKER_32, ZIP64_MARKER_32)
        } else {
            (self.compressed_size as u32, self.uncompressed_size as u32)
        };
        let mut fields = [0u8; 12];
        fields[0..4].copy_from_slice(&self.crc32.to_le_bytes());
        fields[4..8].copy_from_slice(&compressed.to_le_bytes());
        fields[8..12].copy_from_slice(&uncompressed.to_le_bytes());
        sink.write_all(&fields)?;

        if self.zip64 {
            // The reserved Zip64 block is first in the extra field.
            let values_at = self.header_offset + LOCAL_FILE_HEADER_LEN + self.name_len + 4;
            seek(sink, SeekFrom::Start(values_at))?;
            let mut values = [0u8; 16];
            values[0..8].copy_from_slice(&self.uncompressed_size.to_le_bytes());
            values[8..16].copy_from_slice(&self.compressed_size.to_le_bytes());
            sink.write_all(&values)?;
        }

        seek(sink, SeekFrom::Start(resume_at))?;
        Ok(())
    }
}

/// Rewrite the version and flag fields of a local header so that readers
/// take CRC and sizes from the data descriptor that follows the entry.
fn mark_local_descriptor<W: Write>(
    sink: &mut W,
    seek: SeekFn<W>,
    header_offset: u64,
    version_needed: u16,
    flags: u16,
    resume_at: u64,
) -> io::Result<()> {
    seek(sink, SeekFrom::Start(header_offset + LOCAL_VERSION_OFFSET))?;
    let mut fields = [0u8; 4];
    fields[0..2].copy_from_slice(&version_needed.to_le_bytes());
    fields[2..4].copy_from_slice(&flags.to_le_bytes());
    sink.write_all(&fields)?;
    seek(sink, SeekFrom::Start(resume_at))?;
    Ok(())
}

/// Read until `buf` holds data or the source is exhausted.
fn read_chunk<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match source.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

/// Forward slashes, no leading slash.
fn normalize_name(name: &str) -> String {
    name.replace('\\', "/").trim_start_matches('/').to_string()
}

fn version_needed(
    method: CompressionMethod,
    encryption: EncryptionMethod,
    is_dir: bool,
    zip64: bool,
) -> u16 {
    let mut version = VERSION_DEFAULT;
    if method == CompressionMethod::Deflate || is_dir || encryption == EncryptionMethod::ZipCrypto {
        version = VERSION_DEFLATE;
    }
    if zip64 {
        version = version.max(VERSION_ZIP64);
    }
    if encryption.aes_strength().is_some() {
        version = version.max(VERSION_AES);
    }
    version
}

/// Fill in the central-only fields of a finished entry: the Zip64 extra
/// (prepended to the kept extras) and the version needed.
fn complete_central_fields(entry: &mut ZipEntry, policy: Zip64Policy) {
    let zip64 = policy.central_extra(
        entry.uncompressed_size,
        entry.compressed_size,
        entry.header_offset,
    );
    entry.zip64 = !zip64.is_empty();
    if entry.zip64 {
        let mut extra = zip64.to_bytes();
        extra.extend_from_slice(&entry.extra);
        entry.extra = extra;
    }
    entry.version_needed =
        version_needed(entry.method, entry.encryption, entry.is_dir(), entry.zip64);
}

/// Build the central directory record for a finished entry.
fn central_record(entry: &ZipEntry, policy: Zip64Policy) -> CentralDirectoryHeader {
    let zip64 = policy.central_extra(
        entry.uncompressed_size,
        entry.compressed_size,
        entry.header_offset,
    );
    let narrow = |wide: Option<u64>, value: u64| match wide {
        Some(_) => ZIP64_MARKER_32,
        None => value as u32,
    };
    let method = if entry.encryption.aes_strength().is_some() {
        METHOD_AES
    } else {
        entry.method.to_u16()
    };

    CentralDirectoryHeader {
        version_made_by: entry.version_made_by,
        version_needed: entry.version_needed,
        flags: entry.flags,
        method,
        modified: entry.modified,
        crc32: entry.crc32,
        compressed_size: narrow(zip64.compressed_size, entry.compressed_size),
        uncompressed_size: narrow(zip64.uncompressed_size, entry.uncompressed_size),
        disk_start: 0,
        internal_attr: entry.internal_attributes,
        external_attr: entry.external_attributes,
        local_header_offset: narrow(zip64.header_offset, entry.header_offset),
        name: entry.name.as_bytes().to_vec(),
        extra: entry.extra.clone(),
        comment: entry.comment.as_bytes().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extra::{self, ZIP64_EXTRA_ID};
    use crate::header::{END_OF_CENTRAL_DIR_SIG, LOCAL_FILE_HEADER_SIG};
    use oxizip_core::Flow;
    use std::io::Cursor;

    fn fixed_time() -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2024, 5, 17)
            .unwrap()
            .and_hms_opt(10, 20, 30)
            .unwrap()
    }

    fn write_archive(options: SaveOptions, files: &[(&str, &[u8])]) -> (Archive, Vec<u8>) {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()), options).unwrap();
        for (name, data) in files {
            let mut source = *data;
            writer
                .add_entry(EntryOptions::new(*name).modified(fixed_time()), &mut source)
                .unwrap();
        }
        let (archive, sink) = writer.finish().unwrap();
        (archive, sink.into_inner())
    }

    #[test]
    fn test_empty_archive() {
        let (archive, bytes) = write_archive(SaveOptions::default(), &[]);
        assert!(archive.is_empty());
        assert_eq!(bytes.len(), 22);
        assert_eq!(u32::from_le_bytes(bytes[0..4].try_into().unwrap()), END_OF_CENTRAL_DIR_SIG);
    }

    #[test]
    fn test_patched_header_has_sizes() {
        let data = b"hello hello hello hello";
        let (archive, bytes) = write_archive(SaveOptions::default(), &[("a.txt", data)]);
        let entry = &archive.entries()[0];

        let header = LocalFileHeader::read(&mut &bytes[..]).unwrap();
        assert_eq!(header.crc32, entry.crc32);
        assert_eq!(header.compressed_size as u64, entry.compressed_size);
        assert_eq!(header.uncompressed_size, data.len() as u32);
        assert!(!header.has_data_descriptor());
        assert_eq!(entry.method, CompressionMethod::Deflate);
        assert_eq!(entry.crc32, oxizip_core::Crc32::compute(data));
    }

    #[test]
    fn test_empty_file_is_stored() {
        let (archive, _) = write_archive(SaveOptions::default(), &[("empty.txt", b"")]);
        let entry = &archive.entries()[0];
        assert_eq!(entry.method, CompressionMethod::Stored);
        assert_eq!(entry.compressed_size, 0);
        assert!(!entry.uses_data_descriptor());
    }

    #[test]
    fn test_store_level() {
        let options = SaveOptions::default().compression(CompressionLevel::Store);
        let (archive, _) = write_archive(options, &[("a.txt", b"aaaaaaaaaa")]);
        let entry = &archive.entries()[0];
        assert_eq!(entry.method, CompressionMethod::Stored);
        assert_eq!(entry.compressed_size, 10);
    }

    #[test]
    fn test_directory_entry() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()), SaveOptions::default()).unwrap();
        writer.add_directory("docs").unwrap();
        let (archive, _) = writer.finish().unwrap();

        let entry = &archive.entries()[0];
        assert_eq!(entry.name, "docs/");
        assert!(entry.is_dir());
        assert_eq!(entry.method, CompressionMethod::Stored);
        assert_eq!(entry.external_attributes, (0o40755 << 16) | 0x10);
        assert_eq!(entry.version_needed, VERSION_DEFLATE);
    }

    #[test]
    fn test_streaming_uses_descriptor() {
        let mut writer = ZipWriter::new_streaming(Vec::new(), SaveOptions::default()).unwrap();
        writer.add_file("a.txt", b"streamed content").unwrap();
        let (archive, bytes) = writer.finish().unwrap();

        let entry = &archive.entries()[0];
        assert!(entry.uses_data_descriptor());
        let header = LocalFileHeader::read(&mut &bytes[..]).unwrap();
        assert_eq!(header.crc32, 0);
        assert_eq!(header.compressed_size, 0);
        assert!(header.has_data_descriptor());
    }

    #[test]
    fn test_streaming_rejects_patch_in_place() {
        let options = SaveOptions::default().header_strategy(HeaderStrategy::PatchInPlace);
        let err = ZipWriter::new_streaming(Vec::new(), options).err().unwrap();
        assert!(matches!(err, ZipError::StreamCapability { .. }));
    }

    #[test]
    fn test_zipcrypto_forces_descriptor() {
        let options = SaveOptions::default().encryption(EncryptionMethod::ZipCrypto, "pw");
        let (archive, _) = write_archive(options, &[("a.txt", b"secret")]);
        let entry = &archive.entries()[0];
        assert!(entry.uses_data_descriptor());
        assert!(entry.is_encrypted());
        assert_eq!(entry.compressed_size, entry.compressed_data_size() + 12);
    }

    #[test]
    fn test_aes_entry_fields() {
        let options = SaveOptions::default().encryption(EncryptionMethod::Aes256, "pw");
        let (archive, bytes) = write_archive(options, &[("a.txt", b"secret")]);
        let entry = &archive.entries()[0];
        assert_eq!(entry.version_needed, VERSION_AES);
        assert_eq!(entry.aes_vendor_version, Some(1));
        assert!(extra::find(&entry.extra, crate::extra::AES_EXTRA_ID).is_some());

        let header = LocalFileHeader::read(&mut &bytes[..]).unwrap();
        assert_eq!(header.method, METHOD_AES);
    }

    #[test]
    fn test_missing_password_rejected_before_writing() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()), SaveOptions::default()).unwrap();
        let err = writer
            .add_entry(
                EntryOptions::new("a.txt").encryption(EncryptionMethod::ZipCrypto),
                &mut &b"data"[..],
            )
            .unwrap_err();
        assert!(matches!(err, ZipError::BadPassword { .. }));

        // The writer is still usable.
        writer.add_file("b.txt", b"data").unwrap();
        let (archive, _) = writer.finish().unwrap();
        assert_eq!(archive.len(), 1);
    }

    #[test]
    fn test_always_policy_marks_everything() {
        let options = SaveOptions::default().zip64(Zip64Policy::Always);
        let (archive, bytes) = write_archive(options, &[("tiny.txt", b"x")]);
        assert!(archive.output_used_zip64());

        let entry = &archive.entries()[0];
        assert!(entry.zip64);
        assert_eq!(entry.version_needed, VERSION_ZIP64);
        assert!(extra::find(&entry.extra, ZIP64_EXTRA_ID).is_some());

        let header = LocalFileHeader::read(&mut &bytes[..]).unwrap();
        assert_eq!(header.compressed_size, ZIP64_MARKER_32);
        let local_zip64 = extra::find(&header.extra, ZIP64_EXTRA_ID).unwrap();
        let values = Zip64Extra::parse(local_zip64, true, true, false, false).unwrap();
        assert_eq!(values.uncompressed_size, Some(1));
        assert_eq!(values.compressed_size, Some(entry.compressed_size));
    }

    #[test]
    fn test_never_rejects_large_hint() {
        let options = SaveOptions::default().zip64(Zip64Policy::Never);
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()), options).unwrap();
        let err = writer
            .add_entry(
                EntryOptions::new("big.bin").size_hint(5 * 1024 * 1024 * 1024),
                &mut io::empty(),
            )
            .unwrap_err();
        assert!(matches!(err, ZipError::Overflow { .. }));
    }

    #[test]
    fn test_as_necessary_matches_never_without_overflow() {
        let files: &[(&str, &[u8])] = &[("a.txt", b"alpha"), ("b/c.txt", b"gamma gamma")];
        let (_, lazy) = write_archive(SaveOptions::default(), files);
        let (_, never) = write_archive(SaveOptions::default().zip64(Zip64Policy::Never), files);
        assert_eq!(lazy, never);
    }

    #[test]
    fn test_utf8_flag() {
        let (archive, _) = write_archive(SaveOptions::default(), &[("café.txt", b"x")]);
        assert!(archive.entries()[0].is_utf8());
        let (archive, _) = write_archive(SaveOptions::default(), &[("cafe.txt", b"x")]);
        assert!(!archive.entries()[0].is_utf8());
    }

    #[test]
    fn test_drop_finishes_archive() {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = ZipWriter::new(&mut buf, SaveOptions::default()).unwrap();
            writer.add_file("a.txt", b"data").unwrap();
        }
        let bytes = buf.into_inner();
        assert_eq!(u32::from_le_bytes(bytes[0..4].try_into().unwrap()), LOCAL_FILE_HEADER_SIG);
        let tail = &bytes[bytes.len() - 22..];
        assert_eq!(u32::from_le_bytes(tail[0..4].try_into().unwrap()), END_OF_CENTRAL_DIR_SIG);
    }

    #[test]
    fn test_cancel_at_second_entry() {
        let handler = |event: &ProgressEvent| match event {
            ProgressEvent::EntryStarted { index: 1, .. } => Flow::Cancel,
            _ => Flow::Continue,
        };
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()), SaveOptions::default())
            .unwrap()
            .with_progress(handler);
        writer.add_file("one.txt", b"first").unwrap();
        let err = writer.add_file("two.txt", b"second").unwrap_err();
        assert!(err.is_cancelled());
        assert!(writer.add_file("three.txt", b"third").unwrap_err().is_cancelled());

        let (archive, _) = writer.finish().unwrap();
        assert_eq!(archive.len(), 1);
        assert_eq!(archive.entries()[0].name, "one.txt");
    }

    #[test]
    fn test_version_needed() {
        use CompressionMethod::*;
        assert_eq!(version_needed(Stored, EncryptionMethod::None, false, false), 10);
        assert_eq!(version_needed(Deflate, EncryptionMethod::None, false, false), 20);
        assert_eq!(version_needed(Stored, EncryptionMethod::ZipCrypto, false, false), 20);
        assert_eq!(version_needed(Deflate, EncryptionMethod::None, false, true), 45);
        assert_eq!(version_needed(Deflate, EncryptionMethod::Aes128, false, true), 51);
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("/abs/path.txt"), "abs/path.txt");
        assert_eq!(normalize_name("win\\style\\"), "win/style/");
    }
}
