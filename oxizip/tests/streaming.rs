//! Write-only sinks and data descriptors.

use chrono::{NaiveDate, NaiveDateTime};
use oxizip::header::{DATA_DESCRIPTOR_SIG, DataDescriptor, LocalFileHeader};
use oxizip::{
    EncryptionMethod, EntryOptions, HeaderStrategy, ReadOptions, SaveOptions, Zip64Policy,
    ZipError, ZipReader, ZipWriter,
};
use std::io::{self, Cursor, Write};

/// A sink that can only be appended to.
#[derive(Default)]
struct Pipe {
    bytes: Vec<u8>,
    flushes: usize,
}

impl Write for Pipe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // Short writes, as a socket might do.
        let n = buf.len().min(1000);
        self.bytes.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flushes += 1;
        Ok(())
    }
}

fn fixed_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2021, 7, 4)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

fn contents() -> Vec<(&'static str, Vec<u8>)> {
    vec![
        ("readme.md", b"# Streaming\n\nNo seeking here.\n".to_vec()),
        ("logs/", Vec::new()),
        ("logs/app.log", "INFO started\nDEBUG tick\n".repeat(3000).into_bytes()),
        ("empty.dat", Vec::new()),
        ("bytes.bin", (0..=255u8).cycle().take(300_000).collect()),
    ]
}

fn fill<W: Write>(writer: &mut ZipWriter<W>) {
    for (name, data) in contents() {
        let options = EntryOptions::new(name).modified(fixed_time());
        writer.add_entry(options, &mut &data[..]).unwrap();
    }
}

#[test]
fn test_streaming_matches_seekable() {
    let mut seekable = ZipWriter::new(Cursor::new(Vec::new()), SaveOptions::default()).unwrap();
    fill(&mut seekable);
    let (seek_archive, sink) = seekable.finish().unwrap();

    let mut streaming = ZipWriter::new_streaming(Pipe::default(), SaveOptions::default()).unwrap();
    assert!(!streaming.is_seekable());
    fill(&mut streaming);
    let (stream_archive, pipe) = streaming.finish().unwrap();
    assert!(pipe.flushes >= 1);

    for (a, b) in seek_archive.entries().iter().zip(stream_archive.entries()) {
        assert_eq!(a.name, b.name);
        assert_eq!(a.crc32, b.crc32);
        assert_eq!(a.uncompressed_size, b.uncompressed_size);
        assert_eq!(a.compressed_size, b.compressed_size);
    }

    let mut from_seek = ZipReader::new(Cursor::new(sink.into_inner())).unwrap();
    let mut from_stream = ZipReader::new(Cursor::new(pipe.bytes)).unwrap();
    assert_eq!(from_seek.len(), from_stream.len());
    for (name, data) in contents() {
        let streamed = from_stream.entry_by_name(name).unwrap();
        // Only entries with content defer their sizes.
        assert_eq!(streamed.uses_data_descriptor(), !data.is_empty(), "{name}");
        assert!(!from_seek.entry_by_name(name).unwrap().uses_data_descriptor());

        assert_eq!(from_seek.extract_by_name(name).unwrap(), data);
        assert_eq!(from_stream.extract_by_name(name).unwrap(), data);
    }
}

#[test]
fn test_descriptor_follows_data() {
    let mut writer = ZipWriter::new_streaming(Vec::new(), SaveOptions::default()).unwrap();
    writer
        .add_entry(
            EntryOptions::new("a.txt").modified(fixed_time()),
            &mut &b"descriptor please"[..],
        )
        .unwrap();
    let (archive, bytes) = writer.finish().unwrap();
    let entry = &archive.entries()[0];

    let header = LocalFileHeader::read(&mut &bytes[..]).unwrap();
    assert!(header.has_data_descriptor());
    assert_eq!(header.crc32, 0);

    let at = (header.written_len() + entry.compressed_size) as usize;
    let sig = u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap());
    assert_eq!(sig, DATA_DESCRIPTOR_SIG);
    let descriptor = DataDescriptor::read(&mut &bytes[at..], false).unwrap();
    assert_eq!(descriptor.crc32, entry.crc32);
    assert_eq!(descriptor.compressed_size, entry.compressed_size);
    assert_eq!(descriptor.uncompressed_size, 17);
}

#[test]
fn test_zip64_descriptor_when_streaming() {
    let options = SaveOptions::default().zip64(Zip64Policy::Always);
    let mut writer = ZipWriter::new_streaming(Vec::new(), options).unwrap();
    writer.add_file("a.txt", b"sixty-four").unwrap();
    let (archive, bytes) = writer.finish().unwrap();
    let entry = &archive.entries()[0];

    let header = LocalFileHeader::read(&mut &bytes[..]).unwrap();
    let at = (header.written_len() + entry.compressed_size) as usize;
    // Signature, CRC, then two 8-byte sizes.
    let uncompressed = u64::from_le_bytes(bytes[at + 16..at + 24].try_into().unwrap());
    assert_eq!(uncompressed, 10);

    let mut reader = ZipReader::new(Cursor::new(bytes)).unwrap();
    assert_eq!(reader.extract_by_name("a.txt").unwrap(), b"sixty-four");
}

#[test]
fn test_descriptor_strategy_on_seekable_sink() {
    let options = SaveOptions::default().header_strategy(HeaderStrategy::DataDescriptor);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()), options).unwrap();
    assert!(writer.is_seekable());
    fill(&mut writer);
    let bytes = writer.into_inner().unwrap().into_inner();

    let mut reader = ZipReader::new(Cursor::new(bytes)).unwrap();
    for (name, data) in contents() {
        let entry = reader.entry_by_name(name).unwrap().clone();
        assert_eq!(entry.uses_data_descriptor(), !data.is_empty(), "{name}");
        assert_eq!(reader.extract(&entry).unwrap(), data);
    }
}

#[test]
fn test_streaming_encrypted() {
    for method in [EncryptionMethod::ZipCrypto, EncryptionMethod::Aes256] {
        let options = SaveOptions::default().encryption(method, "pipe");
        let mut writer = ZipWriter::new_streaming(Vec::new(), options).unwrap();
        fill(&mut writer);
        let (_, bytes) = writer.finish().unwrap();

        let options = ReadOptions::default().password("pipe");
        let mut reader = ZipReader::with_options(Cursor::new(bytes), options).unwrap();
        for (name, data) in contents() {
            let entry = reader.entry_by_name(name).unwrap().clone();
            assert_eq!(entry.is_encrypted(), !entry.is_dir(), "{method}: {name}");
            assert!(entry.is_dir() || entry.uses_data_descriptor());
            assert_eq!(reader.extract(&entry).unwrap(), data, "{method}: {name}");
        }
    }
}

#[test]
fn test_streaming_refuses_patching() {
    let options = SaveOptions::default().header_strategy(HeaderStrategy::PatchInPlace);
    let err = ZipWriter::new_streaming(Pipe::default(), options).err().unwrap();
    assert!(matches!(err, ZipError::StreamCapability { .. }));

    // A seekable sink is fine with it.
    let options = SaveOptions::default().header_strategy(HeaderStrategy::PatchInPlace);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()), options).unwrap();
    writer.add_file("a.txt", b"patched").unwrap();
    let (archive, _) = writer.finish().unwrap();
    assert!(!archive.entries()[0].uses_data_descriptor());
}
