//! Damaged archives.

use oxizip::header::LocalFileHeader;
use oxizip::{
    CompressionLevel, ErrorPolicy, ReadOptions, SaveOptions, ZipEntry, ZipError, ZipReader,
    ZipWriter,
};
use std::io::Cursor;

fn build(level: CompressionLevel, files: &[(&str, &[u8])]) -> Vec<u8> {
    let options = SaveOptions::default().compression(level);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()), options).unwrap();
    for (name, data) in files {
        writer.add_file(name, data).unwrap();
    }
    writer.into_inner().unwrap().into_inner()
}

fn data_start(bytes: &[u8], entry: &ZipEntry) -> usize {
    let at = entry.header_offset as usize;
    let header = LocalFileHeader::read(&mut &bytes[at..]).unwrap();
    at + header.written_len() as usize
}

#[test]
fn test_flipped_stored_byte() {
    let text = "stored and about to be damaged ".repeat(20);
    let mut bytes = build(CompressionLevel::Store, &[("a.txt", text.as_bytes())]);
    let entry = ZipReader::new(Cursor::new(bytes.clone())).unwrap().entries()[0].clone();
    let at = data_start(&bytes, &entry) + 42;
    bytes[at] ^= 0x20;

    let mut reader = ZipReader::new(Cursor::new(bytes)).unwrap();
    let err = reader.extract(&entry).unwrap_err();
    match &err {
        ZipError::CrcMismatch {
            name,
            expected,
            computed,
        } => {
            assert_eq!(name, "a.txt");
            assert_eq!(*expected, entry.crc32);
            assert_ne!(expected, computed);
        }
        other => panic!("expected CrcMismatch, got {other:?}"),
    }
    assert!(err.is_corruption());
}

#[test]
fn test_flipped_deflate_byte() {
    let text = "deflated text that will not survive a flipped bit. ".repeat(400);
    let mut bytes = build(CompressionLevel::Normal, &[("b.txt", text.as_bytes())]);
    let entry = ZipReader::new(Cursor::new(bytes.clone())).unwrap().entries()[0].clone();
    let at = data_start(&bytes, &entry) + (entry.compressed_size / 2) as usize;
    bytes[at] ^= 0xFF;

    let mut reader = ZipReader::new(Cursor::new(bytes)).unwrap();
    let err = reader.extract(&entry).unwrap_err();
    assert!(matches!(err, ZipError::CrcMismatch { .. }), "{err:?}");
}

#[test]
fn test_garbage_deflate_stream() {
    let text = "z".repeat(5000);
    let mut bytes = build(CompressionLevel::Normal, &[("c.txt", text.as_bytes())]);
    let entry = ZipReader::new(Cursor::new(bytes.clone())).unwrap().entries()[0].clone();
    let start = data_start(&bytes, &entry);
    for byte in &mut bytes[start..start + entry.compressed_size as usize] {
        *byte = 0xFF;
    }

    let mut reader = ZipReader::new(Cursor::new(bytes)).unwrap();
    let err = reader.extract(&entry).unwrap_err();
    assert!(matches!(err, ZipError::CrcMismatch { .. }), "{err:?}");
}

#[test]
fn test_truncated_archive() {
    let bytes = build(
        CompressionLevel::Normal,
        &[("a.txt", b"some content"), ("b.txt", b"more content")],
    );
    for keep in [bytes.len() / 2, bytes.len() - 10, 21, 0] {
        let err = ZipReader::new(Cursor::new(bytes[..keep].to_vec()))
            .err()
            .unwrap_or_else(|| panic!("opened an archive truncated to {keep} bytes"));
        assert!(matches!(err, ZipError::Format { .. }), "{keep}: {err:?}");
    }
}

#[test]
fn test_central_directory_out_of_range() {
    let mut bytes = build(CompressionLevel::Normal, &[("a.txt", b"content")]);
    let eocd = bytes.len() - 22;
    // Central directory offset field.
    bytes[eocd + 16..eocd + 20].copy_from_slice(&0x00FF_0000u32.to_le_bytes());
    let err = ZipReader::new(Cursor::new(bytes)).err().unwrap();
    assert!(matches!(err, ZipError::Format { .. }), "{err:?}");
}

#[test]
fn test_bad_local_signature() {
    let mut bytes = build(CompressionLevel::Normal, &[("a.txt", b"content")]);
    bytes[0] = b'X';
    let mut reader = ZipReader::new(Cursor::new(bytes)).unwrap();
    let err = reader.extract_by_name("a.txt").unwrap_err();
    assert!(matches!(err, ZipError::Format { .. }), "{err:?}");
}

#[test]
fn test_continue_past_damaged_entry() {
    let mut bytes = build(
        CompressionLevel::Store,
        &[("good.txt", b"good content"), ("bad.txt", b"bad content"), ("fine.txt", b"fine")],
    );
    let reader = ZipReader::new(Cursor::new(bytes.clone())).unwrap();
    let bad = reader.entry_by_name("bad.txt").unwrap().clone();
    let at = data_start(&bytes, &bad);
    bytes[at] ^= 0x01;

    let options = ReadOptions::default().error_policy(ErrorPolicy::Continue);
    let mut reader = ZipReader::with_options(Cursor::new(bytes), options).unwrap();
    let report = reader
        .extract_all(|_entry: &ZipEntry| Ok(Some(Vec::<u8>::new())))
        .unwrap();
    assert_eq!(report.extracted, vec!["good.txt", "fine.txt"]);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].1.is_corruption());
}
