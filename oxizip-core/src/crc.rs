//! CRC-32 (ISO 3309) checksum unit.
//!
//! ZIP records a CRC-32 of every entry's uncompressed content. [`Crc32`] is
//! the incremental calculator; [`CrcReader`] and [`CrcWriter`] fold it into a
//! byte stream so the writer can checksum content while compressing it and the
//! reader can checksum content while handing it to the caller.
//!
//! The table-driven arithmetic is delegated to `crc32fast`, which picks a
//! SIMD implementation at runtime when the CPU has one.

use std::fmt;
use std::io::{self, Read, Write};

use crc32fast::Hasher;

/// CRC-32 calculator (ISO 3309).
///
/// - Polynomial: 0x04C11DB7 (reflected: 0xEDB88320)
/// - Initial value: 0xFFFFFFFF
/// - Final XOR: 0xFFFFFFFF
///
/// # Example
///
/// ```
/// use oxizip_core::crc::Crc32;
///
/// let mut crc = Crc32::new();
/// crc.update(b"Hello, ");
/// crc.update(b"World!");
/// assert_eq!(crc.finalize(), 0xEC4AC3D0);
/// ```
#[derive(Clone, Default)]
pub struct Crc32 {
    hasher: Hasher,
}

impl fmt::Debug for Crc32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Crc32")
            .field("value", &format_args!("{:#010x}", self.value()))
            .finish()
    }
}

impl Crc32 {
    /// Create a new CRC-32 calculator.
    pub fn new() -> Self {
        Self {
            hasher: Hasher::new(),
        }
    }

    /// Reset the CRC to its initial state.
    pub fn reset(&mut self) {
        self.hasher.reset();
    }

    /// Update the CRC with more data.
    #[inline]
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Get the current CRC value without consuming the calculator.
    #[inline]
    pub fn value(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Finalize and return the CRC value.
    #[inline]
    pub fn finalize(self) -> u32 {
        self.hasher.finalize()
    }

    /// Compute CRC-32 for a slice in one call.
    #[inline]
    pub fn compute(data: &[u8]) -> u32 {
        let mut crc = Self::new();
        crc.update(data);
        crc.finalize()
    }
}

/// Reader adapter that checksums and counts every byte read through it.
///
/// Unlike a verifying reader it never fails on its own; the caller decides
/// when the stream is complete and compares [`CrcReader::crc`] against the
/// expected value.
#[derive(Debug)]
pub struct CrcReader<R> {
    inner: R,
    crc: Crc32,
    count: u64,
}

impl<R> CrcReader<R> {
    /// Wrap a reader.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            crc: Crc32::new(),
            count: 0,
        }
    }

    /// CRC of the bytes read so far.
    pub fn crc(&self) -> u32 {
        self.crc.value()
    }

    /// Number of bytes read so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Get a mutable reference to the inner reader.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Consume the adapter and return the inner reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for CrcReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.crc.update(&buf[..n]);
        self.count += n as u64;
        Ok(n)
    }
}

/// Writer adapter that checksums and counts every byte written through it.
#[derive(Debug)]
pub struct CrcWriter<W> {
    inner: W,
    crc: Crc32,
    count: u64,
}

impl<W> CrcWriter<W> {
    /// Wrap a writer.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            crc: Crc32::new(),
            count: 0,
        }
    }

    /// CRC of the bytes written so far.
    pub fn crc(&self) -> u32 {
        self.crc.value()
    }

    /// Number of bytes written so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Consume the adapter and return the inner writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CrcWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.crc.update(&buf[..n]);
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
