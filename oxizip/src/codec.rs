//! Compression stage for entry data.
//!
//! Stored data passes through untouched; deflate is delegated to `flate2`.

use crate::model::CompressionMethod;
use crate::options::CompressionLevel;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use oxizip_core::{Result, ZipError};
use std::io::{self, Read, Write};

/// Compressing writer for one entry.
pub enum Compressor<W: Write> {
    /// Pass-through.
    Stored(W),
    /// Raw deflate.
    Deflate(DeflateEncoder<W>),
}

impl<W: Write> Compressor<W> {
    /// Wrap `inner` for `method`.
    pub fn new(inner: W, method: CompressionMethod, level: CompressionLevel) -> Result<Self> {
        match method {
            CompressionMethod::Stored => Ok(Self::Stored(inner)),
            CompressionMethod::Deflate => {
                Ok(Self::Deflate(DeflateEncoder::new(inner, level.to_flate2())))
            }
            CompressionMethod::Unknown(id) => {
                Err(ZipError::unsupported_method(format!("compression method {id}")))
            }
        }
    }

    /// Flush the final block and return the inner writer.
    pub fn finish(self) -> io::Result<W> {
        match self {
            Self::Stored(inner) => Ok(inner),
            Self::Deflate(encoder) => encoder.finish(),
        }
    }
}

impl<W: Write> Write for Compressor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Stored(inner) => inner.write(buf),
            Self::Deflate(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Stored(inner) => inner.flush(),
            Self::Deflate(encoder) => encoder.flush(),
        }
    }
}

/// Decompressing reader for one entry.
pub enum Decompressor<R: Read> {
    /// Pass-through.
    Stored(R),
    /// Raw inflate.
    Deflate(DeflateDecoder<R>),
}

impl<R: Read> Decompressor<R> {
    /// Wrap `inner` for `method`.
    pub fn new(inner: R, method: CompressionMethod) -> Result<Self> {
        match method {
            CompressionMethod::Stored => Ok(Self::Stored(inner)),
            CompressionMethod::Deflate => Ok(Self::Deflate(DeflateDecoder::new(inner))),
            CompressionMethod::Unknown(id) => {
                Err(ZipError::unsupported_method(format!("compression method {id}")))
            }
        }
    }

    /// Return the inner reader.
    ///
    /// Input the inflater buffered past the end of the deflate stream is
    /// lost; the caller bounds `inner` to the entry's data.
    pub fn into_inner(self) -> R {
        match self {
            Self::Stored(inner) => inner,
            Self::Deflate(decoder) => decoder.into_inner(),
        }
    }
}

impl<R: Read> Read for Decompressor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Stored(inner) => inner.read(buf),
            Self::Deflate(decoder) => decoder.read(buf),
        }
    }
}

/// Whether an I/O error from the decompression stage means the compressed
/// stream itself is damaged.
pub(crate) fn is_corrupt_stream(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::UnexpectedEof
    )
}
