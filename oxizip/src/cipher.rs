//! Per-entry encryption dispatch.
//!
//! The scheme is picked once when an entry starts; afterwards the stream
//! stages only see `Write` / `Read`.

use crate::aes::{AesReader, AesWriter};
use crate::crypto::{PasswordCheck, ZipCryptoReader, ZipCryptoWriter};
use crate::model::{EncryptionMethod, Password, ZipEntry};
use oxizip_core::{Result, ZipError};
use std::io::{self, Read, Write};

/// Encrypting writer for one entry.
pub enum EntryEncryptor<W: Write> {
    /// Plain entry.
    None(W),
    /// Legacy stream cipher.
    ZipCrypto(ZipCryptoWriter<W>),
    /// WinZip AES.
    Aes(AesWriter<W>),
}

impl<W: Write> EntryEncryptor<W> {
    /// Start an entry, writing the scheme's header to `inner`.
    ///
    /// `check` is the legacy cipher's check byte.
    pub fn new(
        inner: W,
        method: EncryptionMethod,
        password: Option<&Password>,
        check: u8,
        name: &str,
    ) -> Result<Self> {
        if method == EncryptionMethod::None {
            return Ok(Self::None(inner));
        }
        let password = password.ok_or_else(|| ZipError::bad_password(name))?;

        match method.aes_strength() {
            Some(strength) => Ok(Self::Aes(AesWriter::new(
                inner,
                password.as_bytes(),
                strength,
            )?)),
            None => Ok(Self::ZipCrypto(ZipCryptoWriter::new(
                inner,
                password.as_bytes(),
                check,
            )?)),
        }
    }

    /// Emit any trailer and return the inner writer.
    pub fn finish(self) -> io::Result<W> {
        match self {
            Self::None(inner) => Ok(inner),
            Self::ZipCrypto(writer) => Ok(writer.into_inner()),
            Self::Aes(writer) => writer.finish(),
        }
    }
}

impl<W: Write> Write for EntryEncryptor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::None(inner) => inner.write(buf),
            Self::ZipCrypto(writer) => writer.write(buf),
            Self::Aes(writer) => writer.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::None(inner) => inner.flush(),
            Self::ZipCrypto(writer) => writer.flush(),
            Self::Aes(writer) => writer.flush(),
        }
    }
}

/// Decrypting reader for one entry.
pub enum EntryDecryptor<R: Read> {
    /// Plain entry.
    None(R),
    /// Legacy stream cipher.
    ZipCrypto(ZipCryptoReader<R>),
    /// WinZip AES.
    Aes(AesReader<R>),
}

impl<R: Read> EntryDecryptor<R> {
    /// Consume the scheme's header from `inner` and verify the password.
    ///
    /// `inner` must be bounded to the entry's stored bytes. Fails with
    /// [`ZipError::BadPassword`] before any plaintext is produced.
    pub fn new(inner: R, entry: &ZipEntry, password: Option<&Password>) -> Result<Self> {
        if !entry.is_encrypted() {
            return Ok(Self::None(inner));
        }
        let password = password.ok_or_else(|| ZipError::bad_password(&entry.name))?;

        match entry.encryption.aes_strength() {
            Some(strength) => {
                let data_len = entry
                    .compressed_size
                    .checked_sub(strength.overhead())
                    .ok_or_else(|| {
                        ZipError::format(format!(
                            "{}: stored size {} is smaller than the AES overhead",
                            entry.name, entry.compressed_size
                        ))
                    })?;
                Ok(Self::Aes(AesReader::new(
                    inner,
                    password.as_bytes(),
                    strength,
                    data_len,
                    &entry.name,
                )?))
            }
            None => {
                let check = password_check(entry);
                Ok(Self::ZipCrypto(ZipCryptoReader::new(
                    inner,
                    password.as_bytes(),
                    check,
                    &entry.name,
                )?))
            }
        }
    }

    /// Check any trailer and return the inner reader, along with whether
    /// the entry authenticated. Schemes without a trailer always do.
    pub fn finish(self) -> Result<(R, bool)> {
        match self {
            Self::None(inner) => Ok((inner, true)),
            Self::ZipCrypto(reader) => Ok((reader.into_inner(), true)),
            Self::Aes(reader) => reader.finish(),
        }
    }
}

impl<R: Read> Read for EntryDecryptor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::None(inner) => inner.read(buf),
            Self::ZipCrypto(reader) => reader.read(buf),
            Self::Aes(reader) => reader.read(buf),
        }
    }
}

/// The legacy cipher's header check for `entry`.
///
/// Entries written with a data descriptor check against the DOS time;
/// entries needing a version before 2.0 were written with a two-byte check.
pub(crate) fn password_check(entry: &ZipEntry) -> PasswordCheck {
    let two_bytes = entry.version_needed < crate::header::VERSION_DEFLATE;
    if entry.uses_data_descriptor() {
        PasswordCheck::from_dos_time(entry.modified.time, two_bytes)
    } else {
        PasswordCheck::from_crc(entry.crc32, two_bytes)
    }
}
