//! Traditional PKWARE encryption ("ZipCrypto").
//!
//! **Security Warning**: this cipher is cryptographically weak and is only
//! offered for compatibility with legacy tools. It falls to known-plaintext
//! attacks. Prefer WinZip AES ([`crate::aes`]) for anything that matters.
//!
//! ## Algorithm
//!
//! - Three 32-bit keys seeded to fixed values, then mixed with each password
//!   byte through the CRC-32 table and a linear congruential step
//! - Each data byte is XORed with a keystream byte derived from `key2`, and
//!   the keys are then updated with the plaintext byte
//! - Entry data is prefixed with a 12-byte encrypted header: 11 random bytes
//!   followed by a check byte for fast password rejection
//!
//! ## Example
//!
//! ```rust
//! use oxizip::crypto::ZipCrypto;
//!
//! let mut data = *b"Hello";
//! ZipCrypto::new(b"secret").encrypt_in_place(&mut data);
//! assert_eq!(data, [0x80, 0x75, 0xF6, 0x32, 0x20]);
//!
//! ZipCrypto::new(b"secret").decrypt_in_place(&mut data);
//! assert_eq!(&data, b"Hello");
//! ```

use std::io::{self, Read, Write};

use rand::RngCore;
use rand::rngs::OsRng;

use oxizip_core::error::{Result, ZipError};

/// CRC-32 table (reflected polynomial 0xEDB88320) used by the key schedule.
///
/// The schedule needs the raw register update without pre/post inversion,
/// which a streaming CRC hasher does not expose.
const KEY_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0usize;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB88320
            } else {
                crc >> 1
            };
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

const INITIAL_KEYS: [u32; 3] = [0x12345678, 0x23456789, 0x34567890];

/// Size of the encryption header in bytes.
pub const HEADER_LEN: usize = 12;

#[inline]
fn crc32_step(crc: u32, byte: u8) -> u32 {
    KEY_TABLE[((crc ^ byte as u32) & 0xFF) as usize] ^ (crc >> 8)
}

/// What the decrypted encryption header must end with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordCheck {
    /// Last header byte (current encoders).
    Byte(u8),
    /// Last two header bytes, little-endian (encoders predating 2.0).
    Word(u16),
}

impl PasswordCheck {
    /// Check value derived from the entry's CRC-32.
    pub fn from_crc(crc32: u32, two_bytes: bool) -> Self {
        if two_bytes {
            Self::Word((crc32 >> 16) as u16)
        } else {
            Self::Byte((crc32 >> 24) as u8)
        }
    }

    /// Check value derived from the entry's DOS modification time, used when
    /// sizes and CRC are deferred to a data descriptor.
    pub fn from_dos_time(time: u16, two_bytes: bool) -> Self {
        if two_bytes {
            Self::Word(time)
        } else {
            Self::Byte((time >> 8) as u8)
        }
    }

    fn matches(self, header: &[u8; HEADER_LEN]) -> bool {
        match self {
            Self::Byte(b) => header[11] == b,
            Self::Word(w) => u16::from_le_bytes([header[10], header[11]]) == w,
        }
    }
}

/// ZipCrypto key state.
#[derive(Clone)]
pub struct ZipCrypto {
    keys: [u32; 3],
}

impl std::fmt::Debug for ZipCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipCrypto").finish_non_exhaustive()
    }
}

impl ZipCrypto {
    /// Create a cipher keyed with `password`.
    #[must_use]
    pub fn new(password: &[u8]) -> Self {
        let mut cipher = Self { keys: INITIAL_KEYS };
        for &byte in password {
            cipher.update_keys(byte);
        }
        cipher
    }

    #[inline]
    fn update_keys(&mut self, byte: u8) {
        let [k0, k1, k2] = &mut self.keys;
        *k0 = crc32_step(*k0, byte);
        *k1 = k1
            .wrapping_add(*k0 & 0xFF)
            .wrapping_mul(134775813)
            .wrapping_add(1);
        *k2 = crc32_step(*k2, (*k1 >> 24) as u8);
    }

    #[inline]
    fn keystream_byte(&self) -> u8 {
        let temp = (self.keys[2] | 2) as u16;
        (temp.wrapping_mul(temp ^ 1) >> 8) as u8
    }

    /// Encrypt one byte.
    #[inline]
    pub fn encrypt_byte(&mut self, plain: u8) -> u8 {
        let cipher = plain ^ self.keystream_byte();
        self.update_keys(plain);
        cipher
    }

    /// Decrypt one byte.
    #[inline]
    pub fn decrypt_byte(&mut self, cipher: u8) -> u8 {
        let plain = cipher ^ self.keystream_byte();
        self.update_keys(plain);
        plain
    }

    /// Encrypt a buffer in place.
    pub fn encrypt_in_place(&mut self, buf: &mut [u8]) {
        for byte in buf {
            *byte = self.encrypt_byte(*byte);
        }
    }

    /// Decrypt a buffer in place.
    pub fn decrypt_in_place(&mut self, buf: &mut [u8]) {
        for byte in buf {
            *byte = self.decrypt_byte(*byte);
        }
    }

    /// Build the encrypted 12-byte header from 11 random bytes and a check byte.
    pub fn encrypt_header(&mut self, random: &[u8; 11], check: u8) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        header[..11].copy_from_slice(random);
        header[11] = check;
        self.encrypt_in_place(&mut header);
        header
    }

    /// Decrypt a header and test it against the expected check value.
    ///
    /// The cipher state advances past the header either way.
    pub fn check_header(&mut self, mut header: [u8; HEADER_LEN], check: PasswordCheck) -> bool {
        self.decrypt_in_place(&mut header);
        check.matches(&header)
    }
}

/// Writer that encrypts everything written through it.
///
/// The encryption header is emitted on construction.
pub struct ZipCryptoWriter<W: Write> {
    inner: W,
    cipher: ZipCrypto,
    buf: Vec<u8>,
}

impl<W: Write> ZipCryptoWriter<W> {
    /// Write the encryption header to `inner` and return the writer.
    ///
    /// `check` is the last header byte: the high byte of the CRC-32 or, for
    /// entries using a data descriptor, of the DOS modification time.
    pub fn new(mut inner: W, password: &[u8], check: u8) -> io::Result<Self> {
        let mut random = [0u8; 11];
        OsRng.fill_bytes(&mut random);

        let mut cipher = ZipCrypto::new(password);
        let header = cipher.encrypt_header(&random, check);
        inner.write_all(&header)?;

        Ok(Self {
            inner,
            cipher,
            buf: Vec::new(),
        })
    }

    /// Consume the writer and return the inner writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for ZipCryptoWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.clear();
        self.buf.extend_from_slice(buf);
        self.cipher.encrypt_in_place(&mut self.buf);
        self.inner.write_all(&self.buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Reader that decrypts everything read through it.
///
/// The encryption header is consumed and verified on construction.
pub struct ZipCryptoReader<R: Read> {
    inner: R,
    cipher: ZipCrypto,
}

impl<R: Read> ZipCryptoReader<R> {
    /// Read and verify the encryption header.
    ///
    /// Fails with [`ZipError::BadPassword`] when the check value does not
    /// match; no plaintext has been produced at that point.
    pub fn new(mut inner: R, password: &[u8], check: PasswordCheck, name: &str) -> Result<Self> {
        let mut header = [0u8; HEADER_LEN];
        inner.read_exact(&mut header).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                ZipError::format(format!("{name}: encrypted data shorter than its header"))
            } else {
                ZipError::Io(e)
            }
        })?;

        let mut cipher = ZipCrypto::new(password);
        if !cipher.check_header(header, check) {
            return Err(ZipError::bad_password(name));
        }

        Ok(Self { inner, cipher })
    }

    /// Get a mutable reference to the inner reader.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Consume the reader and return the inner reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for ZipCryptoReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.cipher.decrypt_in_place(&mut buf[..n]);
        Ok(n)
    }
}
