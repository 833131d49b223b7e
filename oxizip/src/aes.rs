//! WinZip AES encryption (AE-1 / AE-2).
//!
//! Layout of an AES-encrypted entry's data:
//!
//! ```text
//! [salt: 8/12/16] [verifier: 2] [AES-CTR ciphertext] [HMAC-SHA1: 10]
//! ```
//!
//! - Key material: PBKDF2-HMAC-SHA1, 1000 iterations, yielding the AES key,
//!   an HMAC key of the same length, and a 2-byte password verifier
//! - Cipher: AES in CTR mode with a little-endian 128-bit counter starting
//!   at 1
//! - Authentication: HMAC-SHA1 over the ciphertext, truncated to 10 bytes
//!
//! AE-1 entries also record the CRC-32 of the plaintext; AE-2 entries store
//! zero there and rely on the HMAC alone.

use std::io::{self, Read, Take, Write};

use aes::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use log::debug;
use rand::RngCore;
use rand::rngs::OsRng;
use sha1::Sha1;
use zeroize::Zeroizing;

use oxizip_core::error::{Result, ZipError};

type HmacSha1 = Hmac<Sha1>;

/// PBKDF2 iteration count fixed by the WinZip format.
pub const KDF_ITERATIONS: u32 = 1000;

/// Length of the password verification value.
pub const VERIFIER_LEN: usize = 2;

/// Length of the truncated HMAC-SHA1 authentication code.
pub const AUTH_CODE_LEN: usize = 10;

/// AES key strength, as recorded in the 0x9901 extra field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum AesStrength {
    /// AES-128 (16-byte key, 8-byte salt)
    Aes128 = 1,
    /// AES-192 (24-byte key, 12-byte salt)
    Aes192 = 2,
    /// AES-256 (32-byte key, 16-byte salt)
    Aes256 = 3,
}

impl AesStrength {
    /// Salt length for this strength.
    pub fn salt_len(self) -> usize {
        match self {
            Self::Aes128 => 8,
            Self::Aes192 => 12,
            Self::Aes256 => 16,
        }
    }

    /// Key length for this strength.
    pub fn key_len(self) -> usize {
        match self {
            Self::Aes128 => 16,
            Self::Aes192 => 24,
            Self::Aes256 => 32,
        }
    }

    /// Derived key material length (AES key + HMAC key + verifier).
    pub fn derived_key_len(self) -> usize {
        self.key_len() * 2 + VERIFIER_LEN
    }

    /// Bytes added to the stored data: salt, verifier and authentication code.
    pub fn overhead(self) -> u64 {
        (self.salt_len() + VERIFIER_LEN + AUTH_CODE_LEN) as u64
    }

    /// Parse the strength byte of the extra field.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Aes128),
            2 => Some(Self::Aes192),
            3 => Some(Self::Aes256),
            _ => None,
        }
    }
}

/// AES-CTR keystream for one of the three key sizes.
enum AesCtr {
    Aes128(ctr::Ctr128LE<aes::Aes128>),
    Aes192(ctr::Ctr128LE<aes::Aes192>),
    Aes256(ctr::Ctr128LE<aes::Aes256>),
}

impl AesCtr {
    fn new(strength: AesStrength, key: &[u8]) -> Result<Self> {
        let mut iv = [0u8; 16];
        iv[0] = 1;

        let cipher = match strength {
            AesStrength::Aes128 => ctr::Ctr128LE::new_from_slices(key, &iv).map(Self::Aes128),
            AesStrength::Aes192 => ctr::Ctr128LE::new_from_slices(key, &iv).map(Self::Aes192),
            AesStrength::Aes256 => ctr::Ctr128LE::new_from_slices(key, &iv).map(Self::Aes256),
        };
        cipher.map_err(|_| ZipError::format("AES key length does not match strength"))
    }

    fn apply_keystream(&mut self, buf: &mut [u8]) {
        match self {
            Self::Aes128(c) => c.apply_keystream(buf),
            Self::Aes192(c) => c.apply_keystream(buf),
            Self::Aes256(c) => c.apply_keystream(buf),
        }
    }
}

/// Keys derived from a password and salt.
struct EntryKeys {
    cipher: AesCtr,
    mac: HmacSha1,
    verifier: [u8; VERIFIER_LEN],
}

impl EntryKeys {
    fn derive(password: &[u8], salt: &[u8], strength: AesStrength) -> Result<Self> {
        if salt.len() != strength.salt_len() {
            return Err(ZipError::format(format!(
                "Invalid AES salt length: expected {}, got {}",
                strength.salt_len(),
                salt.len()
            )));
        }

        let mut derived = Zeroizing::new(vec![0u8; strength.derived_key_len()]);
        pbkdf2::pbkdf2_hmac::<Sha1>(password, salt, KDF_ITERATIONS, &mut derived);

        let key_len = strength.key_len();
        let cipher = AesCtr::new(strength, &derived[..key_len])?;
        let mac = <HmacSha1 as Mac>::new_from_slice(&derived[key_len..key_len * 2])
            .map_err(|e| ZipError::format(format!("Failed to create HMAC: {e}")))?;
        let verifier = [derived[key_len * 2], derived[key_len * 2 + 1]];

        Ok(Self {
            cipher,
            mac,
            verifier,
        })
    }
}

/// Writer that AES-encrypts everything written through it.
///
/// Salt and verifier are emitted on construction; [`AesWriter::finish`]
/// appends the authentication code.
pub struct AesWriter<W: Write> {
    inner: W,
    keys: EntryKeys,
    buf: Vec<u8>,
}

impl<W: Write> AesWriter<W> {
    /// Generate a random salt, derive keys and write salt + verifier.
    pub fn new(inner: W, password: &[u8], strength: AesStrength) -> Result<Self> {
        let mut salt = vec![0u8; strength.salt_len()];
        OsRng.fill_bytes(&mut salt);
        Self::with_salt(inner, password, strength, &salt)
    }

    /// Like [`AesWriter::new`] with a caller-chosen salt.
    pub fn with_salt(
        mut inner: W,
        password: &[u8],
        strength: AesStrength,
        salt: &[u8],
    ) -> Result<Self> {
        let keys = EntryKeys::derive(password, salt, strength)?;
        inner.write_all(salt)?;
        inner.write_all(&keys.verifier)?;
        Ok(Self {
            inner,
            keys,
            buf: Vec::new(),
        })
    }

    /// Write the authentication code and return the inner writer.
    pub fn finish(mut self) -> io::Result<W> {
        let tag = self.keys.mac.finalize().into_bytes();
        self.inner.write_all(&tag[..AUTH_CODE_LEN])?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for AesWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.clear();
        self.buf.extend_from_slice(buf);
        self.keys.cipher.apply_keystream(&mut self.buf);
        self.keys.mac.update(&self.buf);
        self.inner.write_all(&self.buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Reader that decrypts an AES entry and authenticates it on
/// [`AesReader::finish`].
///
/// A failed authentication is not an error here; the archive reader reports
/// it as damaged content alongside the CRC check.
pub struct AesReader<R: Read> {
    inner: Take<R>,
    keys: EntryKeys,
    name: String,
}

impl<R: Read> AesReader<R> {
    /// Read salt and verifier from `inner`, derive keys and check the
    /// password.
    ///
    /// `data_len` is the ciphertext length (stored size minus overhead).
    /// Fails with [`ZipError::BadPassword`] when the verifier differs.
    pub fn new(
        mut inner: R,
        password: &[u8],
        strength: AesStrength,
        data_len: u64,
        name: &str,
    ) -> Result<Self> {
        let mut prefix = vec![0u8; strength.salt_len() + VERIFIER_LEN];
        inner.read_exact(&mut prefix).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                ZipError::format(format!("{name}: AES data shorter than its salt"))
            } else {
                ZipError::Io(e)
            }
        })?;

        let (salt, verifier) = prefix.split_at(strength.salt_len());
        let keys = EntryKeys::derive(password, salt, strength)?;
        if keys.verifier != verifier {
            return Err(ZipError::bad_password(name));
        }

        Ok(Self {
            inner: inner.take(data_len),
            keys,
            name: name.to_string(),
        })
    }

    /// Consume any unread ciphertext, then read and check the trailing
    /// authentication code. Returns the inner reader and whether the code
    /// matched.
    pub fn finish(mut self) -> Result<(R, bool)> {
        io::copy(&mut self, &mut io::sink())?;

        let mut inner = self.inner.into_inner();
        let mut code = [0u8; AUTH_CODE_LEN];
        inner.read_exact(&mut code).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                ZipError::format(format!("{}: missing AES authentication code", self.name))
            } else {
                ZipError::Io(e)
            }
        })?;

        let authentic = self.keys.mac.verify_truncated_left(&code).is_ok();
        if !authentic {
            debug!("{}: AES authentication code mismatch", self.name);
        }
        Ok((inner, authentic))
    }
}

impl<R: Read> Read for AesReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.keys.mac.update(&buf[..n]);
        self.keys.cipher.apply_keystream(&mut buf[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const MESSAGE: &[u8] = b"The quick brown fox jumps over the lazy dog";

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    fn encrypt(strength: AesStrength, salt: &[u8]) -> Vec<u8> {
        let mut writer = AesWriter::with_salt(Vec::new(), b"password", strength, salt).unwrap();
        writer.write_all(MESSAGE).unwrap();
        writer.finish().unwrap()
    }

    #[test]
    fn test_aes256_known_vector() {
        let salt: Vec<u8> = (0..16).collect();
        let out = encrypt(AesStrength::Aes256, &salt);

        let mut expected = salt.clone();
        expected.extend(hex("256b"));
        expected.extend(hex(
            "dfbcaf7ba944fec02667f6f2d4d256664b0889e9a6ac9e9167bacc9b49c1e8e61e09a497a2cc0060c96b30",
        ));
        expected.extend(hex("5f6e226c8ac068ff7f73"));
        assert_eq!(out, expected);
    }

    #[test]
    fn test_aes128_known_vector() {
        let salt: Vec<u8> = (0..8).collect();
        let out = encrypt(AesStrength::Aes128, &salt);

        assert_eq!(&out[8..10], &hex("b51c")[..]);
        assert_eq!(&out[out.len() - AUTH_CODE_LEN..], &hex("cd5f0bfd78abae3fa442")[..]);
    }

    #[test]
    fn test_aes192_known_vector() {
        let salt: Vec<u8> = (0..12).collect();
        let out = encrypt(AesStrength::Aes192, &salt);

        assert_eq!(&out[12..14], &hex("c58d")[..]);
        assert_eq!(
            &out[14..14 + MESSAGE.len()],
            &hex("a89f6589c01a0455808081a55540caf3f63f20ece0da2f0f3bd91977efc93219c211831883154f2ad6b37c")[..]
        );
    }

    #[test]
    fn test_roundtrip_with_trailing_data() {
        for strength in [AesStrength::Aes128, AesStrength::Aes192, AesStrength::Aes256] {
            let mut writer = AesWriter::new(Vec::new(), b"secret", strength).unwrap();
            writer.write_all(MESSAGE).unwrap();
            let mut stored = writer.finish().unwrap();
            assert_eq!(stored.len() as u64, MESSAGE.len() as u64 + strength.overhead());
            stored.extend_from_slice(b"NEXT");

            let mut reader = AesReader::new(
                Cursor::new(stored),
                b"secret",
                strength,
                MESSAGE.len() as u64,
                "entry",
            )
            .unwrap();
            let mut plain = Vec::new();
            reader.read_to_end(&mut plain).unwrap();
            assert_eq!(plain, MESSAGE);

            let (mut inner, authentic) = reader.finish().unwrap();
            assert!(authentic);
            let mut rest = Vec::new();
            inner.read_to_end(&mut rest).unwrap();
            assert_eq!(rest, b"NEXT");
        }
    }

    #[test]
    fn test_wrong_password() {
        let salt: Vec<u8> = (0..16).collect();
        let stored = encrypt(AesStrength::Aes256, &salt);

        let result = AesReader::new(
            Cursor::new(stored),
            b"wrong",
            AesStrength::Aes256,
            MESSAGE.len() as u64,
            "entry",
        );
        assert!(matches!(result, Err(ZipError::BadPassword { .. })));
    }

    #[test]
    fn test_tampered_ciphertext() {
        let salt: Vec<u8> = (0..16).collect();
        let mut stored = encrypt(AesStrength::Aes256, &salt);
        stored[20] ^= 0x01;

        let reader = AesReader::new(
            Cursor::new(stored),
            b"password",
            AesStrength::Aes256,
            MESSAGE.len() as u64,
            "entry",
        )
        .unwrap();
        // finish drains the unread ciphertext itself
        let (_, authentic) = reader.finish().unwrap();
        assert!(!authentic);
    }

    #[test]
    fn test_salt_length_checked() {
        let result = AesWriter::with_salt(Vec::new(), b"pw", AesStrength::Aes128, &[0u8; 16]);
        assert!(matches!(result, Err(ZipError::Format { .. })));
    }

    #[test]
    fn test_strength_properties() {
        assert_eq!(AesStrength::Aes128.overhead(), 20);
        assert_eq!(AesStrength::Aes192.overhead(), 24);
        assert_eq!(AesStrength::Aes256.overhead(), 28);
        assert_eq!(AesStrength::Aes256.derived_key_len(), 66);
        assert_eq!(AesStrength::from_u8(2), Some(AesStrength::Aes192));
        assert_eq!(AesStrength::from_u8(4), None);
    }
}
