//! Chunk decryption for protected track streams.
//!
//! Streams use a striped encryption pattern:
//! * Content is divided into 2 KiB chunks
//! * Every third chunk (index 0, 3, 6, ...) is encrypted
//! * Encryption uses Blowfish in CBC mode with a fixed IV
//! * The cipher state is reset for each encrypted chunk
//!
//! A short final chunk at an encrypted index has only its 8-byte aligned
//! prefix decrypted. Any trailing bytes, or a final chunk shorter than one
//! cipher block, are passed through unchanged.
//!
//! # Security
//!
//! No decryption secrets are included in this code. The secret that keys
//! are derived from must be provided externally, and derived keys are
//! never logged.

use std::{ops::Deref, str::FromStr};

use blowfish::{
    cipher::{BlockDecryptMut, KeyIvInit},
    Blowfish,
};
use cbc::cipher::block_padding::NoPadding;
use md5::{Digest, Md5};
use veil::Redact;

use crate::{
    chunk::{Chunk, CHUNK_SIZE},
    error::{Error, Result},
    track::TrackId,
};

/// Length of decryption keys in bytes.
pub const KEY_LENGTH: usize = 16;

/// Raw key bytes.
pub type RawKey = [u8; KEY_LENGTH];

/// Fixed IV for CBC decryption.
pub const CBC_BF_IV: &[u8; 8] = b"\x00\x01\x02\x03\x04\x05\x06\x07";

/// Cipher block size of Blowfish in bytes.
pub const CBC_BLOCK_SIZE: usize = 8;

/// Number of chunks in a stripe. The first chunk of every stripe is
/// encrypted.
pub const CBC_STRIPE_COUNT: u64 = 3;

/// A 16-byte key.
///
/// Used for both the master secret and the per-track keys derived from
/// it. The contents are redacted from debug output.
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Redact)]
#[redact(all)]
pub struct Key(RawKey);

impl Key {
    #[must_use]
    pub fn new(key: RawKey) -> Self {
        Self(key)
    }
}

impl FromStr for Key {
    type Err = Error;

    /// Parses a string of exactly 16 bytes into a key.
    ///
    /// # Errors
    ///
    /// Returns `MalformedCipherInput` if the string length isn't exactly
    /// 16 bytes.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::try_from(s.as_bytes())
    }
}

impl TryFrom<&[u8]> for Key {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        let key = RawKey::try_from(bytes).map_err(|_| {
            Error::malformed_cipher_input(format!(
                "key length is {} but should be {KEY_LENGTH}",
                bytes.len()
            ))
        })?;
        Ok(Self(key))
    }
}

impl Deref for Key {
    type Target = RawKey;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Derives per-track keys from the master secret.
#[derive(Clone, Redact)]
pub struct KeyDeriver {
    #[redact]
    secret: Key,
}

impl KeyDeriver {
    #[must_use]
    pub fn new(secret: Key) -> Self {
        Self { secret }
    }

    /// Calculates the decryption key of a track.
    ///
    /// The key is derived using:
    /// 1. the lowercase hex MD5 digest of the decimal track ID
    /// 2. XOR of the first and second half of that digest
    /// 3. XOR with the master secret
    ///
    /// Pure and deterministic: the same ID always yields the same key.
    #[must_use]
    pub fn derive(&self, track_id: TrackId) -> Key {
        let track_hash = format!("{:x}", Md5::digest(track_id.to_string()));
        let track_hash = track_hash.as_bytes();

        let mut key = RawKey::default();
        for i in 0..KEY_LENGTH {
            key[i] = track_hash[i] ^ track_hash[i + KEY_LENGTH] ^ self.secret[i];
        }
        Key(key)
    }
}

/// Whether the chunk at `index` is encrypted.
#[must_use]
pub fn is_encrypted(index: u64) -> bool {
    index % CBC_STRIPE_COUNT == 0
}

/// Decrypts the chunks of one track.
///
/// Holds no state between chunks: each chunk is processed independently of
/// every other, so chunks may be decrypted in any order.
#[derive(Clone, Redact)]
pub struct Decryptor {
    #[redact]
    key: Key,
}

impl Decryptor {
    #[must_use]
    pub fn new(key: Key) -> Self {
        Self { key }
    }

    /// Creates a decryptor from raw key bytes.
    ///
    /// # Errors
    ///
    /// Returns `MalformedCipherInput` if `key` is not 16 bytes long.
    pub fn from_slice(key: &[u8]) -> Result<Self> {
        Key::try_from(key).map(Self::new)
    }

    /// Decrypts a chunk if its index marks it as encrypted, otherwise
    /// returns it untouched.
    ///
    /// The output always has the same length as the input.
    ///
    /// # Errors
    ///
    /// Returns `MalformedCipherInput` if the chunk is larger than
    /// [`CHUNK_SIZE`] or the cipher cannot be initialized.
    pub fn process(&self, mut chunk: Chunk) -> Result<Chunk> {
        if chunk.len() > CHUNK_SIZE {
            return Err(Error::malformed_cipher_input(format!(
                "chunk {} has {} bytes, more than {CHUNK_SIZE}",
                chunk.index,
                chunk.len()
            )));
        }

        if is_encrypted(chunk.index) {
            self.decrypt_in_place(&mut chunk.data)?;
        }

        Ok(chunk)
    }

    /// Decrypts the aligned prefix of `buffer` in place, with a freshly
    /// initialized cipher.
    ///
    /// # Errors
    ///
    /// Returns `MalformedCipherInput` if the cipher cannot be initialized.
    pub fn decrypt_in_place(&self, buffer: &mut [u8]) -> Result<()> {
        let aligned = buffer.len() - buffer.len() % CBC_BLOCK_SIZE;
        if aligned == 0 {
            return Ok(());
        }

        let cipher = cbc::Decryptor::<Blowfish>::new_from_slices(&*self.key, CBC_BF_IV)
            .map_err(|e| Error::malformed_cipher_input(e.to_string()))?;
        cipher
            .decrypt_padded_mut::<NoPadding>(&mut buffer[..aligned])
            .map_err(|e| Error::malformed_cipher_input(e.to_string()))?;

        Ok(())
    }
}
