//! Envelope-encryption primitives for envault.
//!
//! # Key lifecycle
//!
//! Two keys exist in the system, both 256-bit AES-GCM keys:
//!
//! ```text
//! KEK (resident in the key-wrap service, never exported)
//!        │
//!        ▼
//! seal(KEK, DEK) → Wrapped-Key Blob (persisted next to the ciphertext)
//!
//! DEK (one per file write, transient)
//!        │
//!        ▼
//! seal(DEK, plaintext) → Content Blob
//! ```
//!
//! A DEK is generated for exactly one file write, used once to seal the
//! content, immediately wrapped under the KEK, and zeroized. On read the
//! mirror order applies: unwrap, open, zeroize. [`SecretKey`] zeroizes its
//! bytes on drop so the erasure holds on every exit path.
//!
//! # Security
//!
//! - Authenticity: AES-GCM's 128-bit tag makes any bit flip in nonce,
//!   ciphertext, or tag an [`CryptoError::OpenFailed`], never altered
//!   plaintext.
//! - Nonce uniqueness: every [`seal`] call draws a fresh random 96-bit
//!   nonce from the OS RNG.
//! - Failure opacity: [`CryptoError::OpenFailed`] carries no plaintext and
//!   no cipher internals.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroize;

/// AES-GCM nonce length in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length in bytes (128 bits).
pub const TAG_LEN: usize = 16;

/// Symmetric key length in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Crypto errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Tag verification failed: the blob was tampered with, corrupted, or
    /// sealed under a different key. No plaintext is recovered.
    #[error("authenticated decryption failed")]
    OpenFailed,

    /// Key material had the wrong length.
    #[error("key material must be {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),
}

/// A 256-bit symmetric key, zeroized on drop.
///
/// Used for both the KEK and per-file DEKs. The bytes are reachable only
/// through [`SecretKey::expose`]; the type has no `Debug` or `Display`
/// rendering of its content.
pub struct SecretKey {
    bytes: [u8; KEY_LEN],
}

impl SecretKey {
    /// Generate a fresh random key from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Adopt key material, zeroizing the source buffer.
    ///
    /// The caller's copy is erased even when the length check fails, so
    /// key bytes never outlive the call site in a foreign buffer.
    pub fn from_bytes(source: &mut Vec<u8>) -> Result<Self, CryptoError> {
        if source.len() != KEY_LEN {
            let got = source.len();
            source.zeroize();
            return Err(CryptoError::InvalidKeyLength(got));
        }
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(source);
        source.zeroize();
        Ok(Self { bytes })
    }

    /// Borrow the raw key bytes.
    pub fn expose(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl core::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

/// An AEAD-sealed blob: `{nonce, ciphertext, tag}`.
///
/// The same shape serves as the Content Blob (file bytes under a DEK) and
/// the Wrapped-Key Blob (a DEK under the KEK). `ciphertext.len()` equals
/// the plaintext length; the tag is carried separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBlob {
    /// 96-bit nonce, unique per seal operation.
    pub nonce: [u8; NONCE_LEN],
    /// Ciphertext, same length as the plaintext.
    pub ciphertext: Vec<u8>,
    /// 128-bit authentication tag.
    pub tag: [u8; TAG_LEN],
}

/// Seal `plaintext` under `key` with a fresh random nonce.
pub fn seal(key: &SecretKey, plaintext: &[u8]) -> SealedBlob {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let cipher = Aes256Gcm::new(key.expose().into());
    let Ok(mut sealed) = cipher.encrypt(Nonce::from_slice(&nonce), plaintext) else {
        // The aes-gcm API is fallible only for plaintexts beyond the GCM
        // length bound (~64 GiB), unreachable under the codec's 64 MiB cap.
        unreachable!("AES-GCM encryption cannot fail for in-bound plaintext");
    };

    // encrypt() returns ciphertext || tag; split them for the wire shape.
    let tag_start = sealed.len() - TAG_LEN;
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&sealed[tag_start..]);
    sealed.truncate(tag_start);

    SealedBlob { nonce, ciphertext: sealed, tag }
}

/// Open a sealed blob, verifying its authentication tag.
///
/// # Errors
///
/// [`CryptoError::OpenFailed`] if the tag does not verify (tampering,
/// corruption, or wrong key).
pub fn open(key: &SecretKey, blob: &SealedBlob) -> Result<Vec<u8>, CryptoError> {
    let mut joined = Vec::with_capacity(blob.ciphertext.len() + TAG_LEN);
    joined.extend_from_slice(&blob.ciphertext);
    joined.extend_from_slice(&blob.tag);

    let cipher = Aes256Gcm::new(key.expose().into());
    cipher
        .decrypt(Nonce::from_slice(&blob.nonce), Payload::from(joined.as_slice()))
        .map_err(|_| CryptoError::OpenFailed)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let key = SecretKey::generate();
        let blob = seal(&key, b"hello");
        assert_eq!(open(&key, &blob).unwrap(), b"hello");
    }

    #[test]
    fn empty_plaintext_round_trip() {
        let key = SecretKey::generate();
        let blob = seal(&key, b"");
        assert!(blob.ciphertext.is_empty());
        assert_eq!(open(&key, &blob).unwrap(), b"");
    }

    #[test]
    fn ciphertext_matches_plaintext_length() {
        let key = SecretKey::generate();
        let blob = seal(&key, &[0x42; 1000]);
        assert_eq!(blob.ciphertext.len(), 1000);
    }

    #[test]
    fn ciphertext_differs_from_plaintext() {
        let key = SecretKey::generate();
        let plaintext = vec![0x42u8; 64];
        let blob = seal(&key, &plaintext);
        assert_ne!(blob.ciphertext, plaintext);
    }

    #[test]
    fn wrong_key_fails_open() {
        let key = SecretKey::generate();
        let other = SecretKey::generate();
        let blob = seal(&key, b"secret");
        assert_eq!(open(&other, &blob).unwrap_err(), CryptoError::OpenFailed);
    }

    #[test]
    fn tampered_ciphertext_fails_open() {
        let key = SecretKey::generate();
        let mut blob = seal(&key, b"original");
        blob.ciphertext[0] ^= 0x01;
        assert_eq!(open(&key, &blob).unwrap_err(), CryptoError::OpenFailed);
    }

    #[test]
    fn tampered_tag_fails_open() {
        let key = SecretKey::generate();
        let mut blob = seal(&key, b"original");
        blob.tag[TAG_LEN - 1] ^= 0x80;
        assert_eq!(open(&key, &blob).unwrap_err(), CryptoError::OpenFailed);
    }

    #[test]
    fn tampered_nonce_fails_open() {
        let key = SecretKey::generate();
        let mut blob = seal(&key, b"original");
        blob.nonce[0] ^= 0xFF;
        assert_eq!(open(&key, &blob).unwrap_err(), CryptoError::OpenFailed);
    }

    #[test]
    fn fresh_nonce_per_seal() {
        let key = SecretKey::generate();
        let first = seal(&key, b"same input");
        let second = seal(&key, b"same input");
        assert_ne!(first.nonce, second.nonce);
        assert_ne!(first.ciphertext, second.ciphertext);
    }

    #[test]
    fn from_bytes_zeroizes_source() {
        let mut source = vec![0xAA; KEY_LEN];
        let key = SecretKey::from_bytes(&mut source).unwrap();
        assert!(source.is_empty() || source.iter().all(|&b| b == 0));
        assert_eq!(key.expose(), &[0xAA; KEY_LEN]);
    }

    #[test]
    fn from_bytes_rejects_wrong_length_and_still_zeroizes() {
        let mut source = vec![0xAA; 16];
        let err = SecretKey::from_bytes(&mut source).unwrap_err();
        assert_eq!(err, CryptoError::InvalidKeyLength(16));
        assert!(source.is_empty() || source.iter().all(|&b| b == 0));
    }

    proptest! {
        #[test]
        fn any_plaintext_round_trips(plaintext in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let key = SecretKey::generate();
            let blob = seal(&key, &plaintext);
            prop_assert_eq!(open(&key, &blob).unwrap(), plaintext);
        }

        #[test]
        fn any_single_bit_flip_is_detected(
            plaintext in proptest::collection::vec(any::<u8>(), 1..256),
            bit in 0usize..8,
            pos_seed in any::<usize>(),
        ) {
            let key = SecretKey::generate();
            let mut blob = seal(&key, &plaintext);
            let pos = pos_seed % blob.ciphertext.len();
            blob.ciphertext[pos] ^= 1 << bit;
            prop_assert_eq!(open(&key, &blob).unwrap_err(), CryptoError::OpenFailed);
        }
    }
}
