// SPDX-License-Identifier: MIT OR Apache-2.0

//! Symmetric encryption of change payloads.
//!
//! Every document tree has one 32-byte [`DocumentKey`] shared by all members allowed to read it.
//! Payloads are sealed with XChaCha20-Poly1305, an AEAD with an extended 192-bit (24-byte) nonce
//! which is safe to draw at random for every change.
use std::fmt;
use std::sync::Mutex;

use chacha20poly1305::{AeadInPlace, Key, KeyInit, XChaCha20Poly1305, XNonce};
use rand_chacha::rand_core::{SeedableRng, TryRngCore};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::ZeroizeOnDrop;

pub const DOCUMENT_KEY_LEN: usize = 32;

pub const NONCE_LEN: usize = 24;

pub type XAeadNonce = [u8; NONCE_LEN];

/// Symmetric key encrypting all payloads of one document tree.
///
/// Memory is zeroised on drop, comparison happens in constant time and the key is never printed.
#[derive(Clone, Eq, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct DocumentKey(#[serde(with = "serde_bytes")] [u8; DOCUMENT_KEY_LEN]);

impl DocumentKey {
    /// Generate a fresh random key.
    pub fn generate(rng: &Rng) -> Result<Self, RngError> {
        Ok(Self(rng.random_array()?))
    }

    pub fn from_bytes(bytes: [u8; DOCUMENT_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DOCUMENT_KEY_LEN] {
        &self.0
    }

    /// Encrypt plaintext with the given nonce.
    pub fn encrypt(&self, plaintext: &[u8], nonce: XAeadNonce) -> Result<Vec<u8>, XAeadError> {
        x_aead_encrypt(&self.0, plaintext, nonce, None)
    }

    /// Decrypt and authenticate a ciphertext with the given nonce.
    pub fn decrypt(&self, ciphertext: &[u8], nonce: XAeadNonce) -> Result<Vec<u8>, XAeadError> {
        x_aead_decrypt(&self.0, ciphertext, nonce, None)
    }
}

impl PartialEq for DocumentKey {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.0.ct_eq(&other.0))
    }
}

impl fmt::Debug for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DocumentKey").field(&"***").finish()
    }
}

pub fn x_aead_encrypt(
    key: &[u8; DOCUMENT_KEY_LEN],
    plaintext: &[u8],
    nonce: XAeadNonce,
    aad: Option<&[u8]>,
) -> Result<Vec<u8>, XAeadError> {
    let key = Key::from_slice(key);
    let nonce = XNonce::from_slice(&nonce);
    let mut ciphertext: Vec<u8> = Vec::from(plaintext);

    let cipher = XChaCha20Poly1305::new(key);
    cipher
        .encrypt_in_place(nonce, aad.unwrap_or_default(), &mut ciphertext)
        .map_err(XAeadError::Encrypt)?;

    Ok(ciphertext)
}

pub fn x_aead_decrypt(
    key: &[u8; DOCUMENT_KEY_LEN],
    ciphertext_tag: &[u8],
    nonce: XAeadNonce,
    aad: Option<&[u8]>,
) -> Result<Vec<u8>, XAeadError> {
    let key = Key::from_slice(key);
    let nonce = XNonce::from_slice(&nonce);
    let mut plaintext: Vec<u8> = Vec::from(ciphertext_tag);

    let cipher = XChaCha20Poly1305::new(key);
    cipher
        .decrypt_in_place(nonce, aad.unwrap_or_default(), &mut plaintext)
        .map_err(XAeadError::Decrypt)?;

    Ok(plaintext)
}

#[derive(Debug, Error)]
pub enum XAeadError {
    #[error("could not encrypt with xchacha20poly1305 aead: {0}")]
    Encrypt(chacha20poly1305::Error),

    #[error("could not decrypt with xchacha20poly1305 aead: {0}")]
    Decrypt(chacha20poly1305::Error),
}

/// Cryptographically-secure random number generator that uses the ChaCha algorithm.
#[derive(Debug)]
pub struct Rng {
    rng: Mutex<rand_chacha::ChaCha20Rng>,
}

impl Default for Rng {
    fn default() -> Self {
        Self {
            rng: Mutex::new(rand_chacha::ChaCha20Rng::from_os_rng()),
        }
    }
}

#[cfg(any(test, feature = "test_utils"))]
impl Rng {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            rng: Mutex::new(rand_chacha::ChaCha20Rng::from_seed(seed)),
        }
    }
}

impl Rng {
    pub fn random_array<const N: usize>(&self) -> Result<[u8; N], RngError> {
        let mut rng = self.rng.lock().map_err(|_| RngError::LockPoisoned)?;
        let mut out = [0u8; N];
        rng.try_fill_bytes(&mut out)
            .map_err(|_| RngError::NotEnoughRandomness)?;
        Ok(out)
    }
}

#[derive(Debug, Error)]
pub enum RngError {
    #[error("rng lock is poisoned")]
    LockPoisoned,

    #[error("unable to collect enough randomness")]
    NotEnoughRandomness,
}
