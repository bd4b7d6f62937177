// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stand-in for the on-disk encryption primitive: the authenticated-
//! encryption step is real (AES-256-GCM via `ring`), but the key is loaded
//! from a file in `base_dir` rather than a platform keystore, which is out
//! of scope here.

use std::path::Path;

use ring::aead::{Aad, BoundKey, Nonce, NonceSequence, OpeningKey, SealingKey, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};

const KEY_LEN: usize = 32;

/// A single-use nonce sequence seeded from a fixed 12-byte value; each
/// `Cipher::seal` call constructs a fresh `SealingKey` so this is only
/// ever asked for one nonce.
struct FixedNonce(Option<[u8; NONCE_LEN]>);

impl NonceSequence for FixedNonce {
    fn advance(&mut self) -> Result<Nonce, ring::error::Unspecified> {
        let bytes = self.0.take().ok_or(ring::error::Unspecified)?;
        Ok(Nonce::assume_unique_for_key(bytes))
    }
}

/// Authenticated-encryption wrapper over a master key loaded from disk.
pub struct Cipher {
    key_bytes: [u8; KEY_LEN],
    rng: SystemRandom,
}

#[derive(Debug)]
pub struct CipherError;

impl std::fmt::Display for CipherError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("decryption failed")
    }
}

impl std::error::Error for CipherError {}

impl Cipher {
    /// Load the master key from `{base_dir}/master.key`, generating and
    /// persisting a fresh one if absent.
    pub fn load_or_create(base_dir: &Path) -> std::io::Result<Self> {
        let key_path = base_dir.join("master.key");
        let rng = SystemRandom::new();

        let key_bytes = match std::fs::read(&key_path) {
            Ok(bytes) if bytes.len() == KEY_LEN => {
                let mut key = [0u8; KEY_LEN];
                key.copy_from_slice(&bytes);
                key
            }
            _ => {
                std::fs::create_dir_all(base_dir)?;
                let mut key = [0u8; KEY_LEN];
                rng.fill(&mut key).map_err(|_| std::io::Error::other("failed to generate master key"))?;
                let tmp = key_path.with_extension("key.tmp");
                std::fs::write(&tmp, key)?;
                std::fs::rename(&tmp, &key_path)?;
                key
            }
        };

        Ok(Self { key_bytes, rng })
    }

    /// Encrypt `plaintext`, returning `nonce || ciphertext || tag`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng.fill(&mut nonce_bytes).map_err(|_| CipherError)?;

        let unbound = UnboundKey::new(&AES_256_GCM, &self.key_bytes).map_err(|_| CipherError)?;
        let mut sealing = SealingKey::new(unbound, FixedNonce(Some(nonce_bytes)));

        let mut in_out = plaintext.to_vec();
        sealing.seal_in_place_append_tag(Aad::empty(), &mut in_out).map_err(|_| CipherError)?;

        let mut out = Vec::with_capacity(NONCE_LEN + in_out.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&in_out);
        Ok(out)
    }

    /// Decrypt a `nonce || ciphertext || tag` blob produced by [`seal`](Self::seal).
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CipherError> {
        if sealed.len() < NONCE_LEN {
            return Err(CipherError);
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(nonce_bytes);

        let unbound = UnboundKey::new(&AES_256_GCM, &self.key_bytes).map_err(|_| CipherError)?;
        let mut opening = OpeningKey::new(unbound, FixedNonce(Some(nonce)));

        let mut in_out = ciphertext.to_vec();
        let plaintext = opening.open_in_place(Aad::empty(), &mut in_out).map_err(|_| CipherError)?;
        Ok(plaintext.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cipher = Cipher::load_or_create(dir.path()).unwrap();
        let sealed = cipher.seal(b"hello world").unwrap();
        let opened = cipher.open(&sealed).unwrap();
        assert_eq!(opened, b"hello world");
    }

    #[test]
    fn tampered_ciphertext_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let cipher = Cipher::load_or_create(dir.path()).unwrap();
        let mut sealed = cipher.seal(b"hello world").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        assert!(cipher.open(&sealed).is_err());
    }

    #[test]
    fn key_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let cipher1 = Cipher::load_or_create(dir.path()).unwrap();
        let sealed = cipher1.seal(b"persisted").unwrap();
        let cipher2 = Cipher::load_or_create(dir.path()).unwrap();
        assert_eq!(cipher2.open(&sealed).unwrap(), b"persisted");
    }
}
