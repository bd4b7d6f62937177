// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Encrypted-file read/write helpers. Every write is a full-file
//! replacement staged to a sibling path and renamed into place, which
//! survives a crash mid-write without corrupting the previous generation.

use std::path::Path;

use crate::store::cipher::Cipher;

/// Read and decrypt `path`, deserializing as `T`. Any failure (missing
/// file, I/O error, decrypt failure, malformed JSON) surfaces as `None` —
/// an empty state, never a fault propagated to the caller.
pub fn read_encrypted<T: serde::de::DeserializeOwned>(path: &Path, cipher: &Cipher) -> Option<T> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), err = %e, "failed to read store file");
            return None;
        }
    };

    let plaintext = match cipher.open(&bytes) {
        Ok(plaintext) => plaintext,
        Err(e) => {
            tracing::warn!(path = %path.display(), err = %e, "failed to decrypt store file");
            return None;
        }
    };

    match serde_json::from_slice(&plaintext) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(path = %path.display(), err = %e, "failed to parse store file");
            None
        }
    }
}

/// Serialize `value`, encrypt it, and replace `path` atomically (stage to
/// a sibling `.tmp` path, then rename). Failures are logged and
/// swallowed: the in-memory state remains consistent and the next write
/// cycle will retry.
pub fn write_encrypted<T: serde::Serialize>(path: &Path, cipher: &Cipher, value: &T) {
    let json = match serde_json::to_vec(value) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(path = %path.display(), err = %e, "failed to serialize store file");
            return;
        }
    };

    let sealed = match cipher.seal(&json) {
        Ok(sealed) => sealed,
        Err(e) => {
            tracing::error!(path = %path.display(), err = %e, "failed to encrypt store file");
            return;
        }
    };

    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::error!(path = %parent.display(), err = %e, "failed to create store directory");
            return;
        }
    }

    let tmp_path = path.with_extension("tmp");
    if let Err(e) = std::fs::write(&tmp_path, &sealed) {
        tracing::error!(path = %tmp_path.display(), err = %e, "failed to stage store file");
        return;
    }
    if let Err(e) = std::fs::rename(&tmp_path, path) {
        tracing::error!(path = %path.display(), err = %e, "failed to commit store file");
    }
}

/// Delete `path` if present; missing files are not an error.
pub fn delete(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), err = %e, "failed to delete store file");
        }
    }
}
