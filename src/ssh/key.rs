// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Private key loading and normalization.
//!
//! The signing layer only accepts the OpenSSH-native private key encoding,
//! but keys in the wild are frequently distributed as generic PEM
//! (PKCS#8, PKCS#1, SEC1). [`Credential::load`] therefore parses the
//! OpenSSH form first and, on failure, falls back to a general PEM parse
//! followed by a re-encode into the OpenSSH form (re-applying the
//! passphrase as symmetric encryption when one was given) before the final
//! parse. The key's algorithm determines the [`KeyKind`] tag; an algorithm
//! without a supported signer is a hard failure, never a silent default.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use russh::keys::{Algorithm, HashAlg, PrivateKey};
use ssh_key::LineEnding;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Signature algorithm of a loaded credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Rsa,
    Ed25519,
    Ecdsa,
    Dsa,
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyKind::Rsa => "RSA",
            KeyKind::Ed25519 => "Ed25519",
            KeyKind::Ecdsa => "ECDSA",
            KeyKind::Dsa => "DSA",
        };
        f.write_str(name)
    }
}

impl TryFrom<&Algorithm> for KeyKind {
    type Error = Error;

    fn try_from(algorithm: &Algorithm) -> Result<Self> {
        match algorithm {
            Algorithm::Rsa { .. } => Ok(KeyKind::Rsa),
            Algorithm::Ed25519 => Ok(KeyKind::Ed25519),
            Algorithm::Ecdsa { .. } => Ok(KeyKind::Ecdsa),
            Algorithm::Dsa => Ok(KeyKind::Dsa),
            other => Err(Error::UnsupportedKeyType(other.to_string())),
        }
    }
}

/// A decrypted private key ready for public-key authentication.
///
/// Immutable after load; created once per run from an identity file and an
/// interactively prompted passphrase. The key is held behind an [`Arc`]
/// because the russh authentication API takes shared ownership.
#[derive(Clone)]
pub struct Credential {
    key: Arc<PrivateKey>,
    kind: KeyKind,
}

impl Credential {
    /// Decode a private key blob, decrypting it with `passphrase` when the
    /// blob is encrypted.
    ///
    /// # Errors
    ///
    /// [`Error::KeyFormat`] when no supported encoding matches,
    /// [`Error::Decryption`] when the passphrase is wrong or missing for an
    /// encrypted key, and [`Error::UnsupportedKeyType`] when the key parses
    /// but its algorithm has no signer.
    pub fn load(blob: &str, passphrase: Option<&str>) -> Result<Self> {
        let key = match PrivateKey::from_openssh(blob) {
            Ok(key) => decrypt_if_needed(key, passphrase)?,
            Err(_) => normalize_pem(blob, passphrase)?,
        };

        let kind = KeyKind::try_from(&key.algorithm())?;
        Ok(Self {
            key: Arc::new(key),
            kind,
        })
    }

    /// Read and decode the identity file at `path`.
    pub fn load_from_file(path: &Path, passphrase: Option<&str>) -> Result<Self> {
        let blob = Zeroizing::new(std::fs::read_to_string(path)?);
        Self::load(&blob, passphrase)
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    /// Shared handle to the decrypted key, as the authentication API wants it.
    pub fn key(&self) -> Arc<PrivateKey> {
        Arc::clone(&self.key)
    }

    /// SHA-256 fingerprint of the public half, for logging and round-trip
    /// verification against reference tooling.
    pub fn fingerprint(&self) -> String {
        self.key.public_key().fingerprint(HashAlg::Sha256).to_string()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("kind", &self.kind)
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// Prompt for a key passphrase on the controlling terminal.
///
/// An empty answer means "no passphrase". The buffer is zeroized on drop.
pub fn prompt_passphrase() -> std::io::Result<Option<Zeroizing<String>>> {
    let answer = Zeroizing::new(rpassword::prompt_password(
        "Enter passphrase for private key (leave empty if none): ",
    )?);
    if answer.is_empty() {
        Ok(None)
    } else {
        Ok(Some(answer))
    }
}

fn decrypt_if_needed(key: PrivateKey, passphrase: Option<&str>) -> Result<PrivateKey> {
    if !key.is_encrypted() {
        return Ok(key);
    }
    let passphrase = passphrase.ok_or(Error::Decryption)?;
    key.decrypt(passphrase).map_err(|_| Error::Decryption)
}

/// Fallback path for keys that are not in the OpenSSH encoding: parse as
/// generic PEM, then re-encode into the OpenSSH form and parse that.
fn normalize_pem(blob: &str, passphrase: Option<&str>) -> Result<PrivateKey> {
    let decoded = russh::keys::decode_secret_key(blob, passphrase).map_err(|e| match e {
        russh::keys::Error::KeyIsEncrypted => Error::Decryption,
        other => Error::KeyFormat(other.to_string()),
    })?;

    // Re-apply the passphrase as encryption so the normalized blob is
    // equivalent to the input, then run it through the native parser.
    let reencoded = match passphrase {
        Some(passphrase) => decoded
            .encrypt(&mut rand::thread_rng(), passphrase)
            .and_then(|k| k.to_openssh(LineEnding::LF))
            .map_err(|e| Error::KeyFormat(e.to_string()))?,
        None => decoded
            .to_openssh(LineEnding::LF)
            .map_err(|e| Error::KeyFormat(e.to_string()))?,
    };

    let key = PrivateKey::from_openssh(reencoded.as_str())
        .map_err(|e| Error::KeyFormat(e.to_string()))?;
    decrypt_if_needed(key, passphrase)
}
