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

//! Error types for credential loading, session establishment, allocation
//! and editor attachment.
//!
//! Credential and connection failures are fatal to a run; `ToolLaunch` is
//! recoverable and only logged by the relaunch loop.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The private key blob matched neither the OpenSSH-native encoding
    /// nor any supported PEM encoding.
    #[error("unrecognized private key encoding: {0}")]
    KeyFormat(String),

    /// The key is encrypted and the passphrase was wrong or missing.
    #[error("failed to decrypt private key (wrong or missing passphrase)")]
    Decryption,

    /// The key parsed but its algorithm has no supported signer.
    #[error("unsupported key algorithm: {0}")]
    UnsupportedKeyType(String),

    /// Local file I/O failure (identity file, SSH configuration).
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport-level failure before or during the SSH handshake.
    #[error("network error: {0}")]
    Network(std::io::Error),

    /// The server rejected the offered public key.
    #[error("authentication failed for {user}@{host}")]
    Authentication { user: String, host: String },

    /// Connection could not be established even after the interactive
    /// fallback attempt. Fatal, not retried further.
    #[error("connection to {host} failed: {source}")]
    Connection {
        host: String,
        #[source]
        source: Box<Error>,
    },

    /// The scheduler denied the request or the allocation command exited
    /// without granting a node.
    #[error("allocation failed: {0}")]
    Allocation(String),

    /// Editor invocation failed. Non-fatal: the orchestrator logs this and
    /// keeps its relaunch loop alive.
    #[error("failed to launch editor: {0}")]
    ToolLaunch(String),

    /// The requested alias has no `Host` entry in the SSH config.
    #[error("no host entry for '{0}' in SSH config")]
    UnknownHost(String),

    /// `run()` was called on a session that is not in the `Connected` state.
    #[error("session is not connected")]
    NotConnected,

    /// `run()` was called on a compute-node handle before allocation.
    #[error("compute node not allocated")]
    NotAllocated,

    /// An orchestrator step was attempted out of order.
    #[error("invalid session transition from {from} to {to}")]
    Transition {
        from: &'static str,
        to: &'static str,
    },

    #[error(transparent)]
    Ssh(#[from] russh::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
