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

//! The authenticated SSH connection to the login node.
//!
//! A [`RemoteSession`] owns exactly one transport. Connecting applies a
//! one-shot recovery policy for clusters behind interactive firewalls:
//! when the programmatic connect fails, a user-facing `ssh` process is
//! spawned so the user can clear any firewall/MFA prompt, and the
//! programmatic connect is then retried exactly once.
//!
//! Concurrent `run()` calls from multiple callers are not supported;
//! serialize access. Only one allocation is ever in flight here.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{Config, Handle, Handler, Msg};
use russh::keys::PrivateKeyWithHashAlg;
use russh::Channel;
use tokio::task::JoinHandle;

use super::key::Credential;
use super::runner::CommandRunner;
use super::ssh_config::HostProfile;
use super::stream::RemoteCommand;
use crate::error::{Error, Result};

/// Terminal requested for PTY-attached commands.
const PTY_TERM: &str = "xterm";

/// Connection lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

/// One authenticated SSH connection to a resolved host.
pub struct RemoteSession {
    profile: HostProfile,
    state: SessionState,
    handle: Option<Arc<Handle<ClientHandler>>>,
}

impl RemoteSession {
    pub fn new(profile: HostProfile) -> Self {
        Self {
            profile,
            state: SessionState::Disconnected,
            handle: None,
        }
    }

    pub fn profile(&self) -> &HostProfile {
        &self.profile
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Authenticate against the profile's host with `credential`.
    ///
    /// On a first failure an interactive `ssh` process to the same host is
    /// spawned so the user can satisfy firewall or MFA prompts manually.
    /// If that process exits non-zero the original error is surfaced as a
    /// fatal [`Error::Connection`]; if it exits zero the programmatic
    /// connect is retried exactly once and a second failure is fatal.
    pub async fn connect(&mut self, credential: &Credential) -> Result<()> {
        self.state = SessionState::Connecting;

        let first_error = match self.connect_once(credential).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        tracing::warn!(
            host = %self.profile.hostname,
            error = %first_error,
            "connect failed, opening an interactive ssh session for manual clearance"
        );

        let cleared = interactive_ssh(&self.profile).await;
        if !cleared {
            self.state = SessionState::Disconnected;
            return Err(Error::Connection {
                host: self.profile.hostname.clone(),
                source: Box::new(first_error),
            });
        }

        tracing::info!(host = %self.profile.hostname, "interactive attempt succeeded, retrying once");
        match self.connect_once(credential).await {
            Ok(()) => Ok(()),
            Err(second_error) => {
                self.state = SessionState::Disconnected;
                Err(Error::Connection {
                    host: self.profile.hostname.clone(),
                    source: Box::new(second_error),
                })
            }
        }
    }

    async fn connect_once(&mut self, credential: &Credential) -> Result<()> {
        let config = Arc::new(Config::default());
        let handler = ClientHandler {
            hostname: self.profile.hostname.clone(),
        };

        let mut handle = russh::client::connect(
            config,
            (self.profile.hostname.as_str(), self.profile.port),
            handler,
        )
        .await
        .map_err(|e| match e {
            // Surface socket-level failures as network errors, not as
            // protocol errors.
            Error::Ssh(russh::Error::IO(io)) => Error::Network(io),
            other => other,
        })?;

        let best_hash = handle.best_supported_rsa_hash().await?.flatten();
        let authenticated = handle
            .authenticate_publickey(
                self.profile.user.as_str(),
                PrivateKeyWithHashAlg::new(credential.key(), best_hash),
            )
            .await?;
        if !authenticated.success() {
            return Err(Error::Authentication {
                user: self.profile.user.clone(),
                host: self.profile.hostname.clone(),
            });
        }

        self.handle = Some(Arc::new(handle));
        self.state = SessionState::Connected;
        tracing::info!(host = %self.profile.hostname, user = %self.profile.user, "connected");
        Ok(())
    }

    /// Execute `command` over a fresh session channel.
    ///
    /// Requires the `Connected` state. With `want_pty` a pseudo-terminal is
    /// attached first; the cluster's allocation tool only reports progress
    /// in interactive mode.
    pub async fn run(&self, command: &str, want_pty: bool) -> Result<RemoteCommand> {
        let handle = match (&self.state, &self.handle) {
            (SessionState::Connected, Some(handle)) => handle,
            _ => return Err(Error::NotConnected),
        };

        let mut channel = handle.channel_open_session().await?;
        if want_pty {
            channel
                .request_pty(false, PTY_TERM, 80, 24, 0, 0, &[])
                .await?;
        }
        channel.exec(true, command).await?;
        Ok(RemoteCommand::from_channel(channel))
    }

    /// Keep the idle transport alive with a periodic no-op command.
    ///
    /// The task never touches session or allocation state; any failure is
    /// logged and the task ends. Abort the handle when tearing down.
    pub fn spawn_keep_alive(&self, interval: Duration) -> Option<JoinHandle<()>> {
        let handle = self.handle.as_ref().map(Arc::clone)?;
        Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match keep_alive_probe(&handle).await {
                    Ok(()) => tracing::trace!("keep-alive probe sent"),
                    Err(e) => {
                        tracing::debug!(error = %e, "keep-alive probe failed, stopping");
                        break;
                    }
                }
            }
        }))
    }

    /// Close the transport. Idempotent and safe to call from any state.
    pub async fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle
                .disconnect(russh::Disconnect::ByApplication, "", "")
                .await
            {
                tracing::debug!(error = %e, "disconnect reported an error");
            }
            tracing::info!(host = %self.profile.hostname, "connection closed");
        }
        self.state = SessionState::Closed;
    }
}

impl Debug for RemoteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSession")
            .field("profile", &self.profile)
            .field("state", &self.state)
            .finish()
    }
}

#[async_trait]
impl CommandRunner for RemoteSession {
    async fn run(&self, command: &str, want_pty: bool) -> Result<RemoteCommand> {
        RemoteSession::run(self, command, want_pty).await
    }
}

async fn keep_alive_probe(handle: &Handle<ClientHandler>) -> Result<()> {
    let mut channel: Channel<Msg> = handle.channel_open_session().await?;
    channel.exec(true, "echo keep-alive").await?;
    // Drain until the channel closes so the probe doesn't leak messages.
    while channel.wait().await.is_some() {}
    Ok(())
}

/// Spawn a user-facing `ssh` process to the profile's host so the user can
/// interact with firewall or MFA prompts. Returns whether it exited zero.
async fn interactive_ssh(profile: &HostProfile) -> bool {
    let target = format!("{}@{}", profile.user, profile.hostname);
    let status = tokio::process::Command::new("ssh")
        .arg("-p")
        .arg(profile.port.to_string())
        .arg(&target)
        .status()
        .await;

    match status {
        Ok(status) => status.success(),
        Err(e) => {
            tracing::warn!(error = %e, "could not spawn the ssh binary");
            false
        }
    }
}

/// Client-side handler for the russh session.
///
/// Host keys are accepted as presented, with the fingerprint logged: the
/// tool talks to a first-party cluster endpoint the user already trusts,
/// matching the behavior of the stock OpenSSH auto-accept workflow there.
#[derive(Debug, Clone)]
pub struct ClientHandler {
    hostname: String,
}

impl Handler for ClientHandler {
    type Error = Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool> {
        tracing::debug!(
            host = %self.hostname,
            fingerprint = %server_public_key.fingerprint(russh::keys::HashAlg::Sha256),
            "accepting server host key"
        );
        Ok(true)
    }
}
