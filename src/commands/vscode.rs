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

//! End-to-end flow: load key, connect to the login node, obtain an
//! allocation, publish the compute node to the SSH config and attach
//! VS Code to it.

use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::alloc::{AllocationController, AllocationRequest};
use crate::cli::Args;
use crate::error::{Error, Result};
use crate::launcher::launch_vscode;
use crate::node::ComputeNode;
use crate::ssh::{
    default_config_path, prompt_passphrase, upsert_compute_host, CommandRunner, ComputeHostEntry,
    Credential, RemoteSession, SshConfig, COMPUTE_NODE_ALIAS,
};

/// Keep-alive cadence on the login session while the editor is attached.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// Lifecycle of one editor session, from nothing to torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Init,
    KeyLoaded,
    LoginConnected,
    Allocated,
    ToolAttached,
    Idle,
    Terminated,
}

impl SessionPhase {
    fn name(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::KeyLoaded => "key-loaded",
            Self::LoginConnected => "login-connected",
            Self::Allocated => "allocated",
            Self::ToolAttached => "tool-attached",
            Self::Idle => "idle",
            Self::Terminated => "terminated",
        }
    }
}

/// Tracks the session phase and rejects out-of-order steps.
#[derive(Debug)]
pub struct SessionOrchestrator {
    phase: SessionPhase,
}

impl Default for SessionOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionOrchestrator {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Init,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Move to `next`, failing on any step the lifecycle does not allow.
    pub fn advance(&mut self, next: SessionPhase) -> Result<()> {
        use SessionPhase::*;
        let legal = matches!(
            (self.phase, next),
            (Init, KeyLoaded)
                | (KeyLoaded, LoginConnected)
                | (LoginConnected, Allocated)
                | (Allocated, ToolAttached)
                | (Allocated, Idle)
                | (ToolAttached, Idle)
                | (Idle, ToolAttached)
        ) || (next == Terminated && self.phase != Terminated);

        if !legal {
            return Err(Error::Transition {
                from: self.phase.name(),
                to: next.name(),
            });
        }
        self.phase = next;
        Ok(())
    }

    /// Request an allocation through `runner`. Only legal once the login
    /// session is up; success moves the phase to `Allocated`.
    pub async fn allocate(
        &mut self,
        runner: &dyn CommandRunner,
        controller: &AllocationController,
        request: &AllocationRequest,
    ) -> Result<String> {
        if self.phase != SessionPhase::LoginConnected {
            return Err(Error::Transition {
                from: self.phase.name(),
                to: SessionPhase::Allocated.name(),
            });
        }
        let node = controller.allocate(runner, request).await?;
        self.phase = SessionPhase::Allocated;
        Ok(node)
    }
}

pub async fn run(args: &Args) -> anyhow::Result<()> {
    let config_path = args
        .config_file
        .clone()
        .unwrap_or_else(default_config_path);
    let config = SshConfig::load(&config_path)
        .with_context(|| format!("failed to read SSH config at {}", config_path.display()))?;

    let mut profile = config.resolve(&args.hostname)?;
    if let Some(user) = &args.username {
        profile.user = user.clone();
    }
    if let Some(identity) = &args.identity_file {
        profile.identity_file = Some(identity.clone());
    }
    let key_path = profile.identity_file.clone().with_context(|| {
        format!(
            "no IdentityFile for host '{}'; pass --identity-file",
            args.hostname
        )
    })?;

    let mut flow = SessionOrchestrator::new();

    let passphrase = prompt_passphrase().context("failed to read passphrase")?;
    let credential = Credential::load_from_file(&key_path, passphrase.as_deref().map(String::as_str))
        .with_context(|| format!("failed to load private key {}", key_path.display()))?;
    info!(
        "Loaded {} key {}",
        credential.kind(),
        credential.fingerprint()
    );
    flow.advance(SessionPhase::KeyLoaded)?;

    let mut session = RemoteSession::new(profile.clone());
    session.connect(&credential).await?;
    flow.advance(SessionPhase::LoginConnected)?;

    let request = AllocationRequest {
        time_limit: args.time.clone(),
        cores: args.cores,
        account: args.account.clone(),
        partition: args.partition.clone(),
        cluster: args.cluster.clone(),
        gpus_per_node: args.gpus_per_node,
    };
    let controller = AllocationController::slurm();
    let address = flow.allocate(&session, &controller, &request).await?;

    {
        let mut node = ComputeNode::new(&session, profile.user.clone());
        node.mark_allocated(address.clone());
        info!("Compute node ready: {node}");
    }

    // The allocation lives as long as the salloc channel; the keep-alive
    // stops intermediate boxes from idling out the connection under it.
    let keep_alive = session.spawn_keep_alive(KEEP_ALIVE_INTERVAL);

    let entry = ComputeHostEntry {
        proxy_jump: args.hostname.clone(),
        hostname: address.clone(),
        user: profile.user.clone(),
        identity_file: key_path.display().to_string(),
    };
    upsert_compute_host(&config_path, &entry)
        .with_context(|| format!("failed to update {}", config_path.display()))?;
    info!("Published {address} as '{COMPUTE_NODE_ALIAS}' in {}", config_path.display());

    match launch_vscode(COMPUTE_NODE_ALIAS, &args.project_folder).await {
        Ok(()) => flow.advance(SessionPhase::ToolAttached)?,
        Err(e) => {
            warn!("{e}");
            flow.advance(SessionPhase::Idle)?;
        }
    }

    println!("Allocation is active. Press 'r' to relaunch the editor, 'q' to quit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim() {
            "r" => match launch_vscode(COMPUTE_NODE_ALIAS, &args.project_folder).await {
                Ok(()) => {
                    if flow.phase() != SessionPhase::ToolAttached {
                        flow.advance(SessionPhase::ToolAttached)?;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                    if flow.phase() == SessionPhase::ToolAttached {
                        flow.advance(SessionPhase::Idle)?;
                    }
                }
            },
            "q" => break,
            "" => {}
            other => println!("Unknown input '{other}'; press 'r' or 'q'."),
        }
    }

    if let Some(task) = keep_alive {
        task.abort();
    }
    session.close().await;
    flow.advance(SessionPhase::Terminated)?;
    info!("Session terminated, allocation released");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;

    use crate::alloc::PollSettings;
    use crate::error::Result;
    use crate::ssh::{ExitState, OutputStream, RemoteCommand};

    /// Runner whose command streams a progress line and then, after a few
    /// poll intervals, the readiness marker for node123.
    struct StagedRunner {
        polls_before_ready: u32,
    }

    #[async_trait]
    impl CommandRunner for StagedRunner {
        async fn run(&self, _command: &str, _want_pty: bool) -> Result<RemoteCommand> {
            let (stdout_tx, stdout) = OutputStream::pipe();
            let (_err_tx, stderr) = OutputStream::pipe();
            let (exit_tx, exit_rx) = tokio::sync::watch::channel(ExitState::Running);

            let ticks = u64::from(self.polls_before_ready);
            tokio::spawn(async move {
                let _ = stdout_tx.send(Bytes::from_static(b"salloc: Pending job allocation 42\n"));
                tokio::time::sleep(Duration::from_millis(5 * ticks)).await;
                let _ = stdout_tx
                    .send(Bytes::from_static(b"salloc: Nodes node123 are ready for job\n"));
                // Hold the exit side open so the command stays "running"
                // while the caller scans.
                tokio::time::sleep(Duration::from_secs(5)).await;
                drop(exit_tx);
            });
            Ok(RemoteCommand::from_parts(stdout, stderr, exit_rx))
        }
    }

    fn request() -> AllocationRequest {
        AllocationRequest {
            time_limit: "01:00:00".to_string(),
            cores: 4,
            account: "lp_proj".to_string(),
            partition: "gpu".to_string(),
            cluster: "wice".to_string(),
            gpus_per_node: None,
        }
    }

    #[tokio::test]
    async fn flow_reaches_allocated_with_node_name() {
        let runner = StagedRunner {
            polls_before_ready: 2,
        };
        let controller = AllocationController::slurm().poll_settings(PollSettings {
            interval: Duration::from_millis(10),
            deadline: Some(Duration::from_secs(5)),
        });

        let mut flow = SessionOrchestrator::new();
        flow.advance(SessionPhase::KeyLoaded).unwrap();
        flow.advance(SessionPhase::LoginConnected).unwrap();

        let node = flow.allocate(&runner, &controller, &request()).await.unwrap();
        assert_eq!(node, "node123");
        assert_eq!(flow.phase(), SessionPhase::Allocated);
    }

    #[tokio::test]
    async fn allocate_requires_a_connected_login_session() {
        let runner = StagedRunner {
            polls_before_ready: 0,
        };
        let mut flow = SessionOrchestrator::new();
        let err = flow
            .allocate(&runner, &AllocationController::slurm(), &request())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transition { .. }));
        assert_eq!(flow.phase(), SessionPhase::Init);
    }

    #[test]
    fn lifecycle_rejects_skipped_phases() {
        let mut flow = SessionOrchestrator::new();
        assert!(flow.advance(SessionPhase::LoginConnected).is_err());
        assert!(flow.advance(SessionPhase::KeyLoaded).is_ok());
        assert!(flow.advance(SessionPhase::Allocated).is_err());
    }

    #[test]
    fn termination_is_reachable_from_any_live_phase() {
        let mut flow = SessionOrchestrator::new();
        assert!(flow.advance(SessionPhase::Terminated).is_ok());
        assert!(flow.advance(SessionPhase::Terminated).is_err());
    }

    #[test]
    fn relaunch_cycles_between_attached_and_idle() {
        let mut flow = SessionOrchestrator::new();
        flow.advance(SessionPhase::KeyLoaded).unwrap();
        flow.advance(SessionPhase::LoginConnected).unwrap();
        flow.advance(SessionPhase::Allocated).unwrap();
        flow.advance(SessionPhase::ToolAttached).unwrap();
        flow.advance(SessionPhase::Idle).unwrap();
        flow.advance(SessionPhase::ToolAttached).unwrap();
    }
}
