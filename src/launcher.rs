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

//! Launching the local editor against a remote host.
//!
//! The `code` CLI is resolved through the user's shell so that PATH
//! setup from shell profiles applies, matching how users invoke it by
//! hand.

use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Open VS Code attached to `target` (an `ssh_config` alias or
/// `user@host`) at `folder` on the remote side.
pub async fn launch_vscode(target: &str, folder: &str) -> Result<()> {
    let command = format!("code --remote ssh-remote+{target} {folder}");
    info!("Launching editor: {command}");
    run_shell(&command).await?;
    debug!("Editor launch command completed");
    Ok(())
}

/// Run one command line through the platform shell. A spawn failure or a
/// non-zero exit both surface as [`Error::ToolLaunch`].
async fn run_shell(command: &str) -> Result<()> {
    let status = shell_command(command)
        .status()
        .await
        .map_err(|e| Error::ToolLaunch(format!("failed to start editor: {e}")))?;

    if !status.success() {
        return Err(Error::ToolLaunch(format!(
            "editor exited with status {}",
            status.code().map_or_else(|| "unknown".to_string(), |c| c.to_string())
        )));
    }
    Ok(())
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("powershell");
    cmd.arg("-Command").arg(command);
    cmd
}

#[cfg(not(windows))]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(command);
    cmd
}
