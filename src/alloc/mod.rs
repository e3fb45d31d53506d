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

//! Interactive compute allocation via the cluster scheduler.
//!
//! [`AllocationController`] runs the scheduler's allocation command on a
//! login node through any [`CommandRunner`] and polls its streamed output
//! until the readiness marker names the granted node.

pub mod scanner;

pub use scanner::{ReadyScanner, SALLOC_READY_PATTERN};

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::ssh::CommandRunner;

/// Resource request rendered into a `salloc` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRequest {
    /// Wall-clock limit, scheduler format (`HH:MM:SS`).
    pub time_limit: String,
    /// CPU cores on the node.
    pub cores: u32,
    /// Account charged for the allocation.
    pub account: String,
    pub partition: String,
    pub cluster: String,
    /// GPUs per node; omitted from the command when `None`.
    pub gpus_per_node: Option<u32>,
}

impl AllocationRequest {
    /// Render the interactive `salloc` command line.
    pub fn to_salloc_command(&self) -> String {
        let mut cmd = format!(
            "salloc -n 1 -t {} --ntasks={}",
            self.time_limit, self.cores
        );
        if let Some(gpus) = self.gpus_per_node {
            cmd.push_str(&format!(" --gpus-per-node={gpus}"));
        }
        cmd.push_str(&format!(
            " -A {} --partition={} --cluster={}",
            self.account, self.partition, self.cluster
        ));
        cmd
    }
}

/// Cadence and optional cutoff for the output poll loop.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    /// Pause between polls when no output is pending.
    pub interval: Duration,
    /// Give up after this long; `None` waits as long as the scheduler does.
    pub deadline: Option<Duration>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            deadline: None,
        }
    }
}

/// Drives one allocation command to readiness.
#[derive(Debug)]
pub struct AllocationController {
    pattern: String,
    poll: PollSettings,
}

impl AllocationController {
    /// Controller for a SLURM cluster with default polling.
    pub fn slurm() -> Self {
        Self {
            pattern: SALLOC_READY_PATTERN.to_string(),
            poll: PollSettings::default(),
        }
    }

    /// Override the readiness pattern for schedulers with different
    /// marker text. Capture group 1 must hold the node name.
    pub fn with_pattern(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            poll: PollSettings::default(),
        }
    }

    pub fn poll_settings(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    /// Run the allocation command on `runner` and wait for the readiness
    /// marker. Returns the granted node's name.
    ///
    /// The command is started with a PTY so the scheduler streams progress
    /// lines instead of buffering them. Early exit without a marker is an
    /// allocation failure; the allocation itself stays alive on the remote
    /// side for as long as the command's channel stays open.
    pub async fn allocate(
        &self,
        runner: &dyn CommandRunner,
        request: &AllocationRequest,
    ) -> Result<String> {
        let command = request.to_salloc_command();
        info!("Requesting allocation: {command}");

        let mut scanner = ReadyScanner::new(&self.pattern)
            .map_err(|e| Error::Allocation(format!("invalid readiness pattern: {e}")))?;
        let mut remote = runner.run(&command, true).await?;

        let started = Instant::now();
        loop {
            let mut progressed = false;

            while let Some(chunk) = remote.stdout.try_read() {
                progressed = true;
                let text = String::from_utf8_lossy(&chunk);
                for line in text.lines().filter(|l| !l.trim().is_empty()) {
                    debug!("salloc: {line}");
                }
                if let Some(node) = scanner.push(&text) {
                    info!("Node {node} is ready");
                    return Ok(node);
                }
            }
            while let Some(chunk) = remote.stderr.try_read() {
                progressed = true;
                trace!("salloc stderr: {}", String::from_utf8_lossy(&chunk));
            }

            if progressed {
                continue;
            }

            if remote.has_exited() {
                let status = remote
                    .exit_status()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                warn!("Allocation command exited (status {status}) before readiness");
                let mut message = format!(
                    "allocation command exited (status {status}) before granting a node"
                );
                // Last scheduler line usually carries the denial reason.
                if let Some(line) = scanner.seen().lines().rev().find(|l| !l.trim().is_empty()) {
                    message.push_str(&format!("; last output: {}", line.trim()));
                }
                return Err(Error::Allocation(message));
            }

            if let Some(deadline) = self.poll.deadline {
                if started.elapsed() >= deadline {
                    return Err(Error::Allocation(format!(
                        "no node became ready within {}s",
                        deadline.as_secs()
                    )));
                }
            }

            tokio::time::sleep(self.poll.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn salloc_command_without_gpus() {
        assert_eq!(
            request().to_salloc_command(),
            "salloc -n 1 -t 01:00:00 --ntasks=4 -A lp_proj --partition=gpu --cluster=wice"
        );
    }

    #[test]
    fn salloc_command_with_gpus() {
        let mut req = request();
        req.gpus_per_node = Some(2);
        assert_eq!(
            req.to_salloc_command(),
            "salloc -n 1 -t 01:00:00 --ntasks=4 --gpus-per-node=2 \
             -A lp_proj --partition=gpu --cluster=wice"
        );
    }

    #[test]
    fn default_poll_settings() {
        let poll = PollSettings::default();
        assert_eq!(poll.interval, Duration::from_secs(1));
        assert!(poll.deadline.is_none());
    }
}
