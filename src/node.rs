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

//! Handle to a granted compute node, reached by hopping through the
//! login session.

use std::fmt;

use tracing::warn;

use crate::error::{Error, Result};
use crate::ssh::{CommandRunner, NestedRunner, RemoteCommand};

/// A compute node as seen from the login node.
///
/// The address is unknown until the scheduler grants the allocation;
/// running commands before that is a state error, reported without
/// touching the login session.
pub struct ComputeNode<'a> {
    login: &'a dyn CommandRunner,
    username: String,
    address: Option<String>,
}

impl<'a> ComputeNode<'a> {
    pub fn new(login: &'a dyn CommandRunner, username: impl Into<String>) -> Self {
        Self {
            login,
            username: username.into(),
            address: None,
        }
    }

    /// Record the granted address. The first address sticks; the
    /// scheduler does not migrate an interactive allocation, so a second
    /// call is a caller bug and only logged.
    pub fn mark_allocated(&mut self, address: impl Into<String>) {
        let address = address.into();
        match &self.address {
            Some(existing) if *existing != address => {
                warn!("Node already allocated at {existing}, ignoring {address}");
            }
            Some(_) => {}
            None => self.address = Some(address),
        }
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Run `command` on the node by nesting an `ssh` hop inside the
    /// login session.
    pub async fn run(&self, command: &str, want_pty: bool) -> Result<RemoteCommand> {
        let address = self.address.as_deref().ok_or(Error::NotAllocated)?;
        NestedRunner::new(self.login, address)
            .run(command, want_pty)
            .await
    }
}

impl fmt::Display for ComputeNode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.address {
            Some(address) => write!(f, "{}@{}", self.username, address),
            None => write!(f, "unallocated node"),
        }
    }
}

impl fmt::Debug for ComputeNode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeNode")
            .field("username", &self.username)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::ssh::{ExitState, OutputStream, RemoteCommand};

    /// Runner that records commands and returns an already-exited command.
    struct RecordingRunner {
        commands: Mutex<Vec<String>>,
    }

    impl RecordingRunner {
        fn new() -> Self {
            Self {
                commands: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&self, command: &str, _want_pty: bool) -> Result<RemoteCommand> {
            self.commands.lock().unwrap().push(command.to_string());
            let (_out_tx, stdout) = OutputStream::pipe();
            let (_err_tx, stderr) = OutputStream::pipe();
            let (tx, rx) = tokio::sync::watch::channel(ExitState::Exited(Some(0)));
            drop(tx);
            Ok(RemoteCommand::from_parts(stdout, stderr, rx))
        }
    }

    #[tokio::test]
    async fn run_before_allocation_is_a_state_error() {
        let runner = RecordingRunner::new();
        let node = ComputeNode::new(&runner, "alice");

        let err = node.run("hostname", false).await.unwrap_err();
        assert!(matches!(err, Error::NotAllocated));
        // The guard fails before any remote I/O.
        assert!(runner.commands.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_nests_an_ssh_hop() {
        let runner = RecordingRunner::new();
        let mut node = ComputeNode::new(&runner, "alice");
        node.mark_allocated("node123");

        node.run("hostname", false).await.unwrap();
        assert_eq!(
            runner.commands.lock().unwrap().as_slice(),
            ["ssh node123 hostname"]
        );
    }

    #[test]
    fn first_address_sticks() {
        let runner = RecordingRunner::new();
        let mut node = ComputeNode::new(&runner, "alice");
        node.mark_allocated("node123");
        node.mark_allocated("node456");
        assert_eq!(node.address(), Some("node123"));
    }

    #[test]
    fn display_follows_allocation_state() {
        let runner = RecordingRunner::new();
        let mut node = ComputeNode::new(&runner, "alice");
        assert_eq!(node.to_string(), "unallocated node");
        node.mark_allocated("node123");
        assert_eq!(node.to_string(), "alice@node123");
    }
}
