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

//! The command-execution capability.
//!
//! Two implementations exist: the credentialed login-node session
//! ([`RemoteSession`](super::session::RemoteSession)) and [`NestedRunner`],
//! which reaches a host one hop further in by stacking an `ssh <target>`
//! wrapper inside a parent runner. Compute nodes trust the login node's
//! identity and accept passwordless hops, so the nested form needs no
//! credential of its own.

use async_trait::async_trait;

use super::stream::RemoteCommand;
use crate::error::Result;

/// Something that can execute a command on a remote host and hand back
/// live output streams.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Execute `command`, optionally with a pseudo-terminal attached.
    /// Each call is a fresh logical channel; commands are not queued.
    async fn run(&self, command: &str, want_pty: bool) -> Result<RemoteCommand>;
}

/// Runs commands on a target reachable only through a parent runner, by
/// wrapping them in an `ssh <target>` invocation executed on the parent.
pub struct NestedRunner<'a> {
    parent: &'a dyn CommandRunner,
    target: String,
}

impl<'a> NestedRunner<'a> {
    pub fn new(parent: &'a dyn CommandRunner, target: impl Into<String>) -> Self {
        Self {
            parent,
            target: target.into(),
        }
    }
}

#[async_trait]
impl CommandRunner for NestedRunner<'_> {
    async fn run(&self, command: &str, want_pty: bool) -> Result<RemoteCommand> {
        let hop = format!("ssh {} {}", self.target, command);
        self.parent.run(&hop, want_pty).await
    }
}
