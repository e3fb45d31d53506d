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

//! SSH transport, credentials and configuration.

pub mod key;
pub mod runner;
pub mod session;
pub mod ssh_config;
pub mod stream;

pub use key::{prompt_passphrase, Credential, KeyKind};
pub use runner::{CommandRunner, NestedRunner};
pub use session::{RemoteSession, SessionState};
pub use ssh_config::{
    default_config_path, upsert_compute_host, ComputeHostEntry, HostProfile, SshConfig,
    COMPUTE_NODE_ALIAS,
};
pub use stream::{ExitState, OutputStream, RemoteCommand};
