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

use std::path::PathBuf;

use clap::Parser;

/// Allocate an interactive compute node and attach a local tool to it
#[derive(Parser, Debug, Clone)]
#[command(name = "vscalloc", version, about)]
pub struct Args {
    /// Tool to attach once the node is ready
    #[arg(default_value = "vscode")]
    pub tool: String,

    /// SSH configuration file to read and update
    #[arg(long, value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    /// Login node host alias in the SSH configuration
    #[arg(long, default_value = "VSC")]
    pub hostname: String,

    /// Username on the login node (overrides the SSH configuration)
    #[arg(long)]
    pub username: Option<String>,

    /// Private key file (overrides the SSH configuration)
    #[arg(long, value_name = "PATH")]
    pub identity_file: Option<PathBuf>,

    /// Folder to open on the compute node
    #[arg(long, default_value = "~")]
    pub project_folder: String,

    /// Wall-clock time limit for the allocation (HH:MM:SS)
    #[arg(long, default_value = "01:00:00")]
    pub time: String,

    /// Account to charge for the allocation
    #[arg(long, short = 'A')]
    pub account: String,

    /// Cluster to allocate on
    #[arg(long, default_value = "wice")]
    pub cluster: String,

    /// Partition to allocate in
    #[arg(long, default_value = "gpu")]
    pub partition: String,

    /// CPU cores to request
    #[arg(long, default_value_t = 4)]
    pub cores: u32,

    /// GPUs per node to request
    #[arg(long)]
    pub gpus_per_node: Option<u32>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
