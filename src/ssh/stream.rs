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

//! Live output streams for a running remote command.
//!
//! A pump task translates channel messages into two independently-readable
//! byte streams (stdout, stderr) plus an exit observation. The caller is
//! responsible for draining the streams; nothing is buffered beyond what
//! the remote side has already sent.

use bytes::Bytes;
use russh::client::Msg;
use russh::Channel;
use tokio::sync::{mpsc, watch};

/// Terminal state of a remote command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    Running,
    /// The channel closed. The status is `None` when the server closed the
    /// channel without reporting one (RFC 4254 permits this).
    Exited(Option<u32>),
}

/// One live output stream. Reads never block when [`try_read`] is used.
///
/// [`try_read`]: OutputStream::try_read
#[derive(Debug)]
pub struct OutputStream {
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl OutputStream {
    /// Create a stream together with its feeding end. Used by transports
    /// other than the russh channel pump, and by tests.
    pub fn pipe() -> (mpsc::UnboundedSender<Bytes>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Return the next chunk if one is already available, without blocking.
    pub fn try_read(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next chunk. `None` once the command is done and the
    /// stream fully drained.
    pub async fn read(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}

/// A command in flight on a remote host.
#[derive(Debug)]
pub struct RemoteCommand {
    pub stdout: OutputStream,
    pub stderr: OutputStream,
    exit: watch::Receiver<ExitState>,
}

impl RemoteCommand {
    /// Assemble a command from externally fed parts. The counterpart of
    /// [`OutputStream::pipe`] for non-russh transports and tests.
    pub fn from_parts(
        stdout: OutputStream,
        stderr: OutputStream,
        exit: watch::Receiver<ExitState>,
    ) -> Self {
        Self {
            stdout,
            stderr,
            exit,
        }
    }

    /// Spawn the pump task that drains `channel` into the streams.
    pub(crate) fn from_channel(mut channel: Channel<Msg>) -> Self {
        let (out_tx, stdout) = OutputStream::pipe();
        let (err_tx, stderr) = OutputStream::pipe();
        let (exit_tx, exit) = watch::channel(ExitState::Running);

        tokio::spawn(async move {
            let mut status = None;
            while let Some(msg) = channel.wait().await {
                match msg {
                    russh::ChannelMsg::Data { ref data } => {
                        let _ = out_tx.send(Bytes::copy_from_slice(data));
                    }
                    russh::ChannelMsg::ExtendedData { ref data, ext } if ext == 1 => {
                        let _ = err_tx.send(Bytes::copy_from_slice(data));
                    }
                    // An exit-status report does not end communications;
                    // data may still follow, so keep draining.
                    russh::ChannelMsg::ExitStatus { exit_status } => status = Some(exit_status),
                    _ => {}
                }
            }
            let _ = exit_tx.send(ExitState::Exited(status));
        });

        Self {
            stdout,
            stderr,
            exit,
        }
    }

    /// Whether the remote command has finished (with or without a reported
    /// status). Queued output may still be readable after this turns true.
    pub fn has_exited(&self) -> bool {
        matches!(*self.exit.borrow(), ExitState::Exited(_))
    }

    /// The reported exit status, once the command has finished.
    pub fn exit_status(&self) -> Option<u32> {
        match *self.exit.borrow() {
            ExitState::Exited(status) => status,
            ExitState::Running => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn try_read_is_non_blocking_and_ordered() {
        let (tx, mut stream) = OutputStream::pipe();
        assert!(stream.try_read().is_none());

        tx.send(Bytes::from_static(b"one")).unwrap();
        tx.send(Bytes::from_static(b"two")).unwrap();
        assert_eq!(stream.try_read().unwrap(), Bytes::from_static(b"one"));
        assert_eq!(stream.try_read().unwrap(), Bytes::from_static(b"two"));
        assert!(stream.try_read().is_none());
    }

    #[tokio::test]
    async fn exit_state_is_observable_after_output() {
        let (out_tx, stdout) = OutputStream::pipe();
        let (_err_tx, stderr) = OutputStream::pipe();
        let (exit_tx, exit_rx) = watch::channel(ExitState::Running);
        let mut cmd = RemoteCommand::from_parts(stdout, stderr, exit_rx);

        assert!(!cmd.has_exited());
        out_tx.send(Bytes::from_static(b"payload")).unwrap();
        exit_tx.send(ExitState::Exited(Some(0))).unwrap();

        // Output queued before the exit report stays readable.
        assert!(cmd.has_exited());
        assert_eq!(cmd.exit_status(), Some(0));
        assert_eq!(cmd.stdout.try_read().unwrap(), Bytes::from_static(b"payload"));
    }
}
