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

//! Incremental scanning of scheduler output for the readiness marker.
//!
//! The marker text is a scheduler-specific contract, so the pattern is
//! injectable; capture group 1 must hold the granted node's name. Output
//! arrives in arbitrary chunks, so the scanner accumulates everything seen
//! so far and searches the whole buffer on each push. It fires at most
//! once, even when later chunks would re-match.

use regex::Regex;

/// Readiness line emitted by SLURM's `salloc` in interactive mode.
pub const SALLOC_READY_PATTERN: &str = r"salloc: Nodes (\S+) are ready for job";

/// Accumulating marker scanner.
#[derive(Debug)]
pub struct ReadyScanner {
    pattern: Regex,
    buffer: String,
    fired: bool,
}

impl ReadyScanner {
    /// Build a scanner for `pattern`. The pattern needs one capture group
    /// holding the node token.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            buffer: String::new(),
            fired: false,
        })
    }

    /// Scanner for the stock `salloc` marker.
    pub fn salloc() -> Self {
        Self::new(SALLOC_READY_PATTERN).expect("static pattern is valid")
    }

    /// Append a chunk and return the node token if the marker is now
    /// complete. Returns `None` forever after the first match.
    pub fn push(&mut self, chunk: &str) -> Option<String> {
        if self.fired {
            return None;
        }
        self.buffer.push_str(chunk);

        let captures = self.pattern.captures(&self.buffer)?;
        let node = captures.get(1)?.as_str().to_string();
        self.fired = true;
        Some(node)
    }

    /// Everything scanned so far, for diagnostics on failure paths.
    pub fn seen(&self) -> &str {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARKER: &str = "salloc: Nodes node123 are ready for job\n";

    #[test]
    fn whole_marker_in_one_chunk() {
        let mut scanner = ReadyScanner::salloc();
        assert_eq!(scanner.push(MARKER).as_deref(), Some("node123"));
    }

    #[test]
    fn marker_split_at_every_boundary() {
        // The marker must be found regardless of where a read boundary
        // falls, and extracted exactly once.
        for split in 0..=MARKER.len() {
            let (head, tail) = MARKER.split_at(split);
            let mut scanner = ReadyScanner::salloc();

            let early = scanner.push(head);
            let late = scanner.push(tail);
            let hits: Vec<_> = [early, late].into_iter().flatten().collect();
            assert_eq!(hits, ["node123"], "split at byte {split}");
        }
    }

    #[test]
    fn fires_at_most_once() {
        let mut scanner = ReadyScanner::salloc();
        assert!(scanner.push(MARKER).is_some());
        assert!(scanner.push(MARKER).is_none());
    }

    #[test]
    fn noise_around_the_marker() {
        let mut scanner = ReadyScanner::salloc();
        assert!(scanner.push("salloc: Pending job allocation 42\n").is_none());
        assert!(scanner.push("salloc: job 42 queued and waiting\n").is_none());
        assert_eq!(scanner.push(MARKER).as_deref(), Some("node123"));
    }

    #[test]
    fn custom_pattern() {
        let mut scanner = ReadyScanner::new(r"Welcome to (\S+)@").unwrap();
        assert_eq!(scanner.push("Welcome to gpu-07@cluster\n").as_deref(), Some("gpu-07"));
    }
}
