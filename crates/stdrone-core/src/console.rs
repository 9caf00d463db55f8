//! Console line reassembly
//!
//! Console output arrives as arbitrary ASCII fragments split across
//! notifications. Fragments are accumulated per stream and only complete lines
//! are emitted; an unterminated tail is carried to the next notification.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("Console payload is not ASCII text ({0} bytes)")]
    NotText(usize),
}

/// Console stream carried by the peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamId {
    Stdout,
    Stderr,
}

/// Unterminated text carried across notifications for one stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReassemblyState {
    pending: Option<String>,
}

impl ReassemblyState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }
}

/// `\n` and `\r` each end a line, so a lone trailing `\r` completes it
fn is_terminator(c: char) -> bool {
    c == '\n' || c == '\r'
}

/// Feed one chunk, appending complete lines to `out`
///
/// Returns the number of lines appended. Non-ASCII chunks are rejected without
/// touching `state` or `out`.
pub fn feed(
    chunk: &[u8],
    state: &mut ReassemblyState,
    out: &mut Vec<String>,
) -> Result<usize, ConsoleError> {
    if !chunk.is_ascii() {
        return Err(ConsoleError::NotText(chunk.len()));
    }
    // ASCII is always valid UTF-8
    let text = String::from_utf8_lossy(chunk);

    let mut combined = state.pending.take().unwrap_or_default();
    combined.push_str(&text);

    let mut lines: Vec<String> = combined
        .split(is_terminator)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect();

    if !combined.ends_with(is_terminator) {
        state.pending = match lines.pop() {
            Some(tail) => Some(tail),
            None if combined.is_empty() => None,
            None => Some(combined),
        };
    }

    trace!(
        lines = lines.len(),
        pending = state.pending.as_ref().map(String::len).unwrap_or(0),
        "Reassembled console chunk"
    );

    let count = lines.len();
    out.extend(lines);
    Ok(count)
}

/// Per-stream reassembly for stdout and stderr
#[derive(Debug, Clone, Default)]
pub struct ConsoleReassembler {
    stdout: ReassemblyState,
    stderr: ReassemblyState,
}

impl ConsoleReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(
        &mut self,
        stream: StreamId,
        chunk: &[u8],
        out: &mut Vec<String>,
    ) -> Result<usize, ConsoleError> {
        feed(chunk, self.state_mut(stream), out)
    }

    pub fn state(&self, stream: StreamId) -> &ReassemblyState {
        match stream {
            StreamId::Stdout => &self.stdout,
            StreamId::Stderr => &self.stderr,
        }
    }

    fn state_mut(&mut self, stream: StreamId) -> &mut ReassemblyState {
        match stream {
            StreamId::Stdout => &mut self.stdout,
            StreamId::Stderr => &mut self.stderr,
        }
    }

    pub fn reset(&mut self) {
        self.stdout.clear();
        self.stderr.clear();
    }
}
