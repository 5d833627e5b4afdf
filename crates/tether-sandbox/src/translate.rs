//! Error translation: in-sandbox failures become `fail` results.
//!
//! The peer only ever receives the one-line description. The frame listing
//! goes to a local [`TraceSink`].

use crate::error::{ActionError, ScriptError};
use crate::request::ExecutionResult;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Maximum description size sent to the peer (64KB).
pub const MAX_DESCRIPTION_LEN: usize = 64 * 1024;

/// Destination for developer-facing traces.
pub trait TraceSink {
    /// Record one formatted trace.
    fn emit(&self, trace: &str);
}

/// Writes traces to the process's stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrSink;

impl TraceSink for StderrSink {
    fn emit(&self, trace: &str) {
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(trace.as_bytes());
        let _ = stderr.flush();
    }
}

/// Keeps traces in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    traces: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Traces emitted so far.
    pub fn traces(&self) -> Vec<String> {
        self.traces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TraceSink for MemorySink {
    fn emit(&self, trace: &str) {
        self.traces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(trace.to_string());
    }
}

/// Convert an action failure into a `fail` result.
///
/// Script exceptions also emit their trace to `sink`.
pub fn translate(error: &ActionError, sink: &dyn TraceSink) -> ExecutionResult {
    if let ActionError::Script(script) = error {
        sink.emit(&format_trace(script));
    }
    let description = truncate_description(error.to_string(), MAX_DESCRIPTION_LEN);
    debug!(description = %description, "action failed");
    ExecutionResult::fail(description)
}

/// Render a script error as a header line plus one `function, line` row per
/// sandbox frame.
pub fn format_trace(error: &ScriptError) -> String {
    let mut trace = format!("{error}\n");
    if error.frames.is_empty() {
        trace.push_str(" ?, ?\n");
    }
    for frame in &error.frames {
        match frame.line {
            Some(line) => trace.push_str(&format!(" {}, {}\n", frame.function, line)),
            None => trace.push_str(&format!(" {}, ?\n", frame.function)),
        }
    }
    trace
}

fn truncate_description(s: String, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = s[..end].to_string();
    truncated.push_str("... [truncated]");
    truncated
}
