//! Request/response protocol over a REPL's text streams
//!
//! A request is written as one payload that prints a start marker, runs the
//! user's lines and prints an end marker. The reply is whatever the
//! interpreter writes in between. Reading stops at the end marker, after a
//! short debounce once an error shows up, at the timeout, or when the
//! process goes away.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::dialect::markers::{MarkerSet, has_marker_line};
use crate::dialect::{Dialect, Framing};
use crate::engine::EngineError;
use crate::engine::sanitize;
use crate::runtime::{SessionProcess, StreamEvent, StreamSource};
use crate::types::ExecutionResult;

/// Why reading a reply stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The end marker (or end token) appeared on stdout
    EndMarker,
    /// An error signature appeared and the debounce window passed
    ErrorSignature,
    /// The request ran out of time
    TimedOut,
    /// Both output streams closed mid-request
    Exited,
}

/// Raw output captured for one request
#[derive(Debug, Clone)]
pub struct ProtocolOutcome {
    pub stdout: String,
    pub stderr: String,
    pub completion: Completion,
    /// Lines written for the request, for echo stripping
    pub payload_lines: Vec<String>,
}

/// Outcome of waiting for a control marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerWait {
    Seen,
    Elapsed,
    Exited,
}

/// Run one request on a live interpreter process
#[instrument(skip(process, dialect, markers, code), fields(language = %dialect.id))]
pub async fn run_request(
    process: &mut SessionProcess,
    dialect: &Dialect,
    markers: &MarkerSet,
    code: &str,
    restricted: bool,
    timeout: Duration,
    debounce: Duration,
) -> Result<ProtocolOutcome, EngineError> {
    let payload = dialect.request_payload(markers, code, restricted);

    let stale = process.discard_pending();
    if stale > 0 {
        debug!(stale, "discarded stale output");
    }
    process.write(payload.text.as_bytes()).await?;

    let deadline = Instant::now() + timeout;
    let mut error_deadline: Option<Instant> = None;
    let mut stdout = String::new();
    let mut stderr = String::new();

    let completion = loop {
        let wake = error_deadline.map_or(deadline, |d| d.min(deadline));

        tokio::select! {
            event = process.recv() => match event {
                Some(StreamEvent::Data(source, text)) => {
                    match source {
                        StreamSource::Stdout => stdout.push_str(&text),
                        StreamSource::Stderr => stderr.push_str(&text),
                    }

                    if source == StreamSource::Stdout && reply_complete(dialect, markers, &stdout) {
                        break Completion::EndMarker;
                    }
                    if error_deadline.is_none()
                        && sanitize::sanitize(dialect, markers, &stdout, &stderr, &payload.lines).error
                    {
                        debug!("error signature seen, debouncing");
                        error_deadline = Some(Instant::now() + debounce);
                    }
                }
                Some(StreamEvent::Closed(_)) => {
                    if process.streams_closed() {
                        break Completion::Exited;
                    }
                }
                None => break Completion::Exited,
            },
            _ = tokio::time::sleep_until(wake) => {
                break match error_deadline {
                    Some(d) if d < deadline => Completion::ErrorSignature,
                    _ => Completion::TimedOut,
                };
            }
        }
    };

    debug!(?completion, stdout_len = stdout.len(), stderr_len = stderr.len(), "request finished");

    Ok(ProtocolOutcome {
        stdout,
        stderr,
        completion,
        payload_lines: payload.lines,
    })
}

/// Check if the end of the reply has been written to stdout
pub(crate) fn reply_complete(dialect: &Dialect, markers: &MarkerSet, stdout: &str) -> bool {
    match dialect.framing {
        Framing::Markers => has_marker_line(stdout, &markers.end),
        Framing::EndToken(token) => has_marker_line(stdout, token),
    }
}

/// Turn captured output into the caller-facing result
pub fn finalize(dialect: &Dialect, markers: &MarkerSet, outcome: &ProtocolOutcome) -> ExecutionResult {
    let cleaned = sanitize::sanitize(
        dialect,
        markers,
        &outcome.stdout,
        &outcome.stderr,
        &outcome.payload_lines,
    );

    match outcome.completion {
        Completion::EndMarker if !cleaned.error => ExecutionResult::success(cleaned.text),
        Completion::EndMarker | Completion::ErrorSignature => {
            ExecutionResult::failure(cleaned.text)
        }
        Completion::TimedOut if cleaned.text.is_empty() => {
            ExecutionResult::timeout("execution timed out")
        }
        Completion::TimedOut => ExecutionResult::timeout(cleaned.text),
        Completion::Exited if cleaned.text.is_empty() => {
            ExecutionResult::failure("interpreter exited unexpectedly")
        }
        Completion::Exited => ExecutionResult::failure(cleaned.text),
    }
}

/// Wait until `marker` appears as a line on stdout
///
/// Returns the stderr collected meanwhile, for diagnostics.
pub async fn wait_for_marker(
    process: &mut SessionProcess,
    marker: &str,
    within: Duration,
) -> (MarkerWait, String) {
    let deadline = Instant::now() + within;
    let mut stdout = String::new();
    let mut stderr = String::new();

    let outcome = loop {
        tokio::select! {
            event = process.recv() => match event {
                Some(StreamEvent::Data(StreamSource::Stdout, text)) => {
                    stdout.push_str(&text);
                    if has_marker_line(&stdout, marker) {
                        break MarkerWait::Seen;
                    }
                }
                Some(StreamEvent::Data(StreamSource::Stderr, text)) => stderr.push_str(&text),
                Some(StreamEvent::Closed(_)) => {
                    if process.streams_closed() {
                        break MarkerWait::Exited;
                    }
                }
                None => break MarkerWait::Exited,
            },
            _ = tokio::time::sleep_until(deadline) => break MarkerWait::Elapsed,
        }
    };

    (outcome, stderr)
}
