//! Single-use execution tiers
//!
//! The cold tier runs one request in a fresh isolated session that is
//! removed afterwards. The direct tier runs the interpreter on the host
//! without isolation, for when the runtime or the image is unavailable.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::config::{Config, LanguageConfig, LanguageId};
use crate::dialect::{self, markers::MarkerSet};
use crate::engine::EngineError;
use crate::engine::protocol::{self, Completion, ProtocolOutcome};
use crate::engine::session::Session;
use crate::runtime::{IsolationRuntime, LaunchSpec, SessionProcess, StreamEvent, StreamSource};
use crate::types::ExecutionResult;

/// Run `code` in a fresh isolated session that exits when its input ends
///
/// The bootstrap (if any) and the request are written at once and stdin is
/// closed; output is collected until the process exits. On timeout the
/// result is returned at once and the container is killed in the background.
#[instrument(skip(runtime, config, lang, code))]
pub async fn cold_start(
    runtime: &IsolationRuntime,
    config: &Config,
    language: LanguageId,
    lang: &LanguageConfig,
    code: &str,
    timeout: Duration,
) -> Result<ExecutionResult, EngineError> {
    let dialect = dialect::lookup(language);
    let markers = MarkerSet::generate();
    let library = lang.library.as_deref();
    let restricted = dialect.bootstrap.is_some() && library.is_some();

    let mut payload_lines = Vec::new();
    let mut input = String::new();
    if restricted {
        let boot = dialect.boot_payload(&markers.reset, library, timeout.as_millis() as u64);
        input.push_str(&boot.text);
        payload_lines.extend(boot.lines);
    }
    let request = dialect.request_payload(&markers, code, restricted);
    input.push_str(&request.text);
    payload_lines.extend(request.lines);

    let launch = runtime.isolated_launch(config, language, lang);
    let mut process = launch.spawn()?;
    process.write(input.as_bytes()).await?;
    process.close_stdin();

    let (stdout, stderr, timed_out) = collect_until_exit(&mut process, Instant::now() + timeout).await;

    let completion = if timed_out {
        debug!(container = launch.container.as_deref(), "cold start timed out, killing");
        tokio::spawn(async move {
            if let Err(e) = process.kill().await {
                warn!(error = %e, "failed to kill cold start session");
            }
        });
        Completion::TimedOut
    } else {
        if let Err(e) = process.wait().await {
            warn!(error = %e, "failed to reap cold start session");
        }
        if protocol::reply_complete(dialect, &markers, &stdout) {
            Completion::EndMarker
        } else {
            Completion::Exited
        }
    };

    let outcome = ProtocolOutcome {
        stdout,
        stderr,
        completion,
        payload_lines,
    };
    Ok(protocol::finalize(dialect, &markers, &outcome).with_warm_session(false))
}

/// Run `code` with the interpreter on the host, in a one-shot session
#[instrument(skip(config, lang, code))]
pub async fn direct(
    config: &Config,
    language: LanguageId,
    lang: &LanguageConfig,
    code: &str,
    timeout: Duration,
) -> Result<ExecutionResult, EngineError> {
    if !lang.supports_direct() {
        return Err(EngineError::DirectUnsupported(language));
    }

    let dialect = dialect::lookup(language);
    let launch = LaunchSpec::host(&lang.direct_command, &lang.env);
    let mut session = Session::start(0, language, &launch, dialect, config, None).await?;

    let markers = MarkerSet::generate();
    session.begin_request();
    let outcome = protocol::run_request(
        session.process_mut(),
        dialect,
        &markers,
        code,
        false,
        timeout,
        config.error_debounce(),
    )
    .await;
    session.terminate().await;

    let outcome = outcome?;
    Ok(protocol::finalize(dialect, &markers, &outcome).with_warm_session(false))
}

/// Read both streams until they close or `deadline` passes
///
/// Returns stdout, stderr and whether the deadline was hit.
async fn collect_until_exit(process: &mut SessionProcess, deadline: Instant) -> (String, String, bool) {
    let mut stdout = String::new();
    let mut stderr = String::new();

    loop {
        tokio::select! {
            event = process.recv() => match event {
                Some(StreamEvent::Data(StreamSource::Stdout, text)) => stdout.push_str(&text),
                Some(StreamEvent::Data(StreamSource::Stderr, text)) => stderr.push_str(&text),
                Some(StreamEvent::Closed(_)) => {
                    if process.streams_closed() {
                        return (stdout, stderr, false);
                    }
                }
                None => return (stdout, stderr, false),
            },
            _ = tokio::time::sleep_until(deadline) => return (stdout, stderr, true),
        }
    }
}
