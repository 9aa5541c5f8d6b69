//! Clearing user state between requests on a warm session

use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::dialect::Dialect;
use crate::dialect::markers::MarkerSet;
use crate::engine::protocol::{self, MarkerWait};
use crate::engine::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    /// The reset marker came back
    Completed,
    /// The marker did not show within the fallback window; the session is
    /// released regardless
    FallbackElapsed,
    /// The interpreter went away during the reset
    SessionExited,
}

/// Run the dialect's reset statements and wait for the reset marker
#[instrument(skip_all, fields(id = session.id(), language = %dialect.id))]
pub async fn reset_session(
    session: &mut Session,
    dialect: &Dialect,
    markers: &MarkerSet,
    fallback: Duration,
) -> ResetOutcome {
    let payload = dialect.reset_payload(markers);
    let process = session.process_mut();
    process.discard_pending();

    if let Err(e) = process.write(payload.text.as_bytes()).await {
        warn!(error = %e, "failed to write reset statements");
        return ResetOutcome::SessionExited;
    }

    match protocol::wait_for_marker(process, &markers.reset, fallback).await.0 {
        MarkerWait::Seen => {
            debug!("reset complete");
            ResetOutcome::Completed
        }
        MarkerWait::Elapsed => {
            warn!(?fallback, "reset marker not seen, releasing session anyway");
            ResetOutcome::FallbackElapsed
        }
        MarkerWait::Exited => {
            warn!("session exited during reset");
            ResetOutcome::SessionExited
        }
    }
}
