//! Event delivery onto the engine stream.
//!
//! Stop and cancel are often issued by the same task that drains the stream,
//! so nothing on a teardown path may wait for room in the channel.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::types::EngineEvent;

/// Slots progress updates leave free for lifecycle and terminal events.
pub(crate) const PROGRESS_HEADROOM: usize = 16;

/// Delivers `event`, waiting for room until `cancel` fires.
///
/// After cancellation the event is delivered only if there is room.
pub(crate) async fn deliver(
    events: &mpsc::Sender<EngineEvent>,
    cancel: &CancellationToken,
    event: EngineEvent,
) {
    if cancel.is_cancelled() {
        deliver_now(events, event);
        return;
    }
    tokio::select! {
        biased;
        permit = events.reserve() => {
            if let Ok(permit) = permit {
                permit.send(event);
            }
        }
        _ = cancel.cancelled() => deliver_now(events, event),
    }
}

/// Delivers `event` if there is room, otherwise drops it.
pub(crate) fn deliver_now(events: &mpsc::Sender<EngineEvent>, event: EngineEvent) {
    if let Err(mpsc::error::TrySendError::Full(event)) = events.try_send(event) {
        debug!(?event, "event stream full, event dropped");
    }
}

/// Delivers an in-session update without waiting.
///
/// Progress is skipped once the stream is nearly full; the next update
/// supersedes it anyway.
pub(crate) fn deliver_update(events: &mpsc::Sender<EngineEvent>, event: EngineEvent) {
    if matches!(event, EngineEvent::Progress { .. }) {
        if events.capacity() > PROGRESS_HEADROOM {
            let _ = events.try_send(event);
        }
    } else {
        deliver_now(events, event);
    }
}
