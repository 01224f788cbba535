//! Server-Sent Events stream of status snapshots.
//!
//! Each subscriber first receives the current snapshot, then every snapshot
//! published by the job ledger. Event name is `status_update`; data is the
//! snapshot as JSON.

use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error};

use crate::status::StatusSnapshot;
use crate::web::handlers::AppState;

pub const STATUS_EVENT: &str = "status_update";

fn snapshot_event(snapshot: &StatusSnapshot) -> Event {
    let data = serde_json::to_string(snapshot).unwrap_or_else(|e| {
        error!(error = %e, "status_snapshot_serialize_failed");
        "{}".to_string()
    });
    Event::default().event(STATUS_EVENT).data(data)
}

/// `GET /api/events`
pub async fn status_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Subscribe before reading the snapshot so no update falls in between.
    let receiver = state.service.subscribe();
    let initial = state.service.snapshot();

    let updates = stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(snapshot) => return Some((snapshot_event(&snapshot), receiver)),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped = skipped, "status_stream_lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    let events = stream::once(async move { snapshot_event(&initial) })
        .chain(updates)
        .map(Ok);

    Sse::new(events).keep_alive(KeepAlive::default())
}
