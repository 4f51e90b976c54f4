//! Server-Sent Events stream of audit records

use crate::api::server::AppContext;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

/// GET /api/v1/audit
///
/// Each SSE event is named after the audit decision (`admitted`,
/// `blocked`, ...) and carries the record as JSON.
pub async fn audit_stream(
    State(ctx): State<AppContext>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("New audit stream client connected");
    let rx = ctx.pipeline.subscribe_audit();

    let stream = BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(record) => match serde_json::to_string(&record) {
                Ok(json) => Some(Ok(Event::default()
                    .event(record.decision.to_string())
                    .data(json))),
                Err(e) => {
                    warn!("Failed to serialize audit record: {}", e);
                    None
                }
            },
            Err(e) => {
                // Lagged: this client missed records
                warn!("Audit stream error: {:?}", e);
                None
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
