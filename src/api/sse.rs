//! Server-Sent Events support
//!
//! Bridges the orchestrator's event channel onto the wire, preserving
//! order exactly as produced.

use crate::events::TurnEvent;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

/// Convert a turn's event channel into an SSE response
pub fn turn_stream(
    rx: tokio::sync::mpsc::Receiver<TurnEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = ReceiverStream::new(rx).map(|event| Ok(turn_event_to_axum(&event)));

    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn turn_event_to_axum(event: &TurnEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(event.tag()).data(data)
}
