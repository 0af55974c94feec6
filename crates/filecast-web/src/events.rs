//! Server-sent event stream for live notifications.

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use filecast_core::Subscription;
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tracing::info;

use crate::state::{AppState, Shutdown};

/// Interval of keep-alive comments; lets the transport notice dead peers.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// SSE handler. Each connection holds one subscription for its lifetime.
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.broadcaster.subscribe();
    info!(
        subscription = subscription.id(),
        viewers = state.broadcaster.subscriber_count(),
        "Event stream client connected"
    );

    Sse::new(live_events(subscription, state.shutdown.clone()))
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}

/// Logs the end of a viewer session however the stream is torn down.
struct SessionLog(u64);

impl Drop for SessionLog {
    fn drop(&mut self) {
        info!(subscription = self.0, "Event stream client disconnected");
    }
}

/// Drain `subscription` into SSE events until the mailbox closes or the
/// server shuts down.
///
/// A client disconnect drops the stream, and with it the subscription,
/// which removes it from the broadcaster.
pub fn live_events(
    mut subscription: Subscription,
    shutdown: Shutdown,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let _session = SessionLog(subscription.id());
        loop {
            let next = tokio::select! {
                next = subscription.recv() => next,
                _ = shutdown.wait() => None,
            };
            match next {
                Some(json) => yield Ok(Event::default().data(json)),
                None => break,
            }
        }
    }
}
