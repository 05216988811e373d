//! Layer snapshot and the live event stream.

use std::convert::Infallible;

use axum::extract::State;
use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use driftwatch::broadcast::{Payload, Subscription};
use driftwatch::watch::LayersResponse;
use futures_util::stream::{self, Stream};

use super::ApiError;
use crate::state::AppState;

/// `GET /api/layers`
pub async fn list_layers(State(state): State<AppState>) -> Json<LayersResponse> {
    Json(state.watch.snapshot())
}

/// `GET /api/layers/events`
///
/// The first frame is the current snapshot, followed by every broadcast
/// snapshot until the client disconnects.
pub async fn layer_events(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    // Subscribe first so nothing broadcast while rendering is missed
    let subscription = state.watch.subscribe();
    let initial = state.watch.render().map_err(|e| {
        log::error!("Failed to marshal initial layers data: {}", e);
        ApiError::Internal("Failed to build initial layers data".into())
    })?;
    log::debug!("Layer event stream opened (subscriber {})", subscription.id());

    Ok((
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        Sse::new(snapshot_stream(initial, subscription)).keep_alive(KeepAlive::default()),
    ))
}

/// Yields `initial`, then every payload delivered to the subscription.
/// Dropping the stream drops the subscription, which unsubscribes.
fn snapshot_stream(
    initial: Payload,
    subscription: Subscription,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(
        (Some(initial), subscription),
        |(pending, mut subscription)| async move {
            let payload = match pending {
                Some(payload) => payload,
                None => subscription.recv().await?,
            };
            Some((Ok(Event::default().data(&*payload)), (None, subscription)))
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{add_layer, fixture, layer};
    use axum::http::StatusCode;
    use futures_util::StreamExt;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_list_layers_returns_snapshot() {
        let fx = fixture().await;
        add_layer(&fx.store, layer("network")).await;
        add_layer(&fx.store, layer("dns")).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let Json(response) = list_layers(State(fx.state.clone())).await;
        let names: Vec<_> = response.results.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["dns", "network"]);
    }

    #[tokio::test]
    async fn test_event_stream_responds_with_event_stream() {
        let fx = fixture().await;
        let response = layer_events(State(fx.state.clone()))
            .await
            .unwrap()
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_starts_with_snapshot_then_follows_changes() {
        let fx = fixture().await;
        add_layer(&fx.store, layer("network")).await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        let subscription = fx.state.watch.subscribe();
        let initial = fx.state.watch.render().unwrap();
        let frames = snapshot_stream(initial.clone(), subscription);
        tokio::pin!(frames);

        assert!(frames.next().await.is_some());
        assert_eq!(fx.state.watch.subscriber_count(), 1);

        add_layer(&fx.store, layer("dns")).await;
        let next = tokio::time::timeout(Duration::from_secs(1), frames.next()).await;
        assert!(matches!(next, Ok(Some(Ok(_)))));
    }

    #[tokio::test]
    async fn test_dropping_stream_unsubscribes() {
        let fx = fixture().await;
        let subscription = fx.state.watch.subscribe();
        let frames = snapshot_stream(fx.state.watch.render().unwrap(), subscription);
        assert_eq!(fx.state.watch.subscriber_count(), 1);
        drop(frames);
        assert_eq!(fx.state.watch.subscriber_count(), 0);
    }
}
