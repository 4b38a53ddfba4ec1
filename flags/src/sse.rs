use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, Sse};
use axum::Json;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::api::FlagError;
use crate::router;

/// Keeps idle proxies from reaping the connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
pub struct SseQueryParams {
    pub channel: Option<String>,
}

/// Long-lived per-client stream bridging the change channel to the
/// browser.
///
/// Per connection: subscribe, forward every channel message as one event
/// frame, emit a heartbeat comment every 15s. When the client goes away
/// axum drops the stream, which drops the subscription and with it the
/// heartbeat; nothing is left behind per abandoned connection.
#[instrument(skip_all, fields(channel = tracing::field::Empty))]
pub async fn stream(
    State(state): State<router::State>,
    Query(params): Query<SseQueryParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, FlagError> {
    let channel = params
        .channel
        .filter(|channel| !channel.is_empty())
        .ok_or(FlagError::MissingChannel)?;
    tracing::Span::current().record("channel", channel.as_str());

    let mut subscription = state.pubsub.subscribe(&channel).await.map_err(|e| {
        tracing::error!("failed to subscribe to {}: {}", channel, e);
        FlagError::ChannelUnavailable
    })?;

    let stream = async_stream::stream! {
        loop {
            match tokio::time::timeout(HEARTBEAT_INTERVAL, subscription.recv()).await {
                Ok(Some(message)) => yield Ok(Event::default().data(message)),
                Ok(None) => break,
                Err(_) => yield Ok(Event::default().comment("")),
            }
        }
    };

    Ok(Sse::new(stream))
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PublishRequest {
    pub channel: String,
    pub message: String,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "status")]
pub enum PublishResponse {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "error")]
    Error { msg: String },
}

/// Companion publish endpoint: any client can trigger a broadcast on a
/// channel, the admin override UI included.
#[instrument(skip_all, fields(channel = %payload.channel))]
pub async fn publish(
    State(state): State<router::State>,
    Json(payload): Json<PublishRequest>,
) -> Json<PublishResponse> {
    match state
        .pubsub
        .publish(&payload.channel, &payload.message)
        .await
    {
        Ok(()) => Json(PublishResponse::Ok),
        Err(e) => {
            tracing::error!("publish to {} failed: {}", payload.channel, e);
            Json(PublishResponse::Error { msg: e.to_string() })
        }
    }
}
