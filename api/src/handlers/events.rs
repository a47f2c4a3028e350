use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::Response;
use futures::StreamExt;

use crate::handlers::ChannelsQuery;
use crate::ApiContext;

/// `GET /events/subscribe?channels=a,b` — server-sent events.
pub(crate) async fn subscribe(
    State(ctx): State<Arc<ApiContext>>,
    Query(query): Query<ChannelsQuery>,
) -> Response {
    let channels: Vec<String> = query
        .channels
        .as_deref()
        .unwrap_or("")
        .split(',')
        .filter(|channel| !channel.is_empty())
        .map(str::to_string)
        .collect();

    let frames = ctx
        .events
        .subscribe(channels)
        .map(Ok::<String, Infallible>);

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("X-Accel-Buffering", "no")
        .body(Body::from_stream(frames))
        .expect("static response parts")
}
