//! Read-only HTTP query façade.
//!
//! Thin axum wrappers over [`chaindex_store::Reader`]: navigable JSON views
//! with `{href}` reference objects, the pagination contract, a search
//! endpoint and the server-sent-events stream. Strictly read-only; the
//! writer engine runs in its own process.

mod error;
mod events;
mod handlers;
mod pagination;
mod views;

pub use events::{Event, EventStream};
pub use pagination::Pagination;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use log::info;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use chaindex_store::Reader;

/// Shared state of every handler.
pub struct ApiContext {
    pub reader: Reader,
    /// Prefix stamped onto every generated href.
    pub endpoint: String,
    pub events: EventStream,
}

pub fn router(ctx: Arc<ApiContext>) -> Router {
    Router::new()
        .route("/blocks/", get(handlers::blocks::list))
        .route("/blocks/{id}/", get(handlers::blocks::detail))
        .route("/blocks/{id}/miner/", get(handlers::blocks::miner))
        .route("/blocks/{id}/transactions/", get(handlers::blocks::transactions))
        .route("/transactions/", get(handlers::transactions::list))
        .route("/transactions/{txid}/", get(handlers::transactions::detail))
        .route("/transactions/{txid}/inputs/", get(handlers::transactions::inputs))
        .route(
            "/transactions/{txid}/inputs/{index}/",
            get(handlers::transactions::input),
        )
        .route("/transactions/{txid}/outputs/", get(handlers::transactions::outputs))
        .route(
            "/transactions/{txid}/outputs/{index}/",
            get(handlers::transactions::output),
        )
        .route(
            "/transactions/{txid}/mutations/",
            get(handlers::transactions::mutations),
        )
        .route("/address/{address}/", get(handlers::addresses::detail))
        .route("/address/{address}/balance/", get(handlers::addresses::balance))
        .route("/address/{address}/pending/", get(handlers::addresses::pending))
        .route("/address/{address}/mutations/", get(handlers::addresses::mutations))
        .route("/networkstats/", get(handlers::stats::network))
        .route("/poolstats/", get(handlers::stats::pools))
        .route("/richlist/", get(handlers::stats::richlist))
        .route("/coins/", get(handlers::stats::coins))
        .route("/search/{ident}", get(handlers::stats::search))
        .route("/events/subscribe", get(handlers::events::subscribe))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

/// Serves the façade until the token cancels.
pub async fn serve(
    listen: &str,
    ctx: Arc<ApiContext>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!("api listening on {}", listener.local_addr()?);
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
