mod handlers;
mod router;

use anyhow::Result;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::core::routing::IntentRouter;
use crate::core::types::SchemaMetadata;

pub use router::build_api_router;

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<IntentRouter>,
    pub schema: SchemaMetadata,
    pub log_tx: tokio::sync::broadcast::Sender<String>,
    pub api_port: u16,
    /// Parent of every request token. Cancelled when the server stops.
    pub shutdown: CancellationToken,
}

async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| {
        match msg {
            Ok(log) => Ok(Event::default().data(log)), // SSE properly encodes this
            Err(_) => Ok(Event::default().data("Log stream lagged")),
        }
    });

    Sse::new(stream)
}

/// Serve the API until Ctrl+C.
pub async fn serve(state: AppState, host: &str) -> Result<()> {
    let addr = format!("{}:{}", host, state.api_port);
    let shutdown = state.shutdown.clone();
    let app = build_api_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API Server running at http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down API Server...");
            shutdown.cancel();
        })
        .await?;
    Ok(())
}
