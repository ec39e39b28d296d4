//! Service entry point: serves the GPX splitter web application.

use std::net::SocketAddr;
use std::sync::Arc;

use gpx_splitter::geocode::NominatimClient;
use gpx_splitter::server::{app, AppState};
use gpx_splitter::store::{OperationStore, DEFAULT_TTL};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_PORT: u16 = 5003;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    let state = AppState {
        store: Arc::new(OperationStore::new(DEFAULT_TTL)),
        geocoder: Arc::new(NominatimClient::new()?),
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on http://{addr}");
    axum::serve(listener, app(state)).await?;
    Ok(())
}
