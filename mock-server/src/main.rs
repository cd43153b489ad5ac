use std::sync::Arc;

use tokio::{net::TcpListener, sync::RwLock};
use tracing_subscriber::EnvFilter;

use fmpro_mock_server::MockState;

/// Serves the mock on `127.0.0.1:$PORT` (default 3000). `FM_USER` / `FM_PASSWORD`
/// set the accepted credentials and `FM_TABLES` a comma-separated table list.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let username = std::env::var("FM_USER").unwrap_or_else(|_| "admin".to_string());
    let password = std::env::var("FM_PASSWORD").unwrap_or_else(|_| "admin".to_string());
    let tables = std::env::var("FM_TABLES").unwrap_or_else(|_| "Contacts".to_string());

    let state = tables
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .fold(MockState::new(&username, &password), |state, name| state.with_table(name));

    let listener = TcpListener::bind(format!("127.0.0.1:{port}")).await?;
    fmpro_mock_server::run_with_state(listener, Arc::new(RwLock::new(state))).await
}
