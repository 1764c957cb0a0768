use std::sync::Arc;

use audio_bus::registry::Registry;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub(crate) fn app(registry: Arc<Registry>) -> Router {
    Router::new().nest("/session", crate::handler::session::session_router(registry))
}

pub(crate) fn start_api_server(registry: Arc<Registry>, cancel: CancellationToken) {
    tokio::spawn(async move {
        let addr = crate::config::config().api_addr();
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                log::error!("API: bind {}: {}", addr, e);
                cancel.cancel();
                return;
            }
        };
        log::info!("API: server listening on {}", addr);
        if let Err(e) = axum::serve(listener, app(registry))
            .with_graceful_shutdown(shutdown_signal(cancel))
            .await
        {
            log::error!("API: server error: {}", e);
        }
    });
}

async fn shutdown_signal(cancel: CancellationToken) {
    cancel.cancelled().await;
    log::info!("API: shutting down");
}
