use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::hub::Hub;
use crate::web::routes;

/// Web server configuration
pub struct WebServerConfig {
    pub bind_addr: SocketAddr,
}

/// Web server instance
pub struct WebServer {
    config: WebServerConfig,
    hub: Arc<Hub>,
}

impl WebServer {
    pub fn new(config: WebServerConfig, hub: Arc<Hub>) -> Self {
        Self { config, hub }
    }

    /// Serve until Ctrl-C or until the hub begins shutting down, then shut the hub down
    pub async fn start(self) -> Result<()> {
        let app_state = routes::AppState {
            hub: self.hub.clone(),
        };

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let app = routes::create_router(app_state)
            .layer(cors)
            .layer(TraceLayer::new_for_http());

        println!("🌐 TerminalWON Hub listening on http://{}", self.config.bind_addr);
        println!("   WebSocket endpoint: ws://{}/ws", self.config.bind_addr);
        println!("   Health check: http://{}/health", self.config.bind_addr);

        let listener = tokio::net::TcpListener::bind(&self.config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.config.bind_addr))?;

        let token = self.hub.shutdown_token();
        let hub = self.hub.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C"),
                    _ = token.cancelled() => {}
                }
                // Closes client channels so open sockets finish
                hub.shutdown();
            })
            .await?;

        self.hub.shutdown();
        Ok(())
    }

    pub fn hub(&self) -> Arc<Hub> {
        self.hub.clone()
    }
}
