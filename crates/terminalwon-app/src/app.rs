use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use terminalwon_chat::default_readers;
use terminalwon_config::ConfigManager;
use terminalwon_terminal::RegistryConfig;

use crate::auth::AuthManager;
use crate::cli::Cli;
use crate::hub::{Hub, HubOptions};
use crate::web::server::{WebServer, WebServerConfig};

/// Translate CLI flags into hub options
pub fn hub_options(cli: &Cli) -> Result<HubOptions> {
    let registry = RegistryConfig {
        backend: cli.backend_type()?,
        shell: cli.shell.clone(),
    };
    let chat_readers = if cli.no_chat_history {
        info!("Chat history disabled");
        None
    } else {
        Some(default_readers())
    };

    Ok(HubOptions {
        registry,
        chat_readers,
        log_requests: cli.log_requests,
        port: cli.port,
        auth: AuthManager::from_env(),
        ..HubOptions::default()
    })
}

/// Load configuration, start the hub and serve until shutdown
pub async fn run(cli: Cli) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", cli.host, cli.port))?;

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => ConfigManager::default_path()?,
    };
    let config = Arc::new(ConfigManager::load(config_path)?);

    let hub = Hub::start(config.clone(), hub_options(&cli)?).await;
    info!(
        "Hub ready (pty: {}, provider: {})",
        hub.pty_available(),
        config.active_provider().unwrap_or_else(|| "none".into())
    );

    let server = WebServer::new(WebServerConfig { bind_addr: addr }, hub);
    server.start().await
}
