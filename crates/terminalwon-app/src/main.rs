use anyhow::Result;
use clap::Parser;
use colored::Colorize;

use terminalwon::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    terminalwon_logging::init_tracing(&cli.log_level);

    println!(
        "{} {}",
        "TerminalWON Hub".bright_cyan().bold(),
        format!("v{}", terminalwon::types::SERVER_VERSION).dimmed()
    );

    terminalwon::run(cli).await
}
