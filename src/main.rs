//! Online chess server (default binary).
//!
//! Reads `CHESS_*` environment variables, then serves matches until killed.
//! Log verbosity follows `RUST_LOG` (default `info`).

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use chess_live::adapter::{run_server, Collaborators, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env();
    info!(
        clock_secs = config.match_config.clock_secs,
        increment_secs = config.match_config.increment_secs,
        "starting chess server"
    );
    let collaborators = Collaborators::from_config(&config);
    run_server(config, collaborators, None).await
}
