//! Interactive chat and presence client for the POWER clinic backend.
//!
//! Opens two supervised WebSocket connections (chat and presence) and drives
//! them from a "> " prompt with slash commands. Reconnects automatically on
//! abnormal disconnection (max 5 attempts with 3 second interval).
//!
//! Run with:
//! ```not_rust
//! cargo run --bin power-realtime-client -- --user-id 7 --user-name alice
//! cargo run --bin power-realtime-client -- -u ws://127.0.0.1:8000/ws/presence/ -t <token>
//! ```

use clap::Parser;

use power_realtime_client::{config::ClientConfig, repl};
use power_realtime_shared::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "power-realtime-client")]
#[command(about = "WebSocket chat and presence client for the POWER clinic platform", long_about = None)]
struct Args {
    /// WebSocket endpoint URL
    #[arg(short = 'u', long, default_value = "ws://127.0.0.1:8000/ws/presence/")]
    url: String,

    /// Bearer token appended to the URL as ?token=...
    #[arg(short = 't', long)]
    token: Option<String>,

    /// Numeric ID of the signed-in user (enables /dm and read receipts)
    #[arg(long)]
    user_id: Option<i64>,

    /// Display name of the signed-in user
    #[arg(long)]
    user_name: Option<String>,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();

    let config = ClientConfig {
        url: args.url,
        token: args.token,
        user_id: args.user_id,
        user_name: args.user_name,
        ..ClientConfig::default()
    };

    if let Err(e) = repl::run(config).await {
        tracing::error!("Client error: {}", e);
        std::process::exit(1);
    }
}
