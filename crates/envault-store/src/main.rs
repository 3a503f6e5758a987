//! Ciphertext store binary.
//!
//! # Usage
//!
//! ```bash
//! envault-store --bind 127.0.0.1:6002 --root ./storage
//! ```

use clap::Parser;
use envault_store::StoreServer;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// envault ciphertext store
#[derive(Parser, Debug)]
#[command(name = "envault-store")]
#[command(about = "envault ciphertext store (sealed records at rest)")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "127.0.0.1:6002")]
    bind: String,

    /// Storage root directory (created if missing)
    #[arg(short, long, default_value = "./storage")]
    root: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let server = StoreServer::bind(&args.bind, &args.root).await?;
    tracing::info!("Ciphertext store listening on {}", server.local_addr()?);
    tracing::info!("Storage root: {} (ciphertext only, no keys)", args.root);

    server.run().await?;

    Ok(())
}
