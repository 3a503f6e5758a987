//! Key-wrap service binary.
//!
//! # Usage
//!
//! ```bash
//! # Start with a persistent KEK (base64-encoded 32 bytes)
//! envault-hsm --bind 127.0.0.1:6001 --kek "$(cat kek.b64)"
//!
//! # Start with an ephemeral KEK (development only)
//! envault-hsm --bind 127.0.0.1:6001
//! ```

use clap::Parser;
use envault_crypto::SecretKey;
use envault_hsm::{kek_from_base64, KeyWrapServer};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// envault key-wrap service
#[derive(Parser, Debug)]
#[command(name = "envault-hsm")]
#[command(about = "envault key-wrap service (resident KEK)")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "127.0.0.1:6001")]
    bind: String,

    /// Base64-encoded 256-bit KEK
    #[arg(long, env = "ENVAULT_KEK")]
    kek: Option<String>,

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

    let kek = match args.kek {
        Some(encoded) => kek_from_base64(&encoded)?,
        None => {
            tracing::warn!("No KEK provided - generating an ephemeral one");
            tracing::warn!("Keys wrapped by this instance are lost on restart!");
            SecretKey::generate()
        },
    };

    let server = KeyWrapServer::bind(&args.bind, kek).await?;
    tracing::info!("Key-wrap service listening on {}", server.local_addr()?);

    server.run().await?;

    Ok(())
}
