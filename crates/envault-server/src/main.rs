//! Application server binary.
//!
//! # Usage
//!
//! ```bash
//! # Serve the built-in demo deployment
//! envault-server --bind 127.0.0.1:6000 \
//!     --hsm 127.0.0.1:6001 --store 127.0.0.1:6002
//!
//! # Serve a custom deployment table
//! envault-server --users deployment.json
//! ```

use clap::Parser;
use envault_server::{config::DeploymentConfig, AppServer};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// envault application server
#[derive(Parser, Debug)]
#[command(name = "envault-server")]
#[command(about = "envault application server (auth, access control, envelope encryption)")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "127.0.0.1:6000")]
    bind: String,

    /// Key-wrap service address
    #[arg(long, default_value = "127.0.0.1:6001")]
    hsm: String,

    /// Ciphertext store address
    #[arg(long, default_value = "127.0.0.1:6002")]
    store: String,

    /// Deployment table (users and groups) as JSON
    #[arg(long)]
    users: Option<String>,

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

    let config = match args.users {
        Some(path) => DeploymentConfig::load(std::path::Path::new(&path))?,
        None => {
            tracing::warn!("No deployment table provided - using the built-in demo users");
            DeploymentConfig::demo()
        },
    };

    let server = AppServer::bind(&args.bind, &config, &args.hsm, &args.store).await?;
    tracing::info!("App server listening on {}", server.local_addr()?);
    tracing::info!("Backends: key-wrap at {}, store at {}", args.hsm, args.store);

    server.run().await?;

    Ok(())
}
