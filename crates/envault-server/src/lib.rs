//! Application server: the only component clients talk to.
//!
//! Fronts the key-wrap service and the ciphertext store, neither of
//! which accepts client connections. Each accepted connection gets its
//! own task running the command session; sessions share the immutable
//! credential table and access policy and open their own backend
//! connections per operation, so no lock is held across an await.

pub mod acl;
pub mod auth;
pub mod config;
pub mod file_service;
pub mod session;

use std::{net::SocketAddr, sync::Arc};

use thiserror::Error;
use tokio::net::TcpListener;

use envault_hsm::client::WrapClient;
use envault_store::client::StoreClient;

use crate::acl::AccessPolicy;
use crate::auth::UserDirectory;
use crate::config::DeploymentConfig;
use crate::file_service::FileService;
use crate::session::{run_session, SessionContext};

/// Errors that prevent the server from starting or accepting.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Bind or accept failure on the listening socket.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

/// The app server: a TCP listener plus the shared session context.
pub struct AppServer {
    listener: TcpListener,
    ctx: SessionContext,
}

impl AppServer {
    /// Bind on `addr`, serving `config` against the two backends.
    pub async fn bind(
        addr: &str,
        config: &DeploymentConfig,
        hsm_addr: &str,
        store_addr: &str,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await?;
        let policy = Arc::new(AccessPolicy::from_config(config));
        let ctx = SessionContext {
            directory: Arc::new(UserDirectory::from_config(config)),
            files: FileService::new(
                WrapClient::new(hsm_addr),
                StoreClient::new(store_addr),
                policy,
            ),
        };
        Ok(Self { listener, ctx })
    }

    /// The bound address; useful when binding to port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept and serve connections until the listener fails.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!(addr = %self.local_addr()?, "app server listening");
        loop {
            let (stream, peer) = self.listener.accept().await?;
            tracing::debug!(%peer, "client connected");
            let ctx = self.ctx.clone();
            tokio::spawn(async move {
                match run_session(stream, ctx).await {
                    Ok(()) => tracing::debug!(%peer, "session ended"),
                    Err(err) => tracing::warn!(%peer, error = %err, "session aborted"),
                }
            });
        }
    }
}
