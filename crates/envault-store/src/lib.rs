//! Ciphertext store service.
//!
//! Persists opaque records (sealed content plus the wrapped key that opens
//! it) keyed by a store-assigned identifier. The store is the system's
//! at-rest custodian of ciphertext and nothing else: it never receives
//! plaintext content, never receives an unwrapped key, and never inspects
//! a blob it holds.
//!
//! Protocol (over the envault wire codec): `SAVE` assigns an identifier
//! and timestamp and persists durably before acknowledging; `LOAD`
//! returns a full record or `NOT_FOUND`; `LIST` returns every metadata
//! projection, ordered by folder then file name; `BYE` closes. Each
//! accepted connection runs on its own task against the shared index.

pub mod client;
mod index;
mod record;
mod wire_ext;

use std::{net::SocketAddr, sync::Arc};

pub use index::{StoreError, StoreIndex};
pub use record::{FileMetadata, FileRecord, NewFileRecord, StoredBlob};

use envault_wire::{read_string, write_bool, write_i32, write_string, WireError};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
};

/// The ciphertext store: a TCP listener plus the shared record index.
pub struct StoreServer {
    listener: TcpListener,
    index: Arc<StoreIndex>,
}

impl StoreServer {
    /// Bind the service on `addr`, rooting persistence at `root`.
    pub async fn bind(addr: &str, root: impl Into<std::path::PathBuf>) -> Result<Self, StoreError> {
        let index = Arc::new(StoreIndex::open(root)?);
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, index })
    }

    /// Local address the service is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, StoreError> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared handle to the record index.
    pub fn index(&self) -> Arc<StoreIndex> {
        Arc::clone(&self.index)
    }

    /// Accept connections forever, serving each on its own task.
    pub async fn run(self) -> Result<(), StoreError> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "connection accepted");
                    let index = Arc::clone(&self.index);
                    tokio::spawn(async move {
                        serve_connection(stream, &index).await;
                    });
                },
                Err(e) => {
                    tracing::error!("accept error: {e}");
                },
            }
        }
    }
}

async fn serve_connection(mut stream: TcpStream, index: &StoreIndex) {
    match command_loop(&mut stream, index).await {
        Ok(()) | Err(WireError::ConnectionClosed) => {
            tracing::debug!("connection closed");
        },
        Err(e) => {
            tracing::warn!("connection aborted: {e}");
        },
    }
}

/// Serve one connection's command loop until `BYE` or stream end.
pub async fn command_loop<S>(stream: &mut S, index: &StoreIndex) -> Result<(), WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let command = read_string(stream).await?;

        match command.to_ascii_uppercase().as_str() {
            "SAVE" => handle_save(stream, index).await?,
            "LOAD" => handle_load(stream, index).await?,
            "LIST" => handle_list(stream, index).await?,
            "BYE" => {
                tracing::debug!("peer ended session");
                return Ok(());
            },
            _ => {
                write_bool(stream, false).await?;
                write_string(stream, &format!("Unknown command: {command}")).await?;
            },
        }
    }
}

async fn handle_save<S>(stream: &mut S, index: &StoreIndex) -> Result<(), WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let new = NewFileRecord::read(stream).await?;
    let folder = new.folder.clone();
    let size = new.content.ciphertext.len();

    match index.save(new).await {
        Ok(file_id) => {
            tracing::info!(%file_id, %folder, size, "record saved (ciphertext only)");
            write_bool(stream, true).await?;
            write_string(stream, &file_id).await?;
        },
        Err(StoreError::InvalidFolder) => {
            tracing::warn!("save rejected: invalid folder name");
            write_bool(stream, false).await?;
            write_string(stream, "ERROR: invalid folder name").await?;
        },
        Err(e) => {
            // Persistence failure must be explicit, never silent.
            tracing::error!("save failed: {e}");
            write_bool(stream, false).await?;
            write_string(stream, "ERROR: persistence failed").await?;
        },
    }
    Ok(())
}

async fn handle_load<S>(stream: &mut S, index: &StoreIndex) -> Result<(), WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let file_id = read_string(stream).await?;
    match index.load(&file_id).await {
        Some(record) => {
            tracing::info!(%file_id, "record loaded");
            write_bool(stream, true).await?;
            record.write(stream).await?;
        },
        None => {
            write_bool(stream, false).await?;
            write_string(stream, "NOT_FOUND").await?;
        },
    }
    Ok(())
}

async fn handle_list<S>(stream: &mut S, index: &StoreIndex) -> Result<(), WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let metas = index.list().await;
    write_bool(stream, true).await?;
    let count = i32::try_from(metas.len())
        .map_err(|_| WireError::MalformedFrame("listing too large"))?;
    write_i32(stream, count).await?;
    for meta in &metas {
        meta.write(stream).await?;
    }
    Ok(())
}
