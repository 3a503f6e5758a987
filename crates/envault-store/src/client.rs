//! Outbound client for the ciphertext store.
//!
//! Used by the app server's file service. One TCP connection is opened
//! per operation and released afterwards, so no shared connection is ever
//! held across concurrent sessions.

use thiserror::Error;
use tokio::net::TcpStream;

use crate::record::{FileMetadata, FileRecord, NewFileRecord};
use envault_wire::{read_bool, read_i32, read_string, write_string, WireError};

/// Store client errors.
#[derive(Debug, Error)]
pub enum StoreClientError {
    /// No record exists under the requested identifier.
    #[error("record not found")]
    NotFound,

    /// The store refused the operation with the given reason.
    #[error("store refused: {0}")]
    Refused(String),

    /// Framing or transport failure on the store connection.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Could not reach the store.
    #[error("store unreachable: {0}")]
    Connect(std::io::Error),
}

/// Client handle holding the store's address.
#[derive(Debug, Clone)]
pub struct StoreClient {
    addr: String,
}

impl StoreClient {
    /// Create a client for the store at `addr`.
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    async fn connect(&self) -> Result<TcpStream, StoreClientError> {
        TcpStream::connect(&self.addr).await.map_err(StoreClientError::Connect)
    }

    /// Persist a record; the store assigns and returns its identifier.
    pub async fn save(&self, record: NewFileRecord) -> Result<String, StoreClientError> {
        let mut stream = self.connect().await?;
        write_string(&mut stream, "SAVE").await?;
        record.write(&mut stream).await?;

        if !read_bool(&mut stream).await? {
            let reason = read_string(&mut stream).await?;
            return Err(StoreClientError::Refused(reason));
        }
        let file_id = read_string(&mut stream).await?;
        write_string(&mut stream, "BYE").await?;
        Ok(file_id)
    }

    /// Fetch the full record for `file_id`.
    pub async fn load(&self, file_id: &str) -> Result<FileRecord, StoreClientError> {
        let mut stream = self.connect().await?;
        write_string(&mut stream, "LOAD").await?;
        write_string(&mut stream, file_id).await?;

        if !read_bool(&mut stream).await? {
            let reason = read_string(&mut stream).await?;
            if reason == "NOT_FOUND" {
                return Err(StoreClientError::NotFound);
            }
            return Err(StoreClientError::Refused(reason));
        }
        let record = FileRecord::read(&mut stream).await?;
        write_string(&mut stream, "BYE").await?;
        Ok(record)
    }

    /// Fetch every metadata projection the store holds.
    pub async fn list(&self) -> Result<Vec<FileMetadata>, StoreClientError> {
        let mut stream = self.connect().await?;
        write_string(&mut stream, "LIST").await?;

        if !read_bool(&mut stream).await? {
            let reason = read_string(&mut stream).await?;
            return Err(StoreClientError::Refused(reason));
        }
        let count = read_i32(&mut stream).await?;
        if count < 0 {
            return Err(WireError::MalformedFrame("negative listing count").into());
        }
        // The count is peer-supplied; cap the pre-allocation and let the
        // vector grow as elements actually arrive.
        let mut metas = Vec::with_capacity((count as usize).min(1024));
        for _ in 0..count {
            metas.push(FileMetadata::read(&mut stream).await?);
        }
        write_string(&mut stream, "BYE").await?;
        Ok(metas)
    }
}
