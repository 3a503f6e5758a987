//! File record model and its wire framing.
//!
//! The store treats both blobs as opaque byte sequences. It never holds a
//! key and never inspects ciphertext; this crate deliberately has no
//! dependency on the crypto crate.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::wire_ext::{read_blob, write_blob};
use envault_wire::{read_i64, read_string, write_i64, write_string, Result as WireResult};

/// An opaque sealed blob as the store sees it: nonce, ciphertext, tag.
///
/// Lengths are not interpreted here; the file service on the app server is
/// the only component that opens these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBlob {
    /// AEAD nonce bytes.
    pub nonce: Vec<u8>,
    /// Ciphertext bytes.
    pub ciphertext: Vec<u8>,
    /// AEAD authentication tag bytes.
    pub tag: Vec<u8>,
}

/// A complete persisted record: identity, placement, and the two blobs.
///
/// `file_id` and `created_at_micros` are assigned by the store at save
/// time; the record is immutable thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Store-assigned opaque identifier (32 lowercase hex chars).
    pub file_id: String,
    /// Folder the file belongs to; the unit of authorization.
    pub folder: String,
    /// Client-supplied file name.
    pub file_name: String,
    /// User who uploaded the file.
    pub owner: String,
    /// Microseconds since the Unix epoch, UTC, at save time.
    pub created_at_micros: i64,
    /// File content sealed under its DEK.
    pub content: StoredBlob,
    /// The DEK sealed under the KEK.
    pub wrapped_key: StoredBlob,
}

/// A record as submitted by the app server: everything the store does not
/// assign itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFileRecord {
    /// Folder the file belongs to.
    pub folder: String,
    /// Client-supplied file name.
    pub file_name: String,
    /// User who uploaded the file.
    pub owner: String,
    /// File content sealed under its DEK.
    pub content: StoredBlob,
    /// The DEK sealed under the KEK.
    pub wrapped_key: StoredBlob,
}

/// Projection of a record without the blobs — the only representation a
/// listing ever exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// Store-assigned identifier.
    pub file_id: String,
    /// Folder the file belongs to.
    pub folder: String,
    /// Client-supplied file name.
    pub file_name: String,
    /// User who uploaded the file.
    pub owner: String,
    /// Microseconds since the Unix epoch, UTC.
    pub created_at_micros: i64,
}

impl FileRecord {
    /// The metadata projection of this record.
    pub fn metadata(&self) -> FileMetadata {
        FileMetadata {
            file_id: self.file_id.clone(),
            folder: self.folder.clone(),
            file_name: self.file_name.clone(),
            owner: self.owner.clone(),
            created_at_micros: self.created_at_micros,
        }
    }
}

impl NewFileRecord {
    /// Write the save-request body: placement fields then both blobs.
    pub async fn write<W: AsyncWrite + Unpin>(&self, stream: &mut W) -> WireResult<()> {
        write_string(stream, &self.folder).await?;
        write_string(stream, &self.file_name).await?;
        write_string(stream, &self.owner).await?;
        write_blob(stream, &self.content).await?;
        write_blob(stream, &self.wrapped_key).await?;
        Ok(())
    }

    /// Read a save-request body.
    pub async fn read<R: AsyncRead + Unpin>(stream: &mut R) -> WireResult<Self> {
        Ok(Self {
            folder: read_string(stream).await?,
            file_name: read_string(stream).await?,
            owner: read_string(stream).await?,
            content: read_blob(stream).await?,
            wrapped_key: read_blob(stream).await?,
        })
    }
}

impl FileRecord {
    /// Write the full record as a load-response body.
    pub async fn write<W: AsyncWrite + Unpin>(&self, stream: &mut W) -> WireResult<()> {
        write_string(stream, &self.file_id).await?;
        write_string(stream, &self.folder).await?;
        write_string(stream, &self.file_name).await?;
        write_string(stream, &self.owner).await?;
        write_i64(stream, self.created_at_micros).await?;
        write_blob(stream, &self.content).await?;
        write_blob(stream, &self.wrapped_key).await?;
        Ok(())
    }

    /// Read a full record from a load-response body.
    pub async fn read<R: AsyncRead + Unpin>(stream: &mut R) -> WireResult<Self> {
        Ok(Self {
            file_id: read_string(stream).await?,
            folder: read_string(stream).await?,
            file_name: read_string(stream).await?,
            owner: read_string(stream).await?,
            created_at_micros: read_i64(stream).await?,
            content: read_blob(stream).await?,
            wrapped_key: read_blob(stream).await?,
        })
    }
}

impl FileMetadata {
    /// Write one listing entry.
    pub async fn write<W: AsyncWrite + Unpin>(&self, stream: &mut W) -> WireResult<()> {
        write_string(stream, &self.file_id).await?;
        write_string(stream, &self.folder).await?;
        write_string(stream, &self.file_name).await?;
        write_string(stream, &self.owner).await?;
        write_i64(stream, self.created_at_micros).await?;
        Ok(())
    }

    /// Read one listing entry.
    pub async fn read<R: AsyncRead + Unpin>(stream: &mut R) -> WireResult<Self> {
        Ok(Self {
            file_id: read_string(stream).await?,
            folder: read_string(stream).await?,
            file_name: read_string(stream).await?,
            owner: read_string(stream).await?,
            created_at_micros: read_i64(stream).await?,
        })
    }
}
