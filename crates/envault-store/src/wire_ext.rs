//! Blob framing helpers shared by the record model.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::record::StoredBlob;
use envault_wire::{read_required_bytes, write_bytes, Result as WireResult};

/// Write a blob as three required byte sequences: nonce, ciphertext, tag.
pub(crate) async fn write_blob<W: AsyncWrite + Unpin>(
    stream: &mut W,
    blob: &StoredBlob,
) -> WireResult<()> {
    write_bytes(stream, Some(&blob.nonce)).await?;
    write_bytes(stream, Some(&blob.ciphertext)).await?;
    write_bytes(stream, Some(&blob.tag)).await?;
    Ok(())
}

/// Read a blob; all three sequences are required.
pub(crate) async fn read_blob<R: AsyncRead + Unpin>(stream: &mut R) -> WireResult<StoredBlob> {
    Ok(StoredBlob {
        nonce: read_required_bytes(stream).await?,
        ciphertext: read_required_bytes(stream).await?,
        tag: read_required_bytes(stream).await?,
    })
}
