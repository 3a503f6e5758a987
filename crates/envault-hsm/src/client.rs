//! Outbound client for the key-wrap service.
//!
//! Used by the app server's file service. Each wrap/unwrap opens its own
//! TCP connection, performs one operation, and releases the connection.

use envault_crypto::{SealedBlob, SecretKey, NONCE_LEN, TAG_LEN};
use thiserror::Error;
use tokio::net::TcpStream;

use envault_wire::{
    read_bool, read_required_bytes, read_string, write_bytes, write_string, WireError,
};

/// Key-wrap client errors.
#[derive(Debug, Error)]
pub enum HsmClientError {
    /// The service rejected the wrapped blob (tampering or foreign KEK).
    #[error("unwrap rejected by key-wrap service")]
    Unseal,

    /// The service refused the operation with the given reason.
    #[error("key-wrap service refused: {0}")]
    Refused(String),

    /// The service returned a structurally invalid response.
    #[error("invalid key-wrap response: {0}")]
    InvalidResponse(&'static str),

    /// Framing or transport failure on the service connection.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Could not reach the service.
    #[error("key-wrap service unreachable: {0}")]
    Connect(std::io::Error),
}

/// Client handle holding the key-wrap service's address.
#[derive(Debug, Clone)]
pub struct WrapClient {
    addr: String,
}

impl WrapClient {
    /// Create a client for the service at `addr`.
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    async fn connect(&self) -> Result<TcpStream, HsmClientError> {
        TcpStream::connect(&self.addr).await.map_err(HsmClientError::Connect)
    }

    /// Liveness check.
    pub async fn ping(&self) -> Result<(), HsmClientError> {
        let mut stream = self.connect().await?;
        write_string(&mut stream, "PING").await?;
        if !read_bool(&mut stream).await? {
            let reason = read_string(&mut stream).await?;
            return Err(HsmClientError::Refused(reason));
        }
        let _pong = read_string(&mut stream).await?;
        write_string(&mut stream, "BYE").await?;
        Ok(())
    }

    /// Seal `key` under the service's resident KEK.
    pub async fn wrap(&self, key: &SecretKey) -> Result<SealedBlob, HsmClientError> {
        let mut stream = self.connect().await?;
        write_string(&mut stream, "WRAP").await?;
        write_bytes(&mut stream, Some(key.expose())).await?;

        if !read_bool(&mut stream).await? {
            let reason = read_string(&mut stream).await?;
            return Err(HsmClientError::Refused(reason));
        }

        let nonce_bytes = read_required_bytes(&mut stream).await?;
        let ciphertext = read_required_bytes(&mut stream).await?;
        let tag_bytes = read_required_bytes(&mut stream).await?;
        write_string(&mut stream, "BYE").await?;

        let nonce = <[u8; NONCE_LEN]>::try_from(nonce_bytes.as_slice())
            .map_err(|_| HsmClientError::InvalidResponse("bad nonce length"))?;
        let tag = <[u8; TAG_LEN]>::try_from(tag_bytes.as_slice())
            .map_err(|_| HsmClientError::InvalidResponse("bad tag length"))?;

        Ok(SealedBlob { nonce, ciphertext, tag })
    }

    /// Recover the plaintext key from a wrapped blob.
    ///
    /// The recovered bytes go straight into a [`SecretKey`], which erases
    /// the intermediate buffer; no plaintext key copy outlives this call.
    pub async fn unwrap(&self, wrapped: &SealedBlob) -> Result<SecretKey, HsmClientError> {
        let mut stream = self.connect().await?;
        write_string(&mut stream, "UNWRAP").await?;
        write_bytes(&mut stream, Some(&wrapped.nonce)).await?;
        write_bytes(&mut stream, Some(&wrapped.ciphertext)).await?;
        write_bytes(&mut stream, Some(&wrapped.tag)).await?;

        if !read_bool(&mut stream).await? {
            let reason = read_string(&mut stream).await?;
            if reason == "UNSEAL_FAILED" {
                return Err(HsmClientError::Unseal);
            }
            return Err(HsmClientError::Refused(reason));
        }

        let mut key_bytes = read_required_bytes(&mut stream).await?;
        write_string(&mut stream, "BYE").await?;

        SecretKey::from_bytes(&mut key_bytes)
            .map_err(|_| HsmClientError::InvalidResponse("bad key length"))
    }
}
