//! Key-wrap service ("HSM").
//!
//! Holds the single long-lived key-encryption-key (KEK) and exposes two
//! operations over the wire codec: `WRAP` seals a caller-supplied
//! plaintext key under the KEK, `UNWRAP` opens a wrapped blob back into
//! the plaintext key. The KEK itself never leaves this process in any
//! form — not on the wire, not in logs, not in error messages.
//!
//! Each accepted connection is served by its own task; commands on one
//! connection never block another. A `WRAP`/`UNWRAP` call is one atomic
//! AEAD operation with no cross-call state.

pub mod client;

use std::{net::SocketAddr, sync::Arc};

use envault_crypto::{open, seal, CryptoError, SealedBlob, SecretKey, NONCE_LEN, TAG_LEN};
use envault_wire::{
    read_required_bytes, read_string, write_bool, write_bytes, write_string, WireError,
};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
};
use zeroize::Zeroize;

/// Errors that prevent the service from starting or accepting.
#[derive(Debug, Error)]
pub enum HsmError {
    /// Bind or accept failure on the listening socket.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Supplied KEK material was unusable.
    #[error("invalid KEK: {0}")]
    InvalidKek(String),
}

/// The key-wrap service: a TCP listener plus the resident KEK.
pub struct KeyWrapServer {
    listener: TcpListener,
    kek: Arc<SecretKey>,
}

impl KeyWrapServer {
    /// Bind the service on `addr` with the given KEK.
    pub async fn bind(addr: &str, kek: SecretKey) -> Result<Self, HsmError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, kek: Arc::new(kek) })
    }

    /// Local address the service is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, HsmError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever, serving each on its own task.
    pub async fn run(self) -> Result<(), HsmError> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "connection accepted");
                    let kek = Arc::clone(&self.kek);
                    tokio::spawn(async move {
                        serve_connection(stream, &kek).await;
                    });
                },
                Err(e) => {
                    tracing::error!("accept error: {e}");
                },
            }
        }
    }
}

async fn serve_connection(mut stream: TcpStream, kek: &SecretKey) {
    match command_loop(&mut stream, kek).await {
        Ok(()) | Err(WireError::ConnectionClosed) => {
            tracing::debug!("connection closed");
        },
        Err(e) => {
            tracing::warn!("connection aborted: {e}");
        },
    }
}

/// Serve one connection's command loop until `BYE` or stream end.
///
/// Framing errors propagate and abort the connection; command-level
/// failures are reported as `false` + reason and the loop continues.
pub async fn command_loop<S>(stream: &mut S, kek: &SecretKey) -> Result<(), WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let command = read_string(stream).await?;

        match command.to_ascii_uppercase().as_str() {
            "PING" => {
                write_bool(stream, true).await?;
                write_string(stream, "PONG").await?;
            },
            "WRAP" => handle_wrap(stream, kek).await?,
            "UNWRAP" => handle_unwrap(stream, kek).await?,
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

async fn handle_wrap<S>(stream: &mut S, kek: &SecretKey) -> Result<(), WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut key_bytes = read_required_bytes(stream).await?;

    // from_bytes zeroizes key_bytes on both paths, so the plaintext key
    // is gone from this buffer before any response is written.
    let wrapped = match SecretKey::from_bytes(&mut key_bytes) {
        Ok(plain_key) => seal(kek, plain_key.expose()),
        Err(CryptoError::InvalidKeyLength(got)) => {
            write_bool(stream, false).await?;
            write_string(stream, &format!("ERROR: key must be 32 bytes, got {got}")).await?;
            return Ok(());
        },
        Err(CryptoError::OpenFailed) => {
            // from_bytes never returns OpenFailed.
            write_bool(stream, false).await?;
            write_string(stream, "ERROR: wrap failed").await?;
            return Ok(());
        },
    };

    write_bool(stream, true).await?;
    write_bytes(stream, Some(&wrapped.nonce)).await?;
    write_bytes(stream, Some(&wrapped.ciphertext)).await?;
    write_bytes(stream, Some(&wrapped.tag)).await?;

    tracing::info!("wrapped a key");
    Ok(())
}

async fn handle_unwrap<S>(stream: &mut S, kek: &SecretKey) -> Result<(), WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let nonce_bytes = read_required_bytes(stream).await?;
    let ciphertext = read_required_bytes(stream).await?;
    let tag_bytes = read_required_bytes(stream).await?;

    let (Ok(nonce), Ok(tag)) = (
        <[u8; NONCE_LEN]>::try_from(nonce_bytes.as_slice()),
        <[u8; TAG_LEN]>::try_from(tag_bytes.as_slice()),
    ) else {
        write_bool(stream, false).await?;
        write_string(stream, "ERROR: malformed wrapped-key blob").await?;
        return Ok(());
    };

    let blob = SealedBlob { nonce, ciphertext, tag };

    match open(kek, &blob) {
        Ok(mut plain_key) => {
            write_bool(stream, true).await?;
            write_bytes(stream, Some(&plain_key)).await?;
            plain_key.zeroize();
            tracing::info!("unwrapped a key");
        },
        Err(_) => {
            // Tag verification failed: tampering or a foreign KEK. The
            // reason string must not describe the attempted plaintext.
            write_bool(stream, false).await?;
            write_string(stream, "UNSEAL_FAILED").await?;
            tracing::warn!("unwrap rejected: tag verification failed");
        },
    }
    Ok(())
}

/// Decode a base64-encoded 256-bit KEK.
pub fn kek_from_base64(encoded: &str) -> Result<SecretKey, HsmError> {
    use base64::Engine;

    let mut raw = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| HsmError::InvalidKek(format!("base64 decode failed: {e}")))?;
    SecretKey::from_bytes(&mut raw).map_err(|e| HsmError::InvalidKek(e.to_string()))
}

#[cfg(test)]
mod tests {
    use envault_wire::{read_bool, read_bytes, write_i32};

    use super::*;

    async fn send_wrap(stream: &mut tokio::io::DuplexStream, key: &[u8]) -> SealedBlob {
        write_string(stream, "WRAP").await.unwrap();
        write_bytes(stream, Some(key)).await.unwrap();
        assert!(read_bool(stream).await.unwrap());
        let nonce = read_bytes(stream).await.unwrap().unwrap();
        let ciphertext = read_bytes(stream).await.unwrap().unwrap();
        let tag = read_bytes(stream).await.unwrap().unwrap();
        SealedBlob {
            nonce: nonce.as_slice().try_into().unwrap(),
            ciphertext,
            tag: tag.as_slice().try_into().unwrap(),
        }
    }

    fn spawn_service(kek: SecretKey) -> tokio::io::DuplexStream {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            let _ = command_loop(&mut server, &kek).await;
        });
        client
    }

    #[tokio::test]
    async fn ping_pongs() {
        let mut stream = spawn_service(SecretKey::generate());
        write_string(&mut stream, "PING").await.unwrap();
        assert!(read_bool(&mut stream).await.unwrap());
        assert_eq!(read_string(&mut stream).await.unwrap(), "PONG");
    }

    #[tokio::test]
    async fn wrap_then_unwrap_recovers_key() {
        let mut stream = spawn_service(SecretKey::generate());
        let dek = [0x5Au8; 32];

        let wrapped = send_wrap(&mut stream, &dek).await;
        assert_ne!(wrapped.ciphertext, dek);

        write_string(&mut stream, "UNWRAP").await.unwrap();
        write_bytes(&mut stream, Some(&wrapped.nonce)).await.unwrap();
        write_bytes(&mut stream, Some(&wrapped.ciphertext)).await.unwrap();
        write_bytes(&mut stream, Some(&wrapped.tag)).await.unwrap();

        assert!(read_bool(&mut stream).await.unwrap());
        assert_eq!(read_bytes(&mut stream).await.unwrap().unwrap(), dek);
    }

    #[tokio::test]
    async fn tampered_blob_is_rejected_and_session_survives() {
        let mut stream = spawn_service(SecretKey::generate());
        let mut wrapped = send_wrap(&mut stream, &[1u8; 32]).await;
        wrapped.ciphertext[0] ^= 0xFF;

        write_string(&mut stream, "UNWRAP").await.unwrap();
        write_bytes(&mut stream, Some(&wrapped.nonce)).await.unwrap();
        write_bytes(&mut stream, Some(&wrapped.ciphertext)).await.unwrap();
        write_bytes(&mut stream, Some(&wrapped.tag)).await.unwrap();

        assert!(!read_bool(&mut stream).await.unwrap());
        assert_eq!(read_string(&mut stream).await.unwrap(), "UNSEAL_FAILED");

        // Connection stays usable after the rejection.
        write_string(&mut stream, "PING").await.unwrap();
        assert!(read_bool(&mut stream).await.unwrap());
        assert_eq!(read_string(&mut stream).await.unwrap(), "PONG");
    }

    #[tokio::test]
    async fn wrap_with_wrong_key_length_is_a_command_error() {
        let mut stream = spawn_service(SecretKey::generate());
        write_string(&mut stream, "WRAP").await.unwrap();
        write_bytes(&mut stream, Some(&[0u8; 16])).await.unwrap();
        assert!(!read_bool(&mut stream).await.unwrap());
        let reason = read_string(&mut stream).await.unwrap();
        assert!(reason.starts_with("ERROR"));
    }

    #[tokio::test]
    async fn unknown_command_keeps_connection_open() {
        let mut stream = spawn_service(SecretKey::generate());
        write_string(&mut stream, "ROTATE").await.unwrap();
        assert!(!read_bool(&mut stream).await.unwrap());
        assert_eq!(read_string(&mut stream).await.unwrap(), "Unknown command: ROTATE");

        write_string(&mut stream, "PING").await.unwrap();
        assert!(read_bool(&mut stream).await.unwrap());
        assert_eq!(read_string(&mut stream).await.unwrap(), "PONG");
    }

    #[tokio::test]
    async fn commands_are_case_insensitive() {
        let mut stream = spawn_service(SecretKey::generate());
        write_string(&mut stream, "ping").await.unwrap();
        assert!(read_bool(&mut stream).await.unwrap());
        assert_eq!(read_string(&mut stream).await.unwrap(), "PONG");
    }

    #[tokio::test]
    async fn absent_wrap_key_aborts_connection() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let kek = SecretKey::generate();
        let handle = tokio::spawn(async move { command_loop(&mut server, &kek).await });

        write_string(&mut client, "WRAP").await.unwrap();
        write_i32(&mut client, -1).await.unwrap(); // absent byte sequence

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(WireError::MalformedFrame(_))));
    }

    #[test]
    fn kek_base64_round_trip() {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode([7u8; 32]);
        let kek = kek_from_base64(&encoded).unwrap();
        assert_eq!(kek.expose(), &[7u8; 32]);

        assert!(kek_from_base64("not base64!").is_err());
        let short = base64::engine::general_purpose::STANDARD.encode([7u8; 8]);
        assert!(kek_from_base64(&short).is_err());
    }
}
