//! Per-connection command session.
//!
//! A session starts anonymous. `LOGIN` and `BYE` are the only commands
//! available before authentication; everything else answers
//! `ERROR_NOT_LOGGED_IN` without touching a backend. Replies always
//! start with a bool: `true` then the success body, `false` then a
//! single reason string. Unknown commands get a reason reply and the
//! session continues; only `BYE`, EOF, or a framing error end it.
//!
//! Failure reasons sent to clients are fixed strings. A failed login
//! never says which of username or password was wrong, and a failed
//! decrypt never says what failed inside the crypto.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use zeroize::Zeroize;

use envault_wire::{
    read_bytes, read_string, write_bool, write_bytes, write_i32, write_string, Result as WireResult,
};

use crate::auth::UserDirectory;
use crate::file_service::{FileService, FileServiceError};

/// Shared per-deployment state handed to every session.
#[derive(Clone)]
pub struct SessionContext {
    /// Credential table.
    pub directory: Arc<UserDirectory>,
    /// File operations, carrying the policy and both backends.
    pub files: FileService,
}

/// Serve one client connection until `BYE`, EOF, or a framing error.
///
/// Generic over the stream so tests can drive it through an in-memory
/// duplex pipe.
pub async fn run_session<S>(mut stream: S, ctx: SessionContext) -> WireResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut user: Option<String> = None;

    loop {
        let cmd = read_string(&mut stream).await?;

        match cmd.to_uppercase().as_str() {
            "LOGIN" => {
                let username = read_string(&mut stream).await?;
                let password = read_string(&mut stream).await?;

                match ctx.directory.authenticate(&username, &password) {
                    Some(group) => {
                        tracing::info!(user = %username, %group, "login accepted");
                        write_bool(&mut stream, true).await?;
                        write_string(&mut stream, "LOGIN_OK").await?;
                        write_string(&mut stream, &group).await?;

                        let folders = ctx.files.allowed_folders(&username);
                        write_i32(&mut stream, folders.len() as i32).await?;
                        for folder in &folders {
                            write_string(&mut stream, folder).await?;
                        }
                        user = Some(username);
                    }
                    None => {
                        tracing::info!(user = %username, "login rejected");
                        write_bool(&mut stream, false).await?;
                        write_string(&mut stream, "LOGIN_FAILED").await?;
                    }
                }
            }

            "BYE" => {
                tracing::debug!("session closed by client");
                return Ok(());
            }

            "LIST" => {
                let Some(user) = user.as_deref() else {
                    reject(&mut stream, "ERROR_NOT_LOGGED_IN").await?;
                    continue;
                };
                match ctx.files.list_files(user).await {
                    Ok(metas) => {
                        write_bool(&mut stream, true).await?;
                        write_i32(&mut stream, metas.len() as i32).await?;
                        for meta in &metas {
                            meta.write(&mut stream).await?;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(%user, error = %err, "listing failed");
                        reject(&mut stream, "ERROR: listing failed").await?;
                    }
                }
            }

            "UPLOAD" => {
                let folder = read_string(&mut stream).await?;
                let file_name = read_string(&mut stream).await?;
                let mut content = read_bytes(&mut stream).await?.unwrap_or_default();

                let Some(user) = user.as_deref() else {
                    content.zeroize();
                    reject(&mut stream, "ERROR_NOT_LOGGED_IN").await?;
                    continue;
                };

                match ctx.files.save_file(user, &folder, &file_name, content).await {
                    Ok(file_id) => {
                        tracing::info!(%user, %folder, %file_name, %file_id, "upload stored");
                        write_bool(&mut stream, true).await?;
                        write_string(&mut stream, "UPLOAD_OK").await?;
                        write_string(&mut stream, &file_id).await?;
                    }
                    Err(FileServiceError::AccessDenied) => {
                        tracing::warn!(%user, %folder, "upload denied");
                        reject(&mut stream, "DENIED").await?;
                    }
                    Err(err) => {
                        tracing::error!(%user, %folder, error = %err, "upload failed");
                        reject(&mut stream, "ERROR: upload failed").await?;
                    }
                }
            }

            "DOWNLOAD" => {
                let file_id = read_string(&mut stream).await?;

                let Some(user) = user.as_deref() else {
                    reject(&mut stream, "ERROR_NOT_LOGGED_IN").await?;
                    continue;
                };

                match ctx.files.load_file(user, &file_id).await {
                    Ok(mut loaded) => {
                        tracing::info!(
                            %user,
                            %file_id,
                            file_name = %loaded.file_name,
                            bytes = loaded.content.len(),
                            "download served"
                        );
                        // The plaintext is erased even when the reply
                        // fails partway through the stream.
                        let sent = async {
                            write_bool(&mut stream, true).await?;
                            write_string(&mut stream, "DOWNLOAD_OK").await?;
                            write_bytes(&mut stream, Some(&loaded.content)).await
                        }
                        .await;
                        loaded.content.zeroize();
                        sent?;
                    }
                    Err(FileServiceError::AccessDenied) => {
                        tracing::warn!(%user, %file_id, "download denied");
                        reject(&mut stream, "DENIED").await?;
                    }
                    Err(FileServiceError::NotFound) => {
                        reject(&mut stream, "NOT_FOUND").await?;
                    }
                    Err(err) => {
                        tracing::error!(%user, %file_id, error = %err, "download failed");
                        reject(&mut stream, "ERROR: download failed").await?;
                    }
                }
            }

            _ => {
                if user.is_none() {
                    reject(&mut stream, "ERROR_NOT_LOGGED_IN").await?;
                } else {
                    reject(&mut stream, &format!("Unknown command: {cmd}")).await?;
                }
            }
        }
    }
}

async fn reject<S>(stream: &mut S, reason: &str) -> WireResult<()>
where
    S: AsyncWrite + Unpin,
{
    write_bool(stream, false).await?;
    write_string(stream, reason).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use envault_hsm::client::WrapClient;
    use envault_store::client::StoreClient;
    use envault_wire::read_bool;

    use super::*;
    use crate::acl::AccessPolicy;
    use crate::config::DeploymentConfig;

    /// A session whose backends are unreachable: any command that
    /// touches a backend would fail, so replies prove the pre-auth
    /// paths never leave the session layer.
    fn spawn_session() -> tokio::io::DuplexStream {
        let config = DeploymentConfig::demo();
        let ctx = SessionContext {
            directory: Arc::new(UserDirectory::from_config(&config)),
            files: FileService::new(
                WrapClient::new("127.0.0.1:1"),
                StoreClient::new("127.0.0.1:1"),
                Arc::new(AccessPolicy::from_config(&config)),
            ),
        };
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            let _ = run_session(server, ctx).await;
        });
        client
    }

    #[tokio::test]
    async fn upload_before_login_is_rejected_in_the_session_layer() {
        let mut stream = spawn_session();

        write_string(&mut stream, "UPLOAD").await.unwrap();
        write_string(&mut stream, "Folder_Group2").await.unwrap();
        write_string(&mut stream, "x.txt").await.unwrap();
        write_bytes(&mut stream, Some(b"sensitive")).await.unwrap();

        assert!(!read_bool(&mut stream).await.unwrap());
        assert_eq!(read_string(&mut stream).await.unwrap(), "ERROR_NOT_LOGGED_IN");

        // The session survives and login still works, backends untouched.
        write_string(&mut stream, "LOGIN").await.unwrap();
        write_string(&mut stream, "userA").await.unwrap();
        write_string(&mut stream, "passA").await.unwrap();
        assert!(read_bool(&mut stream).await.unwrap());
        assert_eq!(read_string(&mut stream).await.unwrap(), "LOGIN_OK");
    }
}
