//! Client-side session for the envault app server.
//!
//! Speaks the app server's command protocol over one TCP connection:
//! `login`, then any number of `list` / `upload` / `download` calls,
//! then `bye`. Server rejections come back as typed errors; the fixed
//! reason strings (`DENIED`, `NOT_FOUND`, `ERROR_NOT_LOGGED_IN`)
//! never reach the caller as bare text.

use thiserror::Error;
use tokio::net::TcpStream;

use envault_store::FileMetadata;
use envault_wire::{
    read_bool, read_bytes, read_i32, read_string, write_bytes, write_string, WireError,
};

/// Session errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Credentials rejected; the server does not say why.
    #[error("login rejected")]
    LoginFailed,

    /// The server denied access to the requested folder or file.
    #[error("access denied")]
    Denied,

    /// No file exists under the requested identifier.
    #[error("file not found")]
    NotFound,

    /// The command requires a prior successful login.
    #[error("not logged in")]
    NotLoggedIn,

    /// Any other server-side rejection, with the server's reason.
    #[error("server refused: {0}")]
    Refused(String),

    /// Framing or transport failure on the session connection.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Could not reach the server.
    #[error("server unreachable: {0}")]
    Connect(std::io::Error),
}

/// What a successful login grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    /// The group the account belongs to.
    pub group: String,
    /// The folders the account may access.
    pub folders: Vec<String>,
}

/// One authenticated (or not-yet-authenticated) session connection.
pub struct Client {
    stream: TcpStream,
}

impl Client {
    /// Open a session connection to the app server at `addr`.
    pub async fn connect(addr: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await.map_err(ClientError::Connect)?;
        tracing::debug!(%addr, "session connection opened");
        Ok(Self { stream })
    }

    /// Read a `false` reply's reason and map the fixed strings.
    async fn read_rejection(&mut self) -> Result<ClientError, ClientError> {
        let reason = read_string(&mut self.stream).await?;
        Ok(match reason.as_str() {
            "LOGIN_FAILED" => ClientError::LoginFailed,
            "DENIED" => ClientError::Denied,
            "NOT_FOUND" => ClientError::NotFound,
            "ERROR_NOT_LOGGED_IN" => ClientError::NotLoggedIn,
            _ => ClientError::Refused(reason),
        })
    }

    /// Authenticate this session.
    ///
    /// # Errors
    ///
    /// [`ClientError::LoginFailed`] on rejection; the session stays
    /// usable for another attempt.
    pub async fn login(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<LoginOutcome, ClientError> {
        write_string(&mut self.stream, "LOGIN").await?;
        write_string(&mut self.stream, username).await?;
        write_string(&mut self.stream, password).await?;

        if !read_bool(&mut self.stream).await? {
            return Err(self.read_rejection().await?);
        }
        let _ok = read_string(&mut self.stream).await?;
        let group = read_string(&mut self.stream).await?;

        let count = read_i32(&mut self.stream).await?;
        if count < 0 {
            return Err(WireError::MalformedFrame("negative folder count").into());
        }
        // The count is peer-supplied; cap the pre-allocation and let the
        // vector grow as elements actually arrive.
        let mut folders = Vec::with_capacity((count as usize).min(1024));
        for _ in 0..count {
            folders.push(read_string(&mut self.stream).await?);
        }
        Ok(LoginOutcome { group, folders })
    }

    /// Fetch the file listing visible to this account.
    pub async fn list(&mut self) -> Result<Vec<FileMetadata>, ClientError> {
        write_string(&mut self.stream, "LIST").await?;

        if !read_bool(&mut self.stream).await? {
            return Err(self.read_rejection().await?);
        }
        let count = read_i32(&mut self.stream).await?;
        if count < 0 {
            return Err(WireError::MalformedFrame("negative listing count").into());
        }
        // Peer-supplied count; same pre-allocation cap as the login reply.
        let mut entries = Vec::with_capacity((count as usize).min(1024));
        for _ in 0..count {
            entries.push(FileMetadata::read(&mut self.stream).await?);
        }
        Ok(entries)
    }

    /// Upload `content` as `file_name` into `folder`; returns the
    /// server-assigned file identifier.
    pub async fn upload(
        &mut self,
        folder: &str,
        file_name: &str,
        content: &[u8],
    ) -> Result<String, ClientError> {
        write_string(&mut self.stream, "UPLOAD").await?;
        write_string(&mut self.stream, folder).await?;
        write_string(&mut self.stream, file_name).await?;
        write_bytes(&mut self.stream, Some(content)).await?;

        if !read_bool(&mut self.stream).await? {
            return Err(self.read_rejection().await?);
        }
        let _ok = read_string(&mut self.stream).await?;
        Ok(read_string(&mut self.stream).await?)
    }

    /// Download the file stored under `file_id`.
    pub async fn download(&mut self, file_id: &str) -> Result<Vec<u8>, ClientError> {
        write_string(&mut self.stream, "DOWNLOAD").await?;
        write_string(&mut self.stream, file_id).await?;

        if !read_bool(&mut self.stream).await? {
            return Err(self.read_rejection().await?);
        }
        let _ok = read_string(&mut self.stream).await?;
        Ok(read_bytes(&mut self.stream).await?.unwrap_or_default())
    }

    /// Send any command verbatim and read the bool + reason reply.
    /// Exists for protocol-level tests; regular callers use the typed
    /// methods.
    pub async fn raw_command(&mut self, command: &str) -> Result<(bool, String), ClientError> {
        write_string(&mut self.stream, command).await?;
        let ok = read_bool(&mut self.stream).await?;
        let reason = read_string(&mut self.stream).await?;
        Ok((ok, reason))
    }

    /// End the session cleanly.
    pub async fn bye(mut self) -> Result<(), ClientError> {
        write_string(&mut self.stream, "BYE").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use envault_wire::{read_string, write_bool, write_i32};
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn absurd_listing_count_does_not_allocate_ahead() {
        // A hostile peer claims i32::MAX entries, then hangs up. The
        // client must report a closed connection, not reserve gigabytes
        // up front on the claimed count.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut peer, _) = listener.accept().await.unwrap();
            assert_eq!(read_string(&mut peer).await.unwrap(), "LIST");
            write_bool(&mut peer, true).await.unwrap();
            write_i32(&mut peer, i32::MAX).await.unwrap();
        });

        let mut client = Client::connect(&addr).await.unwrap();
        let err = client.list().await.unwrap_err();
        assert!(matches!(err, ClientError::Wire(WireError::ConnectionClosed)));
    }
}
