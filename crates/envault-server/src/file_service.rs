//! Envelope-encryption file operations.
//!
//! The only component that ever sees plaintext content or a plaintext
//! DEK. Every operation checks authorization before touching key
//! material, and every plaintext buffer is zeroized on the way out:
//!
//! - save: authorize, generate DEK, seal content, erase plaintext, wrap
//!   DEK, erase DEK, persist.
//! - load: fetch, authorize, unwrap DEK, open content, erase DEK.
//!
//! The store only ever receives the two sealed blobs; the key-wrap
//! service only ever receives key material, never content.

use std::sync::Arc;

use thiserror::Error;
use zeroize::Zeroize;

use envault_crypto::{open, seal, CryptoError, SealedBlob, SecretKey, NONCE_LEN, TAG_LEN};
use envault_hsm::client::{HsmClientError, WrapClient};
use envault_store::client::{StoreClient, StoreClientError};
use envault_store::{FileMetadata, NewFileRecord, StoredBlob};

use crate::acl::{AccessPolicy, Action};

/// File operation errors, as the session layer needs to distinguish
/// them. Cryptographic failure reasons are collapsed into
/// [`FileServiceError::Integrity`] before they reach a client.
#[derive(Debug, Error)]
pub enum FileServiceError {
    /// The user is not authorized for the target folder.
    #[error("access denied")]
    AccessDenied,

    /// No record exists under the requested identifier.
    #[error("file not found")]
    NotFound,

    /// The stored blobs failed verification: tampered ciphertext, a
    /// malformed blob shape, or a wrapped key the KEK rejects.
    #[error("stored record failed integrity verification")]
    Integrity,

    /// Key-wrap service failure unrelated to blob integrity.
    #[error("key-wrap service error: {0}")]
    Hsm(HsmClientError),

    /// Store failure unrelated to record existence.
    #[error("store error: {0}")]
    Store(StoreClientError),
}

impl From<HsmClientError> for FileServiceError {
    fn from(err: HsmClientError) -> Self {
        match err {
            HsmClientError::Unseal => Self::Integrity,
            other => Self::Hsm(other),
        }
    }
}

impl From<StoreClientError> for FileServiceError {
    fn from(err: StoreClientError) -> Self {
        match err {
            StoreClientError::NotFound => Self::NotFound,
            other => Self::Store(other),
        }
    }
}

/// A decrypted file as handed to the session layer. The session writes
/// the content to the client and zeroizes it.
#[derive(Debug)]
pub struct LoadedFile {
    /// Client-supplied name recorded at upload.
    pub file_name: String,
    /// Recovered plaintext content.
    pub content: Vec<u8>,
}

/// Orchestrates the key-wrap service and the store for one deployment.
///
/// Cheap to clone; connection handlers each hold a clone. All methods
/// take `&self` and share no mutable state.
#[derive(Clone)]
pub struct FileService {
    hsm: WrapClient,
    store: StoreClient,
    policy: Arc<AccessPolicy>,
}

impl FileService {
    /// Wire the service up to its two backends and the policy.
    pub fn new(hsm: WrapClient, store: StoreClient, policy: Arc<AccessPolicy>) -> Self {
        Self { hsm, store, policy }
    }

    /// Encrypt and persist `plaintext` as `file_name` in `folder`.
    ///
    /// Authorization runs before any key is generated, so a denied
    /// upload performs no cryptography and contacts no backend. The
    /// plaintext buffer is erased once sealed, on success and failure
    /// alike; the DEK exists only inside this call.
    ///
    /// # Errors
    ///
    /// [`FileServiceError::AccessDenied`] if `user` may not write to
    /// `folder`; backend errors are passed through.
    pub async fn save_file(
        &self,
        user: &str,
        folder: &str,
        file_name: &str,
        mut plaintext: Vec<u8>,
    ) -> Result<String, FileServiceError> {
        if !self.policy.has_permission(user, folder, Action::Write) {
            plaintext.zeroize();
            return Err(FileServiceError::AccessDenied);
        }

        let dek = SecretKey::generate();
        let content = seal(&dek, &plaintext);
        plaintext.zeroize();

        let wrapped_key = self.hsm.wrap(&dek).await?;
        drop(dek);

        let record = NewFileRecord {
            folder: folder.to_string(),
            file_name: file_name.to_string(),
            owner: user.to_string(),
            content: stored_from_sealed(&content),
            wrapped_key: stored_from_sealed(&wrapped_key),
        };
        Ok(self.store.save(record).await?)
    }

    /// Fetch and decrypt the file stored under `file_id`.
    ///
    /// The record is fetched first so authorization can run against its
    /// folder; an unauthorized user is denied before any key material
    /// moves. The DEK is erased as soon as the content is open.
    ///
    /// # Errors
    ///
    /// [`FileServiceError::NotFound`] for unknown identifiers,
    /// [`FileServiceError::AccessDenied`] for unauthorized folders, and
    /// [`FileServiceError::Integrity`] for any blob that fails
    /// verification.
    pub async fn load_file(
        &self,
        user: &str,
        file_id: &str,
    ) -> Result<LoadedFile, FileServiceError> {
        let record = self.store.load(file_id).await?;

        if !self.policy.has_permission(user, &record.folder, Action::Read) {
            return Err(FileServiceError::AccessDenied);
        }

        let wrapped_key = sealed_from_stored(&record.wrapped_key)?;
        let dek = self.hsm.unwrap(&wrapped_key).await?;

        let content = sealed_from_stored(&record.content)?;
        let plaintext = open(&dek, &content).map_err(|_: CryptoError| {
            tracing::warn!(file_id, "content blob failed authentication");
            FileServiceError::Integrity
        })?;
        drop(dek);

        Ok(LoadedFile { file_name: record.file_name, content: plaintext })
    }

    /// The folders `user` may access, as reported in the login reply.
    pub fn allowed_folders(&self, user: &str) -> Vec<String> {
        self.policy.allowed_folders(user)
    }

    /// The metadata listing visible to `user`: every record in a folder
    /// the user may read, blobs excluded.
    ///
    /// Visibility runs the same per-entry permission check as download,
    /// so anything the user could fetch also shows up here. For admins
    /// that includes folders no group designates.
    pub async fn list_files(&self, user: &str) -> Result<Vec<FileMetadata>, FileServiceError> {
        let metas = self.store.list().await?;
        Ok(metas
            .into_iter()
            .filter(|m| self.policy.has_permission(user, &m.folder, Action::Read))
            .collect())
    }
}

fn stored_from_sealed(blob: &SealedBlob) -> StoredBlob {
    StoredBlob {
        nonce: blob.nonce.to_vec(),
        ciphertext: blob.ciphertext.clone(),
        tag: blob.tag.to_vec(),
    }
}

/// Reshape a stored blob for opening. A nonce or tag of the wrong
/// length can only come from a corrupted or forged record, so it maps
/// to the same opaque failure as a bad tag.
fn sealed_from_stored(blob: &StoredBlob) -> Result<SealedBlob, FileServiceError> {
    let nonce = <[u8; NONCE_LEN]>::try_from(blob.nonce.as_slice())
        .map_err(|_| FileServiceError::Integrity)?;
    let tag =
        <[u8; TAG_LEN]>::try_from(blob.tag.as_slice()).map_err(|_| FileServiceError::Integrity)?;
    Ok(SealedBlob { nonce, ciphertext: blob.ciphertext.clone(), tag })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_reshape_round_trip() {
        let key = SecretKey::generate();
        let sealed = seal(&key, b"payload");
        let stored = stored_from_sealed(&sealed);
        assert_eq!(sealed_from_stored(&stored).unwrap(), sealed);
    }

    #[test]
    fn malformed_blob_shape_is_integrity_failure() {
        let key = SecretKey::generate();
        let mut stored = stored_from_sealed(&seal(&key, b"payload"));
        stored.nonce.push(0);
        assert!(matches!(sealed_from_stored(&stored), Err(FileServiceError::Integrity)));

        let mut stored = stored_from_sealed(&seal(&key, b"payload"));
        stored.tag.truncate(8);
        assert!(matches!(sealed_from_stored(&stored), Err(FileServiceError::Integrity)));
    }

    #[test]
    fn unseal_failure_collapses_to_integrity() {
        let err = FileServiceError::from(HsmClientError::Unseal);
        assert!(matches!(err, FileServiceError::Integrity));
    }
}
