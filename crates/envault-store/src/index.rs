//! Durable record index.
//!
//! Records live in an in-memory map for lookup and are written through to
//! disk as one JSON file per record, `<root>/<folder>/<file_id>.json`. On
//! startup the root is scanned recursively and every parseable record is
//! loaded back; corrupt or unreadable files are skipped with a warning so
//! one bad entry never takes the store down.
//!
//! The map sits behind an async `RwLock`: concurrent connection tasks
//! save and load without corrupting the index, and each save assigns its
//! own unique identifier under the write lock.

use std::{
    collections::{HashMap, HashSet},
    io,
    path::PathBuf,
    time::SystemTime,
};

use rand::RngCore;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::record::{FileMetadata, FileRecord, NewFileRecord};

/// Persistence failures. Always reported explicitly, never swallowed.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Folder name is empty, contains a path separator, or is a dot
    /// component. Rejected before it can reach a filesystem path.
    #[error("invalid folder name")]
    InvalidFolder,

    /// Filesystem failure while persisting or scanning.
    #[error("storage i/o error: {0}")]
    Io(#[from] io::Error),

    /// Record could not be encoded for persistence.
    #[error("record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// The store's record index: in-memory map plus JSON write-through.
pub struct StoreIndex {
    root: PathBuf,
    records: RwLock<HashMap<String, FileRecord>>,
    /// Identifiers assigned to in-flight saves: reserved before the disk
    /// write, promoted into `records` after it.
    reserved: Mutex<HashSet<String>>,
}

impl StoreIndex {
    /// Open (or create) the store rooted at `root`, loading every
    /// readable persisted record into the index.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        let mut records = HashMap::new();
        scan_dir(&root, &mut records)?;
        tracing::info!(count = records.len(), root = %root.display(), "record index loaded");

        Ok(Self { root, records: RwLock::new(records), reserved: Mutex::new(HashSet::new()) })
    }

    /// Persist a new record, assigning its identifier and timestamp.
    ///
    /// The record is durably written before it becomes visible in the
    /// index, so a save acknowledgement always refers to bytes on disk.
    /// The identifier is reserved under a short lock and the disk write
    /// runs with no lock held, so loads and lists proceed while a save
    /// is on its way to disk.
    pub async fn save(&self, new: NewFileRecord) -> Result<String, StoreError> {
        validate_folder(&new.folder)?;
        let created_at_micros = unix_micros_now();

        let file_id = {
            let records = self.records.read().await;
            let mut reserved = self.reserved.lock().await;
            loop {
                let candidate = fresh_file_id();
                if !records.contains_key(&candidate) && reserved.insert(candidate.clone()) {
                    break candidate;
                }
            }
        };

        let record = FileRecord {
            file_id: file_id.clone(),
            folder: new.folder,
            file_name: new.file_name,
            owner: new.owner,
            created_at_micros,
            content: new.content,
            wrapped_key: new.wrapped_key,
        };

        let persisted = self.persist(&record).await;
        match persisted {
            Ok(()) => {
                self.records.write().await.insert(file_id.clone(), record);
                self.reserved.lock().await.remove(&file_id);
                Ok(file_id)
            },
            Err(e) => {
                self.reserved.lock().await.remove(&file_id);
                Err(e)
            },
        }
    }

    async fn persist(&self, record: &FileRecord) -> Result<(), StoreError> {
        let folder_dir = self.root.join(&record.folder);
        tokio::fs::create_dir_all(&folder_dir).await?;
        let path = folder_dir.join(format!("{}.json", record.file_id));
        let json = serde_json::to_vec(record)?;
        tokio::fs::write(&path, json).await?;
        Ok(())
    }

    /// Look up a record by identifier.
    pub async fn load(&self, file_id: &str) -> Option<FileRecord> {
        self.records.read().await.get(file_id).cloned()
    }

    /// All metadata projections, ordered by folder then file name.
    ///
    /// Ordering is byte-wise and case-sensitive; this is the documented,
    /// stable listing order for the deployment.
    pub async fn list(&self) -> Vec<FileMetadata> {
        let records = self.records.read().await;
        let mut metas: Vec<FileMetadata> = records.values().map(FileRecord::metadata).collect();
        metas.sort_by(|a, b| {
            a.folder.cmp(&b.folder).then_with(|| a.file_name.cmp(&b.file_name))
        });
        metas
    }

    /// Number of indexed records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the index holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

fn scan_dir(
    dir: &std::path::Path,
    records: &mut HashMap<String, FileRecord>,
) -> Result<(), StoreError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            scan_dir(&path, records)?;
        } else if path.extension().is_some_and(|ext| ext == "json") {
            match load_record_file(&path) {
                Ok(record) => {
                    records.insert(record.file_id.clone(), record);
                },
                Err(e) => {
                    tracing::warn!(path = %path.display(), "skipping unreadable record: {e}");
                },
            }
        }
    }
    Ok(())
}

fn load_record_file(path: &std::path::Path) -> Result<FileRecord, StoreError> {
    let bytes = std::fs::read(path)?;
    let record: FileRecord = serde_json::from_slice(&bytes)?;
    if record.file_id.is_empty() {
        return Err(StoreError::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            "record has an empty identifier",
        )));
    }
    Ok(record)
}

/// A folder name arrives off the network and becomes one path component
/// under the storage root. Anything that could escape that component —
/// separators, dot components, NUL — is rejected outright.
fn validate_folder(folder: &str) -> Result<(), StoreError> {
    let escapes = folder.is_empty()
        || folder == "."
        || folder == ".."
        || folder.contains(['/', '\\', '\0']);
    if escapes {
        return Err(StoreError::InvalidFolder);
    }
    Ok(())
}

/// 32 lowercase hex characters from 16 random bytes.
fn fresh_file_id() -> String {
    let mut raw = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut raw);
    hex::encode(raw)
}

fn unix_micros_now() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |d| d.as_micros() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::StoredBlob;

    fn sample_new(folder: &str, name: &str) -> NewFileRecord {
        NewFileRecord {
            folder: folder.to_string(),
            file_name: name.to_string(),
            owner: "userA".to_string(),
            content: StoredBlob { nonce: vec![1; 12], ciphertext: vec![2; 8], tag: vec![3; 16] },
            wrapped_key: StoredBlob { nonce: vec![4; 12], ciphertext: vec![5; 32], tag: vec![6; 16] },
        }
    }

    #[tokio::test]
    async fn save_assigns_id_and_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let index = StoreIndex::open(dir.path()).unwrap();

        let id = index.save(sample_new("Folder_Group2", "a.txt")).await.unwrap();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));

        let record = index.load(&id).await.unwrap();
        assert_eq!(record.file_id, id);
        assert!(record.created_at_micros > 0);
    }

    #[tokio::test]
    async fn save_writes_through_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let index = StoreIndex::open(dir.path()).unwrap();
        let id = index.save(sample_new("Folder_Group2", "a.txt")).await.unwrap();

        let path = dir.path().join("Folder_Group2").join(format!("{id}.json"));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let index = StoreIndex::open(dir.path()).unwrap();
            index.save(sample_new("Folder_Group3", "b.txt")).await.unwrap()
        };

        let reopened = StoreIndex::open(dir.path()).unwrap();
        let record = reopened.load(&id).await.unwrap();
        assert_eq!(record.file_name, "b.txt");
        assert_eq!(record.folder, "Folder_Group3");
    }

    #[tokio::test]
    async fn corrupt_file_is_skipped_on_startup() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let index = StoreIndex::open(dir.path()).unwrap();
            index.save(sample_new("Folder_Group2", "good.txt")).await.unwrap()
        };

        std::fs::write(dir.path().join("Folder_Group2").join("broken.json"), b"{not json")
            .unwrap();

        let reopened = StoreIndex::open(dir.path()).unwrap();
        assert_eq!(reopened.len().await, 1);
        assert!(reopened.load(&id).await.is_some());
    }

    #[tokio::test]
    async fn list_orders_by_folder_then_name() {
        let dir = tempfile::tempdir().unwrap();
        let index = StoreIndex::open(dir.path()).unwrap();

        index.save(sample_new("Folder_Group3", "z.txt")).await.unwrap();
        index.save(sample_new("Folder_Group2", "b.txt")).await.unwrap();
        index.save(sample_new("Folder_Group3", "a.txt")).await.unwrap();
        index.save(sample_new("Folder_Group2", "a.txt")).await.unwrap();

        let listed = index.list().await;
        let order: Vec<(String, String)> =
            listed.into_iter().map(|m| (m.folder, m.file_name)).collect();
        assert_eq!(
            order,
            vec![
                ("Folder_Group2".to_string(), "a.txt".to_string()),
                ("Folder_Group2".to_string(), "b.txt".to_string()),
                ("Folder_Group3".to_string(), "a.txt".to_string()),
                ("Folder_Group3".to_string(), "z.txt".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn load_of_unknown_id_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let index = StoreIndex::open(dir.path()).unwrap();
        assert!(index.load("0".repeat(32).as_str()).await.is_none());
    }

    #[tokio::test]
    async fn traversal_folder_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let index = StoreIndex::open(dir.path()).unwrap();

        for folder in ["../outside", "a/b", "a\\b", "..", ".", "", "x\0y"] {
            let err = index.save(sample_new(folder, "a.txt")).await.unwrap_err();
            assert!(matches!(err, StoreError::InvalidFolder), "folder {folder:?} was accepted");
        }

        // Nothing was written, inside or above the root.
        assert!(index.is_empty().await);
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
        assert!(!dir.path().parent().unwrap().join("outside").exists());
    }

    #[tokio::test]
    async fn reads_proceed_while_save_is_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let index = std::sync::Arc::new(StoreIndex::open(dir.path()).unwrap());
        let first = index.save(sample_new("Folder_Group2", "a.txt")).await.unwrap();

        let saver = {
            let index = std::sync::Arc::clone(&index);
            tokio::spawn(async move {
                index.save(sample_new("Folder_Group2", "b.txt")).await.unwrap()
            })
        };

        // Loads and lists never block on an in-flight save.
        assert!(index.load(&first).await.is_some());
        assert!(!index.list().await.is_empty());

        let second = saver.await.unwrap();
        assert_ne!(first, second);
        assert_eq!(index.len().await, 2);
    }

    #[tokio::test]
    async fn concurrent_saves_assign_unique_ids() {
        let dir = tempfile::tempdir().unwrap();
        let index = std::sync::Arc::new(StoreIndex::open(dir.path()).unwrap());

        let mut handles = Vec::new();
        for i in 0..32 {
            let index = std::sync::Arc::clone(&index);
            handles.push(tokio::spawn(async move {
                index.save(sample_new("Folder_Group2", &format!("f{i}.txt"))).await.unwrap()
            }));
        }

        let mut ids = std::collections::HashSet::new();
        for handle in handles {
            assert!(ids.insert(handle.await.unwrap()));
        }
        assert_eq!(index.len().await, 32);
    }
}
