//! Credential and policy configuration.
//!
//! Both tables are immutable after load: they are parsed once at startup
//! and injected into the authenticator and the access policy at
//! construction. Nothing mutates them at runtime.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration load failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("config file unreadable: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON of the expected shape.
    #[error("config file invalid: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One credential record: who may log in, and with which group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEntry {
    /// Unique username; matched case-insensitively at login.
    pub name: String,
    /// Login secret; matched byte-exactly.
    pub secret: String,
    /// Group tag resolving this user's permissions.
    pub group: String,
}

/// One group policy: the folders a group may read and write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupEntry {
    /// Group tag.
    pub name: String,
    /// Folders this group may access (read and write alike).
    #[serde(default)]
    pub folders: Vec<String>,
    /// Admin groups have unconditional access to every folder.
    #[serde(default)]
    pub admin: bool,
}

/// The full static deployment table: credentials plus group policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Credential records.
    pub users: Vec<UserEntry>,
    /// Group policies.
    pub groups: Vec<GroupEntry>,
}

impl DeploymentConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Built-in demo deployment: one admin group and two folder-scoped
    /// groups. Intended for development and tests only.
    pub fn demo() -> Self {
        let user = |name: &str, secret: &str, group: &str| UserEntry {
            name: name.to_string(),
            secret: secret.to_string(),
            group: group.to_string(),
        };

        Self {
            users: vec![
                user("UserAdmin", "adminpass", "Group1"),
                user("userA", "passA", "Group2"),
                user("userB", "passB", "Group2"),
                user("userE", "passE", "Group2"),
                user("userC", "passC", "Group3"),
                user("userD", "passD", "Group3"),
                user("userF", "passF", "Group3"),
            ],
            groups: vec![
                GroupEntry { name: "Group1".to_string(), folders: Vec::new(), admin: true },
                GroupEntry {
                    name: "Group2".to_string(),
                    folders: vec!["Folder_Group2".to_string()],
                    admin: false,
                },
                GroupEntry {
                    name: "Group3".to_string(),
                    folders: vec!["Folder_Group3".to_string()],
                    admin: false,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_config_is_consistent() {
        let config = DeploymentConfig::demo();
        assert_eq!(config.users.len(), 7);
        for user in &config.users {
            assert!(
                config.groups.iter().any(|g| g.name == user.group),
                "user {} references missing group {}",
                user.name,
                user.group
            );
        }
    }

    #[test]
    fn config_json_round_trip() {
        let config = DeploymentConfig::demo();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: DeploymentConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.users.len(), config.users.len());
        assert_eq!(parsed.groups.len(), config.groups.len());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(&path, serde_json::to_vec(&DeploymentConfig::demo()).unwrap()).unwrap();

        let loaded = DeploymentConfig::load(&path).unwrap();
        assert_eq!(loaded.users.len(), 7);

        std::fs::write(&path, b"nonsense").unwrap();
        assert!(DeploymentConfig::load(&path).is_err());
    }
}
