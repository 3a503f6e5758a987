//! Credential verification.
//!
//! A static username → (secret, group) table, immutable after
//! construction. Usernames are matched case-insensitively, secrets
//! byte-exactly. The outcome deliberately carries no hint of *why*
//! authentication failed: an unknown username and a wrong password are
//! indistinguishable to the caller.

use std::collections::HashMap;

use crate::config::DeploymentConfig;

/// Immutable credential table.
#[derive(Debug)]
pub struct UserDirectory {
    /// Lowercased username → (secret, group tag).
    entries: HashMap<String, (String, String)>,
}

impl UserDirectory {
    /// Build the directory from the deployment table.
    pub fn from_config(config: &DeploymentConfig) -> Self {
        let entries = config
            .users
            .iter()
            .map(|u| (u.name.to_lowercase(), (u.secret.clone(), u.group.clone())))
            .collect();
        Self { entries }
    }

    /// Verify credentials; returns the user's group tag on success.
    ///
    /// `None` for unknown usernames and wrong passwords alike.
    pub fn authenticate(&self, username: &str, password: &str) -> Option<String> {
        let (secret, group) = self.entries.get(&username.to_lowercase())?;
        if secret.as_bytes() == password.as_bytes() {
            Some(group.clone())
        } else {
            None
        }
    }
}
