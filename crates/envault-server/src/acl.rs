//! Group-based access control.
//!
//! A pure mapping from (user, folder, action) to allow/deny, built once
//! from the static deployment table. No interior mutability and no I/O:
//! `&self` methods are safe to call from any number of connection tasks
//! without synchronization.
//!
//! Username and folder comparisons are case-insensitive; this is the
//! fixed deployment choice and both the authenticator and the store
//! listing filter rely on it.

use std::collections::HashMap;

use crate::config::DeploymentConfig;

/// The action side of an authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Download and listing visibility.
    Read,
    /// Upload.
    Write,
}

#[derive(Debug, Clone)]
struct GroupPermissions {
    folders: Vec<String>,
    admin: bool,
}

/// Immutable authorization table.
#[derive(Debug)]
pub struct AccessPolicy {
    /// Lowercased username → group tag.
    user_groups: HashMap<String, String>,
    /// Group tag → permissions.
    groups: HashMap<String, GroupPermissions>,
    /// Every folder named by any group, sorted and deduplicated; the
    /// admin group's allowed-folder set.
    all_folders: Vec<String>,
}

impl AccessPolicy {
    /// Build the policy from the deployment table.
    pub fn from_config(config: &DeploymentConfig) -> Self {
        let user_groups = config
            .users
            .iter()
            .map(|u| (u.name.to_lowercase(), u.group.clone()))
            .collect();

        let groups: HashMap<String, GroupPermissions> = config
            .groups
            .iter()
            .map(|g| {
                (g.name.clone(), GroupPermissions { folders: g.folders.clone(), admin: g.admin })
            })
            .collect();

        let mut all_folders: Vec<String> =
            config.groups.iter().flat_map(|g| g.folders.iter().cloned()).collect();
        all_folders.sort();
        all_folders.dedup();

        Self { user_groups, groups, all_folders }
    }

    fn group_of(&self, user: &str) -> Option<&GroupPermissions> {
        let tag = self.user_groups.get(&user.to_lowercase())?;
        self.groups.get(tag)
    }

    /// Whether `user` may perform `action` in `folder`.
    ///
    /// Unknown users have no permissions. Admin groups are allowed
    /// everything; other groups are allowed exactly their designated
    /// folders, for read and write alike.
    pub fn has_permission(&self, user: &str, folder: &str, _action: Action) -> bool {
        let Some(group) = self.group_of(user) else {
            return false;
        };
        if group.admin {
            return true;
        }
        group.folders.iter().any(|f| f.eq_ignore_ascii_case(folder))
    }

    /// The folders `user` may access: every folder for admins, the
    /// group's designated folders otherwise, empty for unknown users.
    pub fn allowed_folders(&self, user: &str) -> Vec<String> {
        match self.group_of(user) {
            Some(group) if group.admin => self.all_folders.clone(),
            Some(group) => group.folders.clone(),
            None => Vec::new(),
        }
    }
}
