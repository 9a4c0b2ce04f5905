//! The organization-scoped data model.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use rep_sdk::types::{ActivityState, DocumentMetadata, Permission};

use crate::errors::RepError;

/// The built-in administrative role every organization carries.
pub const MANAGERS: &str = "managers";

#[derive(Debug, Clone)]
pub struct Subject {
    pub username: String,
    pub name: String,
    pub email: String,
    pub public_key_pem: String,
    pub state: ActivityState,
}

#[derive(Debug, Clone)]
pub struct Role {
    pub state: ActivityState,
    pub permissions: BTreeSet<Permission>,
    /// Member usernames; the subjects themselves live in the organization.
    pub members: BTreeSet<String>,
}

impl Role {
    /// A fresh role: active, no permissions, no members.
    pub fn new() -> Self {
        Role {
            state: ActivityState::Active,
            permissions: BTreeSet::new(),
            members: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub creator: String,
    pub created_at: DateTime<Utc>,
    /// Hex SHA-256 of the plaintext; `None` after deletion.
    pub file_handle: Option<String>,
    /// Content-encryption key, hex.
    pub key: String,
    pub alg: String,
    /// role name → document-scoped permissions.
    pub acl: BTreeMap<String, BTreeSet<Permission>>,
}

impl Document {
    pub fn metadata(&self) -> DocumentMetadata {
        DocumentMetadata {
            name: self.name.clone(),
            creator: self.creator.clone(),
            created_at: self.created_at,
            file_handle: self.file_handle.clone(),
            key: self.key.clone(),
            alg: self.alg.clone(),
            acl: self.acl.clone(),
        }
    }
}

#[derive(Debug)]
pub struct Organization {
    pub name: String,
    pub creator: String,
    pub subjects: BTreeMap<String, Subject>,
    pub roles: BTreeMap<String, Role>,
    pub documents: BTreeMap<String, Document>,
}

impl Organization {
    /// A new organization: the creating subject plus a `managers` role that
    /// contains it and holds every administrative permission.
    pub fn bootstrap(name: &str, creator: Subject) -> Self {
        let managers = Role {
            state: ActivityState::Active,
            permissions: Permission::ADMINISTRATIVE.into_iter().collect(),
            members: BTreeSet::from([creator.username.clone()]),
        };
        Organization {
            name: name.to_string(),
            creator: creator.username.clone(),
            subjects: BTreeMap::from([(creator.username.clone(), creator)]),
            roles: BTreeMap::from([(MANAGERS.to_string(), managers)]),
            documents: BTreeMap::new(),
        }
    }

    pub fn subject(&self, username: &str) -> Result<&Subject, RepError> {
        self.subjects
            .get(username)
            .ok_or_else(|| RepError::NotFound(format!("subject '{username}'")))
    }

    pub fn subject_mut(&mut self, username: &str) -> Result<&mut Subject, RepError> {
        self.subjects
            .get_mut(username)
            .ok_or_else(|| RepError::NotFound(format!("subject '{username}'")))
    }

    pub fn role(&self, name: &str) -> Result<&Role, RepError> {
        self.roles
            .get(name)
            .ok_or_else(|| RepError::NotFound(format!("role '{name}'")))
    }

    pub fn role_mut(&mut self, name: &str) -> Result<&mut Role, RepError> {
        self.roles
            .get_mut(name)
            .ok_or_else(|| RepError::NotFound(format!("role '{name}'")))
    }

    pub fn document(&self, name: &str) -> Result<&Document, RepError> {
        self.documents
            .get(name)
            .ok_or_else(|| RepError::NotFound(format!("document '{name}'")))
    }

    pub fn document_mut(&mut self, name: &str) -> Result<&mut Document, RepError> {
        self.documents
            .get_mut(name)
            .ok_or_else(|| RepError::NotFound(format!("document '{name}'")))
    }

    /// Members of `role` that are currently active subjects.
    pub fn active_member_count(&self, role: &Role) -> usize {
        role.members
            .iter()
            .filter(|m| {
                self.subjects
                    .get(*m)
                    .is_some_and(|s| s.state.is_active())
            })
            .count()
    }
}
