//! Shared wire types: permissions, lifecycle states, document metadata.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The permission vocabulary.
///
/// Administrative permissions are held by roles and govern organization
/// mutations; document-scoped permissions live in per-document ACLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    RoleNew,
    RoleDown,
    RoleUp,
    RoleMod,
    RoleAcl,
    SubjectNew,
    SubjectDown,
    SubjectUp,
    DocNew,
    DocAcl,
    DocRead,
    DocDelete,
}

impl Permission {
    /// Every administrative permission; the `managers` role always holds all
    /// of these.
    pub const ADMINISTRATIVE: [Permission; 9] = [
        Permission::RoleNew,
        Permission::RoleDown,
        Permission::RoleUp,
        Permission::RoleMod,
        Permission::RoleAcl,
        Permission::SubjectNew,
        Permission::SubjectDown,
        Permission::SubjectUp,
        Permission::DocNew,
    ];

    /// The permissions a document ACL can carry.
    pub const DOCUMENT_SCOPED: [Permission; 3] =
        [Permission::DocAcl, Permission::DocRead, Permission::DocDelete];

    pub fn is_document_scoped(self) -> bool {
        Self::DOCUMENT_SCOPED.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Permission::RoleNew => "ROLE_NEW",
            Permission::RoleDown => "ROLE_DOWN",
            Permission::RoleUp => "ROLE_UP",
            Permission::RoleMod => "ROLE_MOD",
            Permission::RoleAcl => "ROLE_ACL",
            Permission::SubjectNew => "SUBJECT_NEW",
            Permission::SubjectDown => "SUBJECT_DOWN",
            Permission::SubjectUp => "SUBJECT_UP",
            Permission::DocNew => "DOC_NEW",
            Permission::DocAcl => "DOC_ACL",
            Permission::DocRead => "DOC_READ",
            Permission::DocDelete => "DOC_DELETE",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ROLE_NEW" => Ok(Permission::RoleNew),
            "ROLE_DOWN" => Ok(Permission::RoleDown),
            "ROLE_UP" => Ok(Permission::RoleUp),
            "ROLE_MOD" => Ok(Permission::RoleMod),
            "ROLE_ACL" => Ok(Permission::RoleAcl),
            "SUBJECT_NEW" => Ok(Permission::SubjectNew),
            "SUBJECT_DOWN" => Ok(Permission::SubjectDown),
            "SUBJECT_UP" => Ok(Permission::SubjectUp),
            "DOC_NEW" => Ok(Permission::DocNew),
            "DOC_ACL" => Ok(Permission::DocAcl),
            "DOC_READ" => Ok(Permission::DocRead),
            "DOC_DELETE" => Ok(Permission::DocDelete),
            other => Err(format!("unknown permission: {other}")),
        }
    }
}

/// Lifecycle state shared by subjects and roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityState {
    Active,
    Suspended,
}

impl ActivityState {
    pub fn is_active(self) -> bool {
        matches!(self, ActivityState::Active)
    }
}

impl fmt::Display for ActivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActivityState::Active => "active",
            ActivityState::Suspended => "suspended",
        })
    }
}

/// The only content-encryption algorithm currently supported.
pub const ALG_AES_GCM: &str = "AES-GCM";

/// Document metadata as served by the repository.
///
/// `file_handle` is the hex SHA-256 of the plaintext; it doubles as the blob
/// storage key and the integrity tag, and becomes `None` once the document's
/// file is deleted. The metadata itself (including the ACL) outlives the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub name: String,
    pub creator: String,
    pub created_at: DateTime<Utc>,
    pub file_handle: Option<String>,
    /// Content-encryption key, hex.
    pub key: String,
    pub alg: String,
    /// role name → document-scoped permissions.
    pub acl: BTreeMap<String, BTreeSet<Permission>>,
}

/// Encrypted error body carried inside a 403 response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub detail: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_wire_spelling() {
        let json = serde_json::to_string(&Permission::SubjectDown).unwrap();
        assert_eq!(json, r#""SUBJECT_DOWN""#);
        let parsed: Permission = serde_json::from_str(r#""DOC_ACL""#).unwrap();
        assert_eq!(parsed, Permission::DocAcl);
    }

    #[test]
    fn from_str_matches_display() {
        for p in Permission::ADMINISTRATIVE.iter().chain(&Permission::DOCUMENT_SCOPED) {
            assert_eq!(p.as_str().parse::<Permission>().unwrap(), *p);
        }
    }

    #[test]
    fn scoping_split_is_total() {
        assert!(Permission::DocRead.is_document_scoped());
        assert!(!Permission::DocNew.is_document_scoped());
        assert_eq!(
            Permission::ADMINISTRATIVE.len() + Permission::DOCUMENT_SCOPED.len(),
            12
        );
    }

    #[test]
    fn state_wire_spelling() {
        assert_eq!(serde_json::to_string(&ActivityState::Active).unwrap(), r#""active""#);
        let s: ActivityState = serde_json::from_str(r#""suspended""#).unwrap();
        assert!(!s.is_active());
    }
}
