//! The organization store and every organization mutation.
//!
//! One mutex per organization: a mutation holds it for the whole
//! check-then-commit span, so invariant checks (the `managers` rules chief
//! among them) and the writes they guard are atomic. Nothing is committed
//! when a check fails.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use parking_lot::{Mutex, RwLock};

use rep_sdk::types::{ActivityState, DocumentMetadata, Permission};

use crate::errors::RepError;
use crate::rbac::types::{Document, MANAGERS, Organization, Role, Subject};

#[derive(Default)]
pub struct OrgStore {
    orgs: RwLock<HashMap<String, Arc<Mutex<Organization>>>>,
}

impl OrgStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an organization with its bootstrap subject.
    pub fn create_org(&self, name: &str, creator: Subject) -> Result<(), RepError> {
        let mut orgs = self.orgs.write();
        if orgs.contains_key(name) {
            return Err(RepError::Conflict(format!("organization '{name}'")));
        }
        let username = creator.username.clone();
        orgs.insert(
            name.to_string(),
            Arc::new(Mutex::new(Organization::bootstrap(name, creator))),
        );
        tracing::info!(organization = name, creator = username, "organization created");
        Ok(())
    }

    pub fn list_orgs(&self) -> Vec<String> {
        let mut names: Vec<String> = self.orgs.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Run `f` with the organization locked for the duration.
    pub fn with_org<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Organization) -> Result<T, RepError>,
    ) -> Result<T, RepError> {
        let slot = self
            .orgs
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RepError::NotFound(format!("organization '{name}'")))?;
        let mut org = slot.lock();
        f(&mut org)
    }

    /// The registered public key and state of a subject, for the handshake.
    pub fn subject_auth(
        &self,
        organization: &str,
        username: &str,
    ) -> Result<(String, ActivityState), RepError> {
        self.with_org(organization, |org| {
            let subject = org.subject(username)?;
            Ok((subject.public_key_pem.clone(), subject.state))
        })
    }
}

/// Creation-date comparison for document listings, at day granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFilter {
    /// Newer than the given day.
    Nt,
    /// Older than the given day.
    Ot,
    /// On the given day.
    Eq,
}

impl FromStr for DateFilter {
    type Err = RepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nt" => Ok(DateFilter::Nt),
            "ot" => Ok(DateFilter::Ot),
            "eq" => Ok(DateFilter::Eq),
            other => Err(RepError::BadRequest(format!("unknown date filter '{other}'"))),
        }
    }
}

/// Parse the wire date format, `DD-MM-YYYY`.
pub fn parse_wire_date(s: &str) -> Result<NaiveDate, RepError> {
    NaiveDate::parse_from_str(s, "%d-%m-%Y")
        .map_err(|_| RepError::BadRequest(format!("invalid date '{s}', expected DD-MM-YYYY")))
}

// ── Organization operations ────────────────────────────────────────────

impl Organization {
    pub fn add_subject(&mut self, subject: Subject) -> Result<(), RepError> {
        if self.subjects.contains_key(&subject.username) {
            return Err(RepError::Conflict(format!("subject '{}'", subject.username)));
        }
        tracing::info!(
            organization = self.name,
            username = subject.username,
            "subject added"
        );
        self.subjects.insert(subject.username.clone(), subject);
        Ok(())
    }

    /// Toggle a subject between active and suspended.
    ///
    /// Suspension may not leave `managers` without an active member.
    pub fn set_subject_state(
        &mut self,
        username: &str,
        state: ActivityState,
    ) -> Result<(), RepError> {
        let current = self.subject(username)?.state;
        if state == ActivityState::Suspended && current.is_active() {
            let managers = self.role(MANAGERS)?;
            if managers.members.contains(username) && self.active_member_count(managers) <= 1 {
                return Err(RepError::InvariantViolation(format!(
                    "suspending '{username}' would leave '{MANAGERS}' with no active member"
                )));
            }
        }
        self.subject_mut(username)?.state = state;
        tracing::info!(organization = self.name, username, %state, "subject state changed");
        Ok(())
    }

    /// All subjects and their states, optionally narrowed to one username.
    pub fn subjects_state(
        &self,
        username: Option<&str>,
    ) -> Result<BTreeMap<String, ActivityState>, RepError> {
        match username {
            Some(u) => {
                let subject = self.subject(u)?;
                Ok(BTreeMap::from([(u.to_string(), subject.state)]))
            }
            None => Ok(self
                .subjects
                .iter()
                .map(|(name, s)| (name.clone(), s.state))
                .collect()),
        }
    }

    pub fn add_role(&mut self, name: &str) -> Result<(), RepError> {
        if self.roles.contains_key(name) {
            return Err(RepError::Conflict(format!("role '{name}'")));
        }
        self.roles.insert(name.to_string(), Role::new());
        tracing::info!(organization = self.name, role = name, "role added");
        Ok(())
    }

    /// Suspend or reactivate a role. `managers` is pinned to active.
    pub fn set_role_state(&mut self, name: &str, state: ActivityState) -> Result<(), RepError> {
        if name == MANAGERS && state == ActivityState::Suspended {
            return Err(RepError::InvariantViolation(format!(
                "'{MANAGERS}' cannot be suspended"
            )));
        }
        self.role_mut(name)?.state = state;
        tracing::info!(organization = self.name, role = name, %state, "role state changed");
        Ok(())
    }

    pub fn role_add_permission(&mut self, name: &str, permission: Permission) -> Result<(), RepError> {
        self.role_mut(name)?.permissions.insert(permission);
        Ok(())
    }

    /// `managers` keeps every administrative permission, always.
    pub fn role_remove_permission(
        &mut self,
        name: &str,
        permission: Permission,
    ) -> Result<(), RepError> {
        if name == MANAGERS && Permission::ADMINISTRATIVE.contains(&permission) {
            return Err(RepError::InvariantViolation(format!(
                "'{MANAGERS}' cannot lose {permission}"
            )));
        }
        let role = self.role_mut(name)?;
        if !role.permissions.remove(&permission) {
            return Err(RepError::NotFound(format!(
                "permission {permission} on role '{name}'"
            )));
        }
        Ok(())
    }

    pub fn role_add_member(&mut self, name: &str, username: &str) -> Result<(), RepError> {
        self.subject(username)?;
        self.role_mut(name)?.members.insert(username.to_string());
        Ok(())
    }

    /// Removal may not leave `managers` without an active member.
    pub fn role_remove_member(&mut self, name: &str, username: &str) -> Result<(), RepError> {
        let role = self.role(name)?;
        if !role.members.contains(username) {
            return Err(RepError::NotFound(format!(
                "subject '{username}' in role '{name}'"
            )));
        }
        if name == MANAGERS {
            let is_active = self.subject(username).map(|s| s.state.is_active())?;
            if is_active && self.active_member_count(role) <= 1 {
                return Err(RepError::InvariantViolation(format!(
                    "removing '{username}' would leave '{MANAGERS}' with no active member"
                )));
            }
        }
        self.role_mut(name)?.members.remove(username);
        Ok(())
    }

    pub fn role_members(&self, name: &str) -> Result<BTreeMap<String, ActivityState>, RepError> {
        let role = self.role(name)?;
        role.members
            .iter()
            .map(|m| self.subject(m).map(|s| (m.clone(), s.state)))
            .collect()
    }

    pub fn subject_roles(&self, username: &str) -> Result<BTreeMap<String, ActivityState>, RepError> {
        self.subject(username)?;
        Ok(self
            .roles
            .iter()
            .filter(|(_, role)| role.members.contains(username))
            .map(|(name, role)| (name.clone(), role.state))
            .collect())
    }

    pub fn role_permissions(&self, name: &str) -> Result<Vec<Permission>, RepError> {
        Ok(self.role(name)?.permissions.iter().copied().collect())
    }

    /// Roles that hold `permission` in their permission set.
    pub fn permission_roles(&self, permission: Permission) -> Vec<String> {
        self.roles
            .iter()
            .filter(|(_, role)| role.permissions.contains(&permission))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Record a deposited document. The creator's role receives the full
    /// document-scoped permission set in the initial ACL.
    pub fn add_document(
        &mut self,
        name: &str,
        creator: &str,
        file_handle: &str,
        key: &str,
        alg: &str,
        initial_role: &str,
    ) -> Result<(), RepError> {
        if self.documents.contains_key(name) {
            return Err(RepError::Conflict(format!("document '{name}'")));
        }
        self.role(initial_role)?;
        let acl = BTreeMap::from([(
            initial_role.to_string(),
            Permission::DOCUMENT_SCOPED.into_iter().collect::<BTreeSet<_>>(),
        )]);
        self.documents.insert(
            name.to_string(),
            Document {
                name: name.to_string(),
                creator: creator.to_string(),
                created_at: Utc::now(),
                file_handle: Some(file_handle.to_string()),
                key: key.to_string(),
                alg: alg.to_string(),
                acl,
            },
        );
        tracing::info!(organization = self.name, document = name, creator, "document added");
        Ok(())
    }

    pub fn list_documents(
        &self,
        creator: Option<&str>,
        date: Option<(DateFilter, NaiveDate)>,
    ) -> Vec<DocumentMetadata> {
        self.documents
            .values()
            .filter(|doc| creator.is_none_or(|c| doc.creator == c))
            .filter(|doc| {
                date.is_none_or(|(filter, day)| {
                    let created = doc.created_at.date_naive();
                    match filter {
                        DateFilter::Nt => created > day,
                        DateFilter::Ot => created < day,
                        DateFilter::Eq => created == day,
                    }
                })
            })
            .map(Document::metadata)
            .collect()
    }

    /// Null the file handle; metadata and ACL stay. Returns the old handle.
    pub fn delete_document_file(&mut self, name: &str) -> Result<String, RepError> {
        let doc = self.document_mut(name)?;
        let handle = doc
            .file_handle
            .take()
            .ok_or_else(|| RepError::DocGone(name.to_string()))?;
        tracing::info!(organization = self.name, document = name, "document file deleted");
        Ok(handle)
    }

    /// Add or remove one document-scoped permission for one role.
    ///
    /// The last `DOC_ACL` grant on a document cannot be removed; a document
    /// with no ACL administrator would be unmanageable forever.
    pub fn document_acl_change(
        &mut self,
        name: &str,
        add: bool,
        role: &str,
        permission: Permission,
    ) -> Result<(), RepError> {
        if !permission.is_document_scoped() {
            return Err(RepError::BadRequest(format!(
                "{permission} is not a document permission"
            )));
        }
        self.role(role)?;
        let doc = self.document(name)?;

        if !add && permission == Permission::DocAcl {
            let acl_holders = doc
                .acl
                .iter()
                .filter(|(r, perms)| perms.contains(&Permission::DocAcl) && r.as_str() != role)
                .count();
            if doc.acl.get(role).is_some_and(|p| p.contains(&Permission::DocAcl))
                && acl_holders == 0
            {
                return Err(RepError::InvariantViolation(format!(
                    "removing the last DOC_ACL grant on document '{name}'"
                )));
            }
        }

        let doc = self.document_mut(name)?;
        if add {
            doc.acl.entry(role.to_string()).or_default().insert(permission);
        } else {
            let Some(perms) = doc.acl.get_mut(role) else {
                return Err(RepError::NotFound(format!(
                    "ACL entry for role '{role}' on document '{name}'"
                )));
            };
            if !perms.remove(&permission) {
                return Err(RepError::NotFound(format!(
                    "{permission} for role '{role}' on document '{name}'"
                )));
            }
            if perms.is_empty() {
                doc.acl.remove(role);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(username: &str) -> Subject {
        Subject {
            username: username.to_string(),
            name: username.to_uppercase(),
            email: format!("{username}@example.org"),
            public_key_pem: "-----BEGIN PUBLIC KEY-----\n…".to_string(),
            state: ActivityState::Active,
        }
    }

    fn org_with_alice() -> Organization {
        Organization::bootstrap("acme", subject("alice"))
    }

    #[test]
    fn bootstrap_builds_managers() {
        let org = org_with_alice();
        let managers = org.role(MANAGERS).unwrap();
        assert!(managers.state.is_active());
        assert!(managers.members.contains("alice"));
        for p in Permission::ADMINISTRATIVE {
            assert!(managers.permissions.contains(&p), "missing {p}");
        }
    }

    #[test]
    fn duplicate_org_rejected() {
        let store = OrgStore::new();
        store.create_org("acme", subject("alice")).unwrap();
        assert!(matches!(
            store.create_org("acme", subject("bob")),
            Err(RepError::Conflict(_))
        ));
        assert_eq!(store.list_orgs(), vec!["acme"]);
    }

    #[test]
    fn suspending_last_manager_rejected() {
        let mut org = org_with_alice();
        let err = org
            .set_subject_state("alice", ActivityState::Suspended)
            .unwrap_err();
        assert!(matches!(err, RepError::InvariantViolation(_)));
        // Pre-mutation state preserved exactly.
        assert!(org.subject("alice").unwrap().state.is_active());
    }

    #[test]
    fn suspending_non_last_manager_allowed() {
        let mut org = org_with_alice();
        org.add_subject(subject("bob")).unwrap();
        org.role_add_member(MANAGERS, "bob").unwrap();
        org.set_subject_state("alice", ActivityState::Suspended).unwrap();
        assert!(!org.subject("alice").unwrap().state.is_active());
    }

    #[test]
    fn removing_last_active_manager_rejected() {
        let mut org = org_with_alice();
        // A suspended co-member does not count.
        org.add_subject(subject("bob")).unwrap();
        org.role_add_member(MANAGERS, "bob").unwrap();
        org.set_subject_state("bob", ActivityState::Suspended).unwrap();

        let err = org.role_remove_member(MANAGERS, "alice").unwrap_err();
        assert!(matches!(err, RepError::InvariantViolation(_)));
        assert!(org.role(MANAGERS).unwrap().members.contains("alice"));
    }

    #[test]
    fn managers_keeps_administrative_permissions() {
        let mut org = org_with_alice();
        let err = org
            .role_remove_permission(MANAGERS, Permission::SubjectDown)
            .unwrap_err();
        assert!(matches!(err, RepError::InvariantViolation(_)));
        assert!(
            org.role(MANAGERS)
                .unwrap()
                .permissions
                .contains(&Permission::SubjectDown)
        );
    }

    #[test]
    fn managers_cannot_be_suspended() {
        let mut org = org_with_alice();
        assert!(matches!(
            org.set_role_state(MANAGERS, ActivityState::Suspended),
            Err(RepError::InvariantViolation(_))
        ));
        assert!(org.role(MANAGERS).unwrap().state.is_active());
    }

    #[test]
    fn ordinary_role_lifecycle() {
        let mut org = org_with_alice();
        org.add_role("auditors").unwrap();
        assert!(matches!(org.add_role("auditors"), Err(RepError::Conflict(_))));

        org.role_add_permission("auditors", Permission::DocNew).unwrap();
        org.role_add_member("auditors", "alice").unwrap();
        org.set_role_state("auditors", ActivityState::Suspended).unwrap();
        assert!(!org.role("auditors").unwrap().state.is_active());

        org.role_remove_permission("auditors", Permission::DocNew).unwrap();
        assert!(org.role_permissions("auditors").unwrap().is_empty());
    }

    #[test]
    fn membership_requires_existing_subject() {
        let mut org = org_with_alice();
        org.add_role("auditors").unwrap();
        assert!(matches!(
            org.role_add_member("auditors", "ghost"),
            Err(RepError::NotFound(_))
        ));
    }

    #[test]
    fn subject_roles_reflects_membership() {
        let mut org = org_with_alice();
        org.add_role("auditors").unwrap();
        org.role_add_member("auditors", "alice").unwrap();
        let roles = org.subject_roles("alice").unwrap();
        assert_eq!(roles.len(), 2);
        assert!(roles.contains_key(MANAGERS));
        assert!(roles.contains_key("auditors"));
    }

    #[test]
    fn permission_roles_queries_role_sets() {
        let mut org = org_with_alice();
        org.add_role("auditors").unwrap();
        org.role_add_permission("auditors", Permission::RoleNew).unwrap();
        let roles = org.permission_roles(Permission::RoleNew);
        assert!(roles.contains(&MANAGERS.to_string()));
        assert!(roles.contains(&"auditors".to_string()));
    }

    #[test]
    fn document_initial_acl_goes_to_creator_role() {
        let mut org = org_with_alice();
        org.add_document("d1", "alice", "ab".repeat(32).as_str(), "00", "AES-GCM", MANAGERS)
            .unwrap();
        let doc = org.document("d1").unwrap();
        let grants = doc.acl.get(MANAGERS).unwrap();
        for p in Permission::DOCUMENT_SCOPED {
            assert!(grants.contains(&p));
        }
    }

    #[test]
    fn delete_is_idempotent_only_once() {
        let mut org = org_with_alice();
        let handle = "cd".repeat(32);
        org.add_document("d1", "alice", &handle, "00", "AES-GCM", MANAGERS).unwrap();

        assert_eq!(org.delete_document_file("d1").unwrap(), handle);
        assert!(org.document("d1").unwrap().file_handle.is_none());
        // Metadata and ACL survive the deletion.
        assert!(org.document("d1").unwrap().acl.contains_key(MANAGERS));
        assert!(matches!(
            org.delete_document_file("d1"),
            Err(RepError::DocGone(_))
        ));
    }

    #[test]
    fn last_doc_acl_grant_is_sticky() {
        let mut org = org_with_alice();
        org.add_document("d1", "alice", "ef".repeat(32).as_str(), "00", "AES-GCM", MANAGERS)
            .unwrap();
        assert!(matches!(
            org.document_acl_change("d1", false, MANAGERS, Permission::DocAcl),
            Err(RepError::InvariantViolation(_))
        ));

        // Grant DOC_ACL to a second role, then the removal goes through.
        org.add_role("auditors").unwrap();
        org.document_acl_change("d1", true, "auditors", Permission::DocAcl).unwrap();
        org.document_acl_change("d1", false, MANAGERS, Permission::DocAcl).unwrap();
        assert!(
            !org.document("d1")
                .unwrap()
                .acl
                .get(MANAGERS)
                .unwrap()
                .contains(&Permission::DocAcl)
        );
    }

    #[test]
    fn acl_rejects_administrative_permissions() {
        let mut org = org_with_alice();
        org.add_document("d1", "alice", "01".repeat(32).as_str(), "00", "AES-GCM", MANAGERS)
            .unwrap();
        assert!(matches!(
            org.document_acl_change("d1", true, MANAGERS, Permission::RoleNew),
            Err(RepError::BadRequest(_))
        ));
    }

    #[test]
    fn date_filters_compare_days() {
        let mut org = org_with_alice();
        org.add_document("d1", "alice", "02".repeat(32).as_str(), "00", "AES-GCM", MANAGERS)
            .unwrap();
        let today = Utc::now().date_naive();

        let eq = org.list_documents(None, Some((DateFilter::Eq, today)));
        assert_eq!(eq.len(), 1);
        let nt = org.list_documents(None, Some((DateFilter::Nt, today)));
        assert!(nt.is_empty());
        let ot = org.list_documents(
            None,
            Some((DateFilter::Ot, today + chrono::Duration::days(1))),
        );
        assert_eq!(ot.len(), 1);
    }

    #[test]
    fn creator_filter() {
        let mut org = org_with_alice();
        org.add_document("d1", "alice", "03".repeat(32).as_str(), "00", "AES-GCM", MANAGERS)
            .unwrap();
        assert_eq!(org.list_documents(Some("alice"), None).len(), 1);
        assert!(org.list_documents(Some("bob"), None).is_empty());
    }

    #[test]
    fn wire_date_parsing() {
        let d = parse_wire_date("31-12-2024").unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());
        assert!(parse_wire_date("2024-12-31").is_err());
        assert!("nt".parse::<DateFilter>().is_ok());
        assert!("later".parse::<DateFilter>().is_err());
    }
}
