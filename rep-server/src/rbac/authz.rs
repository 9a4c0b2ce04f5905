//! The authorization decision point.
//!
//! Stateless: callers hold the organization lock and pass the session's
//! assumed roles. Checks run in a fixed order so the first failure names the
//! denial — subject active, roles assumed, permission held, then (for
//! document operations) the ACL.
//!
//! Administrative permissions are read from role permission sets;
//! document-scoped permissions are read from the document's ACL. The common
//! gate for both: the role is assumed in this session, currently active, and
//! the subject is currently one of its members.

use rep_sdk::types::Permission;

use crate::errors::RepError;
use crate::rbac::types::{Document, Organization};

/// Deny unless the subject exists and is active.
pub fn require_active_subject(org: &Organization, username: &str) -> Result<(), RepError> {
    let subject = org.subject(username)?;
    if !subject.state.is_active() {
        return Err(RepError::SubjectInactive(username.to_string()));
    }
    Ok(())
}

/// Admit or deny an operation requiring `permission`.
pub fn authorize(
    org: &Organization,
    username: &str,
    assumed_roles: &[String],
    permission: Permission,
    document: Option<&Document>,
) -> Result<(), RepError> {
    require_active_subject(org, username)?;

    if assumed_roles.is_empty() {
        return Err(RepError::RoleNotAssumed(format!(
            "no role assumed; {permission} requires one"
        )));
    }

    // Roles that could carry the grant: assumed, active, and the subject is
    // (still) a member. Assumption alone is not enough — membership and role
    // state are re-checked at decision time.
    let eligible: Vec<&String> = assumed_roles
        .iter()
        .filter(|name| {
            org.roles
                .get(name.as_str())
                .is_some_and(|role| role.state.is_active() && role.members.contains(username))
        })
        .collect();

    if permission.is_document_scoped() {
        let doc = document.ok_or_else(|| {
            RepError::Internal(format!("{permission} checked without a document"))
        })?;
        if eligible.is_empty() {
            return Err(RepError::PermissionDenied(format!(
                "no active assumed role grants {permission}"
            )));
        }
        let granted = eligible.iter().any(|name| {
            doc.acl
                .get(name.as_str())
                .is_some_and(|perms| perms.contains(&permission))
        });
        if !granted {
            return Err(RepError::AclDenied(format!(
                "{permission} on document '{}'",
                doc.name
            )));
        }
        return Ok(());
    }

    let granted = eligible.iter().any(|name| {
        org.roles
            .get(name.as_str())
            .is_some_and(|role| role.permissions.contains(&permission))
    });
    if !granted {
        return Err(RepError::PermissionDenied(format!(
            "no active assumed role grants {permission}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::types::{MANAGERS, Subject};
    use rep_sdk::types::ActivityState;

    fn subject(username: &str) -> Subject {
        Subject {
            username: username.to_string(),
            name: username.to_string(),
            email: format!("{username}@example.org"),
            public_key_pem: String::new(),
            state: ActivityState::Active,
        }
    }

    fn org() -> Organization {
        Organization::bootstrap("acme", subject("alice"))
    }

    fn managers() -> Vec<String> {
        vec![MANAGERS.to_string()]
    }

    #[test]
    fn allows_manager_with_assumed_role() {
        let org = org();
        authorize(&org, "alice", &managers(), Permission::SubjectNew, None).unwrap();
    }

    #[test]
    fn denies_without_assumed_role() {
        let org = org();
        assert!(matches!(
            authorize(&org, "alice", &[], Permission::SubjectNew, None),
            Err(RepError::RoleNotAssumed(_))
        ));
    }

    #[test]
    fn denies_suspended_subject_first() {
        let mut org = org();
        org.add_subject(subject("bob")).unwrap();
        org.role_add_member(MANAGERS, "bob").unwrap();
        org.set_subject_state("bob", ActivityState::Suspended).unwrap();
        // Even with managers assumed, the subject state decides first.
        assert!(matches!(
            authorize(&org, "bob", &managers(), Permission::SubjectNew, None),
            Err(RepError::SubjectInactive(_))
        ));
    }

    #[test]
    fn denies_when_role_suspended() {
        let mut org = org();
        org.add_role("clerks").unwrap();
        org.role_add_member("clerks", "alice").unwrap();
        org.role_add_permission("clerks", Permission::DocNew).unwrap();
        org.set_role_state("clerks", ActivityState::Suspended).unwrap();
        assert!(matches!(
            authorize(&org, "alice", &["clerks".into()], Permission::DocNew, None),
            Err(RepError::PermissionDenied(_))
        ));
    }

    #[test]
    fn denies_when_membership_was_revoked() {
        let mut org = org();
        org.add_subject(subject("bob")).unwrap();
        org.add_role("clerks").unwrap();
        org.role_add_member("clerks", "bob").unwrap();
        org.role_add_permission("clerks", Permission::DocNew).unwrap();
        // bob assumed clerks, then lost membership.
        org.role_remove_member("clerks", "bob").unwrap();
        assert!(matches!(
            authorize(&org, "bob", &["clerks".into()], Permission::DocNew, None),
            Err(RepError::PermissionDenied(_))
        ));
    }

    #[test]
    fn denies_permission_not_held() {
        let mut org = org();
        org.add_subject(subject("bob")).unwrap();
        org.add_role("clerks").unwrap();
        org.role_add_member("clerks", "bob").unwrap();
        assert!(matches!(
            authorize(&org, "bob", &["clerks".into()], Permission::SubjectNew, None),
            Err(RepError::PermissionDenied(_))
        ));
    }

    #[test]
    fn document_permission_reads_the_acl() {
        let mut org = org();
        org.add_document("d1", "alice", "aa".repeat(32).as_str(), "00", "AES-GCM", MANAGERS)
            .unwrap();

        let doc = org.document("d1").unwrap().clone();
        authorize(&org, "alice", &managers(), Permission::DocRead, Some(&doc)).unwrap();

        // Strip DOC_READ from the ACL; managers' own permission set is
        // irrelevant for document scope.
        org.document_acl_change("d1", false, MANAGERS, Permission::DocRead).unwrap();
        let doc = org.document("d1").unwrap().clone();
        assert!(matches!(
            authorize(&org, "alice", &managers(), Permission::DocRead, Some(&doc)),
            Err(RepError::AclDenied(_))
        ));
    }

    #[test]
    fn any_eligible_role_suffices() {
        let mut org = org();
        org.add_role("readers").unwrap();
        org.role_add_member("readers", "alice").unwrap();
        org.add_document("d1", "alice", "bb".repeat(32).as_str(), "00", "AES-GCM", MANAGERS)
            .unwrap();
        org.document_acl_change("d1", true, "readers", Permission::DocRead).unwrap();
        org.document_acl_change("d1", false, MANAGERS, Permission::DocRead).unwrap();

        let doc = org.document("d1").unwrap().clone();
        let both = vec![MANAGERS.to_string(), "readers".to_string()];
        authorize(&org, "alice", &both, Permission::DocRead, Some(&doc)).unwrap();
    }
}
