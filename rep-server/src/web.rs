//! The `/api/v1` HTTP surface.
//!
//! Handshake endpoints exchange signed envelopes in the clear; everything
//! else is session-protected: the handler decapsulates, runs the operation
//! under the organization lock, and wraps the result (success or domain
//! error alike) back into the session envelope. Session-protocol failures
//! cannot be wrapped — no trustworthy key — and answer 499 with a plaintext
//! reason.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use serde::Deserialize;
use serde_json::{Value, json};

use rep_sdk::envelope::{Envelope, SignedEnvelope};
use rep_sdk::types::{ALG_AES_GCM, ActivityState, Permission};

use crate::errors::RepError;
use crate::handshake::{self, CreateOrgRequest};
use crate::rbac::authz;
use crate::rbac::store::{DateFilter, parse_wire_date};
use crate::server::SharedState;
use crate::sessions::SessionContext;

pub fn router(state: Arc<SharedState>) -> Router {
    Router::new()
        // Handshake
        .route("/api/v1/auth/organization", post(create_organization))
        .route("/api/v1/auth/session", post(create_session))
        // Anonymous reads
        .route("/api/v1/organizations/", get(list_organizations))
        .route("/api/v1/files/", get(get_file))
        // Session roles
        .route(
            "/api/v1/sessions/roles",
            post(assume_role).delete(drop_role).get(list_session_roles),
        )
        // Subjects
        .route(
            "/api/v1/organizations/subjects/state",
            get(list_subjects).put(set_subject_state),
        )
        .route("/api/v1/organizations/subjects", post(add_subject))
        .route("/api/v1/organizations/subjects/roles", get(list_subject_roles))
        // Roles
        .route("/api/v1/organizations/roles", post(add_role))
        .route("/api/v1/organizations/roles/suspend", put(suspend_role))
        .route("/api/v1/organizations/roles/reactivate", put(reactivate_role))
        .route(
            "/api/v1/organizations/roles/permissions",
            post(add_role_permission)
                .delete(remove_role_permission)
                .get(list_role_permissions),
        )
        .route(
            "/api/v1/organizations/roles/subjects",
            post(add_role_member).delete(remove_role_member).get(list_role_members),
        )
        .route("/api/v1/organizations/permissions/roles", get(list_permission_roles))
        // Documents
        .route(
            "/api/v1/organizations/documents",
            get(list_documents).post(add_document),
        )
        .route("/api/v1/organizations/documents/metadata", get(document_metadata))
        .route("/api/v1/organizations/documents/", delete(delete_document))
        .route("/api/v1/organizations/documents/acl", post(document_acl))
        .with_state(state)
}

// ── Envelope plumbing ──────────────────────────────────────────────────

fn protocol_failure(e: &RepError) -> Response {
    tracing::warn!(kind = e.kind(), "session failure: {e}");
    (e.status(), format!("{}: {e}", e.kind())).into_response()
}

fn wrapped(ctx: &SessionContext, status: StatusCode, payload: &Value) -> Response {
    match ctx.encapsulate(payload) {
        Ok(envelope) => (status, Json(envelope)).into_response(),
        Err(e) => {
            tracing::error!("failed to encapsulate response: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL".to_string()).into_response()
        }
    }
}

/// Decapsulate, run the operation, wrap the outcome.
fn authed(
    state: &SharedState,
    envelope: &Envelope,
    op: impl FnOnce(Value, &SessionContext) -> Result<Value, RepError>,
) -> Response {
    let (plaintext, ctx) = match state.sessions.decapsulate(envelope) {
        Ok(out) => out,
        Err(e) => return protocol_failure(&e),
    };
    match op(plaintext, &ctx) {
        Ok(payload) => wrapped(&ctx, StatusCode::OK, &payload),
        Err(e) if e.is_session_failure() => protocol_failure(&e),
        Err(e) => {
            tracing::debug!(kind = e.kind(), "request denied: {e}");
            wrapped(
                &ctx,
                e.status(),
                &json!({"error": e.kind(), "detail": e.to_string()}),
            )
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(plaintext: Value) -> Result<T, RepError> {
    serde_json::from_value(plaintext).map_err(|e| RepError::BadRequest(format!("payload: {e}")))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, RepError> {
    serde_json::to_value(value).map_err(|e| RepError::Internal(e.to_string()))
}

fn plain_error(e: &RepError) -> Response {
    (
        e.status(),
        Json(json!({"error": e.kind(), "detail": e.to_string()})),
    )
        .into_response()
}

// ── Handshake endpoints ────────────────────────────────────────────────

async fn create_organization(
    State(state): State<Arc<SharedState>>,
    Json(request): Json<CreateOrgRequest>,
) -> Response {
    match handshake::create_org(&state.orgs, &state.signing_key, request) {
        Ok(envelope) => Json(envelope).into_response(),
        Err(e) => plain_error(&e),
    }
}

async fn create_session(
    State(state): State<Arc<SharedState>>,
    Json(envelope): Json<SignedEnvelope>,
) -> Response {
    match handshake::create_session(&state.orgs, &state.sessions, &state.signing_key, &envelope) {
        Ok(reply) => Json(reply).into_response(),
        Err(e) => plain_error(&e),
    }
}

// ── Anonymous endpoints ────────────────────────────────────────────────

async fn list_organizations(State(state): State<Arc<SharedState>>) -> Response {
    let orgs: Vec<Value> = state
        .orgs
        .list_orgs()
        .into_iter()
        .map(|name| json!({"name": name}))
        .collect();
    Json(orgs).into_response()
}

#[derive(Deserialize)]
struct FileRequest {
    file_handle: String,
}

async fn get_file(
    State(state): State<Arc<SharedState>>,
    Json(request): Json<FileRequest>,
) -> Response {
    let content = match state.blobs.get(&request.file_handle) {
        Ok(bytes) => bytes,
        Err(e) => return plain_error(&e),
    };
    let payload = json!({
        "file_handle": request.file_handle,
        "file_content": B64.encode(content),
    });
    match SignedEnvelope::seal(&state.signing_key, &payload) {
        Ok(envelope) => Json(envelope).into_response(),
        Err(e) => plain_error(&RepError::Internal(e.to_string())),
    }
}

// ── Session role endpoints ─────────────────────────────────────────────

#[derive(Deserialize)]
struct RolePayload {
    role: String,
}

async fn assume_role(
    State(state): State<Arc<SharedState>>,
    Json(envelope): Json<Envelope>,
) -> Response {
    authed(&state, &envelope, |plaintext, ctx| {
        let RolePayload { role } = parse(plaintext)?;
        state.orgs.with_org(&ctx.organization, |org| {
            authz::require_active_subject(org, &ctx.username)?;
            let r = org.role(&role)?;
            if !r.state.is_active() {
                return Err(RepError::PermissionDenied(format!("role '{role}' is suspended")));
            }
            if !r.members.contains(&ctx.username) {
                return Err(RepError::PermissionDenied(format!(
                    "subject '{}' is not a member of '{role}'",
                    ctx.username
                )));
            }
            Ok(())
        })?;
        let roles = state.sessions.with_session(ctx.session_id, |session| {
            if !session.roles.iter().any(|r| r == &role) {
                session.roles.push(role.clone());
            }
            Ok(session.roles.clone())
        })?;
        Ok(json!({"state": format!("role '{role}' assumed"), "roles": roles}))
    })
}

async fn drop_role(
    State(state): State<Arc<SharedState>>,
    Json(envelope): Json<Envelope>,
) -> Response {
    authed(&state, &envelope, |plaintext, ctx| {
        let RolePayload { role } = parse(plaintext)?;
        state.orgs.with_org(&ctx.organization, |org| {
            authz::require_active_subject(org, &ctx.username)
        })?;
        let roles = state.sessions.with_session(ctx.session_id, |session| {
            let before = session.roles.len();
            session.roles.retain(|r| r != &role);
            if session.roles.len() == before {
                return Err(RepError::RoleNotAssumed(role.clone()));
            }
            Ok(session.roles.clone())
        })?;
        Ok(json!({"state": format!("role '{role}' dropped"), "roles": roles}))
    })
}

async fn list_session_roles(
    State(state): State<Arc<SharedState>>,
    Json(envelope): Json<Envelope>,
) -> Response {
    authed(&state, &envelope, |_, ctx| {
        state.orgs.with_org(&ctx.organization, |org| {
            authz::require_active_subject(org, &ctx.username)
        })?;
        Ok(json!({"roles": ctx.roles}))
    })
}

// ── Subject endpoints ──────────────────────────────────────────────────

#[derive(Deserialize)]
struct SubjectFilter {
    username: Option<String>,
}

async fn list_subjects(
    State(state): State<Arc<SharedState>>,
    Json(envelope): Json<Envelope>,
) -> Response {
    authed(&state, &envelope, |plaintext, ctx| {
        let SubjectFilter { username } = parse(plaintext)?;
        state.orgs.with_org(&ctx.organization, |org| {
            authz::require_active_subject(org, &ctx.username)?;
            to_json(&org.subjects_state(username.as_deref())?)
        })
    })
}

#[derive(Deserialize)]
struct AddSubjectPayload {
    username: String,
    name: String,
    email: String,
    public_key: String,
}

async fn add_subject(
    State(state): State<Arc<SharedState>>,
    Json(envelope): Json<Envelope>,
) -> Response {
    authed(&state, &envelope, |plaintext, ctx| {
        let payload: AddSubjectPayload = parse(plaintext)?;
        rep_sdk::keys::verifying_key_from_pem(&payload.public_key)
            .map_err(|e| RepError::BadRequest(format!("public_key: {e}")))?;
        state.orgs.with_org(&ctx.organization, |org| {
            authz::authorize(org, &ctx.username, &ctx.roles, Permission::SubjectNew, None)?;
            org.add_subject(crate::rbac::Subject {
                username: payload.username.clone(),
                name: payload.name.clone(),
                email: payload.email.clone(),
                public_key_pem: payload.public_key.clone(),
                state: ActivityState::Active,
            })
        })?;
        Ok(json!({"state": format!("subject '{}' created", payload.username)}))
    })
}

#[derive(Deserialize)]
struct SubjectStatePayload {
    username: String,
    state: ActivityState,
}

async fn set_subject_state(
    State(state): State<Arc<SharedState>>,
    Json(envelope): Json<Envelope>,
) -> Response {
    authed(&state, &envelope, |plaintext, ctx| {
        let payload: SubjectStatePayload = parse(plaintext)?;
        let required = match payload.state {
            ActivityState::Suspended => Permission::SubjectDown,
            ActivityState::Active => Permission::SubjectUp,
        };
        state.orgs.with_org(&ctx.organization, |org| {
            authz::authorize(org, &ctx.username, &ctx.roles, required, None)?;
            org.set_subject_state(&payload.username, payload.state)
        })?;
        Ok(json!({
            "state": format!("subject '{}' is now {}", payload.username, payload.state)
        }))
    })
}

#[derive(Deserialize)]
struct UsernamePayload {
    username: String,
}

async fn list_subject_roles(
    State(state): State<Arc<SharedState>>,
    Json(envelope): Json<Envelope>,
) -> Response {
    authed(&state, &envelope, |plaintext, ctx| {
        let UsernamePayload { username } = parse(plaintext)?;
        state.orgs.with_org(&ctx.organization, |org| {
            authz::require_active_subject(org, &ctx.username)?;
            to_json(&org.subject_roles(&username)?)
        })
    })
}

// ── Role endpoints ─────────────────────────────────────────────────────

async fn add_role(
    State(state): State<Arc<SharedState>>,
    Json(envelope): Json<Envelope>,
) -> Response {
    authed(&state, &envelope, |plaintext, ctx| {
        let RolePayload { role } = parse(plaintext)?;
        state.orgs.with_org(&ctx.organization, |org| {
            authz::authorize(org, &ctx.username, &ctx.roles, Permission::RoleNew, None)?;
            org.add_role(&role)
        })?;
        Ok(json!({"state": format!("role '{role}' created")}))
    })
}

async fn suspend_role(
    State(state): State<Arc<SharedState>>,
    Json(envelope): Json<Envelope>,
) -> Response {
    change_role_state(state, envelope, ActivityState::Suspended, Permission::RoleDown).await
}

async fn reactivate_role(
    State(state): State<Arc<SharedState>>,
    Json(envelope): Json<Envelope>,
) -> Response {
    change_role_state(state, envelope, ActivityState::Active, Permission::RoleUp).await
}

async fn change_role_state(
    state: Arc<SharedState>,
    envelope: Envelope,
    target: ActivityState,
    required: Permission,
) -> Response {
    authed(&state, &envelope, |plaintext, ctx| {
        let RolePayload { role } = parse(plaintext)?;
        state.orgs.with_org(&ctx.organization, |org| {
            authz::authorize(org, &ctx.username, &ctx.roles, required, None)?;
            org.set_role_state(&role, target)
        })?;
        Ok(json!({"state": format!("role '{role}' is now {target}")}))
    })
}

#[derive(Deserialize)]
struct RolePermissionPayload {
    role: String,
    permission: Permission,
}

async fn add_role_permission(
    State(state): State<Arc<SharedState>>,
    Json(envelope): Json<Envelope>,
) -> Response {
    authed(&state, &envelope, |plaintext, ctx| {
        let payload: RolePermissionPayload = parse(plaintext)?;
        state.orgs.with_org(&ctx.organization, |org| {
            authz::authorize(org, &ctx.username, &ctx.roles, Permission::RoleMod, None)?;
            org.role_add_permission(&payload.role, payload.permission)
        })?;
        Ok(json!({
            "state": format!("{} granted to role '{}'", payload.permission, payload.role)
        }))
    })
}

async fn remove_role_permission(
    State(state): State<Arc<SharedState>>,
    Json(envelope): Json<Envelope>,
) -> Response {
    authed(&state, &envelope, |plaintext, ctx| {
        let payload: RolePermissionPayload = parse(plaintext)?;
        state.orgs.with_org(&ctx.organization, |org| {
            authz::authorize(org, &ctx.username, &ctx.roles, Permission::RoleMod, None)?;
            org.role_remove_permission(&payload.role, payload.permission)
        })?;
        Ok(json!({
            "state": format!("{} removed from role '{}'", payload.permission, payload.role)
        }))
    })
}

#[derive(Deserialize)]
struct RoleSubjectPayload {
    role: String,
    username: String,
}

async fn add_role_member(
    State(state): State<Arc<SharedState>>,
    Json(envelope): Json<Envelope>,
) -> Response {
    authed(&state, &envelope, |plaintext, ctx| {
        let payload: RoleSubjectPayload = parse(plaintext)?;
        state.orgs.with_org(&ctx.organization, |org| {
            authz::authorize(org, &ctx.username, &ctx.roles, Permission::RoleMod, None)?;
            org.role_add_member(&payload.role, &payload.username)
        })?;
        Ok(json!({
            "state": format!("subject '{}' added to role '{}'", payload.username, payload.role)
        }))
    })
}

async fn remove_role_member(
    State(state): State<Arc<SharedState>>,
    Json(envelope): Json<Envelope>,
) -> Response {
    authed(&state, &envelope, |plaintext, ctx| {
        let payload: RoleSubjectPayload = parse(plaintext)?;
        state.orgs.with_org(&ctx.organization, |org| {
            authz::authorize(org, &ctx.username, &ctx.roles, Permission::RoleMod, None)?;
            org.role_remove_member(&payload.role, &payload.username)
        })?;
        Ok(json!({
            "state": format!("subject '{}' removed from role '{}'", payload.username, payload.role)
        }))
    })
}

async fn list_role_members(
    State(state): State<Arc<SharedState>>,
    Json(envelope): Json<Envelope>,
) -> Response {
    authed(&state, &envelope, |plaintext, ctx| {
        let RolePayload { role } = parse(plaintext)?;
        state.orgs.with_org(&ctx.organization, |org| {
            authz::require_active_subject(org, &ctx.username)?;
            to_json(&org.role_members(&role)?)
        })
    })
}

async fn list_role_permissions(
    State(state): State<Arc<SharedState>>,
    Json(envelope): Json<Envelope>,
) -> Response {
    authed(&state, &envelope, |plaintext, ctx| {
        let RolePayload { role } = parse(plaintext)?;
        state.orgs.with_org(&ctx.organization, |org| {
            authz::require_active_subject(org, &ctx.username)?;
            Ok(json!({"permissions": org.role_permissions(&role)?}))
        })
    })
}

#[derive(Deserialize)]
struct PermissionPayload {
    permission: Permission,
}

async fn list_permission_roles(
    State(state): State<Arc<SharedState>>,
    Json(envelope): Json<Envelope>,
) -> Response {
    authed(&state, &envelope, |plaintext, ctx| {
        let PermissionPayload { permission } = parse(plaintext)?;
        state.orgs.with_org(&ctx.organization, |org| {
            authz::require_active_subject(org, &ctx.username)?;
            Ok(json!({"roles": org.permission_roles(permission)}))
        })
    })
}

// ── Document endpoints ─────────────────────────────────────────────────

#[derive(Deserialize)]
struct DocsQuery {
    creator: Option<String>,
    date_filter: Option<String>,
    date_str: Option<String>,
}

async fn list_documents(
    State(state): State<Arc<SharedState>>,
    Json(envelope): Json<Envelope>,
) -> Response {
    authed(&state, &envelope, |plaintext, ctx| {
        let query: DocsQuery = parse(plaintext)?;
        let date = match (query.date_filter.as_deref(), query.date_str.as_deref()) {
            (Some(filter), Some(raw)) => {
                Some((filter.parse::<DateFilter>()?, parse_wire_date(raw)?))
            }
            (None, None) => None,
            _ => {
                return Err(RepError::BadRequest(
                    "date_filter and date_str must be given together".into(),
                ));
            }
        };
        state.orgs.with_org(&ctx.organization, |org| {
            authz::require_active_subject(org, &ctx.username)?;
            Ok(json!({
                "documents": to_json(&org.list_documents(query.creator.as_deref(), date))?
            }))
        })
    })
}

#[derive(Deserialize)]
struct AddDocPayload {
    /// Client-encrypted content, base64.
    encryption_file: String,
    /// Hex SHA-256 of the plaintext.
    file_handle: String,
    name: String,
    /// Content-encryption key, hex.
    key: String,
    alg: String,
}

async fn add_document(
    State(state): State<Arc<SharedState>>,
    Json(envelope): Json<Envelope>,
) -> Response {
    authed(&state, &envelope, |plaintext, ctx| {
        let payload: AddDocPayload = parse(plaintext)?;
        if payload.alg != ALG_AES_GCM {
            return Err(RepError::UnsupportedAlg(payload.alg));
        }
        let blob = B64
            .decode(&payload.encryption_file)
            .map_err(|_| RepError::BadRequest("encryption_file is not valid base64".into()))?;
        if hex::decode(&payload.key).map(|k| k.len()) != Ok(32) {
            return Err(RepError::BadRequest("key must be 32 hex-encoded bytes".into()));
        }

        state.orgs.with_org(&ctx.organization, |org| {
            authz::authorize(org, &ctx.username, &ctx.roles, Permission::DocNew, None)?;
            let Some(initial_role) = ctx.roles.first() else {
                return Err(RepError::RoleNotAssumed("document creation".into()));
            };
            if org.documents.contains_key(&payload.name) {
                return Err(RepError::Conflict(format!("document '{}'", payload.name)));
            }
            state.blobs.put(&payload.file_handle, &blob)?;
            org.add_document(
                &payload.name,
                &ctx.username,
                &payload.file_handle,
                &payload.key,
                &payload.alg,
                initial_role,
            )
        })?;
        Ok(json!({
            "state": format!("document '{}' created", payload.name),
            "file_handle": payload.file_handle,
        }))
    })
}

#[derive(Deserialize)]
struct DocNamePayload {
    document_name: String,
}

async fn document_metadata(
    State(state): State<Arc<SharedState>>,
    Json(envelope): Json<Envelope>,
) -> Response {
    authed(&state, &envelope, |plaintext, ctx| {
        let DocNamePayload { document_name } = parse(plaintext)?;
        state.orgs.with_org(&ctx.organization, |org| {
            let doc = org.document(&document_name)?;
            authz::authorize(org, &ctx.username, &ctx.roles, Permission::DocRead, Some(doc))?;
            to_json(&doc.metadata())
        })
    })
}

async fn delete_document(
    State(state): State<Arc<SharedState>>,
    Json(envelope): Json<Envelope>,
) -> Response {
    authed(&state, &envelope, |plaintext, ctx| {
        let DocNamePayload { document_name } = parse(plaintext)?;
        let former = state.orgs.with_org(&ctx.organization, |org| {
            let doc = org.document(&document_name)?;
            authz::authorize(org, &ctx.username, &ctx.roles, Permission::DocDelete, Some(doc))?;
            org.delete_document_file(&document_name)
        })?;
        Ok(json!({"file_handle": former}))
    })
}

#[derive(Deserialize)]
struct AclPayload {
    document_name: String,
    operation: String,
    role: String,
    permission: Permission,
}

async fn document_acl(
    State(state): State<Arc<SharedState>>,
    Json(envelope): Json<Envelope>,
) -> Response {
    authed(&state, &envelope, |plaintext, ctx| {
        let payload: AclPayload = parse(plaintext)?;
        let add = match payload.operation.as_str() {
            "+" => true,
            "-" => false,
            other => {
                return Err(RepError::BadRequest(format!(
                    "operation must be '+' or '-', got '{other}'"
                )));
            }
        };
        state.orgs.with_org(&ctx.organization, |org| {
            let doc = org.document(&payload.document_name)?;
            authz::authorize(org, &ctx.username, &ctx.roles, Permission::DocAcl, Some(doc))?;
            org.document_acl_change(&payload.document_name, add, &payload.role, payload.permission)
        })?;
        Ok(json!({
            "state": format!(
                "ACL of '{}' updated: {}{} for role '{}'",
                payload.document_name, payload.operation, payload.permission, payload.role
            )
        }))
    })
}
