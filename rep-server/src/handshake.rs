//! The server side of the handshake protocol.
//!
//! Two unauthenticated-in, signed-out exchanges: organization bootstrap
//! (server signs the echoed payload so the client can detect substitution)
//! and session creation (ECDSA-authenticated ECDH, HKDF-derived session key,
//! signed server ephemeral).

use serde::Deserialize;
use serde_json::json;

use rep_sdk::envelope::SignedEnvelope;
use rep_sdk::keys::{self, EphemeralKeyPair};
use rep_sdk::types::ActivityState;

use p256::ecdsa::SigningKey;

use crate::errors::RepError;
use crate::rbac::types::Subject;
use crate::rbac::OrgStore;
use crate::sessions::SessionRegistry;

#[derive(Debug, Deserialize)]
pub struct CreateOrgRequest {
    pub organization: String,
    pub username: String,
    pub name: String,
    pub email: String,
    pub public_key: String,
}

/// Bootstrap an organization and sign the echoed payload.
pub fn create_org(
    store: &OrgStore,
    server_key: &SigningKey,
    request: CreateOrgRequest,
) -> Result<SignedEnvelope, RepError> {
    // The key must at least parse; a subject that can never authenticate is
    // a dead organization.
    keys::verifying_key_from_pem(&request.public_key)
        .map_err(|e| RepError::BadRequest(format!("public_key: {e}")))?;

    store.create_org(
        &request.organization,
        Subject {
            username: request.username.clone(),
            name: request.name.clone(),
            email: request.email.clone(),
            public_key_pem: request.public_key.clone(),
            state: ActivityState::Active,
        },
    )?;

    let echo = json!({
        "organization": request.organization,
        "username": request.username,
        "name": request.name,
        "email": request.email,
        "public_key": request.public_key,
    });
    Ok(SignedEnvelope::seal(server_key, &echo)?)
}

#[derive(Debug, Deserialize)]
struct SessionRequest {
    organization: String,
    username: String,
    client_ephemeral_public_key: String,
}

/// Establish a session from a signed handshake envelope.
///
/// The client's signature is verified over the exact received bytes of the
/// associated data, under the long-term key registered for the subject. Only
/// then does the server contribute its ephemeral and allocate a session.
pub fn create_session(
    store: &OrgStore,
    registry: &SessionRegistry,
    server_key: &SigningKey,
    envelope: &SignedEnvelope,
) -> Result<SignedEnvelope, RepError> {
    let request: SessionRequest = serde_json::from_str(&envelope.associated_data)
        .map_err(|e| RepError::BadRequest(format!("handshake payload: {e}")))?;

    let (public_key_pem, state) = store.subject_auth(&request.organization, &request.username)?;
    if !state.is_active() {
        return Err(RepError::SubjectInactive(request.username));
    }

    let subject_key = keys::verifying_key_from_pem(&public_key_pem)
        .map_err(|_| RepError::Internal("stored subject key does not parse".into()))?;
    keys::verify_hex(
        &subject_key,
        envelope.associated_data.as_bytes(),
        &envelope.signature,
    )
    .map_err(|_| RepError::AuthFail)?;

    let ephemeral = EphemeralKeyPair::generate();
    let server_ephemeral_pem = ephemeral
        .public_key_pem()
        .map_err(|e| RepError::Internal(e.to_string()))?;
    let derived_key = ephemeral
        .derive_session_key(&request.client_ephemeral_public_key)
        .map_err(|e| RepError::BadRequest(format!("client ephemeral key: {e}")))?;

    let session_id = registry.create(&request.organization, &request.username, derived_key);

    let payload = json!({
        "session_id": session_id,
        "server_ephemeral_public_key": server_ephemeral_pem,
    });
    Ok(SignedEnvelope::seal(server_key, &payload)?)
}
