//! The repository client.
//!
//! One method per repository command. Anonymous commands verify the server's
//! signature over every response; authenticated commands ride the session
//! envelope via [`crate::session::send_session_data`]. Document content is
//! encrypted client-side before upload — the repository only ever stores
//! ciphertext, keyed by the plaintext's SHA-256 handle.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use p256::ecdsa::VerifyingKey;
use reqwest::Method;
use serde_json::{Value, json};

use crate::canonical::sha256_hex;
use crate::channel;
use crate::envelope::SignedEnvelope;
use crate::keys::{self, EphemeralKeyPair};
use crate::session::{SessionFile, send_session_data};
use crate::state::ClientState;
use crate::types::{ALG_AES_GCM, ActivityState, DocumentMetadata, Permission};

pub struct RepClient {
    address: String,
    server_key: VerifyingKey,
    http: reqwest::Client,
}

impl RepClient {
    /// Build a client from the persisted state (address + repository key).
    pub fn new(state: &ClientState) -> Result<Self> {
        let address = state.address()?.trim_end_matches('/').to_string();
        let server_key = keys::verifying_key_from_pem(state.pub_key_pem()?)
            .context("repository public key is not a valid P-256 PEM")?;
        Ok(RepClient {
            address,
            server_key,
            http: reqwest::Client::new(),
        })
    }

    // ── Local commands (no server involved) ────────────────────────────

    /// Derive the key pair for `password` and write the public key PEM to
    /// `credentials_file`.
    pub fn subject_credentials(password: &str, credentials_file: &Path) -> Result<()> {
        let key = keys::signing_key_from_password(password)?;
        let pem = keys::verifying_key_to_pem(key.verifying_key())?;
        fs::write(credentials_file, pem)
            .with_context(|| format!("writing {}", credentials_file.display()))?;
        tracing::debug!("public key stored in {}", credentials_file.display());
        Ok(())
    }

    /// Decrypt a downloaded blob given its metadata (`{key, alg}` JSON file).
    pub fn decrypt_file(encrypted_file: &Path, metadata_file: &Path) -> Result<Vec<u8>> {
        let raw = fs::read_to_string(metadata_file)
            .with_context(|| format!("reading {}", metadata_file.display()))?;
        let metadata: Value = serde_json::from_str(&raw).context("metadata is not JSON")?;
        let key_hex = metadata["key"].as_str().context("metadata has no key")?;
        let alg = metadata["alg"].as_str().context("metadata has no alg")?;
        if alg != ALG_AES_GCM {
            bail!("UNSUPPORTED_ALG: {alg}");
        }
        let key = decode_key(key_hex)?;
        let blob = fs::read(encrypted_file)
            .with_context(|| format!("reading {}", encrypted_file.display()))?;
        channel::decrypt_blob(&key, &blob).map_err(|e| anyhow::anyhow!("decrypting file: {e}"))
    }

    // ── Anonymous commands ─────────────────────────────────────────────

    /// Create an organization with its first subject. The server echoes the
    /// payload under its signature; every field is compared against what was
    /// sent before the result is trusted.
    pub async fn create_org(
        &self,
        organization: &str,
        username: &str,
        name: &str,
        email: &str,
        public_key_pem: &str,
    ) -> Result<Value> {
        let url = format!("{}/api/v1/auth/organization", self.address);
        let response = self
            .http
            .post(&url)
            .json(&json!({
                "organization": organization,
                "username": username,
                "name": name,
                "email": email,
                "public_key": public_key_pem,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            bail!("[{status}] failed to create organization: {}", response.text().await?);
        }

        let envelope: SignedEnvelope = response.json().await?;
        let echoed = envelope.open(&self.server_key)?;

        // A substituted field means someone rewrote the request in flight.
        let same = echoed["organization"] == organization
            && echoed["username"] == username
            && echoed["name"] == name
            && echoed["email"] == email
            && echoed["public_key"] == public_key_pem;
        if !same {
            bail!("create organization failed: server echoed different data");
        }
        Ok(echoed)
    }

    /// List all organizations known to the repository.
    pub async fn list_orgs(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/v1/organizations/", self.address);
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            bail!("[{}] failed to list organizations", response.status());
        }
        let orgs: Vec<Value> = response.json().await?;
        Ok(orgs
            .into_iter()
            .filter_map(|o| o["name"].as_str().map(str::to_string))
            .collect())
    }

    /// Run the authenticated ECDH handshake and persist the session file.
    /// Returns the allocated session id.
    pub async fn create_session(
        &self,
        organization: &str,
        username: &str,
        password: &str,
        session_file: &Path,
    ) -> Result<u64> {
        let long_term = keys::signing_key_from_password(password)?;
        let ephemeral = EphemeralKeyPair::generate();
        let ephemeral_pem = ephemeral.public_key_pem()?;

        let request = SignedEnvelope::seal(
            &long_term,
            &json!({
                "organization": organization,
                "username": username,
                "client_ephemeral_public_key": ephemeral_pem,
            }),
        )?;

        let url = format!("{}/api/v1/auth/session", self.address);
        let response = self.http.post(&url).json(&request).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            bail!("[{status}] failed to create session: {}", response.text().await?);
        }

        let envelope: SignedEnvelope = response.json().await?;
        let payload = envelope.open(&self.server_key)?;

        let session_id = payload["session_id"]
            .as_u64()
            .context("handshake response has no session_id")?;
        let server_ephemeral = payload["server_ephemeral_public_key"]
            .as_str()
            .context("handshake response has no server ephemeral key")?;

        let derived = ephemeral.derive_session_key(server_ephemeral)?;

        let session = SessionFile {
            session_id,
            organization: organization.to_string(),
            username: username.to_string(),
            derived_key: hex::encode(derived),
            msg_id: 0,
            roles: vec![],
        };
        session.save(session_file)?;
        tracing::debug!(session_id, "session established");
        Ok(session_id)
    }

    /// Download a file by handle. The response is signed by the server and
    /// the echoed handle must match the request.
    pub async fn get_file(&self, file_handle: &str) -> Result<Vec<u8>> {
        let url = format!("{}/api/v1/files/", self.address);
        let response = self
            .http
            .get(&url)
            .json(&json!({"file_handle": file_handle}))
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            bail!("[{status}] failed to get file: {}", response.text().await?);
        }

        let envelope: SignedEnvelope = response.json().await?;
        let payload = envelope.open(&self.server_key)?;
        if payload["file_handle"] != file_handle {
            bail!("get file failed: server returned a different handle");
        }
        let content_b64 = payload["file_content"]
            .as_str()
            .context("file response has no content")?;
        B64.decode(content_b64).context("file content is not valid base64")
    }

    // ── Session commands ───────────────────────────────────────────────

    async fn send(
        &self,
        method: Method,
        endpoint: &str,
        session_file: &Path,
        plaintext: Value,
    ) -> Result<Value> {
        send_session_data(&self.http, &self.address, method, endpoint, session_file, plaintext)
            .await
    }

    pub async fn assume_role(&self, session_file: &Path, role: &str) -> Result<Value> {
        let result = self
            .send(Method::POST, "/api/v1/sessions/roles", session_file, json!({"role": role}))
            .await?;
        let mut session = SessionFile::load(session_file)?;
        if !session.roles.iter().any(|r| r == role) {
            session.roles.push(role.to_string());
            session.save(session_file)?;
        }
        Ok(result)
    }

    pub async fn drop_role(&self, session_file: &Path, role: &str) -> Result<Value> {
        let result = self
            .send(Method::DELETE, "/api/v1/sessions/roles", session_file, json!({"role": role}))
            .await?;
        let mut session = SessionFile::load(session_file)?;
        session.roles.retain(|r| r != role);
        session.save(session_file)?;
        Ok(result)
    }

    pub async fn list_roles(&self, session_file: &Path) -> Result<Vec<String>> {
        let result = self
            .send(Method::GET, "/api/v1/sessions/roles", session_file, json!({}))
            .await?;
        Ok(serde_json::from_value(result["roles"].clone())?)
    }

    /// Subjects of the session's organization with their states; narrowed to
    /// one subject when `username` is given.
    pub async fn list_subjects(
        &self,
        session_file: &Path,
        username: Option<&str>,
    ) -> Result<BTreeMap<String, ActivityState>> {
        let result = self
            .send(
                Method::GET,
                "/api/v1/organizations/subjects/state",
                session_file,
                json!({"username": username}),
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn add_subject(
        &self,
        session_file: &Path,
        username: &str,
        name: &str,
        email: &str,
        credentials_file: &Path,
    ) -> Result<Value> {
        let public_key = fs::read_to_string(credentials_file)
            .with_context(|| format!("reading {}", credentials_file.display()))?;
        // Fail fast on garbage credentials instead of round-tripping them.
        keys::verifying_key_from_pem(&public_key)?;
        self.send(
            Method::POST,
            "/api/v1/organizations/subjects",
            session_file,
            json!({
                "username": username,
                "name": name,
                "email": email,
                "public_key": public_key,
            }),
        )
        .await
    }

    pub async fn suspend_subject(&self, session_file: &Path, username: &str) -> Result<Value> {
        self.set_subject_state(session_file, username, ActivityState::Suspended).await
    }

    pub async fn activate_subject(&self, session_file: &Path, username: &str) -> Result<Value> {
        self.set_subject_state(session_file, username, ActivityState::Active).await
    }

    async fn set_subject_state(
        &self,
        session_file: &Path,
        username: &str,
        state: ActivityState,
    ) -> Result<Value> {
        self.send(
            Method::PUT,
            "/api/v1/organizations/subjects/state",
            session_file,
            json!({"username": username, "state": state}),
        )
        .await
    }

    pub async fn add_role(&self, session_file: &Path, role: &str) -> Result<Value> {
        self.send(
            Method::POST,
            "/api/v1/organizations/roles",
            session_file,
            json!({"role": role}),
        )
        .await
    }

    pub async fn suspend_role(&self, session_file: &Path, role: &str) -> Result<Value> {
        self.send(
            Method::PUT,
            "/api/v1/organizations/roles/suspend",
            session_file,
            json!({"role": role}),
        )
        .await
    }

    pub async fn reactivate_role(&self, session_file: &Path, role: &str) -> Result<Value> {
        self.send(
            Method::PUT,
            "/api/v1/organizations/roles/reactivate",
            session_file,
            json!({"role": role}),
        )
        .await
    }

    /// Grant a permission to a role, or add a subject to it — the argument
    /// decides: anything that parses as a permission name is a permission,
    /// everything else is a username.
    pub async fn add_permission(
        &self,
        session_file: &Path,
        role: &str,
        permission_or_username: &str,
    ) -> Result<Value> {
        self.mutate_role(Method::POST, session_file, role, permission_or_username).await
    }

    /// Counterpart of [`Self::add_permission`].
    pub async fn remove_permission(
        &self,
        session_file: &Path,
        role: &str,
        permission_or_username: &str,
    ) -> Result<Value> {
        self.mutate_role(Method::DELETE, session_file, role, permission_or_username).await
    }

    async fn mutate_role(
        &self,
        method: Method,
        session_file: &Path,
        role: &str,
        permission_or_username: &str,
    ) -> Result<Value> {
        if let Ok(permission) = permission_or_username.parse::<Permission>() {
            self.send(
                method,
                "/api/v1/organizations/roles/permissions",
                session_file,
                json!({"role": role, "permission": permission}),
            )
            .await
        } else {
            self.send(
                method,
                "/api/v1/organizations/roles/subjects",
                session_file,
                json!({"role": role, "username": permission_or_username}),
            )
            .await
        }
    }

    pub async fn list_role_subjects(
        &self,
        session_file: &Path,
        role: &str,
    ) -> Result<BTreeMap<String, ActivityState>> {
        let result = self
            .send(
                Method::GET,
                "/api/v1/organizations/roles/subjects",
                session_file,
                json!({"role": role}),
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn list_subject_roles(
        &self,
        session_file: &Path,
        username: &str,
    ) -> Result<BTreeMap<String, ActivityState>> {
        let result = self
            .send(
                Method::GET,
                "/api/v1/organizations/subjects/roles",
                session_file,
                json!({"username": username}),
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn list_role_permissions(
        &self,
        session_file: &Path,
        role: &str,
    ) -> Result<Vec<Permission>> {
        let result = self
            .send(
                Method::GET,
                "/api/v1/organizations/roles/permissions",
                session_file,
                json!({"role": role}),
            )
            .await?;
        Ok(serde_json::from_value(result["permissions"].clone())?)
    }

    pub async fn list_permission_roles(
        &self,
        session_file: &Path,
        permission: Permission,
    ) -> Result<Vec<String>> {
        let result = self
            .send(
                Method::GET,
                "/api/v1/organizations/permissions/roles",
                session_file,
                json!({"permission": permission}),
            )
            .await?;
        Ok(serde_json::from_value(result["roles"].clone())?)
    }

    // ── Documents ──────────────────────────────────────────────────────

    /// List document metadata, optionally filtered by creator and by a
    /// creation-date comparison (`nt`/`ot`/`eq` against `DD-MM-YYYY`).
    pub async fn list_docs(
        &self,
        session_file: &Path,
        creator: Option<&str>,
        date: Option<(&str, &str)>,
    ) -> Result<Vec<DocumentMetadata>> {
        let (date_filter, date_str) = match date {
            Some((f, d)) => (Some(f), Some(d)),
            None => (None, None),
        };
        let result = self
            .send(
                Method::GET,
                "/api/v1/organizations/documents",
                session_file,
                json!({"creator": creator, "date_filter": date_filter, "date_str": date_str}),
            )
            .await?;
        Ok(serde_json::from_value(result["documents"].clone())?)
    }

    /// Deposit a document: hash the plaintext, encrypt it under a fresh key,
    /// and ship ciphertext + metadata. The repository never sees plaintext.
    pub async fn add_doc(
        &self,
        session_file: &Path,
        document_name: &str,
        content: &[u8],
    ) -> Result<Value> {
        let file_handle = sha256_hex(content);
        let key: [u8; channel::KEY_LEN] = rand::random();
        let blob = channel::encrypt_blob(&key, content);

        self.send(
            Method::POST,
            "/api/v1/organizations/documents",
            session_file,
            json!({
                "encryption_file": B64.encode(blob),
                "file_handle": file_handle,
                "name": document_name,
                "key": hex::encode(key),
                "alg": ALG_AES_GCM,
            }),
        )
        .await
    }

    pub async fn get_doc_metadata(
        &self,
        session_file: &Path,
        document_name: &str,
    ) -> Result<DocumentMetadata> {
        let result = self
            .send(
                Method::GET,
                "/api/v1/organizations/documents/metadata",
                session_file,
                json!({"document_name": document_name}),
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Fetch, decrypt, and integrity-check a document's file: the plaintext
    /// digest must equal the stored handle or the content is discarded.
    pub async fn get_doc_file(&self, session_file: &Path, document_name: &str) -> Result<Vec<u8>> {
        let metadata = self.get_doc_metadata(session_file, document_name).await?;
        let Some(file_handle) = metadata.file_handle else {
            bail!("DOC_GONE: document no longer has a file");
        };
        if metadata.alg != ALG_AES_GCM {
            bail!("UNSUPPORTED_ALG: {}", metadata.alg);
        }

        let blob = self.get_file(&file_handle).await?;
        let key = decode_key(&metadata.key)?;
        let plaintext = channel::decrypt_blob(&key, &blob)
            .map_err(|e| anyhow::anyhow!("decrypting document: {e}"))?;

        if sha256_hex(&plaintext) != file_handle {
            bail!("INTEGRITY_FAIL: plaintext digest does not match the file handle");
        }
        Ok(plaintext)
    }

    /// Clear a document's file handle. Returns the handle that was removed.
    pub async fn delete_doc(&self, session_file: &Path, document_name: &str) -> Result<String> {
        let result = self
            .send(
                Method::DELETE,
                "/api/v1/organizations/documents/",
                session_file,
                json!({"document_name": document_name}),
            )
            .await?;
        result["file_handle"]
            .as_str()
            .map(str::to_string)
            .context("delete response carries no file handle")
    }

    /// Add (`+`) or remove (`-`) a document-scoped permission for a role.
    pub async fn acl_doc(
        &self,
        session_file: &Path,
        document_name: &str,
        operation: &str,
        role: &str,
        permission: Permission,
    ) -> Result<Value> {
        if !permission.is_document_scoped() {
            bail!("{permission} is not a document permission");
        }
        self.send(
            Method::POST,
            "/api/v1/organizations/documents/acl",
            session_file,
            json!({
                "document_name": document_name,
                "operation": operation,
                "role": role,
                "permission": permission,
            }),
        )
        .await
    }
}

fn decode_key(key_hex: &str) -> Result<[u8; channel::KEY_LEN]> {
    let bytes = hex::decode(key_hex).context("content key is not valid hex")?;
    bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("content key must be {} bytes", channel::KEY_LEN))
}
