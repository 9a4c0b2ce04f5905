//! Server state and run loop.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use p256::ecdsa::SigningKey;
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rand::rngs::OsRng;

use rep_sdk::keys;

use crate::blobstore::BlobStore;
use crate::config::ServerConfig;
use crate::rbac::OrgStore;
use crate::sessions::SessionRegistry;
use crate::web;

/// Everything the request handlers share.
pub struct SharedState {
    pub config: ServerConfig,
    /// The server's long-term signing key; its public half is distributed to
    /// clients out of band.
    pub signing_key: SigningKey,
    pub sessions: SessionRegistry,
    pub orgs: OrgStore,
    pub blobs: BlobStore,
}

impl SharedState {
    pub fn new(config: ServerConfig) -> Result<Self> {
        let signing_key = load_or_generate_key(&config.key_file)?;
        let sessions = SessionRegistry::new(Duration::from_secs(config.session_ttl_secs));
        let blobs = BlobStore::open(&config.blob_dir)
            .with_context(|| format!("opening blob store at {}", config.blob_dir))?;
        Ok(SharedState {
            config,
            signing_key,
            sessions,
            orgs: OrgStore::new(),
            blobs,
        })
    }
}

pub struct Server {
    config: ServerConfig,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Server { config }
    }

    pub async fn run(self) -> Result<()> {
        let state = Arc::new(SharedState::new(self.config.clone())?);
        let app = web::router(state);

        let listener = tokio::net::TcpListener::bind(&self.config.listen_addr)
            .await
            .with_context(|| format!("binding {}", self.config.listen_addr))?;
        tracing::info!("repository listening on {}", listener.local_addr()?);
        axum::serve(listener, app).await?;
        Ok(())
    }
}

/// Load the long-term key, or generate one on first start. A generated key
/// is written to `path`, its public half to `<path>.pub`.
fn load_or_generate_key(path: &str) -> Result<SigningKey> {
    if Path::new(path).exists() {
        let pem = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
        return SigningKey::from_pkcs8_pem(&pem).with_context(|| format!("parsing {path}"));
    }

    tracing::warn!("no key at {path}, generating a fresh server key pair");
    let key = SigningKey::random(&mut OsRng);
    if let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let private_pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .context("encoding server private key")?;
    fs::write(path, private_pem.as_bytes()).with_context(|| format!("writing {path}"))?;

    let public_pem = keys::verifying_key_to_pem(key.verifying_key())
        .context("encoding server public key")?;
    fs::write(format!("{path}.pub"), public_pem)
        .with_context(|| format!("writing {path}.pub"))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_generation_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.pem");
        let path = path.to_str().unwrap();

        let first = load_or_generate_key(path).unwrap();
        assert!(Path::new(path).exists());
        assert!(Path::new(&format!("{path}.pub")).exists());

        let second = load_or_generate_key(path).unwrap();
        assert_eq!(first.verifying_key(), second.verifying_key());

        // The published public key verifies against the loaded private key.
        let pub_pem = fs::read_to_string(format!("{path}.pub")).unwrap();
        let vk = keys::verifying_key_from_pem(&pub_pem).unwrap();
        assert_eq!(&vk, first.verifying_key());
    }
}
