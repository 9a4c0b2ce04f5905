//! Client-side persisted state.
//!
//! A `state.json` under `~/.sio` carries the repository address and the
//! repository's long-term public key (PEM). Resolution order, lowest to
//! highest: state file, environment (`REP_ADDRESS`, `REP_PUB_KEY` = path to a
//! PEM file), explicit overrides from the command line.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const STATE_FILE: &str = "state.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientState {
    #[serde(rename = "REP_ADDRESS", skip_serializing_if = "Option::is_none")]
    pub rep_address: Option<String>,
    /// The repository public key PEM itself (not a path).
    #[serde(rename = "REP_PUB_KEY", skip_serializing_if = "Option::is_none")]
    pub rep_pub_key: Option<String>,
}

/// The state directory, `~/.sio`.
pub fn state_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("cannot determine home directory")?;
    Ok(home.join(".sio"))
}

impl ClientState {
    /// Load from `dir/state.json`; missing file yields the empty state.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(STATE_FILE);
        if !path.exists() {
            tracing::debug!("no state file at {}", path.display());
            return Ok(ClientState::default());
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("reading state file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    /// Fold in the `REP_ADDRESS` / `REP_PUB_KEY` environment variables.
    /// `REP_PUB_KEY` names a PEM file; its contents are inlined.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("REP_ADDRESS") {
            tracing::debug!("REP_ADDRESS from environment: {addr}");
            self.rep_address = Some(addr);
        }
        if let Ok(key_path) = std::env::var("REP_PUB_KEY") {
            let pem = fs::read_to_string(&key_path)
                .with_context(|| format!("reading REP_PUB_KEY file {key_path}"))?;
            self.rep_pub_key = Some(pem);
        }
        Ok(())
    }

    /// Inline a repository public key from a PEM file path.
    pub fn set_pub_key_from_file(&mut self, path: &Path) -> Result<()> {
        let pem = fs::read_to_string(path)
            .with_context(|| format!("reading repository key {}", path.display()))?;
        self.rep_pub_key = Some(pem);
        Ok(())
    }

    /// Persist to `dir/state.json`, creating the directory if needed.
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        let path = dir.join(STATE_FILE);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).with_context(|| format!("writing {}", path.display()))
    }

    pub fn address(&self) -> Result<&str> {
        self.rep_address
            .as_deref()
            .context("repository address not configured (REP_ADDRESS)")
    }

    pub fn pub_key_pem(&self) -> Result<&str> {
        self.rep_pub_key
            .as_deref()
            .context("repository public key not configured (REP_PUB_KEY)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_preserves_wire_names() {
        let dir = tempfile::tempdir().unwrap();
        let state = ClientState {
            rep_address: Some("http://127.0.0.1:5000".into()),
            rep_pub_key: Some("-----BEGIN PUBLIC KEY-----\n…".into()),
        };
        state.save(dir.path()).unwrap();

        let raw = fs::read_to_string(dir.path().join(STATE_FILE)).unwrap();
        assert!(raw.contains("REP_ADDRESS"));
        assert!(raw.contains("REP_PUB_KEY"));

        let loaded = ClientState::load(dir.path()).unwrap();
        assert_eq!(loaded.rep_address.as_deref(), Some("http://127.0.0.1:5000"));
    }

    #[test]
    fn missing_file_is_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let state = ClientState::load(dir.path()).unwrap();
        assert!(state.rep_address.is_none());
        assert!(state.address().is_err());
    }
}
