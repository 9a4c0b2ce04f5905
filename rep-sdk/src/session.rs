//! Client session files and the authenticated request loop.
//!
//! A session file holds everything needed to keep talking on an established
//! channel: the id, the derived key, and the last used `msg_id`. The msg id
//! is advanced and persisted *before* each request goes out, so a crashed
//! client can never reuse an id the server may already have seen. Responses
//! must come back with a strictly larger id, or they are rejected as replays.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::channel::KEY_LEN;
use crate::envelope::{AssociatedData, Envelope};
use crate::types::ErrorBody;

/// Contents of a session file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionFile {
    pub session_id: u64,
    pub organization: String,
    pub username: String,
    /// 256-bit session key, hex.
    pub derived_key: String,
    pub msg_id: u64,
    pub roles: Vec<String>,
}

impl SessionFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading session file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("writing {}", path.display()))
    }

    pub fn key(&self) -> Result<[u8; KEY_LEN]> {
        let bytes = hex::decode(&self.derived_key).context("session key is not valid hex")?;
        let key: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("session key must be {KEY_LEN} bytes"))?;
        Ok(key)
    }
}

/// Send one authenticated request and decapsulate the response.
///
/// Advances and persists the session `msg_id` on both legs. A 499 status is
/// a protocol failure and surfaces the server's plaintext reason; any other
/// non-200 status carries an encrypted `{error, detail}` body.
pub async fn send_session_data(
    http: &reqwest::Client,
    server_address: &str,
    method: Method,
    endpoint: &str,
    session_path: &Path,
    plaintext: Value,
) -> Result<Value> {
    let mut session = SessionFile::load(session_path)?;
    let key = session.key()?;

    // Burn the msg id before the bytes leave the machine.
    session.msg_id += 1;
    session.save(session_path)?;

    let request = Envelope::seal(
        &key,
        AssociatedData {
            msg_id: session.msg_id,
            session_id: session.session_id,
        },
        &plaintext,
    )?;

    let url = format!("{server_address}{endpoint}");
    tracing::debug!(%url, msg_id = session.msg_id, "sending session request");
    let response = http
        .request(method, &url)
        .json(&request)
        .send()
        .await
        .with_context(|| format!("request to {url} failed"))?;

    let status = response.status();
    if status.as_u16() == 499 {
        let reason = response.text().await.unwrap_or_default();
        bail!("[499] session failure: {reason}");
    }

    let reply: Envelope = response
        .json()
        .await
        .context("response body is not a session envelope")?;

    let body = reply.open(&key)?;
    if reply.associated_data.session_id != session.session_id {
        bail!("response for wrong session {}", reply.associated_data.session_id);
    }
    if reply.associated_data.msg_id <= session.msg_id {
        bail!(
            "REPLAY: response msg_id {} does not advance past {}",
            reply.associated_data.msg_id,
            session.msg_id
        );
    }

    session.msg_id = reply.associated_data.msg_id;
    session.save(session_path)?;

    if status.is_success() {
        Ok(body)
    } else {
        let err: ErrorBody = serde_json::from_value(body)
            .unwrap_or_else(|_| ErrorBody {
                error: "UNKNOWN".into(),
                detail: format!("status {status}"),
            });
        bail!("[{}] {}: {}", status.as_u16(), err.error, err.detail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SessionFile {
        SessionFile {
            session_id: 3,
            organization: "acme".into(),
            username: "alice".into(),
            derived_key: hex::encode([9u8; KEY_LEN]),
            msg_id: 0,
            roles: vec![],
        }
    }

    #[test]
    fn file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        sample().save(&path).unwrap();
        let loaded = SessionFile::load(&path).unwrap();
        assert_eq!(loaded.session_id, 3);
        assert_eq!(loaded.key().unwrap(), [9u8; KEY_LEN]);
    }

    #[test]
    fn bad_key_length_rejected() {
        let mut s = sample();
        s.derived_key = "abcd".into();
        assert!(s.key().is_err());
    }
}
