//! The two wire envelopes.
//!
//! Authenticated endpoints exchange [`Envelope`]: cleartext associated data
//! (`msg_id`, `session_id`) authenticated as AAD, and an AES-256-GCM body.
//! Handshake endpoints exchange [`SignedEnvelope`]: a JSON payload carried as
//! a string, with an ECDSA signature over that string's exact bytes.
//!
//! The AAD is the canonical JSON of the associated data — both ends
//! canonicalize independently, so formatting differences can never break tag
//! verification.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical;
use crate::channel::{self, ChannelError, KEY_LEN};
use crate::keys::{self, KeyError};
use p256::ecdsa::{SigningKey, VerifyingKey};

/// Authenticated-but-cleartext header of every session message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociatedData {
    pub msg_id: u64,
    pub session_id: u64,
}

/// Hex-encoded AEAD output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedData {
    pub nonce: String,
    pub ciphertext: String,
}

/// A session-protected request or response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub associated_data: AssociatedData,
    pub encrypted_data: EncryptedData,
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("envelope payload is not valid JSON: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("hex field is malformed")]
    BadHex,
}

impl Envelope {
    /// Encrypt `plaintext` under the session key, authenticating the header.
    pub fn seal(
        key: &[u8; KEY_LEN],
        associated_data: AssociatedData,
        plaintext: &Value,
    ) -> Result<Self, EnvelopeError> {
        let aad = canonical::canonical_bytes(&associated_data)?;
        let body = canonical::canonical_bytes(plaintext)?;
        let (nonce, ciphertext) = channel::encrypt(key, &body, &aad);
        Ok(Envelope {
            associated_data,
            encrypted_data: EncryptedData {
                nonce: hex::encode(nonce),
                ciphertext: hex::encode(ciphertext),
            },
        })
    }

    /// Authenticate and decrypt, returning the JSON payload.
    pub fn open(&self, key: &[u8; KEY_LEN]) -> Result<Value, EnvelopeError> {
        let aad = canonical::canonical_bytes(&self.associated_data)?;
        let nonce = hex::decode(&self.encrypted_data.nonce).map_err(|_| EnvelopeError::BadHex)?;
        let ciphertext =
            hex::decode(&self.encrypted_data.ciphertext).map_err(|_| EnvelopeError::BadHex)?;
        let plaintext = channel::decrypt(key, &nonce, &ciphertext, &aad)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

/// A handshake message: the payload's canonical JSON as a string, plus an
/// ECDSA-SHA-256 signature over that string's UTF-8 bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedEnvelope {
    pub associated_data: String,
    pub signature: String,
}

impl SignedEnvelope {
    /// Canonicalize and sign a payload.
    pub fn seal(key: &SigningKey, payload: &Value) -> Result<Self, EnvelopeError> {
        let associated_data = canonical::to_canonical_json(payload)?;
        let signature = keys::sign_hex(key, associated_data.as_bytes());
        Ok(SignedEnvelope {
            associated_data,
            signature,
        })
    }

    /// Verify the signature over the exact received bytes, then parse.
    pub fn open(&self, key: &VerifyingKey) -> Result<Value, EnvelopeError> {
        keys::verify_hex(key, self.associated_data.as_bytes(), &self.signature)?;
        Ok(serde_json::from_str(&self.associated_data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const KEY: [u8; KEY_LEN] = [7u8; KEY_LEN];

    #[test]
    fn envelope_roundtrip() {
        let ad = AssociatedData { msg_id: 4, session_id: 9 };
        let env = Envelope::seal(&KEY, ad, &json!({"role": "managers"})).unwrap();
        assert_eq!(env.open(&KEY).unwrap(), json!({"role": "managers"}));
    }

    #[test]
    fn header_tamper_breaks_authentication() {
        let ad = AssociatedData { msg_id: 4, session_id: 9 };
        let mut env = Envelope::seal(&KEY, ad, &json!({"ok": true})).unwrap();
        env.associated_data.msg_id = 5;
        assert!(env.open(&KEY).is_err());
    }

    #[test]
    fn ciphertext_tamper_breaks_authentication() {
        let ad = AssociatedData { msg_id: 1, session_id: 1 };
        let mut env = Envelope::seal(&KEY, ad, &json!({"ok": true})).unwrap();
        let mut raw = hex::decode(&env.encrypted_data.ciphertext).unwrap();
        raw[0] ^= 0xFF;
        env.encrypted_data.ciphertext = hex::encode(raw);
        assert!(env.open(&KEY).is_err());
    }

    #[test]
    fn signed_envelope_roundtrip() {
        let key = crate::keys::signing_key_from_password("a test password").unwrap();
        let env = SignedEnvelope::seal(&key, &json!({"organization": "acme", "username": "alice"}))
            .unwrap();
        let payload = env.open(key.verifying_key()).unwrap();
        assert_eq!(payload["organization"], "acme");
    }

    #[test]
    fn signed_envelope_rejects_modified_payload() {
        let key = crate::keys::signing_key_from_password("a test password").unwrap();
        let mut env = SignedEnvelope::seal(&key, &json!({"n": 1})).unwrap();
        env.associated_data = env.associated_data.replace('1', "2");
        assert!(env.open(key.verifying_key()).is_err());
    }

    #[test]
    fn signed_envelope_rejects_wrong_signer() {
        let signer = crate::keys::signing_key_from_password("a test password").unwrap();
        let other = crate::keys::signing_key_from_password("another password").unwrap();
        let env = SignedEnvelope::seal(&signer, &json!({"n": 1})).unwrap();
        assert!(env.open(other.verifying_key()).is_err());
    }
}
