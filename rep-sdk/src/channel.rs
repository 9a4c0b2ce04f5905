//! The symmetric channel: AES-256-GCM with associated data.
//!
//! Every session message and every stored document blob goes through these
//! two functions. A fresh 96-bit nonce is drawn from the OS RNG on each
//! encryption; nonces are never reused under the same key.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Tag verification failed: the ciphertext or the associated data was
    /// modified, or the key is wrong.
    #[error("AEAD authentication failed")]
    AuthFail,
    #[error("invalid nonce length: expected {NONCE_LEN} bytes, got {0}")]
    BadNonce(usize),
}

/// Encrypt `plaintext` under `key`, authenticating (but not encrypting) `aad`.
///
/// Returns the fresh nonce and the ciphertext (tag appended).
pub fn encrypt(key: &[u8; KEY_LEN], plaintext: &[u8], aad: &[u8]) -> ([u8; NONCE_LEN], Vec<u8>) {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .expect("AES-GCM encryption is infallible for in-memory buffers");
    (nonce.into(), ciphertext)
}

/// Decrypt and authenticate. Any mismatch in key, nonce, ciphertext, or
/// associated data yields [`ChannelError::AuthFail`].
pub fn decrypt(
    key: &[u8; KEY_LEN],
    nonce: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, ChannelError> {
    if nonce.len() != NONCE_LEN {
        return Err(ChannelError::BadNonce(nonce.len()));
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| ChannelError::AuthFail)
}

/// Encrypt a document for storage: `nonce || ciphertext`, no associated data.
///
/// This is the blob layout the repository stores and serves; the nonce rides
/// in front so the metadata only needs to carry the key.
pub fn encrypt_blob(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Vec<u8> {
    let (nonce, ciphertext) = encrypt(key, plaintext, b"");
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    out
}

/// Decrypt a `nonce || ciphertext` blob produced by [`encrypt_blob`].
pub fn decrypt_blob(key: &[u8; KEY_LEN], blob: &[u8]) -> Result<Vec<u8>, ChannelError> {
    if blob.len() < NONCE_LEN {
        return Err(ChannelError::BadNonce(blob.len()));
    }
    let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
    decrypt(key, nonce, ciphertext, b"")
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; KEY_LEN] = [0x42; KEY_LEN];

    #[test]
    fn roundtrip_with_aad() {
        let (nonce, ct) = encrypt(&KEY, b"secret payload", b"public header");
        let pt = decrypt(&KEY, &nonce, &ct, b"public header").unwrap();
        assert_eq!(pt, b"secret payload");
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let (nonce, mut ct) = encrypt(&KEY, b"secret", b"aad");
        ct[0] ^= 0x01;
        assert!(matches!(
            decrypt(&KEY, &nonce, &ct, b"aad"),
            Err(ChannelError::AuthFail)
        ));
    }

    #[test]
    fn tampered_aad_fails() {
        let (nonce, ct) = encrypt(&KEY, b"secret", b"aad");
        assert!(matches!(
            decrypt(&KEY, &nonce, &ct, b"aae"),
            Err(ChannelError::AuthFail)
        ));
    }

    #[test]
    fn wrong_key_fails() {
        let (nonce, ct) = encrypt(&KEY, b"secret", b"");
        let other = [0x43; KEY_LEN];
        assert!(decrypt(&other, &nonce, &ct, b"").is_err());
    }

    #[test]
    fn nonces_are_fresh() {
        let (n1, _) = encrypt(&KEY, b"x", b"");
        let (n2, _) = encrypt(&KEY, b"x", b"");
        assert_ne!(n1, n2);
    }

    #[test]
    fn blob_roundtrip() {
        let blob = encrypt_blob(&KEY, b"document body");
        assert_eq!(decrypt_blob(&KEY, &blob).unwrap(), b"document body");
    }

    #[test]
    fn truncated_blob_rejected() {
        assert!(decrypt_blob(&KEY, &[0u8; 5]).is_err());
    }
}
