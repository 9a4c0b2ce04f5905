//! P-256 key material.
//!
//! Long-term subject keys are derived deterministically from a password: the
//! password's big-endian integer value reduced into the group order. Session
//! keys come from an ephemeral-ephemeral ECDH exchange expanded through
//! HKDF-SHA-256. Public keys travel as SubjectPublicKeyInfo PEM, signatures
//! as hex-encoded DER ECDSA-SHA-256.

use hkdf::Hkdf;
use p256::ecdh::EphemeralSecret;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::bigint::U256;
use p256::elliptic_curve::ops::Reduce;
use p256::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rand::rngs::OsRng;
use p256::{NonZeroScalar, PublicKey, Scalar};
use sha2::Sha256;

use crate::channel::KEY_LEN;

/// HKDF info string fixed by the handshake protocol.
const HKDF_INFO: &[u8] = b"handshake data";

/// Passwords shorter than this are rejected outright; the derivation is
/// already weak and tiny passwords make it trivially brute-forceable.
pub const MIN_PASSWORD_LEN: usize = 8;
/// Passwords are capped at 32 bytes so their integer value fits the scalar
/// field and the reduction below matches arbitrary-precision `mod n`.
pub const MAX_PASSWORD_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("password must be {MIN_PASSWORD_LEN}..={MAX_PASSWORD_LEN} bytes, got {0}")]
    PasswordLength(usize),
    #[error("password reduces to the zero scalar")]
    DegeneratePassword,
    #[error("invalid public key PEM: {0}")]
    BadPublicKey(String),
    #[error("signature verification failed")]
    BadSignature,
    #[error("malformed signature encoding")]
    MalformedSignature,
}

/// Derive a subject's long-term signing key from its password.
///
/// `k = int(password_bytes, big-endian) mod n`, rejecting the zero scalar.
/// Deterministic: the same password always yields the same key pair.
pub fn signing_key_from_password(password: &str) -> Result<SigningKey, KeyError> {
    let bytes = password.as_bytes();
    if bytes.len() < MIN_PASSWORD_LEN || bytes.len() > MAX_PASSWORD_LEN {
        return Err(KeyError::PasswordLength(bytes.len()));
    }

    // Left-pad to 32 bytes so the big-endian value is preserved.
    let mut padded = [0u8; 32];
    padded[32 - bytes.len()..].copy_from_slice(bytes);

    let scalar = <Scalar as Reduce<U256>>::reduce_bytes(&padded.into());
    let nonzero =
        Option::<NonZeroScalar>::from(NonZeroScalar::new(scalar)).ok_or(KeyError::DegeneratePassword)?;
    Ok(SigningKey::from(nonzero))
}

/// Encode a verifying key as SubjectPublicKeyInfo PEM.
pub fn verifying_key_to_pem(key: &VerifyingKey) -> Result<String, KeyError> {
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|e| KeyError::BadPublicKey(e.to_string()))
}

/// Parse a SubjectPublicKeyInfo PEM into a verifying key.
pub fn verifying_key_from_pem(pem: &str) -> Result<VerifyingKey, KeyError> {
    VerifyingKey::from_public_key_pem(pem).map_err(|e| KeyError::BadPublicKey(e.to_string()))
}

/// ECDSA-SHA-256 over `message`, hex-encoded DER.
pub fn sign_hex(key: &SigningKey, message: &[u8]) -> String {
    let signature: Signature = key.sign(message);
    hex::encode(signature.to_der())
}

/// Verify a hex-encoded DER ECDSA-SHA-256 signature.
pub fn verify_hex(key: &VerifyingKey, message: &[u8], signature_hex: &str) -> Result<(), KeyError> {
    let der = hex::decode(signature_hex).map_err(|_| KeyError::MalformedSignature)?;
    let signature = Signature::from_der(&der).map_err(|_| KeyError::MalformedSignature)?;
    key.verify(message, &signature)
        .map_err(|_| KeyError::BadSignature)
}

/// One side of the handshake's ephemeral exchange.
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
}

impl EphemeralKeyPair {
    /// Generate a fresh ephemeral key pair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            secret: EphemeralSecret::random(&mut OsRng),
        }
    }

    /// The public half, PEM-encoded for the wire.
    pub fn public_key_pem(&self) -> Result<String, KeyError> {
        self.secret
            .public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| KeyError::BadPublicKey(e.to_string()))
    }

    /// ECDH against the peer's ephemeral public key, expanded through
    /// HKDF-SHA-256 into the 256-bit session key. Consumes the secret:
    /// each ephemeral key agrees exactly once.
    pub fn derive_session_key(self, peer_public_pem: &str) -> Result<[u8; KEY_LEN], KeyError> {
        let peer = PublicKey::from_public_key_pem(peer_public_pem)
            .map_err(|e| KeyError::BadPublicKey(e.to_string()))?;
        let shared = self.secret.diffie_hellman(&peer);

        let hkdf = Hkdf::<Sha256>::new(None, shared.raw_secret_bytes());
        let mut key = [0u8; KEY_LEN];
        hkdf.expand(HKDF_INFO, &mut key)
            .expect("32 bytes is a valid HKDF-SHA-256 output length");
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_derivation_is_deterministic() {
        let a = signing_key_from_password("correct horse").unwrap();
        let b = signing_key_from_password("correct horse").unwrap();
        assert_eq!(
            a.verifying_key().to_encoded_point(false),
            b.verifying_key().to_encoded_point(false)
        );
    }

    #[test]
    fn different_passwords_differ() {
        let a = signing_key_from_password("password-one").unwrap();
        let b = signing_key_from_password("password-two").unwrap();
        assert_ne!(
            a.verifying_key().to_encoded_point(false),
            b.verifying_key().to_encoded_point(false)
        );
    }

    #[test]
    fn short_password_rejected() {
        assert!(matches!(
            signing_key_from_password("short"),
            Err(KeyError::PasswordLength(5))
        ));
    }

    #[test]
    fn oversized_password_rejected() {
        let long = "x".repeat(MAX_PASSWORD_LEN + 1);
        assert!(signing_key_from_password(&long).is_err());
    }

    #[test]
    fn pem_roundtrip() {
        let key = signing_key_from_password("a test password").unwrap();
        let pem = verifying_key_to_pem(key.verifying_key()).unwrap();
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));
        let parsed = verifying_key_from_pem(&pem).unwrap();
        assert_eq!(&parsed, key.verifying_key());
    }

    #[test]
    fn sign_verify_roundtrip() {
        let key = signing_key_from_password("a test password").unwrap();
        let sig = sign_hex(&key, b"payload");
        verify_hex(key.verifying_key(), b"payload", &sig).unwrap();
        assert!(verify_hex(key.verifying_key(), b"tampered", &sig).is_err());
    }

    #[test]
    fn ecdh_both_sides_agree() {
        let client = EphemeralKeyPair::generate();
        let server = EphemeralKeyPair::generate();
        let client_pem = client.public_key_pem().unwrap();
        let server_pem = server.public_key_pem().unwrap();

        let k1 = client.derive_session_key(&server_pem).unwrap();
        let k2 = server.derive_session_key(&client_pem).unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn distinct_exchanges_yield_distinct_keys() {
        let a = EphemeralKeyPair::generate();
        let b = EphemeralKeyPair::generate();
        let b_pem = b.public_key_pem().unwrap();
        let k1 = a.derive_session_key(&b_pem).unwrap();

        let c = EphemeralKeyPair::generate();
        let d = EphemeralKeyPair::generate();
        let d_pem = d.public_key_pem().unwrap();
        let k2 = c.derive_session_key(&d_pem).unwrap();
        assert_ne!(k1, k2);
    }
}
