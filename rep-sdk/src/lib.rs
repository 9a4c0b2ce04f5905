//! Client SDK for the document repository.
//!
//! The repository speaks an end-to-end authenticated protocol on top of plain
//! HTTP: sessions are established with an authenticated ECDH handshake, and
//! every subsequent request/response travels inside an AES-256-GCM envelope
//! keyed by the session key. The modules here are shared with the server
//! crate, which reuses the canonicalization, channel, key, and envelope
//! primitives so both ends agree byte-for-byte on what gets authenticated.
//!
//! Layout:
//!
//! - [`canonical`] — canonical JSON, the byte form everything is signed over
//! - [`channel`] — the AEAD channel (AES-256-GCM with associated data)
//! - [`keys`] — P-256 key material: password-derived, ephemeral, PEM, ECDSA
//! - [`envelope`] — the two wire envelopes (session AEAD + server-signed)
//! - [`types`] — permissions, subject/role states, shared wire types
//! - [`state`] — the `~/.sio` client state (repository address + public key)
//! - [`session`] — client session files and the authenticated request loop
//! - [`client`] — the command surface (`create_org`, `add_doc`, …)

pub mod canonical;
pub mod channel;
pub mod client;
pub mod envelope;
pub mod keys;
pub mod session;
pub mod state;
pub mod types;
