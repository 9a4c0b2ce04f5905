//! Document repository server.
//!
//! Holds every organization, subject, role, document, and live session in
//! memory, behind an axum HTTP surface. Confidentiality and authenticity do
//! not come from the transport: each session carries its own AEAD channel
//! established by an authenticated ECDH handshake, and replay protection
//! rides on a per-session monotonic message id.

pub mod blobstore;
pub mod config;
pub mod errors;
pub mod handshake;
pub mod rbac;
pub mod server;
pub mod sessions;
pub mod web;
