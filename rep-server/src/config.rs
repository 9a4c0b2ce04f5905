//! Server configuration, parsed from flags and environment.

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "rep-server", about = "Document repository server")]
pub struct ServerConfig {
    /// Address to bind the HTTP listener on.
    #[arg(long, env = "REP_LISTEN_ADDR", default_value = "127.0.0.1:5000")]
    pub listen_addr: String,

    /// Path to the server's long-term P-256 private key (PKCS#8 PEM).
    /// Generated on first start if missing; the public half is written next
    /// to it as `<key-file>.pub` for out-of-band distribution to clients.
    #[arg(long, env = "REP_KEY_FILE", default_value = "rep-server-key.pem")]
    pub key_file: String,

    /// Directory for the content-addressed document blob store.
    #[arg(long, env = "REP_BLOB_DIR", default_value = "./blobs")]
    pub blob_dir: String,

    /// Session lifetime in seconds.
    #[arg(long, env = "REP_SESSION_TTL", default_value_t = 3600)]
    pub session_ttl_secs: u64,
}

impl ServerConfig {
    /// A config suitable for tests: throwaway key location, given blob dir.
    pub fn for_tests(blob_dir: &str) -> Self {
        ServerConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            key_file: format!("{blob_dir}/server-key.pem"),
            blob_dir: blob_dir.to_string(),
            session_ttl_secs: 3600,
        }
    }
}
