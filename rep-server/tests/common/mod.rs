//! Shared test harness: a live repository server on an ephemeral port plus
//! a fully configured client.

// Not every suite uses every helper.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use rep_sdk::client::RepClient;
use rep_sdk::keys;
use rep_sdk::state::ClientState;
use rep_server::config::ServerConfig;
use rep_server::server::SharedState;
use rep_server::web;

pub struct TestRepo {
    pub address: String,
    pub state: Arc<SharedState>,
    dir: tempfile::TempDir,
}

impl TestRepo {
    /// Boot a server with the default session TTL.
    pub async fn spawn() -> TestRepo {
        Self::spawn_with_ttl(3600).await
    }

    pub async fn spawn_with_ttl(session_ttl_secs: u64) -> TestRepo {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = ServerConfig::for_tests(dir.path().to_str().expect("utf-8 path"));
        config.session_ttl_secs = session_ttl_secs;

        let state = Arc::new(SharedState::new(config).expect("server state"));
        let app = web::router(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });

        TestRepo {
            address: format!("http://{addr}"),
            state,
            dir,
        }
    }

    /// A client wired to this server's address and public key.
    pub fn client(&self) -> RepClient {
        let pub_key = keys::verifying_key_to_pem(self.state.signing_key.verifying_key())
            .expect("server public key");
        let state = ClientState {
            rep_address: Some(self.address.clone()),
            rep_pub_key: Some(pub_key),
        };
        RepClient::new(&state).expect("client")
    }

    /// A scratch path inside the test's directory.
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Create the "acme" organization with subject `alice` and open a
    /// session for her. Returns the session file path.
    pub async fn bootstrap_acme(&self, client: &RepClient) -> PathBuf {
        let key = keys::signing_key_from_password(ALICE_PASSWORD).expect("key");
        let pem = keys::verifying_key_to_pem(key.verifying_key()).expect("pem");
        client
            .create_org("acme", "alice", "Alice", "alice@acme.example", &pem)
            .await
            .expect("create org");

        let session = self.path("alice-session.json");
        client
            .create_session("acme", "alice", ALICE_PASSWORD, &session)
            .await
            .expect("create session");
        session
    }

    /// Register a subject and open a session for it. The caller's session
    /// must be able to add subjects.
    pub async fn add_subject_with_session(
        &self,
        client: &RepClient,
        admin_session: &std::path::Path,
        username: &str,
        password: &str,
    ) -> PathBuf {
        let credentials = self.path(&format!("{username}.pub"));
        RepClient::subject_credentials(password, &credentials).expect("credentials");
        client
            .add_subject(admin_session, username, username, "u@acme.example", &credentials)
            .await
            .expect("add subject");

        let session = self.path(&format!("{username}-session.json"));
        client
            .create_session("acme", username, password, &session)
            .await
            .expect("subject session");
        session
    }
}

pub const ALICE_PASSWORD: &str = "alice strong password";
pub const BOB_PASSWORD: &str = "bob strong password";
