//! Shared harness for the end-to-end suites: a relay on an ephemeral port
//! with a temp data dir, and a line-framed JSON test client.

#![allow(dead_code)]

use agentchat_crypto::sign::eddsa::Ed25519KeyPair;
use agentchat_server::{Server, ServerState};
use agentchat_types::config::ServerConfig;
use agentchat_types::ids::agent_id_from_pubkey;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Arc<ServerState>,
    pub data_dir: PathBuf,
    _dir: tempfile::TempDir,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Starts a relay on an ephemeral port. `mutate` tweaks the config
    /// after the test defaults are applied; the temp dir may be pre-seeded
    /// via `prepare` before the server opens its stores.
    pub async fn start_with(
        prepare: impl FnOnce(&std::path::Path),
        mutate: impl FnOnce(&mut ServerConfig),
    ) -> TestServer {
        let dir = tempfile::tempdir().unwrap();
        prepare(dir.path());

        let mut cfg = ServerConfig::default();
        cfg.listen_addr = "127.0.0.1:0".to_string();
        cfg.health_addr = "127.0.0.1:0".to_string();
        cfg.data_dir = dir.path().to_path_buf();
        mutate(&mut cfg);

        let server = Server::bind(cfg).await.unwrap();
        let addr = server.local_addr().unwrap();
        let state = server.state();
        let handle = tokio::spawn(async move {
            let _ = server.run(std::future::pending::<()>()).await;
        });

        TestServer {
            addr,
            state,
            data_dir: dir.path().to_path_buf(),
            _dir: dir,
            handle,
        }
    }

    pub async fn start() -> TestServer {
        Self::start_with(|_| {}, |_| {}).await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub struct TestClient {
    reader: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> TestClient {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, writer) = stream.into_split();
        TestClient {
            reader: BufReader::new(read_half).lines(),
            writer,
        }
    }

    pub async fn send(&mut self, frame: Value) {
        let mut line = frame.to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    /// Next frame, or panic after the timeout.
    pub async fn recv(&mut self) -> Value {
        let line = timeout(RECV_TIMEOUT, self.reader.next_line())
            .await
            .expect("timed out waiting for a frame")
            .unwrap()
            .expect("connection closed");
        serde_json::from_str(&line).unwrap()
    }

    /// Skips frames until one of the wanted type arrives.
    pub async fn recv_type(&mut self, wanted: &str) -> Value {
        loop {
            let frame = self.recv().await;
            if frame["type"] == wanted {
                return frame;
            }
        }
    }

    /// True when the server closed the connection.
    pub async fn closed(&mut self) -> bool {
        matches!(
            timeout(RECV_TIMEOUT, self.reader.next_line()).await,
            Ok(Ok(None)) | Ok(Err(_))
        )
    }

    pub async fn identify_ephemeral(&mut self, name: &str) -> String {
        self.send(json!({"type": "IDENTIFY", "name": name})).await;
        let welcome = self.recv_type("WELCOME").await;
        welcome["agent_id"].as_str().unwrap().to_string()
    }

    /// Runs the full challenge–response handshake.
    pub async fn identify_persistent(&mut self, name: &str, keys: &Ed25519KeyPair) -> String {
        self.send(json!({
            "type": "IDENTIFY",
            "name": name,
            "pubkey": keys.public_key().to_hex(),
        }))
        .await;
        let challenge = self.recv_type("CHALLENGE").await;
        let challenge_id = challenge["challenge_id"].as_str().unwrap();
        let nonce = challenge["nonce"].as_str().unwrap();
        let server_time = challenge["server_time"].as_u64().unwrap();

        let payload = agentchat_protocol::signing::auth(nonce, challenge_id, server_time);
        let sig = keys.sign(payload.as_bytes()).to_base64();
        self.send(json!({
            "type": "VERIFY_IDENTITY",
            "challenge_id": challenge_id,
            "signature": sig,
        }))
        .await;
        let welcome = self.recv_type("WELCOME").await;
        welcome["agent_id"].as_str().unwrap().to_string()
    }
}

pub fn keypair() -> Ed25519KeyPair {
    Ed25519KeyPair::generate()
}

/// The `@`-prefixed id the relay will derive for a keypair.
pub fn derived_id(keys: &Ed25519KeyPair) -> String {
    agent_id_from_pubkey(&keys.public_key().to_bytes()).to_string()
}

pub fn sign(keys: &Ed25519KeyPair, payload: &str) -> String {
    keys.sign(payload.as_bytes()).to_base64()
}
