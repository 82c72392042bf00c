//! The AgentChat relay server.
//!
//! One task pair per connection: a read loop that parses and dispatches
//! frames in receipt order, and a writer draining the session's bounded
//! queue. Stateful subsystems (channels, marketplace, reputation, the
//! dispute engine, the allowlist) hang off [`ServerState`] and are shared by
//! every connection.

#![forbid(unsafe_code)]

pub mod channels;
pub mod handlers;
pub mod ratelimit;
pub mod session;

use agentchat_protocol::{parse_client_frame, ClientFrame, ServerFrame};
use agentchat_reputation::ReputationLedger;
use agentchat_services::{Allowlist, CourtEngine, Marketplace, Outbound};
use agentchat_telemetry::{run_health_server, HealthSnapshot, HealthSource};
use agentchat_types::config::ServerConfig;
use agentchat_types::error::{AuthError, ErrorCode, RelayError};
use agentchat_types::ids::AgentId;
use agentchat_types::time::now_ms;
use channels::ChannelEngine;
use handlers::identify::{self, PendingChallenge, PreAuth};
use ratelimit::TokenBucket;
use session::{Registry, Session, WriterMsg};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Shared server state, one per process.
pub struct ServerState {
    pub cfg: ServerConfig,
    pub registry: Arc<Registry>,
    pub channels: ChannelEngine,
    pub ledger: Arc<ReputationLedger>,
    pub market: Arc<Marketplace>,
    pub court: Arc<CourtEngine>,
    pub allowlist: Allowlist,
    started: Instant,
    next_session_id: AtomicU64,
}

impl ServerState {
    /// Builds a session bound to a connection's writer queue.
    pub(crate) fn new_session(
        &self,
        agent_id: AgentId,
        name: String,
        pubkey: Option<agentchat_crypto::sign::eddsa::Ed25519PublicKey>,
        tx: mpsc::Sender<WriterMsg>,
    ) -> Arc<Session> {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let bucket = TokenBucket::new(self.cfg.limits.message_rate, self.cfg.limits.message_burst);
        Session::new(id, agent_id, name, pubkey, bucket, tx)
    }
}

#[async_trait::async_trait]
impl HealthSource for ServerState {
    async fn snapshot(&self) -> HealthSnapshot {
        let (disputes_open, disputes_resolved) = self.court.counts().await;
        HealthSnapshot {
            uptime_secs: self.started.elapsed().as_secs(),
            sessions: self.registry.count(),
            channels: self.channels.count(),
            disputes_open,
            disputes_resolved,
        }
    }
}

/// A bound relay, ready to run.
pub struct Server {
    state: Arc<ServerState>,
    listener: TcpListener,
}

impl Server {
    /// Opens the data directory and binds the listener.
    pub async fn bind(cfg: ServerConfig) -> anyhow::Result<Server> {
        let ledger = Arc::new(ReputationLedger::open(&cfg.data_dir)?);
        let registry = Arc::new(Registry::default());
        let market = Arc::new(Marketplace::new(cfg.market.clone(), ledger.clone()));
        let court = CourtEngine::new(
            cfg.court.clone(),
            ledger.clone(),
            market.clone(),
            registry.clone() as Arc<dyn Outbound>,
        );
        let allowlist = Allowlist::open(cfg.allowlist.clone(), cfg.admin_key.clone(), &cfg.data_dir)?;
        let channels = ChannelEngine::new(cfg.limits.replay_window);
        let listener = TcpListener::bind(&cfg.listen_addr).await?;

        Ok(Server {
            state: Arc::new(ServerState {
                cfg,
                registry,
                channels,
                ledger,
                market,
                court,
                allowlist,
                started: Instant::now(),
                next_session_id: AtomicU64::new(1),
            }),
            listener,
        })
    }

    /// The bound listener address (useful with port 0).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn state(&self) -> Arc<ServerState> {
        self.state.clone()
    }

    /// Accepts connections until `shutdown` resolves, then drains: dispute
    /// timers are cancelled, sessions closed, and the ratings store flushed.
    pub async fn run(self, shutdown: impl std::future::Future<Output = ()>) -> anyhow::Result<()> {
        let Server { state, listener } = self;
        tracing::info!(target: "server", addr = %listener.local_addr()?, "relay listening");

        let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
        if let Ok(health_addr) = state.cfg.health_addr.parse::<SocketAddr>() {
            let source = state.clone() as Arc<dyn HealthSource>;
            let mut health_stop = stop_rx.clone();
            tokio::spawn(run_health_server(health_addr, source, async move {
                let _ = health_stop.wait_for(|stopped| *stopped).await;
            }));
        } else {
            tracing::warn!(target: "server", addr = %state.cfg.health_addr, "invalid health address, endpoint disabled");
        }

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let state = state.clone();
                        tokio::spawn(handle_connection(state, stream, peer));
                    }
                    Err(e) => {
                        tracing::warn!(target: "server", error = %e, "accept failed");
                    }
                }
            }
        }

        tracing::info!(target: "server", "shutting down");
        let _ = stop_tx.send(true);
        state.court.shutdown().await;
        for session in state.registry.all() {
            session.close();
        }
        state.ledger.flush();
        Ok(())
    }
}

fn send_raw(tx: &mpsc::Sender<WriterMsg>, frame: ServerFrame) {
    let _ = tx.try_send(WriterMsg::Frame(frame));
}

fn send_error(tx: &mpsc::Sender<WriterMsg>, err: &RelayError) {
    send_raw(tx, ServerFrame::error(err));
}

async fn handle_connection(state: Arc<ServerState>, stream: TcpStream, peer: SocketAddr) {
    tracing::debug!(target: "server", peer = %peer, "connection opened");
    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<WriterMsg>(state.cfg.limits.write_queue);

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg {
                WriterMsg::Frame(frame) => {
                    let line = frame.encode_with_ts(now_ms());
                    if write_half.write_all(line.as_bytes()).await.is_err()
                        || write_half.write_all(b"\n").await.is_err()
                    {
                        break;
                    }
                }
                WriterMsg::Close => break,
            }
        }
        let _ = write_half.shutdown().await;
    });

    let mut lines = BufReader::new(read_half).lines();
    let session = preauth_loop(&state, &tx, &mut lines).await;

    if let Some(session) = session {
        tracing::info!(target: "server", agent = %session.agent_id, name = %session.name, persistent = session.persistent(), "agent authenticated");
        authed_loop(&state, &session, &mut lines).await;

        state.channels.detach(&session);
        state.registry.remove(&session);
        session.close();
        tracing::info!(target: "server", agent = %session.agent_id, "agent disconnected");
    }

    drop(tx);
    let _ = writer.await;
    tracing::debug!(target: "server", peer = %peer, "connection closed");
}

type LineReader = tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>;

/// Runs the connection until it authenticates or dies. A strict pre-auth
/// frame budget resists connection floods; only `IDENTIFY`,
/// `VERIFY_IDENTITY`, and `PING` are admitted before authentication.
async fn preauth_loop(
    state: &Arc<ServerState>,
    tx: &mpsc::Sender<WriterMsg>,
    lines: &mut LineReader,
) -> Option<Arc<Session>> {
    let mut frames_seen = 0u32;
    let mut challenge: Option<PendingChallenge> = None;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            _ => return None,
        };
        if line.trim().is_empty() {
            continue;
        }
        frames_seen += 1;
        if frames_seen > state.cfg.limits.preauth_budget {
            send_error(tx, &RelayError::RateLimited);
            return None;
        }

        let frame = match parse_client_frame(&line, state.cfg.limits.max_frame_len) {
            Ok(frame) => frame,
            Err(e) => {
                send_error(tx, &RelayError::Protocol(e));
                continue;
            }
        };

        match frame {
            ClientFrame::Ping { ts } => send_raw(tx, ServerFrame::Pong { ts }),
            ClientFrame::Identify { name, pubkey } => {
                match identify::handle_identify(state, tx, name, pubkey) {
                    Ok(PreAuth::Welcome(session)) => {
                        send_raw(
                            tx,
                            ServerFrame::Welcome {
                                agent_id: session.agent_id.to_string(),
                                server: state.cfg.server_name.clone(),
                            },
                        );
                        return Some(session);
                    }
                    Ok(PreAuth::Challenged(pending, frame)) => {
                        challenge = Some(pending);
                        send_raw(tx, frame);
                    }
                    Err(e) => send_error(tx, &e),
                }
            }
            ClientFrame::VerifyIdentity { challenge_id, signature } => {
                match identify::handle_verify(state, tx, challenge.take(), &challenge_id, &signature)
                {
                    Ok((session, evicted)) => {
                        send_raw(
                            tx,
                            ServerFrame::Welcome {
                                agent_id: session.agent_id.to_string(),
                                server: state.cfg.server_name.clone(),
                            },
                        );
                        // The displaced holder of this agent id leaves every
                        // channel and drains out only after the new session
                        // is greeted.
                        if let Some(old) = evicted {
                            state.channels.detach(&old);
                            old.close();
                        }
                        return Some(session);
                    }
                    Err(e) => send_error(tx, &e),
                }
            }
            _ => send_error(tx, &RelayError::Auth(AuthError::Required)),
        }
    }
}

/// Processes frames in receipt order until disconnect or eviction.
async fn authed_loop(state: &Arc<ServerState>, session: &Arc<Session>, lines: &mut LineReader) {
    loop {
        tokio::select! {
            _ = session.closed() => return,
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    _ => return,
                };
                if session.is_closed() {
                    // Evicted while the frame was in flight: ignore it.
                    return;
                }
                if line.trim().is_empty() {
                    continue;
                }
                let frame = match parse_client_frame(&line, state.cfg.limits.max_frame_len) {
                    Ok(frame) => frame,
                    Err(e) => {
                        session.send(ServerFrame::error(&RelayError::Protocol(e)));
                        continue;
                    }
                };
                if let Err(e) = handlers::dispatch(state, session, frame).await {
                    tracing::debug!(target: "server", agent = %session.agent_id, code = e.code(), "frame rejected");
                    session.send(ServerFrame::error(&e));
                }
            }
        }
    }
}
