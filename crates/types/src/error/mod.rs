//! Error types for the AgentChat relay.
//!
//! Every wire-facing variant maps to one of the stable error codes carried in
//! `ERROR{code, message}` frames. The mapping lives here so handlers and
//! tests agree on the exact code strings.

use thiserror::Error;

/// A trait for assigning a stable, machine-readable string code to an error.
pub trait ErrorCode {
    /// Returns the unique, stable wire identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Errors raised before or during session authentication.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The frame requires an authenticated session.
    #[error("authentication required")]
    Required,
    /// The operation requires a persistent (pubkey-backed) identity.
    #[error("a persistent identity is required: {0}")]
    NoPubkey(String),
    /// The pubkey is not on the allowlist, or an admin key mismatched.
    #[error("not allowed: {0}")]
    NotAllowed(String),
    /// A challenge signature failed cryptographic verification.
    #[error("identity verification failed")]
    VerificationFailed,
    /// The challenge expired before `VERIFY_IDENTITY` arrived.
    #[error("identity challenge expired")]
    VerificationExpired,
}

impl ErrorCode for AuthError {
    fn code(&self) -> &'static str {
        match self {
            Self::Required => "AUTH_REQUIRED",
            Self::NoPubkey(_) => "NO_PUBKEY",
            Self::NotAllowed(_) => "NOT_ALLOWED",
            Self::VerificationFailed => "VERIFICATION_FAILED",
            Self::VerificationExpired => "VERIFICATION_EXPIRED",
        }
    }
}

/// Stateless frame validation errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame is not valid JSON, has an unknown type, or fails a bound.
    #[error("invalid message: {0}")]
    InvalidFrame(String),
    /// An agent or channel name violates the naming rules.
    #[error("invalid name: {0}")]
    InvalidName(String),
}

impl ErrorCode for ProtocolError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidFrame(_) => "INVALID_MSG",
            Self::InvalidName(_) => "INVALID_NAME",
        }
    }
}

/// Channel-engine errors.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The named channel does not exist.
    #[error("channel {0} not found")]
    NotFound(String),
    /// The channel is invite-only and the agent is not on the invite list.
    #[error("not invited to {0}")]
    NotInvited(String),
    /// A channel with this name already exists.
    #[error("channel {0} already exists")]
    Exists(String),
    /// The target agent is not connected.
    #[error("agent {0} not found")]
    AgentNotFound(String),
    /// The sender has not joined the channel it is broadcasting to.
    #[error("join {0} before sending to it")]
    NotJoined(String),
}

impl ErrorCode for ChannelError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "CHANNEL_NOT_FOUND",
            Self::NotInvited(_) => "NOT_INVITED",
            Self::Exists(_) => "CHANNEL_EXISTS",
            Self::AgentNotFound(_) => "AGENT_NOT_FOUND",
            Self::NotJoined(_) => "INVALID_MSG",
        }
    }
}

/// Marketplace and proposal-lifecycle errors.
#[derive(Debug, Error)]
pub enum MarketError {
    /// No proposal with this id exists.
    #[error("proposal {0} not found")]
    ProposalNotFound(String),
    /// The proposal expired before the transition arrived.
    #[error("proposal {0} has expired")]
    Expired(String),
    /// The transition is not legal from the proposal's current state.
    #[error("invalid proposal transition: {0}")]
    InvalidTransition(String),
    /// A required signature was absent or unparseable.
    #[error("signature required: {0}")]
    SignatureRequired(String),
    /// The sender is neither proposer nor acceptor of the proposal.
    #[error("not a party to proposal {0}")]
    NotParty(String),
    /// The party's free rating cannot cover the requested stake.
    #[error("insufficient reputation: {0}")]
    InsufficientReputation(String),
    /// The stake amount is zero, negative, or over the configured cap.
    #[error("invalid stake: {0}")]
    InvalidStake(String),
}

impl ErrorCode for MarketError {
    fn code(&self) -> &'static str {
        match self {
            Self::ProposalNotFound(_) => "PROPOSAL_NOT_FOUND",
            Self::Expired(_) => "PROPOSAL_EXPIRED",
            Self::InvalidTransition(_) => "INVALID_PROPOSAL",
            Self::SignatureRequired(_) => "SIGNATURE_REQUIRED",
            Self::NotParty(_) => "NOT_PROPOSAL_PARTY",
            Self::InsufficientReputation(_) => "INSUFFICIENT_REPUTATION",
            Self::InvalidStake(_) => "INVALID_STAKE",
        }
    }
}

/// Agentcourt dispute-engine errors.
///
/// The wire code table has no dispute-specific lookup code, so an unknown
/// dispute id reports `PROPOSAL_NOT_FOUND` (disputes are addressed through
/// their proposals) and phase violations report `INVALID_PROPOSAL`.
#[derive(Debug, Error)]
pub enum DisputeError {
    /// No dispute with this id exists.
    #[error("dispute {0} not found")]
    NotFound(String),
    /// A dispute already points at this proposal.
    #[error("proposal {0} is already disputed")]
    AlreadyDisputed(String),
    /// The operation is not legal in the dispute's current phase.
    #[error("wrong dispute phase: {0}")]
    WrongPhase(String),
    /// The revealed nonce does not hash to the filed commitment.
    #[error("reveal does not match commitment")]
    CommitMismatch,
    /// The sender is not a party to the dispute.
    #[error("not a party to dispute {0}")]
    NotParty(String),
    /// The sender is not an arbiter on this dispute's panel.
    #[error("not an arbiter on dispute {0}")]
    NotArbiter(String),
    /// Evidence was already submitted by this party.
    #[error("evidence already submitted for dispute {0}")]
    EvidenceAlreadySubmitted(String),
    /// A required signature was absent or unparseable.
    #[error("signature required: {0}")]
    SignatureRequired(String),
    /// The disputant's free rating cannot cover the filing fee.
    #[error("insufficient reputation: {0}")]
    InsufficientReputation(String),
}

impl ErrorCode for DisputeError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "PROPOSAL_NOT_FOUND",
            Self::AlreadyDisputed(_) => "INVALID_PROPOSAL",
            Self::WrongPhase(_) => "INVALID_PROPOSAL",
            Self::CommitMismatch => "VERIFICATION_FAILED",
            Self::NotParty(_) => "NOT_PROPOSAL_PARTY",
            Self::NotArbiter(_) => "NOT_ALLOWED",
            Self::EvidenceAlreadySubmitted(_) => "INVALID_PROPOSAL",
            Self::SignatureRequired(_) => "SIGNATURE_REQUIRED",
            Self::InsufficientReputation(_) => "INSUFFICIENT_REPUTATION",
        }
    }
}

/// Errors from the persistence layer. Never surfaced on the wire; the
/// reputation writer retries, then logs an operator-visible failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error from the filesystem.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// A (de)serialization failure for persisted state.
    #[error("serialization error: {0}")]
    Serde(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serde(e.to_string())
    }
}

/// Top-level error for frame handlers; every variant carries a wire code.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Market(#[from] MarketError),
    #[error(transparent)]
    Dispute(#[from] DisputeError),
    /// The session exhausted its token bucket.
    #[error("rate limit exceeded")]
    RateLimited,
}

impl ErrorCode for RelayError {
    fn code(&self) -> &'static str {
        match self {
            Self::Auth(e) => e.code(),
            Self::Protocol(e) => e.code(),
            Self::Channel(e) => e.code(),
            Self::Market(e) => e.code(),
            Self::Dispute(e) => e.code(),
            Self::RateLimited => "RATE_LIMITED",
        }
    }
}
