//! The AgentChat wire protocol: JSON frames with a `type` discriminant,
//! stateless validation, and the canonical signing-string builders shared by
//! signer and verifier.

#![forbid(unsafe_code)]

/// Frame definitions for both directions.
pub mod frames;
/// Canonical signing-string builders, one per signed operation.
pub mod signing;
/// Stateless validation of names and frames.
pub mod validate;

pub use frames::{ClientFrame, ServerFrame, Verdict};
pub use validate::{parse_client_frame, validate_frame};
