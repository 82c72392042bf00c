//! Signature schemes used by the relay. Ed25519 is the only suite the wire
//! protocol admits.

pub mod eddsa;
