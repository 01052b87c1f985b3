//! Core types for the replaygate harness.
//!
//! Identifiers, control actions, transaction payloads, the wire codec,
//! signatures and the roster oracle. Everything here is plain data; the
//! behaviour lives in the crates that depend on it.

pub mod codec;
mod control;
mod crypto;
mod hash;
mod identifiers;
mod payload;
mod roster;
mod signing;

pub use codec::{
    decode_envelope, decode_transaction, encode_transaction, CodecError, Envelope,
    SignatureStatus,
};
pub use control::{ControlAction, ControlType};
pub use crypto::{KeyPair, PublicKey, Signature};
pub use hash::{Hash, HexError};
pub use identifiers::{
    ConsensusTimestamp, EntityKey, EntityKeyParseError, NodeId, RoundNumber, VotePower,
};
pub use payload::{
    ActivityKind, EntityKind, LifecycleOp, PayloadCategory, PayloadType, SimpleAction,
    Transaction, TransactionBody, TreeOp,
};
pub use roster::{Roster, RosterEntry, RosterError, StaticRoster};
pub use signing::{state_digest_message, transaction_message, DOMAIN_STATE_DIGEST, DOMAIN_TRANSACTION};
