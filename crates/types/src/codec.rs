//! Transaction encoding and decoding.
//!
//! # Wire Format
//!
//! Every submitted transaction is a JSON [`Envelope`]:
//!
//! ```text
//! { "transaction": "<hex of JSON Transaction>",
//!   "public_key": "<hex>" | null,
//!   "signature": "<hex>" | null }
//! ```
//!
//! The signature covers [`transaction_message`] over the inner transaction
//! bytes, so the envelope can be verified without decoding the body first.

use crate::{transaction_message, KeyPair, PublicKey, Signature, Transaction};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during transaction encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Payload is empty")]
    Empty,

    #[error("Envelope decode error: {0}")]
    EnvelopeDecode(#[source] serde_json::Error),

    #[error("Transaction decode error: {0}")]
    TransactionDecode(#[source] serde_json::Error),

    #[error("Encode error: {0}")]
    Encode(#[source] serde_json::Error),
}

impl CodecError {
    /// Stable class name, used to rate-limit decode error logging.
    pub fn class(&self) -> &'static str {
        match self {
            CodecError::Empty => "empty",
            CodecError::EnvelopeDecode(_) => "envelope_decode",
            CodecError::TransactionDecode(_) => "transaction_decode",
            CodecError::Encode(_) => "encode",
        }
    }
}

/// Outcome of checking an envelope's signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureStatus {
    /// No signature was attached.
    Unsigned,
    Valid,
    Invalid,
}

/// Signed transport wrapper around an encoded [`Transaction`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(with = "hex_bytes")]
    pub transaction: Vec<u8>,
    #[serde(default)]
    pub public_key: Option<PublicKey>,
    #[serde(default)]
    pub signature: Option<Signature>,
}

impl Envelope {
    /// Decode the inner transaction.
    pub fn decode_transaction(&self) -> Result<Transaction, CodecError> {
        serde_json::from_slice(&self.transaction).map_err(CodecError::TransactionDecode)
    }

    /// Verify the attached signature against the claimed origin.
    pub fn signature_status(&self, origin: crate::NodeId) -> SignatureStatus {
        match (&self.public_key, &self.signature) {
            (Some(pk), Some(sig)) => {
                let message = transaction_message(origin, &self.transaction);
                if pk.verify(&message, sig) {
                    SignatureStatus::Valid
                } else {
                    SignatureStatus::Invalid
                }
            }
            _ => SignatureStatus::Unsigned,
        }
    }
}

/// Encode a transaction, optionally signing it.
///
/// When `signer` is given and `tx.invalid_sig` is set, the signature is
/// corrupted after signing so replay sees an expected verification failure.
pub fn encode_transaction(tx: &Transaction, signer: Option<&KeyPair>) -> Result<Vec<u8>, CodecError> {
    let transaction = serde_json::to_vec(tx).map_err(CodecError::Encode)?;

    let (public_key, signature) = match signer {
        Some(keypair) => {
            let sig = keypair.sign(&transaction_message(tx.origin, &transaction));
            let sig = if tx.invalid_sig { sig.corrupted() } else { sig };
            (Some(keypair.public_key()), Some(sig))
        }
        None => (None, None),
    };

    let envelope = Envelope {
        transaction,
        public_key,
        signature,
    };
    serde_json::to_vec(&envelope).map_err(CodecError::Encode)
}

/// Decode an envelope from wire bytes.
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::Empty);
    }
    serde_json::from_slice(bytes).map_err(CodecError::EnvelopeDecode)
}

/// Decode wire bytes straight into a transaction, ignoring the signature.
pub fn decode_transaction(bytes: &[u8]) -> Result<Transaction, CodecError> {
    decode_envelope(bytes)?.decode_transaction()
}

/// Serde helper: `Vec<u8>` as a hex string.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

/// Serde helper: `[u8; 32]` as a hex string.
pub mod hex_array {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out).map_err(serde::de::Error::custom)?;
        Ok(out)
    }
}
