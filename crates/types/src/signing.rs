//! Domain-separated signing messages.
//!
//! Each signable message type has a unique domain tag prefix so a signature
//! produced in one context cannot be replayed in another:
//!
//! | Tag | Purpose |
//! |-----|---------|
//! | `replay_tx:` | Submitted transaction envelopes |
//! | `STATE_DIGEST` | Published state snapshot digests |

use crate::{Hash, NodeId};

/// Domain tag for submitted transactions.
///
/// Format: `replay_tx:` || origin || transaction_bytes
pub const DOMAIN_TRANSACTION: &[u8] = b"replay_tx:";

/// Domain tag for state snapshot digests.
///
/// Format: `STATE_DIGEST` || node || version || entities_root
pub const DOMAIN_STATE_DIGEST: &[u8] = b"STATE_DIGEST";

/// Build the signing message for a submitted transaction.
pub fn transaction_message(origin: NodeId, transaction_bytes: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(DOMAIN_TRANSACTION.len() + 8 + transaction_bytes.len());
    message.extend_from_slice(DOMAIN_TRANSACTION);
    message.extend_from_slice(&origin.0.to_le_bytes());
    message.extend_from_slice(transaction_bytes);
    message
}

/// Build the digest message for a published state snapshot.
pub fn state_digest_message(node: NodeId, version: u64, entities_root: &Hash) -> Vec<u8> {
    let mut message = Vec::with_capacity(DOMAIN_STATE_DIGEST.len() + 48);
    message.extend_from_slice(DOMAIN_STATE_DIGEST);
    message.extend_from_slice(&node.0.to_le_bytes());
    message.extend_from_slice(&version.to_le_bytes());
    message.extend_from_slice(entities_root.as_bytes());
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_message_deterministic() {
        let msg1 = transaction_message(NodeId(1), b"body");
        let msg2 = transaction_message(NodeId(1), b"body");

        assert_eq!(msg1, msg2);
        assert!(msg1.starts_with(DOMAIN_TRANSACTION));
    }

    #[test]
    fn test_origin_is_bound_into_message() {
        assert_ne!(
            transaction_message(NodeId(1), b"body"),
            transaction_message(NodeId(2), b"body")
        );
    }

    #[test]
    fn test_different_domains_produce_different_messages() {
        let root = Hash::from_bytes(b"root");
        let digest = state_digest_message(NodeId(0), 0, &root);
        let tx = transaction_message(NodeId(0), root.as_bytes());
        assert_ne!(digest, tx);
    }
}
