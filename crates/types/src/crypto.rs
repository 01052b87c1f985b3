//! Ed25519 key pairs and signatures for transaction envelopes.

use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A cryptographic key pair for signing submitted transactions.
#[derive(Clone)]
pub struct KeyPair(ed25519_dalek::SigningKey);

impl KeyPair {
    /// Generate a new random keypair.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        KeyPair(ed25519_dalek::SigningKey::generate(rng))
    }

    /// Generate a keypair from a seed (for testing/simulation).
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        KeyPair(ed25519_dalek::SigningKey::from_bytes(seed))
    }

    /// Deterministic keypair for a node index.
    pub fn for_node(node: u64) -> Self {
        let mut seed = [0u8; 32];
        seed[..8].copy_from_slice(&node.to_le_bytes());
        seed[8..16].copy_from_slice(b"replay!!");
        Self::from_seed(&seed)
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        use ed25519_dalek::Signer;
        Signature(self.0.sign(message).to_bytes().to_vec())
    }

    /// Get the public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key().to_bytes())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair({})", self.public_key())
    }
}

/// An Ed25519 public key (32 bytes).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "crate::codec::hex_array")] pub [u8; 32]);

impl PublicKey {
    /// Verify a signature.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        use ed25519_dalek::Verifier;
        let pk = match ed25519_dalek::VerifyingKey::from_bytes(&self.0) {
            Ok(pk) => pk,
            Err(_) => return false,
        };
        let sig_array: [u8; 64] = match signature.0.as_slice().try_into() {
            Ok(arr) => arr,
            Err(_) => return false,
        };
        let sig = ed25519_dalek::Signature::from_bytes(&sig_array);
        pk.verify(message, &sig).is_ok()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}..)", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// A signature over a transaction message.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "crate::codec::hex_bytes")] pub Vec<u8>);

impl Signature {
    /// Copy of this signature with the leading byte flipped.
    ///
    /// Used to produce payloads that are expected to fail verification.
    pub fn corrupted(&self) -> Signature {
        let mut bytes = self.0.clone();
        if let Some(first) = bytes.first_mut() {
            *first = !*first;
        }
        Signature(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = &self.0[..self.0.len().min(4)];
        write!(f, "Signature({}..)", hex::encode(shown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_sign_and_verify() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let keypair = KeyPair::generate(&mut rng);
        let sig = keypair.sign(b"payload");

        assert!(keypair.public_key().verify(b"payload", &sig));
        assert!(!keypair.public_key().verify(b"other", &sig));
    }

    #[test]
    fn test_corrupted_signature_fails() {
        let keypair = KeyPair::for_node(3);
        let sig = keypair.sign(b"payload");
        let bad = sig.corrupted();

        assert_ne!(sig.as_bytes()[0], bad.as_bytes()[0]);
        assert_eq!(sig.as_bytes()[1..], bad.as_bytes()[1..]);
        assert!(!keypair.public_key().verify(b"payload", &bad));
    }

    #[test]
    fn test_truncated_signature_rejected() {
        let keypair = KeyPair::for_node(1);
        let sig = Signature(vec![1, 2, 3]);
        assert!(!keypair.public_key().verify(b"payload", &sig));
    }

    #[test]
    fn test_node_keys_are_distinct() {
        assert_ne!(
            KeyPair::for_node(0).public_key(),
            KeyPair::for_node(1).public_key()
        );
    }
}
