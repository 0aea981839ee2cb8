use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use xln_core::types::{Ed25519PublicKey, Ed25519Signature};

/// An XLN signing identity: Ed25519 keypair bound to one signer replica.
///
/// The secret seed is held in the dalek `SigningKey`, which zeroizes its
/// material on drop.
pub struct KeyPair {
    signing: SigningKey,
    pub public_key: Ed25519PublicKey,
}

impl KeyPair {
    /// Generate a fresh random keypair (non-consensus paths only; consensus
    /// randomness always flows from the runtime's seeded PRNG).
    pub fn generate() -> Self {
        let signing = SigningKey::generate(&mut OsRng);
        Self::from_signing(signing)
    }

    /// Deterministic keypair from a 32-byte seed. Tests and fixtures use
    /// this so signatures are reproducible.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::from_signing(SigningKey::from_bytes(&seed))
    }

    fn from_signing(signing: SigningKey) -> Self {
        let public_key = Ed25519PublicKey(signing.verifying_key().to_bytes().to_vec());
        Self { signing, public_key }
    }

    /// Sign `message` (callers pass a canonical hash, never raw structures).
    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        Ed25519Signature(self.signing.sign(message).to_bytes().to_vec())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair {{ public_key: {:?} }}", self.public_key)
    }
}

/// Verify `sig` over `message` against `public_key`.
pub fn verify(public_key: &Ed25519PublicKey, message: &[u8], sig: &Ed25519Signature) -> bool {
    let Ok(key_bytes) = <[u8; 32]>::try_from(public_key.0.as_slice()) else {
        return false;
    };
    let Ok(vk) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let Ok(signature) = ed25519_dalek::Signature::from_slice(&sig.0) else {
        return false;
    };
    vk.verify(message, &signature).is_ok()
}
