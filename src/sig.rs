//! Handles the creation and verification of (Ethereum) Signatures.

use crate::abiencode::types::Hash;
use sha3::{Digest, Keccak256};

mod k256;
pub use self::k256::{recover_signer, Signer};


#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("ecdsa: {0}")]
    Ecdsa(#[from] ::k256::ecdsa::Error),
    #[error("invalid recovery id {0}, expected 27 or 28")]
    InvalidRecoveryId(u8),
}

/// Add the `\x19Ethereum Signed Message\n<length>` prefix to hash.
///
/// This is the format expected by the Solidity contracts.
fn hash_to_eth_signed_msg_hash(hash: Hash) -> Hash {
    // Packed encoding => We can't use the encoder
    let mut hasher = Keccak256::new();
    hasher.update(b"\x19Ethereum Signed Message:\n32");
    hasher.update(hash.0);
    Hash(hasher.finalize().into())
}
