//! Signer using the k256 Rust crate (implementation of ecdsa in Rust).

use crate::abiencode::types::{Address, Hash, Signature};
use k256::{
    ecdsa::{
        recoverable,
        signature::{hazmat::PrehashSigner, Signature as k256Signature},
        SigningKey, VerifyingKey,
    },
    elliptic_curve::sec1::ToEncodedPoint,
    EncodedPoint, PublicKey, SecretKey,
};
use sha3::{Digest, Keccak256};

use super::{hash_to_eth_signed_msg_hash, SignatureError};

pub struct Signer {
    key: SigningKey,
    addr: Address,
}

impl core::fmt::Debug for Signer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Signer").field("addr", &self.addr).finish()
    }
}

fn address_from_point(point: EncodedPoint) -> Address {
    // Throw away the first byte (0x04), which marks the uncompressed encoding
    // and is not part of the public key.
    let hash: [u8; 32] = Keccak256::digest(&point.as_bytes()[1..]).into();

    let mut addr = Address([0; 20]);
    addr.0.copy_from_slice(&hash[32 - 20..]);
    addr
}

impl From<VerifyingKey> for Address {
    fn from(key: VerifyingKey) -> Self {
        address_from_point(key.to_encoded_point(false))
    }
}

impl From<&PublicKey> for Address {
    fn from(key: &PublicKey) -> Self {
        address_from_point(key.to_encoded_point(false))
    }
}

impl Signer {
    pub fn random<R: rand::RngCore + rand::CryptoRng>(rng: &mut R) -> Self {
        let key = SigningKey::random(rng);
        let addr = key.verifying_key().into();
        Self { key, addr }
    }

    pub fn from_secret_key(secret: &SecretKey) -> Result<Self, SignatureError> {
        let key = SigningKey::from_bytes(&secret.to_be_bytes())?;
        let addr = key.verifying_key().into();
        Ok(Self { key, addr })
    }

    pub fn address(&self) -> Address {
        self.addr
    }

    pub fn sign_eth(&self, msg: Hash) -> Result<Signature, SignatureError> {
        // "\x19Ethereum Signed Message:\n32" format
        let hash = hash_to_eth_signed_msg_hash(msg);

        let sig: recoverable::Signature = self.key.sign_prehash(&hash.0)?;

        // This Signature type already has the layout we need (r, s, v), but
        // the EVM expects v to be offset by 27.
        let mut sig_bytes = [0u8; 65];
        sig_bytes.copy_from_slice(sig.as_bytes());
        sig_bytes[64] += 27;

        Ok(Signature(sig_bytes))
    }
}

/// Recover the address that produced `eth_sig` over `msg` (before the
/// Ethereum prefix is applied).
pub fn recover_signer(msg: Hash, eth_sig: &Signature) -> Result<Address, SignatureError> {
    let hash = hash_to_eth_signed_msg_hash(msg);

    // Undo adding the 27, to go back to the format expected below
    let mut sig_bytes: [u8; 65] = eth_sig.0;
    sig_bytes[64] = sig_bytes[64]
        .checked_sub(27)
        .filter(|v| *v <= 1)
        .ok_or(SignatureError::InvalidRecoveryId(eth_sig.0[64]))?;

    let sig = recoverable::Signature::from_bytes(&sig_bytes)?;
    let verifying_key = sig.recover_verifying_key_from_digest_bytes(&hash.0.into())?;
    Ok(verifying_key.into())
}
