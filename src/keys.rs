//! Extended keys and the per-app signing key scheme.
//!
//! Every participant is identified by an extended public key. The key used to
//! sign commitments for the app with sequence number `n` is the non-hardened
//! child `n` of that key (BIP32 `CKDpub`), so the counterparty can compute the
//! expected signer without any further exchange. Slot 0 belongs to the free
//! balance and the multisig owners.

use core::{fmt, str::FromStr};

use hmac::{Hmac, Mac};
use k256::{
    elliptic_curve::{ff::PrimeField, sec1::ToEncodedPoint},
    FieldBytes, ProjectivePoint, PublicKey, Scalar, SecretKey,
};
use rand::{CryptoRng, RngCore};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::Sha512;

use crate::{
    abiencode::types::{decode_prefixed_hex, Address},
    sig::{SignatureError, Signer},
};

type HmacSha512 = Hmac<Sha512>;

/// Indices at or above this are hardened, which we never use.
pub const HARDENED_OFFSET: u64 = 1 << 31;

const CHAIN_CODE_LEN: usize = 32;
const COMPRESSED_KEY_LEN: usize = 33;
pub const EXTENDED_PUBLIC_KEY_LEN: usize = CHAIN_CODE_LEN + COMPRESSED_KEY_LEN;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("child index {0} is out of the non-hardened range")]
    IndexOutOfRange(u64),
    #[error("child {0} is not a valid key, use the next index")]
    InvalidChild(u64),
    #[error("invalid key material: {0}")]
    InvalidKey(String),
}

impl From<SignatureError> for KeyError {
    fn from(e: SignatureError) -> Self {
        KeyError::InvalidKey(e.to_string())
    }
}

fn check_index(index: u64) -> Result<u32, KeyError> {
    if index >= HARDENED_OFFSET {
        return Err(KeyError::IndexOutOfRange(index));
    }
    Ok(index as u32)
}

/// `I = HMAC-SHA512(chain_code, serP(K) ‖ ser32(i))`, split into the scalar
/// tweak `IL` and the child chain code `IR`.
fn child_tweak(
    chain_code: &[u8; CHAIN_CODE_LEN],
    public: &PublicKey,
    index: u64,
) -> Result<(Scalar, [u8; CHAIN_CODE_LEN]), KeyError> {
    let i = check_index(index)?;
    let mut mac = HmacSha512::new_from_slice(chain_code)
        .map_err(|e| KeyError::InvalidKey(e.to_string()))?;
    mac.update(public.to_encoded_point(true).as_bytes());
    mac.update(&i.to_be_bytes());
    let output = mac.finalize().into_bytes();
    let (il, ir) = output.split_at(32);

    let tweak: Option<Scalar> = Scalar::from_repr(*FieldBytes::from_slice(il)).into();
    let tweak = tweak.ok_or(KeyError::InvalidChild(index))?;
    let mut child_chain_code = [0u8; CHAIN_CODE_LEN];
    child_chain_code.copy_from_slice(ir);
    Ok((tweak, child_chain_code))
}

#[derive(Clone)]
pub struct ExtendedPrivateKey {
    chain_code: [u8; CHAIN_CODE_LEN],
    key: SecretKey,
}

impl fmt::Debug for ExtendedPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtendedPrivateKey")
            .field("public", &self.neuter())
            .finish_non_exhaustive()
    }
}

impl ExtendedPrivateKey {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut chain_code = [0u8; CHAIN_CODE_LEN];
        rng.fill_bytes(&mut chain_code);
        Self {
            chain_code,
            key: SecretKey::random(rng),
        }
    }

    pub fn from_parts(chain_code: [u8; 32], secret: &[u8]) -> Result<Self, KeyError> {
        let key = SecretKey::from_be_bytes(secret).map_err(|e| KeyError::InvalidKey(e.to_string()))?;
        Ok(Self { chain_code, key })
    }

    /// The extended public key, which is what identifies a node.
    pub fn neuter(&self) -> ExtendedPublicKey {
        ExtendedPublicKey::from_public_key(self.chain_code, &self.key.public_key())
    }

    /// Non-hardened child: `k_i = IL + k (mod n)`.
    pub fn derive_child(&self, index: u64) -> Result<Self, KeyError> {
        let (tweak, chain_code) = child_tweak(&self.chain_code, &self.key.public_key(), index)?;
        let child = tweak + *self.key.to_nonzero_scalar();
        let key =
            SecretKey::from_be_bytes(&child.to_repr()).map_err(|_| KeyError::InvalidChild(index))?;
        Ok(Self { chain_code, key })
    }

    /// Signer for the slot `index`.
    pub fn signer_for(&self, index: u64) -> Result<Signer, KeyError> {
        let child = self.derive_child(index)?;
        Ok(Signer::from_secret_key(&child.key)?)
    }
}

/// Chain code and compressed public key. Textual form is `0x` followed by the
/// hex of both (65 bytes).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExtendedPublicKey {
    chain_code: [u8; CHAIN_CODE_LEN],
    key: [u8; COMPRESSED_KEY_LEN],
}

impl ExtendedPublicKey {
    fn from_public_key(chain_code: [u8; CHAIN_CODE_LEN], key: &PublicKey) -> Self {
        let mut compressed = [0u8; COMPRESSED_KEY_LEN];
        compressed.copy_from_slice(key.to_encoded_point(true).as_bytes());
        Self {
            chain_code,
            key: compressed,
        }
    }

    fn public_key(&self) -> Result<PublicKey, KeyError> {
        PublicKey::from_sec1_bytes(&self.key).map_err(|e| KeyError::InvalidKey(e.to_string()))
    }

    pub fn to_bytes(&self) -> [u8; EXTENDED_PUBLIC_KEY_LEN] {
        let mut bytes = [0u8; EXTENDED_PUBLIC_KEY_LEN];
        bytes[..CHAIN_CODE_LEN].copy_from_slice(&self.chain_code);
        bytes[CHAIN_CODE_LEN..].copy_from_slice(&self.key);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != EXTENDED_PUBLIC_KEY_LEN {
            return Err(KeyError::InvalidKey(format!(
                "expected {} bytes, got {}",
                EXTENDED_PUBLIC_KEY_LEN,
                bytes.len()
            )));
        }
        let mut chain_code = [0u8; CHAIN_CODE_LEN];
        chain_code.copy_from_slice(&bytes[..CHAIN_CODE_LEN]);
        let mut key = [0u8; COMPRESSED_KEY_LEN];
        key.copy_from_slice(&bytes[CHAIN_CODE_LEN..]);
        let xpub = Self { chain_code, key };
        // Reject points that are not on the curve right away.
        xpub.public_key()?;
        Ok(xpub)
    }

    /// Non-hardened child: `K_i = IL·G + K`.
    pub fn derive_child(&self, index: u64) -> Result<Self, KeyError> {
        let parent = self.public_key()?;
        let (tweak, chain_code) = child_tweak(&self.chain_code, &parent, index)?;
        let point = ProjectivePoint::GENERATOR * tweak + parent.to_projective();
        let child =
            PublicKey::from_affine(point.to_affine()).map_err(|_| KeyError::InvalidChild(index))?;
        Ok(Self::from_public_key(chain_code, &child))
    }

    /// Ethereum address of the key itself (not of a child).
    pub fn address(&self) -> Result<Address, KeyError> {
        Ok(Address::from(&self.public_key()?))
    }
}

impl fmt::Display for ExtendedPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.to_bytes()))
    }
}

impl fmt::Debug for ExtendedPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for ExtendedPublicKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = decode_prefixed_hex(s).map_err(|e| KeyError::InvalidKey(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

impl Serialize for ExtendedPublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ExtendedPublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Address of the `k`-th child of `xpub`.
pub fn xkey_kth_address(xpub: &ExtendedPublicKey, k: u64) -> Result<Address, KeyError> {
    xpub.derive_child(k)?.address()
}

/// The `k`-th addresses of all keys, sorted ascending. This is the
/// participant list of the app with sequence number `k`.
pub fn xkeys_to_sorted_kth_addresses(
    xpubs: &[ExtendedPublicKey],
    k: u64,
) -> Result<Vec<Address>, KeyError> {
    let mut addresses = xpubs
        .iter()
        .map(|xpub| xkey_kth_address(xpub, k))
        .collect::<Result<Vec<_>, _>>()?;
    addresses.sort();
    Ok(addresses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn private_and_public_derivation_agree() {
        let mut rng = StdRng::seed_from_u64(0);
        let xprv = ExtendedPrivateKey::random(&mut rng);
        let xpub = xprv.neuter();
        for k in [0, 1, 2, 17, HARDENED_OFFSET - 1] {
            let from_private = xprv.derive_child(k).unwrap().neuter();
            let from_public = xpub.derive_child(k).unwrap();
            assert_eq!(from_private, from_public, "child {}", k);
            assert_eq!(
                xprv.signer_for(k).unwrap().address(),
                xkey_kth_address(&xpub, k).unwrap()
            );
        }
    }

    #[test]
    fn slots_have_distinct_addresses() {
        let mut rng = StdRng::seed_from_u64(1);
        let xpub = ExtendedPrivateKey::random(&mut rng).neuter();
        let a0 = xkey_kth_address(&xpub, 0).unwrap();
        let a1 = xkey_kth_address(&xpub, 1).unwrap();
        assert_ne!(a0, a1);
        assert_ne!(a0, xpub.address().unwrap());
        // Pure: derived again, same result.
        assert_eq!(a1, xkey_kth_address(&xpub, 1).unwrap());
    }

    #[test]
    fn hardened_indices_are_rejected() {
        let mut rng = StdRng::seed_from_u64(2);
        let xpub = ExtendedPrivateKey::random(&mut rng).neuter();
        assert_eq!(
            xpub.derive_child(HARDENED_OFFSET),
            Err(KeyError::IndexOutOfRange(HARDENED_OFFSET))
        );
    }

    #[test]
    fn sorted_addresses_do_not_depend_on_input_order() {
        let mut rng = StdRng::seed_from_u64(3);
        let a = ExtendedPrivateKey::random(&mut rng).neuter();
        let b = ExtendedPrivateKey::random(&mut rng).neuter();
        let ab = xkeys_to_sorted_kth_addresses(&[a, b], 5).unwrap();
        let ba = xkeys_to_sorted_kth_addresses(&[b, a], 5).unwrap();
        assert_eq!(ab, ba);
        assert!(ab[0] < ab[1]);
    }

    #[test]
    fn text_form_roundtrip() {
        let mut rng = StdRng::seed_from_u64(4);
        let xpub = ExtendedPrivateKey::random(&mut rng).neuter();
        let text = xpub.to_string();
        assert_eq!(text.len(), 2 + 2 * EXTENDED_PUBLIC_KEY_LEN);
        assert_eq!(text.parse::<ExtendedPublicKey>().unwrap(), xpub);
        let json = serde_json::to_string(&xpub).unwrap();
        assert_eq!(serde_json::from_str::<ExtendedPublicKey>(&json).unwrap(), xpub);

        let mut garbage = xpub.to_bytes();
        garbage[CHAIN_CODE_LEN] = 0x07;
        assert!(ExtendedPublicKey::from_bytes(&garbage).is_err());
    }
}
