use serde_json::Value;
use sha3::{
    digest::{core_api::CoreWrapper, Output},
    Digest, Keccak256, Keccak256Core,
};

use super::{to_writer, types::Hash, AbiType, AbiValue, Error, Writer};

pub struct Keccak256Writer {
    hasher: CoreWrapper<Keccak256Core>,
}

impl Default for Keccak256Writer {
    fn default() -> Self {
        Self {
            hasher: Keccak256::new(),
        }
    }
}

impl Writer for Keccak256Writer {
    fn write(&mut self, slot: &[u8]) {
        self.hasher.update(slot);
    }
}

impl Keccak256Writer {
    pub fn finalize(self) -> Output<Keccak256> {
        self.hasher.finalize()
    }
}

/// `keccak256(abi.encode(value))`
pub fn to_hash(value: &AbiValue) -> Hash {
    let mut writer = Keccak256Writer::default();
    to_writer(value, &mut writer);
    Hash(writer.finalize().into())
}

/// Coerce `json` into `kind` and hash its ABI encoding.
pub fn hash_json(kind: &AbiType, json: &Value) -> Result<Hash, Error> {
    Ok(to_hash(&AbiValue::from_json(kind, json)?))
}

/// `keccak256(a ‖ b ‖ ..)`, i.e. `keccak256(abi.encodePacked(..))` for
/// callers that already hold the packed parts.
pub fn keccak256_packed(parts: &[&[u8]]) -> Hash {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    Hash(hasher.finalize().into())
}

/// First four bytes of the hash of a canonical function signature.
pub fn function_selector(signature: &str) -> [u8; 4] {
    let hash = keccak256_packed(&[signature.as_bytes()]);
    let mut selector = [0u8; 4];
    selector.copy_from_slice(&hash.0[..4]);
    selector
}
