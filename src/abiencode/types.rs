//! Solidity value types shared by the encoder, the signer and the channel
//! model.
//!
//! All of them serialize to `0x`-prefixed hex strings (numbers included), which
//! is what ends up in the store and on the wire. The ABI representation is
//! produced separately by [AbiValue][super::AbiValue].

use core::{
    fmt::{self, Debug, Display},
    str::FromStr,
};

use rand::{distributions::Standard, prelude::Distribution};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use uint::construct_uint;

/// Error returned when parsing one of the hex/number types from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("missing 0x prefix")]
    MissingPrefix,
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    #[error("expected {expected} bytes, got {found}")]
    ByteLengthMismatch { expected: usize, found: usize },
    #[error("invalid number: {0}")]
    InvalidNumber(String),
}

pub(crate) fn decode_prefixed_hex(s: &str) -> Result<Vec<u8>, ParseError> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .ok_or(ParseError::MissingPrefix)?;
    hex::decode(digits).map_err(|e| ParseError::InvalidHex(e.to_string()))
}

macro_rules! impl_hex_fmt {
    ($T:ident) => {
        impl Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                Display::fmt(self, f)
            }
        }

        impl Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("0x")?;
                for b in self.0 {
                    f.write_fmt(format_args!("{:02x}", b))?;
                }
                Ok(())
            }
        }
    };
}

macro_rules! bytesN {
    ( $T:ident, $N:literal ) => {
        #[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Copy, Clone)]
        pub struct $T(pub [u8; $N]);

        impl $T {
            pub const LEN: usize = $N;

            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }
        }

        impl Default for $T {
            fn default() -> Self {
                Self([0; $N])
            }
        }

        impl FromStr for $T {
            type Err = ParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let bytes = decode_prefixed_hex(s)?;
                let found = bytes.len();
                let array: [u8; $N] = bytes.try_into().map_err(|_| ParseError::ByteLengthMismatch {
                    expected: $N,
                    found,
                })?;
                Ok(Self(array))
            }
        }

        impl Serialize for $T {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $T {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(de::Error::custom)
            }
        }

        impl Distribution<$T> for Standard {
            fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> $T {
                $T(rng.gen())
            }
        }

        impl_hex_fmt!($T);
    };
}

bytesN!(Address, 20);
bytesN!(Hash, 32);
bytesN!(Signature, 65);

impl Signature {
    pub fn new(rs: &[u8; 64], v: u8) -> Self {
        let mut sig: Signature = Signature([0; 65]);
        sig.0[..64].copy_from_slice(rs);
        sig.0[64] = v;
        sig
    }
}

impl Address {
    /// Right-aligned 32 byte representation, as used by the ABI and by
    /// `abi.encodePacked` for `uint256(address)`.
    pub fn to_word(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[32 - 20..].copy_from_slice(&self.0);
        word
    }
}

// We could use primitive_types::U256 here, but its serde representation is not
// the one the wire format expects (it never accepts decimal strings), so we
// construct our own and implement serde by hand.
construct_uint! {
    pub struct U256(4);
}

impl U256 {
    /// Parse either a `0x`-prefixed hex string or a decimal string.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let s = s.trim();
        match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some("") => Err(ParseError::InvalidNumber(s.to_string())),
            Some(digits) => U256::from_str_radix(digits, 16)
                .map_err(|_| ParseError::InvalidNumber(s.to_string())),
            None => U256::from_dec_str(s).map_err(|_| ParseError::InvalidNumber(s.to_string())),
        }
    }

    pub fn to_word(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        self.to_big_endian(&mut bytes);
        bytes
    }
}

impl Serialize for U256 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&format_args!("{:#x}", self))
    }
}

struct U256Visitor;

impl<'de> de::Visitor<'de> for U256Visitor {
    type Value = U256;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a hex string, a decimal string or an unsigned integer")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<U256, E> {
        Ok(U256::from(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<U256, E> {
        u64::try_from(v)
            .map(U256::from)
            .map_err(|_| E::custom("negative value for an unsigned number"))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<U256, E> {
        U256::parse(v).map_err(E::custom)
    }

    // ethers.js serializes BigNumbers as `{ "_hex": "0x.." }`.
    fn visit_map<A: de::MapAccess<'de>>(self, mut map: A) -> Result<U256, A::Error> {
        let mut value = None;
        while let Some(key) = map.next_key::<String>()? {
            if key == "_hex" || key == "hex" {
                let s: String = map.next_value()?;
                value = Some(U256::parse(&s).map_err(de::Error::custom)?);
            } else {
                map.next_value::<de::IgnoredAny>()?;
            }
        }
        value.ok_or_else(|| de::Error::missing_field("_hex"))
    }
}

impl<'de> Deserialize<'de> for U256 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(U256Visitor)
    }
}

impl Distribution<U256> for Standard {
    fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> U256 {
        let buf: [u8; 32] = rng.gen();
        U256::from_big_endian(&buf)
    }
}

/// `#[serde(with = "hex_bytes")]` for `Vec<u8>` fields (calldata, bytecode).
pub mod hex_bytes {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(v: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&format_args!("0x{}", hex::encode(v)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::decode_prefixed_hex(&s).map_err(de::Error::custom)
    }
}
