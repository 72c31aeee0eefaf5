//! Off-chain protocol engine for two-party state channels.
//!
//! Two parties share a multisignature account and jointly propose, install,
//! update and uninstall applications inside it. Every transition is backed by
//! a commitment both parties sign. The [protocol] module contains the
//! per-protocol state machines, [node] wires them up with a store, a
//! transport and a chain provider behind a method router.

mod abiencode {
    mod abi_type;
    mod error;
    mod hashing;
    mod ser;
    mod value;

    pub mod types;

    pub use abi_type::{AbiType, Param};
    pub use error::{Error, Result};
    pub use hashing::{function_selector, hash_json, keccak256_packed, to_hash};
    pub use ser::{to_fnargs_writer, to_writer, Writer, SLOT_SIZE};
    pub use value::AbiValue;

    #[cfg(test)]
    mod tests;
}

pub mod app;
pub mod chain;
pub mod channel;
pub mod commitment;
pub mod error;
pub mod keys;
pub mod network;
pub mod node;
pub mod protocol;
pub mod sig;
pub mod store;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use abiencode::{
    function_selector, hash_json, keccak256_packed,
    types::{hex_bytes, Address, Hash, ParseError, Signature, U256},
    AbiType, AbiValue, Error as AbiError,
};
pub use error::Error;
