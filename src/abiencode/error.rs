//! Errors produced while parsing ABI type strings or coercing JSON into ABI
//! values.

/// Everything that can go wrong before a value reaches the encoder. Encoding
/// an [AbiValue][super::AbiValue] itself cannot fail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The type string is not a Solidity type we know how to encode, e.g.
    /// `mapping(..)` or `fixed128x18`.
    #[error("not an encodable type: {0}")]
    InvalidType(String),
    #[error("expected {expected}, found JSON {found}")]
    TypeMismatch {
        expected: String,
        found: &'static str,
    },
    #[error("missing tuple component: {0}")]
    MissingField(String),
    #[error("expected {expected} elements, found {found}")]
    LengthMismatch { expected: usize, found: usize },
    #[error("value does not fit into {0}")]
    ValueOutOfRange(String),
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

/// Alias for `Result` using the [Error] returned by the coercion layer.
pub type Result<T> = core::result::Result<T, Error>;
