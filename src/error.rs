//! Crate-wide error, for callers that do not care which layer failed.

use crate::{
    abiencode,
    app::AppError,
    chain::{ChainError, DeployError, RetryError},
    channel::ChannelError,
    commitment::CommitmentError,
    keys::KeyError,
    node::{ConfigError, NodeError},
    protocol::ProtocolError,
    sig::SignatureError,
    store::StoreError,
    transport::TransportError,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Abi(#[from] abiencode::Error),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    Commitment(#[from] CommitmentError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    App(#[from] AppError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Retry(#[from] RetryError),
    #[error(transparent)]
    Deploy(#[from] DeployError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Node(#[from] NodeError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
