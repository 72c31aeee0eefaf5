//! The four channel protocols and the runner that drives them.
//!
//! Every protocol is written as a pair of [ProtocolFlow] state machines, one
//! per role, that only compute. The [ProtocolRunner] feeds them and performs
//! the signing, messaging and persistence they ask for. Nothing is persisted
//! by a flow before the counterparty's signature checked out.

mod context;
mod exchange;
mod install;
mod message;
mod opcode;
mod propose;
mod runner;
mod take_action;
mod uninstall;

use crate::{
    abiencode::{self, types::Address},
    app::AppError,
    chain::ChainError,
    channel::ChannelError,
    commitment::CommitmentError,
    keys::KeyError,
    sig::SignatureError,
    store::StoreError,
    transport::TransportError,
};

pub use context::{ChannelMap, Context};
pub use message::{
    CustomData, InstallParams, CHANNEL_BUSY, ProposeInstallParams, Protocol, ProtocolMessage, ProtocolParams,
    TakeActionParams, UninstallParams, UNASSIGNED_SEQ_NO,
};
pub use opcode::{Opcode, ProtocolFlow, Resume, Step};
pub use runner::ProtocolRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// The flow for one role of `protocol`, computed from `ctx`.
pub fn flow_for(
    protocol: Protocol,
    role: Role,
    ctx: &Context,
) -> Result<Box<dyn ProtocolFlow>, ProtocolError> {
    match (protocol, role) {
        (Protocol::Propose, Role::Initiator) => propose::initiator(ctx),
        (Protocol::Propose, Role::Responder) => propose::responder(ctx),
        (Protocol::Install, Role::Initiator) => install::initiator(ctx),
        (Protocol::Install, Role::Responder) => install::responder(ctx),
        (Protocol::TakeAction, Role::Initiator) => take_action::initiator(ctx),
        (Protocol::TakeAction, Role::Responder) => take_action::responder(ctx),
        (Protocol::Uninstall, Role::Initiator) => uninstall::initiator(ctx),
        (Protocol::Uninstall, Role::Responder) => uninstall::responder(ctx),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("no channel with multisig {0}")]
    NoSuchChannel(Address),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("signature verification failed: {0}")]
    Signature(#[from] CommitmentError),
    #[error("stale version: expected {expected}, got {received}")]
    StaleVersion { expected: u64, received: u64 },
    #[error(transparent)]
    App(#[from] AppError),
    #[error("{protocol} reply does not belong to process {process_id}")]
    UnexpectedReply {
        protocol: Protocol,
        process_id: String,
    },
    #[error("cannot resume {stage} with {input}")]
    UnexpectedResume {
        stage: &'static str,
        input: &'static str,
    },
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Encoding(#[from] abiencode::Error),
    #[error("signing failed: {0}")]
    Signing(#[from] SignatureError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("counterparty is busy with another run on the channel")]
    Busy,
    #[error("counterparty refused the run: {0}")]
    Refused(String),
    #[error("outcome depends on the chain but no provider is configured")]
    NoChainProvider,
    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Coarse classification of a [ProtocolError].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Inputs that could never succeed.
    MalformedInput,
    /// A counterparty signature or reply did not check out, or the
    /// counterparty refused the run.
    VerificationFailed,
    /// The input refers to a state this party is not in (anymore).
    StaleState,
    Io,
    /// Another run held the channel. Retrying later may succeed.
    Conflict,
    /// A broken invariant of this node.
    Internal,
}

impl ProtocolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::MalformedInput(_)
            | ProtocolError::App(_)
            | ProtocolError::Key(_)
            | ProtocolError::Encoding(_) => ErrorKind::MalformedInput,
            ProtocolError::Channel(e) => match e {
                ChannelError::NoSuchApp(_)
                | ChannelError::NoSuchProposal(_)
                | ChannelError::SequenceMismatch { .. }
                | ChannelError::FreeBalanceMissing(_) => ErrorKind::StaleState,
                ChannelError::IdentityMismatch { .. } => ErrorKind::VerificationFailed,
                _ => ErrorKind::MalformedInput,
            },
            ProtocolError::NoSuchChannel(_) | ProtocolError::StaleVersion { .. } => {
                ErrorKind::StaleState
            }
            ProtocolError::Signature(_)
            | ProtocolError::UnexpectedReply { .. }
            | ProtocolError::Refused(_) => ErrorKind::VerificationFailed,
            ProtocolError::UnexpectedResume { .. } | ProtocolError::Signing(_) => {
                ErrorKind::Internal
            }
            ProtocolError::Store(_)
            | ProtocolError::Transport(_)
            | ProtocolError::NoChainProvider
            | ProtocolError::Chain(_) => ErrorKind::Io,
            ProtocolError::Busy => ErrorKind::Conflict,
        }
    }
}
