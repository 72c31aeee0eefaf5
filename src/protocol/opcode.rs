//! The vocabulary between a protocol flow and the runner that executes it.

use super::{Protocol, ProtocolError, ProtocolMessage};
use crate::{
    abiencode::types::{Hash, Signature},
    channel::StateChannel,
    commitment::{SetStateCommitment, SignedSetStateCommitment},
};

/// Side effects a flow asks the runner to perform.
#[derive(Debug, Clone)]
pub enum Opcode {
    /// Sign the commitment with the key at `key_index`. Resumed with
    /// [Resume::Signed].
    Sign {
        commitment: SetStateCommitment,
        key_index: u64,
    },
    /// Resumed with [Resume::Done].
    Send(ProtocolMessage),
    /// Resumed with [Resume::Reply] carrying the counterparty's reply.
    SendAndAwait(ProtocolMessage),
    PersistChannel(StateChannel),
    WriteCommitment {
        protocol: Protocol,
        app_identity_hash: Hash,
        commitment: SignedSetStateCommitment,
    },
}

impl Opcode {
    pub fn name(&self) -> &'static str {
        match self {
            Opcode::Sign { .. } => "sign",
            Opcode::Send(_) => "send",
            Opcode::SendAndAwait(_) => "send and await",
            Opcode::PersistChannel(_) => "persist channel",
            Opcode::WriteCommitment { .. } => "write commitment",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Resume {
    Start,
    Signed(Signature),
    Reply(ProtocolMessage),
    Done,
}

impl Resume {
    pub fn name(&self) -> &'static str {
        match self {
            Resume::Start => "start",
            Resume::Signed(_) => "signature",
            Resume::Reply(_) => "reply",
            Resume::Done => "done",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Step {
    Yield(Opcode),
    /// The run finished, this is the channel after it.
    Commit(StateChannel),
}

/// One role of one protocol as an explicit state machine.
///
/// A flow performs no I/O itself: every effect is yielded as an [Opcode] and
/// the result comes back through the next call to `resume`. Once a flow
/// returned an error or committed it must not be resumed again.
pub trait ProtocolFlow: Send {
    fn resume(&mut self, input: Resume) -> Result<Step, ProtocolError>;
}
