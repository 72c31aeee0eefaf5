//! The signature exchange shared by propose, take-action and uninstall.
//!
//! Initiator: sign, send and wait, verify the reply, write the double-signed
//! commitment, persist, commit. Responder: verify, sign, write the
//! commitment, persist, reply, commit.

use core::mem;

use serde_json::{json, Value};
use tracing::warn;

use super::{
    CustomData, Opcode, Protocol, ProtocolError, ProtocolFlow, ProtocolMessage, Resume, Step,
    UNASSIGNED_SEQ_NO,
};
use crate::{
    abiencode::types::{Address, Hash, Signature},
    channel::StateChannel,
    commitment::{assert_is_valid_signature, SetStateCommitment},
    keys::{xkey_kth_address, ExtendedPublicKey},
};

/// What both roles agree on before any signature is made.
#[derive(Debug, Clone)]
pub(super) struct ExchangePlan {
    pub protocol: Protocol,
    pub process_id: String,
    pub initiator: ExtendedPublicKey,
    pub responder: ExtendedPublicKey,
    /// Parameters the initiator sends.
    pub params: Value,
    pub post_channel: StateChannel,
    pub commitment: SetStateCommitment,
    /// Both parties sign with their key at this index.
    pub key_index: u64,
    /// App the commitment is filed under.
    pub commitment_app: Hash,
}

impl ExchangePlan {
    fn signer_of(&self, xpub: &ExtendedPublicKey) -> Result<Address, ProtocolError> {
        Ok(xkey_kth_address(xpub, self.key_index)?)
    }
}

enum InitiatorStage {
    Start,
    Signing,
    AwaitingReply { own: Signature },
    Writing,
    Persisting,
    Finished,
}

impl InitiatorStage {
    fn name(&self) -> &'static str {
        match self {
            InitiatorStage::Start => "start",
            InitiatorStage::Signing => "signing",
            InitiatorStage::AwaitingReply { .. } => "awaiting reply",
            InitiatorStage::Writing => "writing commitment",
            InitiatorStage::Persisting => "persisting",
            InitiatorStage::Finished => "finished",
        }
    }
}

pub(super) struct InitiatorExchange {
    plan: ExchangePlan,
    counterparty: Address,
    stage: InitiatorStage,
}

impl InitiatorExchange {
    pub fn new(plan: ExchangePlan) -> Result<Self, ProtocolError> {
        let counterparty = plan.signer_of(&plan.responder)?;
        Ok(Self {
            plan,
            counterparty,
            stage: InitiatorStage::Start,
        })
    }

    fn check_reply(&self, reply: &ProtocolMessage) -> Result<Signature, ProtocolError> {
        if reply.protocol != self.plan.protocol
            || reply.process_id != self.plan.process_id
            || reply.from_xpub != self.plan.responder
        {
            return Err(ProtocolError::UnexpectedReply {
                protocol: reply.protocol,
                process_id: self.plan.process_id.clone(),
            });
        }
        let signature = reply.custom_data.signature;
        assert_is_valid_signature(self.counterparty, &self.plan.commitment, signature.as_ref())
            .map_err(|e| {
                warn!(process_id = %self.plan.process_id, "rejecting reply: {}", e);
                e
            })?;
        // Checked above.
        signature.ok_or(ProtocolError::MalformedInput("missing signature".into()))
    }
}

impl ProtocolFlow for InitiatorExchange {
    fn resume(&mut self, input: Resume) -> Result<Step, ProtocolError> {
        let stage = mem::replace(&mut self.stage, InitiatorStage::Finished);
        let plan = &self.plan;
        match (stage, input) {
            (InitiatorStage::Start, Resume::Start) => {
                self.stage = InitiatorStage::Signing;
                Ok(Step::Yield(Opcode::Sign {
                    commitment: plan.commitment.clone(),
                    key_index: plan.key_index,
                }))
            }
            (InitiatorStage::Signing, Resume::Signed(own)) => {
                let message = ProtocolMessage {
                    protocol: plan.protocol,
                    process_id: plan.process_id.clone(),
                    seq: 1,
                    to_xpub: plan.responder,
                    from_xpub: plan.initiator,
                    params: plan.params.clone(),
                    custom_data: CustomData::with_signature(own),
                };
                self.stage = InitiatorStage::AwaitingReply { own };
                Ok(Step::Yield(Opcode::SendAndAwait(message)))
            }
            (InitiatorStage::AwaitingReply { own }, Resume::Reply(reply)) => {
                let theirs = self.check_reply(&reply)?;
                let signed = self.plan.commitment.signed_transaction(&[own, theirs])?;
                self.stage = InitiatorStage::Writing;
                Ok(Step::Yield(Opcode::WriteCommitment {
                    protocol: self.plan.protocol,
                    app_identity_hash: self.plan.commitment_app,
                    commitment: signed,
                }))
            }
            (InitiatorStage::Writing, Resume::Done) => {
                self.stage = InitiatorStage::Persisting;
                Ok(Step::Yield(Opcode::PersistChannel(plan.post_channel.clone())))
            }
            (InitiatorStage::Persisting, Resume::Done) => {
                Ok(Step::Commit(plan.post_channel.clone()))
            }
            (stage, input) => Err(ProtocolError::UnexpectedResume {
                stage: stage.name(),
                input: input.name(),
            }),
        }
    }
}

enum ResponderStage {
    Start,
    Signing,
    Writing { own: Signature },
    Persisting { own: Signature },
    Replying,
    Finished,
}

impl ResponderStage {
    fn name(&self) -> &'static str {
        match self {
            ResponderStage::Start => "start",
            ResponderStage::Signing => "signing",
            ResponderStage::Writing { .. } => "writing commitment",
            ResponderStage::Persisting { .. } => "persisting",
            ResponderStage::Replying => "replying",
            ResponderStage::Finished => "finished",
        }
    }
}

pub(super) struct ResponderExchange {
    plan: ExchangePlan,
    initiator_signature: Option<Signature>,
    stage: ResponderStage,
}

impl ResponderExchange {
    pub fn new(plan: ExchangePlan, initiator_signature: Option<Signature>) -> Self {
        Self {
            plan,
            initiator_signature,
            stage: ResponderStage::Start,
        }
    }
}

impl ProtocolFlow for ResponderExchange {
    fn resume(&mut self, input: Resume) -> Result<Step, ProtocolError> {
        let stage = mem::replace(&mut self.stage, ResponderStage::Finished);
        let plan = &self.plan;
        match (stage, input) {
            (ResponderStage::Start, Resume::Start) => {
                let initiator = plan.signer_of(&plan.initiator)?;
                assert_is_valid_signature(
                    initiator,
                    &plan.commitment,
                    self.initiator_signature.as_ref(),
                )?;
                self.stage = ResponderStage::Signing;
                Ok(Step::Yield(Opcode::Sign {
                    commitment: plan.commitment.clone(),
                    key_index: plan.key_index,
                }))
            }
            (ResponderStage::Signing, Resume::Signed(own)) => {
                let theirs = self
                    .initiator_signature
                    .ok_or(ProtocolError::MalformedInput("missing signature".into()))?;
                let signed = plan.commitment.signed_transaction(&[theirs, own])?;
                self.stage = ResponderStage::Writing { own };
                Ok(Step::Yield(Opcode::WriteCommitment {
                    protocol: plan.protocol,
                    app_identity_hash: plan.commitment_app,
                    commitment: signed,
                }))
            }
            (ResponderStage::Writing { own }, Resume::Done) => {
                self.stage = ResponderStage::Persisting { own };
                Ok(Step::Yield(Opcode::PersistChannel(plan.post_channel.clone())))
            }
            (ResponderStage::Persisting { own }, Resume::Done) => {
                let reply = ProtocolMessage {
                    protocol: plan.protocol,
                    process_id: plan.process_id.clone(),
                    seq: UNASSIGNED_SEQ_NO,
                    to_xpub: plan.initiator,
                    from_xpub: plan.responder,
                    params: json!({}),
                    custom_data: CustomData::with_signature(own),
                };
                self.stage = ResponderStage::Replying;
                Ok(Step::Yield(Opcode::Send(reply)))
            }
            (ResponderStage::Replying, Resume::Done) => Ok(Step::Commit(plan.post_channel.clone())),
            (stage, input) => Err(ProtocolError::UnexpectedResume {
                stage: stage.name(),
                input: input.name(),
            }),
        }
    }
}
