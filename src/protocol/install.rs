//! Install: move an agreed proposal into the installed set, funded from the
//! free balance. The initial state was signed during propose, so no
//! signatures travel here.

use core::mem;

use super::{
    Context, CustomData, InstallParams, Opcode, ProtocolError, ProtocolFlow, ProtocolMessage,
    Resume, Step,
};
use crate::channel::StateChannel;

fn post_channel(ctx: &Context) -> Result<(InstallParams, StateChannel), ProtocolError> {
    let params: InstallParams = ctx.message.params_as()?;
    let channel = ctx.channel(&params.multisig_address)?;
    let proposal = channel.get_proposal(&params.app_identity_hash)?;
    // Balance refunds are installed by the depositor, who proposed them.
    let refund = ctx.network.coin_balance_refund_app == Some(proposal.app_definition);
    let installer = params.initiator_xpub;
    if installer != proposal.proposed_to_identifier
        && !(refund && installer == proposal.proposed_by_identifier)
    {
        return Err(ProtocolError::MalformedInput(format!(
            "{} may not install an app proposed to {}",
            installer, proposal.proposed_to_identifier
        )));
    }
    let decrements = channel.install_decrements(proposal)?;
    let post = channel.install_app(&params.app_identity_hash, &decrements)?;
    Ok((params, post))
}

enum Stage {
    Start,
    Persisting,
    Notifying,
    Finished,
}

impl Stage {
    fn name(&self) -> &'static str {
        match self {
            Stage::Start => "start",
            Stage::Persisting => "persisting",
            Stage::Notifying => "notifying",
            Stage::Finished => "finished",
        }
    }
}

struct InstallFlow {
    post_channel: StateChannel,
    /// Only the initiator notifies.
    notification: Option<ProtocolMessage>,
    stage: Stage,
}

impl ProtocolFlow for InstallFlow {
    fn resume(&mut self, input: Resume) -> Result<Step, ProtocolError> {
        match (mem::replace(&mut self.stage, Stage::Finished), input) {
            (Stage::Start, Resume::Start) => {
                self.stage = Stage::Persisting;
                Ok(Step::Yield(Opcode::PersistChannel(self.post_channel.clone())))
            }
            (Stage::Persisting, Resume::Done) => match self.notification.take() {
                Some(message) => {
                    self.stage = Stage::Notifying;
                    Ok(Step::Yield(Opcode::Send(message)))
                }
                None => Ok(Step::Commit(self.post_channel.clone())),
            },
            (Stage::Notifying, Resume::Done) => Ok(Step::Commit(self.post_channel.clone())),
            (stage, input) => Err(ProtocolError::UnexpectedResume {
                stage: stage.name(),
                input: input.name(),
            }),
        }
    }
}

pub(super) fn initiator(ctx: &Context) -> Result<Box<dyn ProtocolFlow>, ProtocolError> {
    let (params, post_channel) = post_channel(ctx)?;
    let notification = ProtocolMessage {
        protocol: ctx.message.protocol,
        process_id: ctx.message.process_id.clone(),
        seq: 1,
        to_xpub: params.responder_xpub,
        from_xpub: params.initiator_xpub,
        params: ctx.message.params.clone(),
        custom_data: CustomData::default(),
    };
    Ok(Box::new(InstallFlow {
        post_channel,
        notification: Some(notification),
        stage: Stage::Start,
    }))
}

pub(super) fn responder(ctx: &Context) -> Result<Box<dyn ProtocolFlow>, ProtocolError> {
    let (_, post_channel) = post_channel(ctx)?;
    Ok(Box::new(InstallFlow {
        post_channel,
        notification: None,
        stage: Stage::Start,
    }))
}
