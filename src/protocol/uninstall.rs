//! Uninstall: settle an app's outcome into the free balance. Both parties
//! sign the new free balance state with their slot-0 keys. The commitment
//! is filed under the uninstalled app so later uninstalls do not overwrite it.

use super::{
    exchange::{ExchangePlan, InitiatorExchange, ResponderExchange},
    Context, ProtocolError, ProtocolFlow, UninstallParams,
};
use crate::{channel::compute_token_indexed_increments, commitment::SetStateCommitment};

fn plan(ctx: &Context) -> Result<ExchangePlan, ProtocolError> {
    let params: UninstallParams = ctx.message.params_as()?;
    let channel = ctx.channel(&params.multisig_address)?;
    let id = params.app_identity_hash;
    if channel.is_free_balance(&id) {
        return Err(ProtocolError::MalformedInput(
            "the free balance cannot be uninstalled".into(),
        ));
    }
    let app = channel.get_app_instance(&id)?;

    let outcome = ctx.apps.compute_outcome(app, &ctx.observed_balances)?;
    let increments = compute_token_indexed_increments(app, &outcome)?;
    let post_channel = channel.uninstall_app(&id, &increments)?;

    let free_balance = post_channel.free_balance()?;
    let commitment = SetStateCommitment::for_app(free_balance)?;

    Ok(ExchangePlan {
        protocol: ctx.message.protocol,
        process_id: ctx.message.process_id.clone(),
        initiator: params.initiator_xpub,
        responder: params.responder_xpub,
        params: ctx.message.params.clone(),
        key_index: 0,
        commitment_app: id,
        post_channel,
        commitment,
    })
}

pub(super) fn initiator(ctx: &Context) -> Result<Box<dyn ProtocolFlow>, ProtocolError> {
    Ok(Box::new(InitiatorExchange::new(plan(ctx)?)?))
}

pub(super) fn responder(ctx: &Context) -> Result<Box<dyn ProtocolFlow>, ProtocolError> {
    Ok(Box::new(ResponderExchange::new(
        plan(ctx)?,
        ctx.message.custom_data.signature,
    )))
}
