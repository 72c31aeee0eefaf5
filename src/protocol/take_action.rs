//! Take action: apply an action to an installed app and sign the resulting
//! state one version up.

use super::{
    exchange::{ExchangePlan, InitiatorExchange, ResponderExchange},
    Context, ProtocolError, ProtocolFlow, Role, TakeActionParams,
};
use crate::{
    app::AppError,
    channel::AppInstance,
    commitment::SetStateCommitment,
};

fn plan(ctx: &Context, role: Role) -> Result<ExchangePlan, ProtocolError> {
    let params: TakeActionParams = ctx.message.params_as()?;
    let channel = ctx.channel(&params.multisig_address)?;
    let id = params.app_identity_hash;
    if channel.is_free_balance(&id) {
        return Err(ProtocolError::MalformedInput(
            "actions cannot be taken on the free balance".into(),
        ));
    }
    let app = channel.get_app_instance(&id)?;

    let expected = app.latest_version_number + 1;
    match (role, params.version_number) {
        (Role::Responder, None) => {
            return Err(ProtocolError::MalformedInput("missing version number".into()))
        }
        (_, Some(received)) if received != expected => {
            return Err(ProtocolError::StaleVersion { expected, received })
        }
        _ => {}
    }

    app.encode_action(&params.action)?;
    let state = ctx.apps.apply_action(app, &params.action)?;
    if AppInstance::hash_state(&app.abi_encodings, &state).is_err() {
        return Err(AppError::InvalidState("new state does not match the state encoding".into()).into());
    }

    let post_channel = channel.set_state(&id, state, app.latest_timeout)?;
    let commitment = SetStateCommitment::for_app(post_channel.get_app_instance(&id)?)?;
    let outgoing = TakeActionParams {
        version_number: Some(expected),
        ..params
    };

    Ok(ExchangePlan {
        protocol: ctx.message.protocol,
        process_id: ctx.message.process_id.clone(),
        initiator: outgoing.initiator_xpub,
        responder: outgoing.responder_xpub,
        params: serde_json::to_value(&outgoing)
            .map_err(|e| ProtocolError::MalformedInput(e.to_string()))?,
        key_index: app.app_seq_no,
        commitment_app: id,
        post_channel,
        commitment,
    })
}

pub(super) fn initiator(ctx: &Context) -> Result<Box<dyn ProtocolFlow>, ProtocolError> {
    Ok(Box::new(InitiatorExchange::new(plan(ctx, Role::Initiator)?)?))
}

pub(super) fn responder(ctx: &Context) -> Result<Box<dyn ProtocolFlow>, ProtocolError> {
    Ok(Box::new(ResponderExchange::new(
        plan(ctx, Role::Responder)?,
        ctx.message.custom_data.signature,
    )))
}
