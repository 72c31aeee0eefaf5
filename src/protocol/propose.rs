//! Propose: both parties sign the app's initial state and record the
//! proposal under the next sequence number.

use super::{
    exchange::{ExchangePlan, InitiatorExchange, ResponderExchange},
    Context, ProposeInstallParams, ProtocolError, ProtocolFlow,
};
use crate::{
    app::CoinBalanceRefundApp,
    channel::{AppIdentity, AppInstance, AppInstanceProposal, OutcomeType, StateChannel},
    commitment::{get_create2_multisig_address, SetStateCommitment},
    keys::xkey_kth_address,
};

/// A balance refund may only pay its proposer, from this channel's multisig,
/// and must lock nothing.
fn check_refund(ctx: &Context, params: &ProposeInstallParams) -> Result<(), ProtocolError> {
    let refund = ctx.network.coin_balance_refund_app == Some(params.app_definition);
    if !refund {
        if params.disable_limit {
            return Err(ProtocolError::MalformedInput(
                "only balance refunds may lift the transfer limit".into(),
            ));
        }
        return Ok(());
    }
    let state = CoinBalanceRefundApp::state(&params.initial_state)?;
    let token = params
        .initiator_deposit_token_address
        .unwrap_or(ctx.network.default_token_address);
    let malformed = |what: &str| {
        Err(ProtocolError::MalformedInput(format!(
            "balance refund {}",
            what
        )))
    };
    if !params.disable_limit
        || params.outcome_type != OutcomeType::SingleAssetTwoPartyCoinTransfer
    {
        return malformed("must be an unlimited coin transfer");
    }
    if !params.initiator_deposit.is_zero() || !params.responder_deposit.is_zero() {
        return malformed("cannot take deposits");
    }
    if state.recipient != xkey_kth_address(&params.initiator_xpub, 0)? {
        return malformed("must pay its proposer");
    }
    if state.multisig != params.multisig_address || state.token_address != token {
        return malformed("watches another balance");
    }
    Ok(())
}

fn plan(ctx: &Context) -> Result<ExchangePlan, ProtocolError> {
    let params: ProposeInstallParams = ctx.message.params_as()?;
    let keys = [params.initiator_xpub, params.responder_xpub];
    check_refund(ctx, &params)?;

    let expected = get_create2_multisig_address(&keys, &ctx.network)?;
    if expected != params.multisig_address {
        return Err(ProtocolError::MalformedInput(format!(
            "multisig {} is not the one of these parties, expected {}",
            params.multisig_address, expected
        )));
    }

    let channel = match ctx.channels.get(&params.multisig_address) {
        Some(channel) => channel.clone(),
        None => StateChannel::setup(params.multisig_address, keys, &ctx.network)?,
    };

    let seq = channel.next_app_seq_no();
    let identity = AppIdentity {
        app_definition: params.app_definition,
        channel_nonce: seq,
        participants: channel.get_signing_keys_for(seq)?,
        default_timeout: params.timeout,
    };
    let state_hash = AppInstance::hash_state(&params.abi_encodings, &params.initial_state)?;
    params.abi_encodings.action_type()?;

    let default_token = ctx.network.default_token_address;
    let proposal = AppInstanceProposal {
        identity_hash: identity.identity_hash(),
        app_definition: params.app_definition,
        abi_encodings: params.abi_encodings.clone(),
        initial_state: params.initial_state.clone(),
        outcome_type: params.outcome_type,
        initiator_deposit: params.initiator_deposit,
        initiator_deposit_token_address: params
            .initiator_deposit_token_address
            .unwrap_or(default_token),
        responder_deposit: params.responder_deposit,
        responder_deposit_token_address: params
            .responder_deposit_token_address
            .unwrap_or(default_token),
        timeout: params.timeout,
        proposed_by_identifier: params.initiator_xpub,
        proposed_to_identifier: params.responder_xpub,
        app_seq_no: seq,
        disable_limit: params.disable_limit,
    };
    let commitment_app = proposal.identity_hash;
    let post_channel = channel.add_proposal(proposal)?;

    Ok(ExchangePlan {
        protocol: ctx.message.protocol,
        process_id: ctx.message.process_id.clone(),
        initiator: params.initiator_xpub,
        responder: params.responder_xpub,
        params: ctx.message.params.clone(),
        post_channel,
        commitment: SetStateCommitment::new(identity, state_hash, 0, params.timeout),
        key_index: seq,
        commitment_app,
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
