//! Interpretation of an app's final state as free balance increments.
//!
//! The interpreter parameters are fixed when the app is installed, from the
//! proposal's deposits. Whatever the app's logic claims, increments never
//! exceed what was locked into the app.

use serde::{Deserialize, Serialize};

use super::{
    AppInstance, AppInstanceProposal, ChannelError, CoinTransfer, OutcomeType,
    TokenIndexedBalances,
};
use crate::abiencode::types::{Address, U256};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TwoPartyFixedOutcome {
    SendToAddrOne,
    SendToAddrTwo,
    SplitAndSendToBothAddrs,
}

/// What an app's logic reports for its current state.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum AppOutcome {
    TwoPartyFixed(TwoPartyFixedOutcome),
    SingleAssetCoinTransfers(Vec<CoinTransfer>),
    MultiAssetCoinTransfers(Vec<Vec<CoinTransfer>>),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TwoPartyFixedOutcomeParams {
    pub player_addrs: [Address; 2],
    pub amount: U256,
    pub token_address: Address,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SingleAssetTwoPartyCoinTransferParams {
    pub limit: U256,
    pub token_address: Address,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MultiAssetMultiPartyCoinTransferParams {
    pub limits: Vec<U256>,
    pub token_addresses: Vec<Address>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum InterpreterParams {
    TwoPartyFixedOutcome(TwoPartyFixedOutcomeParams),
    SingleAssetTwoPartyCoinTransfer(SingleAssetTwoPartyCoinTransferParams),
    MultiAssetMultiPartyCoinTransfer(MultiAssetMultiPartyCoinTransferParams),
}

impl InterpreterParams {
    /// `players` are the slot-0 addresses of proposer and proposed-to, in
    /// that order.
    pub fn for_proposal(
        proposal: &AppInstanceProposal,
        players: [Address; 2],
    ) -> Result<Self, ChannelError> {
        Ok(match proposal.outcome_type {
            OutcomeType::TwoPartyFixedOutcome => {
                InterpreterParams::TwoPartyFixedOutcome(TwoPartyFixedOutcomeParams {
                    player_addrs: players,
                    amount: proposal.total_deposit()?,
                    token_address: proposal.initiator_deposit_token_address,
                })
            }
            OutcomeType::SingleAssetTwoPartyCoinTransfer => {
                InterpreterParams::SingleAssetTwoPartyCoinTransfer(
                    SingleAssetTwoPartyCoinTransferParams {
                        limit: if proposal.disable_limit {
                            U256::MAX
                        } else {
                            proposal.total_deposit()?
                        },
                        token_address: proposal.initiator_deposit_token_address,
                    },
                )
            }
            OutcomeType::MultiAssetMultiPartyCoinTransfer => {
                let params = if proposal.initiator_deposit_token_address
                    == proposal.responder_deposit_token_address
                {
                    MultiAssetMultiPartyCoinTransferParams {
                        limits: vec![proposal.total_deposit()?],
                        token_addresses: vec![proposal.initiator_deposit_token_address],
                    }
                } else {
                    MultiAssetMultiPartyCoinTransferParams {
                        limits: vec![proposal.initiator_deposit, proposal.responder_deposit],
                        token_addresses: vec![
                            proposal.initiator_deposit_token_address,
                            proposal.responder_deposit_token_address,
                        ],
                    }
                };
                InterpreterParams::MultiAssetMultiPartyCoinTransfer(params)
            }
        })
    }
}

fn add_to(
    increments: &mut TokenIndexedBalances,
    token: Address,
    to: Address,
    amount: U256,
) -> Result<(), ChannelError> {
    if amount.is_zero() {
        return Ok(());
    }
    let entry = increments.entry(token).or_default().entry(to).or_default();
    *entry = entry
        .checked_add(amount)
        .ok_or(ChannelError::Overflow { token, address: to })?;
    Ok(())
}

fn add_transfers(
    increments: &mut TokenIndexedBalances,
    token: Address,
    limit: U256,
    transfers: &[CoinTransfer],
) -> Result<(), ChannelError> {
    let mut total = U256::zero();
    for t in transfers {
        total = total.checked_add(t.amount).ok_or(ChannelError::Overflow {
            token,
            address: t.to,
        })?;
    }
    if total > limit {
        return Err(ChannelError::ExceedsLimit {
            token,
            total,
            limit,
        });
    }
    for t in transfers {
        add_to(increments, token, t.to, t.amount)?;
    }
    Ok(())
}

/// Free balance increments for uninstalling `app` with `outcome`.
pub fn compute_token_indexed_increments(
    app: &AppInstance,
    outcome: &AppOutcome,
) -> Result<TokenIndexedBalances, ChannelError> {
    let mismatch = || ChannelError::OutcomeTypeMismatch(app.outcome_type);
    let params = app.interpreter_params.as_ref().ok_or_else(mismatch)?;
    let mut increments = TokenIndexedBalances::new();

    match (params, outcome) {
        (InterpreterParams::TwoPartyFixedOutcome(p), AppOutcome::TwoPartyFixed(o)) => {
            let [one, two] = p.player_addrs;
            match o {
                TwoPartyFixedOutcome::SendToAddrOne => {
                    add_to(&mut increments, p.token_address, one, p.amount)?
                }
                TwoPartyFixedOutcome::SendToAddrTwo => {
                    add_to(&mut increments, p.token_address, two, p.amount)?
                }
                TwoPartyFixedOutcome::SplitAndSendToBothAddrs => {
                    let half = p.amount / U256::from(2u64);
                    add_to(&mut increments, p.token_address, one, half)?;
                    add_to(&mut increments, p.token_address, two, p.amount - half)?;
                }
            }
        }
        (
            InterpreterParams::SingleAssetTwoPartyCoinTransfer(p),
            AppOutcome::SingleAssetCoinTransfers(transfers),
        ) => {
            if transfers.len() != 2 {
                return Err(mismatch());
            }
            add_transfers(&mut increments, p.token_address, p.limit, transfers)?;
        }
        (
            InterpreterParams::MultiAssetMultiPartyCoinTransfer(p),
            AppOutcome::MultiAssetCoinTransfers(rows),
        ) => {
            if rows.len() != p.token_addresses.len() || p.limits.len() != p.token_addresses.len() {
                return Err(mismatch());
            }
            for ((token, limit), row) in p.token_addresses.iter().zip(&p.limits).zip(rows) {
                add_transfers(&mut increments, *token, *limit, row)?;
            }
        }
        _ => return Err(mismatch()),
    }
    Ok(increments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{AbiEncodings, AppIdentity};
    use crate::Hash;
    use serde_json::json;

    fn addr(b: u8) -> Address {
        Address([b; 20])
    }

    fn app(params: InterpreterParams, outcome_type: OutcomeType) -> AppInstance {
        AppInstance {
            multisig_address: addr(0xaa),
            identity: AppIdentity {
                app_definition: addr(0xdd),
                channel_nonce: 1,
                participants: vec![addr(1), addr(2)],
                default_timeout: 10,
            },
            identity_hash: Hash::default(),
            abi_encodings: AbiEncodings {
                state_encoding: "uint256".into(),
                action_encoding: None,
            },
            app_seq_no: 1,
            latest_state: json!(0),
            latest_version_number: 0,
            latest_timeout: 10,
            outcome_type,
            interpreter_params: Some(params),
        }
    }

    #[test]
    fn two_party_fixed_split_conserves_odd_amounts() {
        let token = Address::default();
        let app = app(
            InterpreterParams::TwoPartyFixedOutcome(TwoPartyFixedOutcomeParams {
                player_addrs: [addr(1), addr(2)],
                amount: U256::from(7),
                token_address: token,
            }),
            OutcomeType::TwoPartyFixedOutcome,
        );
        let inc = compute_token_indexed_increments(
            &app,
            &AppOutcome::TwoPartyFixed(TwoPartyFixedOutcome::SplitAndSendToBothAddrs),
        )
        .unwrap();
        assert_eq!(inc[&token][&addr(1)], U256::from(3));
        assert_eq!(inc[&token][&addr(2)], U256::from(4));
    }

    #[test]
    fn coin_transfers_respect_limit() {
        let token = addr(0x70);
        let app = app(
            InterpreterParams::SingleAssetTwoPartyCoinTransfer(
                SingleAssetTwoPartyCoinTransferParams {
                    limit: U256::from(10),
                    token_address: token,
                },
            ),
            OutcomeType::SingleAssetTwoPartyCoinTransfer,
        );
        let transfers = |a: u64, b: u64| {
            AppOutcome::SingleAssetCoinTransfers(vec![
                CoinTransfer {
                    to: addr(1),
                    amount: U256::from(a),
                },
                CoinTransfer {
                    to: addr(2),
                    amount: U256::from(b),
                },
            ])
        };
        let inc = compute_token_indexed_increments(&app, &transfers(4, 6)).unwrap();
        let total: U256 = inc[&token].values().fold(U256::zero(), |acc, v| acc + *v);
        assert_eq!(total, U256::from(10));

        assert!(matches!(
            compute_token_indexed_increments(&app, &transfers(4, 7)),
            Err(ChannelError::ExceedsLimit { .. })
        ));
        assert!(matches!(
            compute_token_indexed_increments(
                &app,
                &AppOutcome::TwoPartyFixed(TwoPartyFixedOutcome::SendToAddrOne)
            ),
            Err(ChannelError::OutcomeTypeMismatch(_))
        ));
    }

    #[test]
    fn disabled_limit_admits_any_single_asset_outcome() {
        let fx = crate::testing::Fixture::new(3);
        let channel = fx.channel();
        let mut proposal = fx.payment_proposal(&channel, 0, 0);
        let players = [fx.alice_fb_address(), fx.bob_fb_address()];

        let limited = InterpreterParams::for_proposal(&proposal, players).unwrap();
        assert!(matches!(
            limited,
            InterpreterParams::SingleAssetTwoPartyCoinTransfer(ref p) if p.limit.is_zero()
        ));

        proposal.disable_limit = true;
        let InterpreterParams::SingleAssetTwoPartyCoinTransfer(p) =
            InterpreterParams::for_proposal(&proposal, players).unwrap()
        else {
            panic!("wrong interpreter")
        };
        assert_eq!(p.limit, U256::MAX);
    }
}
