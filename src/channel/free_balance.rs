use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ChannelError, TokenIndexedBalances};
use crate::abiencode::types::{Address, Hash, U256};

pub const FREE_BALANCE_STATE_ENCODING: &str = "tuple(address[] tokenAddresses, tuple(address to, uint256 amount)[][] balances, bytes32[] activeApps)";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct CoinTransfer {
    pub to: Address,
    pub amount: U256,
}

/// The free balance state in the shape its state encoding describes.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct FreeBalanceState {
    pub token_addresses: Vec<Address>,
    pub balances: Vec<Vec<CoinTransfer>>,
    pub active_apps: Vec<Hash>,
}

/// Token-indexed view of the free balance, which is what gets updated.
/// Ordered maps keep [FreeBalance::to_state] identical on both sides.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct FreeBalance {
    balances: TokenIndexedBalances,
    active_apps: Vec<Hash>,
}

impl FreeBalance {
    /// Zero balances for `owners` in `token`, no active apps.
    pub fn new(owners: &[Address], token: Address) -> Self {
        let row = owners.iter().map(|o| (*o, U256::zero())).collect();
        Self {
            balances: [(token, row)].into_iter().collect(),
            active_apps: Vec::new(),
        }
    }

    pub fn from_state(state: &FreeBalanceState) -> Result<Self, ChannelError> {
        if state.token_addresses.len() != state.balances.len() {
            return Err(ChannelError::InvalidFreeBalanceState(format!(
                "{} tokens but {} balance rows",
                state.token_addresses.len(),
                state.balances.len()
            )));
        }
        let mut balances = TokenIndexedBalances::new();
        for (token, row) in state.token_addresses.iter().zip(&state.balances) {
            let entry = balances.entry(*token).or_default();
            for transfer in row {
                if entry.insert(transfer.to, transfer.amount).is_some() {
                    return Err(ChannelError::InvalidFreeBalanceState(format!(
                        "duplicate entry for {} in token {}",
                        transfer.to, token
                    )));
                }
            }
        }
        Ok(Self {
            balances,
            active_apps: state.active_apps.clone(),
        })
    }

    pub fn from_json(state: &Value) -> Result<Self, ChannelError> {
        let state: FreeBalanceState = serde_json::from_value(state.clone())
            .map_err(|e| ChannelError::InvalidFreeBalanceState(e.to_string()))?;
        Self::from_state(&state)
    }

    pub fn to_state(&self) -> FreeBalanceState {
        FreeBalanceState {
            token_addresses: self.balances.keys().copied().collect(),
            balances: self
                .balances
                .values()
                .map(|row| {
                    row.iter()
                        .map(|(to, amount)| CoinTransfer {
                            to: *to,
                            amount: *amount,
                        })
                        .collect()
                })
                .collect(),
            active_apps: self.active_apps.clone(),
        }
    }

    pub fn to_json(&self) -> Result<Value, ChannelError> {
        serde_json::to_value(self.to_state())
            .map_err(|e| ChannelError::InvalidFreeBalanceState(e.to_string()))
    }

    pub fn balances(&self) -> &TokenIndexedBalances {
        &self.balances
    }

    pub fn active_apps(&self) -> &[Hash] {
        &self.active_apps
    }

    pub fn balance_of(&self, token: &Address, address: &Address) -> U256 {
        self.balances
            .get(token)
            .and_then(|row| row.get(address))
            .copied()
            .unwrap_or_default()
    }

    pub fn increment(&self, increments: &TokenIndexedBalances) -> Result<Self, ChannelError> {
        let mut next = self.clone();
        for (token, row) in increments {
            for (address, amount) in row.iter().filter(|(_, a)| !a.is_zero()) {
                let balance = next.balances.entry(*token).or_default().entry(*address).or_default();
                *balance = balance.checked_add(*amount).ok_or(ChannelError::Overflow {
                    token: *token,
                    address: *address,
                })?;
            }
        }
        Ok(next)
    }

    pub fn decrement(&self, decrements: &TokenIndexedBalances) -> Result<Self, ChannelError> {
        let mut next = self.clone();
        for (token, row) in decrements {
            for (address, amount) in row.iter().filter(|(_, a)| !a.is_zero()) {
                let insufficient = ChannelError::InsufficientFunds {
                    token: *token,
                    address: *address,
                };
                let balance = next
                    .balances
                    .get_mut(token)
                    .and_then(|r| r.get_mut(address))
                    .ok_or_else(|| insufficient.clone())?;
                *balance = balance.checked_sub(*amount).ok_or(insufficient)?;
            }
        }
        Ok(next)
    }

    pub fn add_active_app(&self, app: Hash) -> Self {
        let mut next = self.clone();
        if !next.active_apps.contains(&app) {
            next.active_apps.push(app);
        }
        next
    }

    pub fn remove_active_app(&self, app: &Hash) -> Result<Self, ChannelError> {
        let mut next = self.clone();
        let idx = next
            .active_apps
            .iter()
            .position(|a| a == app)
            .ok_or(ChannelError::NoSuchApp(*app))?;
        next.active_apps.remove(idx);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abiencode::{hash_json, AbiType};

    fn addr(b: u8) -> Address {
        Address([b; 20])
    }

    fn increments(token: Address, entries: &[(Address, u64)]) -> TokenIndexedBalances {
        let row = entries.iter().map(|(a, v)| (*a, U256::from(*v))).collect();
        [(token, row)].into_iter().collect()
    }

    #[test]
    fn state_is_encodable_and_roundtrips() {
        let token = Address::default();
        let fb = FreeBalance::new(&[addr(1), addr(2)], token)
            .increment(&increments(token, &[(addr(1), 10), (addr(2), 3)]))
            .unwrap()
            .add_active_app(Hash([9; 32]));

        let json = fb.to_json().unwrap();
        let kind: AbiType = FREE_BALANCE_STATE_ENCODING.parse().unwrap();
        assert!(hash_json(&kind, &json).is_ok());
        assert_eq!(FreeBalance::from_json(&json).unwrap(), fb);
    }

    #[test]
    fn decrement_checks_funds() {
        let token = Address::default();
        let fb = FreeBalance::new(&[addr(1), addr(2)], token)
            .increment(&increments(token, &[(addr(1), 5)]))
            .unwrap();

        let after = fb.decrement(&increments(token, &[(addr(1), 5)])).unwrap();
        assert_eq!(after.balance_of(&token, &addr(1)), U256::zero());

        assert_eq!(
            fb.decrement(&increments(token, &[(addr(2), 1)])),
            Err(ChannelError::InsufficientFunds {
                token,
                address: addr(2)
            })
        );
        let other_token = addr(0xee);
        assert!(fb.decrement(&increments(other_token, &[(addr(1), 1)])).is_err());
        // Zero decrements of unknown tokens are no-ops.
        assert_eq!(fb.decrement(&increments(other_token, &[(addr(1), 0)])).unwrap(), fb);
    }

    #[test]
    fn rejects_inconsistent_state() {
        let state = FreeBalanceState {
            token_addresses: vec![Address::default()],
            balances: vec![],
            active_apps: vec![],
        };
        assert!(FreeBalance::from_state(&state).is_err());
    }
}
