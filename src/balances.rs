// User balance ledger - per-address off-chain balances
//
// Balances are unsigned smallest-unit integers, so every subtraction is
// preceded by a sufficiency check. Callers serialize mutations per address
// by holding the ledger lock for the whole check-and-subtract.

use std::collections::HashMap;

use serde::Serialize;

use crate::pool::Amount;

// ===== ERROR TYPES =====

#[derive(Debug, Clone, PartialEq)]
pub enum BalanceError {
    InsufficientBalance { available: Amount, requested: Amount },
}

impl std::fmt::Display for BalanceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BalanceError::InsufficientBalance {
                available,
                requested,
            } => write!(
                f,
                "Insufficient balance: have {}, need {}",
                available, requested
            ),
        }
    }
}

impl std::error::Error for BalanceError {}

// ===== LEDGER =====

#[derive(Debug, Clone, Serialize)]
pub struct UserBalance {
    pub balance: Amount,
    /// Payment-channel handle assigned on first deposit
    pub channel_id: Option<String>,
}

#[derive(Debug, Default)]
pub struct BalanceLedger {
    accounts: HashMap<String, UserBalance>,
}

impl BalanceLedger {
    pub fn new() -> Self {
        Self {
            accounts: HashMap::new(),
        }
    }

    /// Credit a confirmed deposit. Creates the account and its channel
    /// handle on first use.
    pub fn deposit(&mut self, address: &str, amount: Amount) -> &UserBalance {
        let account = self
            .accounts
            .entry(address.to_string())
            .or_insert_with(|| UserBalance {
                balance: 0,
                channel_id: None,
            });

        if account.channel_id.is_none() {
            account.channel_id = Some(format!("channel_{}", uuid::Uuid::new_v4().simple()));
        }
        account.balance += amount;
        account
    }

    pub fn withdraw(&mut self, address: &str, amount: Amount) -> Result<Amount, BalanceError> {
        self.subtract(address, amount)
    }

    /// Deduct a stake before it is reflected in any pool. If the external
    /// session update later fails, the caller refunds via `credit_payout`.
    pub fn deduct_for_bet(
        &mut self,
        address: &str,
        amount: Amount,
    ) -> Result<Amount, BalanceError> {
        self.subtract(address, amount)
    }

    pub fn credit_payout(&mut self, address: &str, amount: Amount) -> Amount {
        let account = self
            .accounts
            .entry(address.to_string())
            .or_insert_with(|| UserBalance {
                balance: 0,
                channel_id: None,
            });
        account.balance += amount;
        account.balance
    }

    pub fn balance_of(&self, address: &str) -> Amount {
        self.accounts.get(address).map(|a| a.balance).unwrap_or(0)
    }

    pub fn channel_of(&self, address: &str) -> Option<String> {
        self.accounts.get(address).and_then(|a| a.channel_id.clone())
    }

    fn subtract(&mut self, address: &str, amount: Amount) -> Result<Amount, BalanceError> {
        let available = self.balance_of(address);
        if amount > available {
            return Err(BalanceError::InsufficientBalance {
                available,
                requested: amount,
            });
        }

        let account = self
            .accounts
            .get_mut(address)
            .expect("balance checked above, account exists");
        account.balance -= amount;
        Ok(account.balance)
    }
}

// ===== TESTS =====
