// Pool ledger - per-side stake accounting for binary markets
//
// Amounts are unsigned integers in the smallest currency unit (USDC has 6
// decimals, so 1 USDC = 1_000_000 units). No floating point touches money.

use serde::{Deserialize, Serialize};

use crate::models::BetSide;

/// Monetary amount in smallest currency units
pub type Amount = u128;

// ===== ERROR TYPES =====

#[derive(Debug, Clone, PartialEq)]
pub enum PoolError {
    /// Stake amount must be a positive integer
    NonPositiveAmount,
}

impl std::fmt::Display for PoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolError::NonPositiveAmount => write!(f, "Stake amount must be positive"),
        }
    }
}

impl std::error::Error for PoolError {}

// ===== POOL =====

/// One participant's position in a pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolEntry {
    pub participant: String,
    pub amount: Amount,
}

/// The set of stakes placed on one side (UP or DOWN) of a market.
///
/// Entries keep insertion order - distribution output depends on it.
/// A participant appears at most once; repeat stakes accumulate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketPool {
    pub side: BetSide,
    pub entries: Vec<PoolEntry>,
    pub total_amount: Amount,
}

impl MarketPool {
    pub fn new(side: BetSide) -> Self {
        Self {
            side,
            entries: Vec::new(),
            total_amount: 0,
        }
    }

    /// Add a stake to the pool. If the participant already holds a position
    /// on this side, their stake and the pool total both grow by `amount`.
    pub fn add_stake(&mut self, participant: &str, amount: Amount) -> Result<(), PoolError> {
        if amount == 0 {
            return Err(PoolError::NonPositiveAmount);
        }

        match self
            .entries
            .iter_mut()
            .find(|e| e.participant == participant)
        {
            Some(entry) => entry.amount += amount,
            None => self.entries.push(PoolEntry {
                participant: participant.to_string(),
                amount,
            }),
        }

        self.total_amount += amount;
        Ok(())
    }

    pub fn participant_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_amount == 0
    }

    pub fn stake_of(&self, participant: &str) -> Amount {
        self.entries
            .iter()
            .find(|e| e.participant == participant)
            .map(|e| e.amount)
            .unwrap_or(0)
    }
}

// ===== POOL STATS =====

/// Derived view of both pools for API consumers
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub up_total: Amount,
    pub down_total: Amount,
    pub total_pot: Amount,
    pub up_participants: usize,
    pub down_participants: usize,
    pub up_percentage: f64,
    pub down_percentage: f64,
}

/// Compute each side's share of the combined pot.
///
/// Percentages come from basis-point integer math and are display-only.
/// An empty market reports a neutral 50/50 split.
pub fn pool_stats(up: &MarketPool, down: &MarketPool) -> PoolStats {
    let total = up.total_amount + down.total_amount;

    let (up_pct, down_pct) = if total == 0 {
        (50.0, 50.0)
    } else {
        let up_bp = (up.total_amount * 10_000) / total;
        let up_pct = up_bp as f64 / 100.0;
        (up_pct, 100.0 - up_pct)
    };

    PoolStats {
        up_total: up.total_amount,
        down_total: down.total_amount,
        total_pot: total,
        up_participants: up.participant_count(),
        down_participants: down.participant_count(),
        up_percentage: up_pct,
        down_percentage: down_pct,
    }
}

// ===== TESTS =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_stake_appends_and_sums() {
        let mut pool = MarketPool::new(BetSide::Up);
        pool.add_stake("0xalice", 10_000_000).unwrap();
        pool.add_stake("0xbob", 20_000_000).unwrap();

        assert_eq!(pool.entries.len(), 2);
        assert_eq!(pool.total_amount, 30_000_000);
        assert_eq!(pool.entries[0].participant, "0xalice");
        assert_eq!(pool.entries[1].participant, "0xbob");
    }

    #[test]
    fn test_duplicate_bet_accumulates() {
        let mut pool = MarketPool::new(BetSide::Down);
        pool.add_stake("0xalice", 10_000_000).unwrap();
        pool.add_stake("0xalice", 5_000_000).unwrap();

        // One entry, summed stake - never two entries for the same address
        assert_eq!(pool.entries.len(), 1);
        assert_eq!(pool.entries[0].amount, 15_000_000);
        assert_eq!(pool.total_amount, 15_000_000);
        assert_eq!(pool.stake_of("0xalice"), 15_000_000);
    }

    #[test]
    fn test_zero_stake_rejected() {
        let mut pool = MarketPool::new(BetSide::Up);
        assert_eq!(
            pool.add_stake("0xalice", 0),
            Err(PoolError::NonPositiveAmount)
        );
        assert_eq!(pool.total_amount, 0);
        assert!(pool.entries.is_empty());
    }

    #[test]
    fn test_total_matches_entry_sum_after_mutations() {
        let mut pool = MarketPool::new(BetSide::Up);
        pool.add_stake("0xa", 7).unwrap();
        pool.add_stake("0xb", 11).unwrap();
        pool.add_stake("0xa", 3).unwrap();

        let sum: Amount = pool.entries.iter().map(|e| e.amount).sum();
        assert_eq!(pool.total_amount, sum);
    }

    #[test]
    fn test_pool_stats_empty_market_splits_evenly() {
        let up = MarketPool::new(BetSide::Up);
        let down = MarketPool::new(BetSide::Down);
        let stats = pool_stats(&up, &down);

        assert_eq!(stats.total_pot, 0);
        assert_eq!(stats.up_percentage, 50.0);
        assert_eq!(stats.down_percentage, 50.0);
    }

    #[test]
    fn test_pool_stats_percentages() {
        let mut up = MarketPool::new(BetSide::Up);
        let mut down = MarketPool::new(BetSide::Down);
        up.add_stake("0xa", 75_000_000).unwrap();
        down.add_stake("0xb", 25_000_000).unwrap();

        let stats = pool_stats(&up, &down);
        assert_eq!(stats.total_pot, 100_000_000);
        assert_eq!(stats.up_percentage, 75.0);
        assert_eq!(stats.down_percentage, 25.0);
        assert_eq!(stats.up_participants, 1);
        assert_eq!(stats.down_participants, 1);
    }
}
