// Distribution calculator - proportional payout math for pool settlement
//
// Pure integer arithmetic over smallest currency units. Percentage fee rates
// are converted once to basis points before any division so no float ever
// touches a monetary value. Truncation dust from floor division stays with
// the fee collector and is never redistributed.

use serde::Serialize;

use crate::models::{BetSide, USDC_ASSET};
use crate::pool::{Amount, MarketPool};

/// Protocol fee retained from the pot at settlement, in percent
pub const HOUSE_FEE_PERCENT: f64 = 2.5;

// ===== ERROR TYPES =====

#[derive(Debug, Clone, PartialEq)]
pub enum DistributionError {
    /// The declared winning pool holds no stake - nothing to divide by
    EmptyWinningPool,
}

impl std::fmt::Display for DistributionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DistributionError::EmptyWinningPool => {
                write!(f, "Winning pool has no participants")
            }
        }
    }
}

impl std::error::Error for DistributionError {}

// ===== OUTPUT TYPES =====

/// One participant's settlement outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Distribution {
    pub participant: String,
    pub side: BetSide,
    pub stake_amount: Amount,
    pub payout_amount: Amount,
    /// Display-only; -100.0 exactly for losers
    pub profit_percent: f64,
}

/// Final allocation entry submitted to the channel network on close
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionAllocation {
    pub participant: String,
    pub asset: String,
    pub amount: Amount,
}

/// Full settlement computation for one market
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributionOutcome {
    pub allocations: Vec<SessionAllocation>,
    pub distributions: Vec<Distribution>,
    pub total_pot: Amount,
    pub fee: Amount,
    pub payout_pot: Amount,
}

// ===== CALCULATOR =====

/// Compute each participant's payout for a settled market.
///
/// payout = floor(stake * (totalPot - fee) / winningPoolTotal)
///
/// Output ordering is a contract: all winners in pool-insertion order, then
/// all losers in pool-insertion order. Losers get payout 0, profit -100.
pub fn compute_distribution(
    up_pool: &MarketPool,
    down_pool: &MarketPool,
    winner: BetSide,
    fee_rate_percent: f64,
) -> Result<DistributionOutcome, DistributionError> {
    let total_pot = up_pool.total_amount + down_pool.total_amount;
    let fee_basis_points = (fee_rate_percent * 100.0).round() as Amount;
    let fee = total_pot * fee_basis_points / 10_000;
    let payout_pot = total_pot - fee;

    let (winning_pool, losing_pool) = match winner {
        BetSide::Up => (up_pool, down_pool),
        BetSide::Down => (down_pool, up_pool),
    };

    if winning_pool.total_amount == 0 {
        return Err(DistributionError::EmptyWinningPool);
    }

    let mut distributions: Vec<Distribution> = Vec::with_capacity(
        winning_pool.entries.len() + losing_pool.entries.len(),
    );

    for entry in &winning_pool.entries {
        let payout = entry.amount * payout_pot / winning_pool.total_amount;
        let profit_bp =
            (payout as i128 - entry.amount as i128) * 10_000 / entry.amount as i128;
        distributions.push(Distribution {
            participant: entry.participant.clone(),
            side: winner,
            stake_amount: entry.amount,
            payout_amount: payout,
            profit_percent: profit_bp as f64 / 100.0,
        });
    }

    for entry in &losing_pool.entries {
        distributions.push(Distribution {
            participant: entry.participant.clone(),
            side: losing_pool.side,
            stake_amount: entry.amount,
            payout_amount: 0,
            profit_percent: -100.0,
        });
    }

    // Every participant appears in the close allocations, winners first.
    // Losers must still be listed with amount 0.
    let allocations = distributions
        .iter()
        .map(|d| SessionAllocation {
            participant: d.participant.clone(),
            asset: USDC_ASSET.to_string(),
            amount: d.payout_amount,
        })
        .collect();

    Ok(DistributionOutcome {
        allocations,
        distributions,
        total_pot,
        fee,
        payout_pot,
    })
}

// ===== TESTS =====

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(side: BetSide, stakes: &[(&str, Amount)]) -> MarketPool {
        let mut p = MarketPool::new(side);
        for (addr, amount) in stakes {
            p.add_stake(addr, *amount).unwrap();
        }
        p
    }

    #[test]
    fn test_reference_scenario_up_wins() {
        // UP = [10, 20, 30] USDC, DOWN = [15, 25] USDC, fee 2.5%
        let up = pool(
            BetSide::Up,
            &[("0xa", 10_000_000), ("0xb", 20_000_000), ("0xc", 30_000_000)],
        );
        let down = pool(BetSide::Down, &[("0xd", 15_000_000), ("0xe", 25_000_000)]);

        let out = compute_distribution(&up, &down, BetSide::Up, 2.5).unwrap();

        assert_eq!(out.total_pot, 100_000_000);
        assert_eq!(out.fee, 2_500_000);
        assert_eq!(out.payout_pot, 97_500_000);

        assert_eq!(out.distributions[0].payout_amount, 16_250_000);
        assert_eq!(out.distributions[1].payout_amount, 32_500_000);
        assert_eq!(out.distributions[2].payout_amount, 48_750_000);
        assert_eq!(out.distributions[0].profit_percent, 62.5);
        assert_eq!(out.distributions[1].profit_percent, 62.5);
        assert_eq!(out.distributions[2].profit_percent, 62.5);

        // Losers get nothing
        assert_eq!(out.distributions[3].payout_amount, 0);
        assert_eq!(out.distributions[4].payout_amount, 0);
        assert_eq!(out.distributions[3].profit_percent, -100.0);
        assert_eq!(out.distributions[4].profit_percent, -100.0);

        // Exact conservation: this scenario divides evenly, no dust
        let paid: Amount = out.distributions.iter().map(|d| d.payout_amount).sum();
        assert_eq!(paid + out.fee, out.total_pot);
    }

    #[test]
    fn test_reference_scenario_down_wins_with_dust() {
        // UP = [30], DOWN = [40, 30], winner DOWN, fee 2.5%
        let up = pool(BetSide::Up, &[("0xa", 30_000_000)]);
        let down = pool(BetSide::Down, &[("0xb", 40_000_000), ("0xc", 30_000_000)]);

        let out = compute_distribution(&up, &down, BetSide::Down, 2.5).unwrap();

        assert_eq!(out.distributions[0].payout_amount, 55_714_285);
        assert_eq!(out.distributions[1].payout_amount, 41_785_714);

        // UP participant loses everything
        assert_eq!(out.distributions[2].participant, "0xa");
        assert_eq!(out.distributions[2].payout_amount, 0);
        assert_eq!(out.distributions[2].profit_percent, -100.0);

        // Floor-division dust (1 unit here) stays with the fee collector
        let paid: Amount = out.distributions.iter().map(|d| d.payout_amount).sum();
        let dust = out.total_pot - out.fee - paid;
        assert_eq!(dust, 1);
    }

    #[test]
    fn test_winner_take_share_formula() {
        let up = pool(BetSide::Up, &[("0xa", 7_123_457), ("0xb", 993_001)]);
        let down = pool(BetSide::Down, &[("0xc", 5_500_000)]);

        let out = compute_distribution(&up, &down, BetSide::Up, 2.5).unwrap();
        for d in out.distributions.iter().filter(|d| d.side == BetSide::Up) {
            assert_eq!(
                d.payout_amount,
                d.stake_amount * out.payout_pot / up.total_amount
            );
        }
    }

    #[test]
    fn test_conservation_with_dust_bound() {
        let up = pool(
            BetSide::Up,
            &[("0xa", 3_333_333), ("0xb", 1_111_111), ("0xc", 7)],
        );
        let down = pool(BetSide::Down, &[("0xd", 9_999_999), ("0xe", 13)]);

        let out = compute_distribution(&up, &down, BetSide::Up, 2.5).unwrap();
        let paid: Amount = out.distributions.iter().map(|d| d.payout_amount).sum();
        let dust = out.total_pot - out.fee - paid;

        // Dust is bounded by the number of winners (one truncation each)
        assert!(dust < up.entries.len() as Amount);
    }

    #[test]
    fn test_zero_fee_distributes_full_pot() {
        let up = pool(BetSide::Up, &[("0xa", 10_000_000)]);
        let down = pool(BetSide::Down, &[("0xb", 10_000_000)]);

        let out = compute_distribution(&up, &down, BetSide::Up, 0.0).unwrap();
        assert_eq!(out.fee, 0);
        assert_eq!(out.distributions[0].payout_amount, 20_000_000);
        assert_eq!(out.distributions[0].profit_percent, 100.0);
    }

    #[test]
    fn test_empty_winning_pool_fails() {
        let up = pool(BetSide::Up, &[]);
        let down = pool(BetSide::Down, &[("0xb", 10_000_000)]);

        // UP declared winner with an empty UP pool
        assert_eq!(
            compute_distribution(&up, &down, BetSide::Up, 2.5),
            Err(DistributionError::EmptyWinningPool)
        );

        // The empty side losing is fine
        assert!(compute_distribution(&up, &down, BetSide::Down, 2.5).is_ok());
    }

    #[test]
    fn test_output_ordering_winners_then_losers() {
        let up = pool(BetSide::Up, &[("w1", 1_000_000), ("w2", 2_000_000)]);
        let down = pool(BetSide::Down, &[("l1", 3_000_000), ("l2", 4_000_000)]);

        let out = compute_distribution(&up, &down, BetSide::Up, 2.5).unwrap();
        let order: Vec<&str> = out
            .distributions
            .iter()
            .map(|d| d.participant.as_str())
            .collect();
        assert_eq!(order, vec!["w1", "w2", "l1", "l2"]);

        // Allocations mirror the same ordering and include zero-amount losers
        assert_eq!(out.allocations.len(), 4);
        assert_eq!(out.allocations[2].amount, 0);
        assert_eq!(out.allocations[3].amount, 0);
    }
}
