// Data models for the PulseMarkets attention prediction market

use serde::{Deserialize, Serialize};

use crate::pool::{Amount, MarketPool};

/// Settlement asset identifier used across sessions and allocations
pub const USDC_ASSET: &str = "usdc";

/// Current time as epoch milliseconds
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

// ===== ENUMS =====

/// Which side of a binary market a stake is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BetSide {
    #[serde(rename = "UP")]
    Up,
    #[serde(rename = "DOWN")]
    Down,
}

impl BetSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetSide::Up => "UP",
            BetSide::Down => "DOWN",
        }
    }

    pub fn opposite(&self) -> BetSide {
        match self {
            BetSide::Up => BetSide::Down,
            BetSide::Down => BetSide::Up,
        }
    }

    pub fn parse(s: &str) -> Option<BetSide> {
        match s {
            "UP" => Some(BetSide::Up),
            "DOWN" => Some(BetSide::Down),
            _ => None,
        }
    }
}

impl std::fmt::Display for BetSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Market lifecycle. Transitions are monotonic:
/// open -> locked/settling -> closed. A closed market never reopens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketStatus {
    #[serde(rename = "open")]
    Open,
    #[serde(rename = "locked")]
    Locked,
    #[serde(rename = "settling")]
    Settling,
    #[serde(rename = "closed")]
    Closed,
}

impl MarketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketStatus::Open => "open",
            MarketStatus::Locked => "locked",
            MarketStatus::Settling => "settling",
            MarketStatus::Closed => "closed",
        }
    }
}

/// How the settlement rule compares the observed attention value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdType {
    /// UP wins iff (current - baseline) / baseline * 100 >= threshold
    #[serde(rename = "percentage")]
    Percentage,
    /// UP wins iff current >= threshold
    #[serde(rename = "absolute")]
    Absolute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketCategory {
    #[serde(rename = "sentiment")]
    Sentiment,
    #[serde(rename = "narrative")]
    Narrative,
    #[serde(rename = "viral")]
    Viral,
}

// ===== MARKET =====

/// A pool-based binary prediction market over an external attention signal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub question: String,
    pub category: MarketCategory,
    pub topic: String,

    /// Epoch milliseconds
    pub created_at: u64,
    /// Epoch milliseconds. Fixed at creation, never mutated.
    pub closes_at: u64,
    pub status: MarketStatus,

    /// Reference attention value the threshold rule compares against
    pub baseline: f64,
    pub threshold: f64,
    pub threshold_type: ThresholdType,

    pub up_pool: MarketPool,
    pub down_pool: MarketPool,

    /// External channel-network session bound to this market, if any
    pub session_id: Option<String>,

    // Settlement output
    pub result: Option<BetSide>,
    pub final_value: Option<f64>,
    pub ai_reasoning: Option<String>,
    pub resolved_at: Option<u64>,
}

impl Market {
    pub fn total_pot(&self) -> Amount {
        self.up_pool.total_amount + self.down_pool.total_amount
    }

    pub fn pool(&self, side: BetSide) -> &MarketPool {
        match side {
            BetSide::Up => &self.up_pool,
            BetSide::Down => &self.down_pool,
        }
    }

    pub fn pool_mut(&mut self, side: BetSide) -> &mut MarketPool {
        match side {
            BetSide::Up => &mut self.up_pool,
            BetSide::Down => &mut self.down_pool,
        }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.closes_at
    }
}

// ===== REQUEST BODIES =====

/// POST /markets/:id/bet
#[derive(Debug, Deserialize)]
pub struct BetRequest {
    #[serde(rename = "userAddress")]
    pub user_address: String,
    /// "UP" or "DOWN"
    pub side: String,
    /// Decimal-string integer in smallest units
    pub amount: String,
}

/// POST /markets
#[derive(Debug, Deserialize)]
pub struct CreateMarketRequest {
    pub question: String,
    pub category: MarketCategory,
    pub topic: String,
    /// Seconds until the market stops accepting bets
    #[serde(rename = "closesInSecs")]
    pub closes_in_secs: u64,
    pub baseline: f64,
    pub threshold: f64,
    #[serde(rename = "thresholdType")]
    pub threshold_type: ThresholdType,
}

/// POST /yellow/deposit
#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    #[serde(rename = "userAddress")]
    pub user_address: String,
    pub amount: String,
    /// On-chain custody transfer hash; required when a custody contract
    /// gates deposits (two-phase: chain confirms, then ledger credits)
    #[serde(rename = "txHash")]
    pub tx_hash: Option<String>,
}

/// POST /yellow/withdraw
#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    #[serde(rename = "userAddress")]
    pub user_address: String,
    pub amount: String,
}

/// GET /yellow/balance?address=
#[derive(Debug, Deserialize)]
pub struct BalanceQuery {
    pub address: String,
}

/// Parse a decimal-string integer amount. Rejects zero, negatives, and junk.
pub fn parse_amount(s: &str) -> Option<Amount> {
    let amount: Amount = s.trim().parse().ok()?;
    if amount == 0 {
        return None;
    }
    Some(amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("10000000"), Some(10_000_000));
        assert_eq!(parse_amount(" 42 "), Some(42));
        assert_eq!(parse_amount("0"), None);
        assert_eq!(parse_amount("-5"), None);
        assert_eq!(parse_amount("1.5"), None);
        assert_eq!(parse_amount("abc"), None);
    }

    #[test]
    fn test_bet_side_parse() {
        assert_eq!(BetSide::parse("UP"), Some(BetSide::Up));
        assert_eq!(BetSide::parse("DOWN"), Some(BetSide::Down));
        assert_eq!(BetSide::parse("up"), None);
        assert_eq!(BetSide::parse("MAYBE"), None);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let s = serde_json::to_string(&MarketStatus::Settling).unwrap();
        assert_eq!(s, "\"settling\"");
    }
}
