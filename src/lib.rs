/// Pulse Markets - attention prediction markets with channel settlement
/// Exports all modules for use as a library crate

pub mod app_state;
pub mod attention;
pub mod balances;
pub mod clearnode;
pub mod distribution;
pub mod handlers;
pub mod models;
pub mod pool;
pub mod registry;
pub mod sessions;
pub mod settlement;

pub use app_state::{AppState, ServiceError, SettlementReport, SharedState};
pub use attention::{mock_attention, AttentionService, AttentionSnapshot, AttentionSource};
pub use balances::{BalanceError, BalanceLedger, UserBalance};
pub use clearnode::{
    ClearNodeClient, ClearNodeError, ClearNodeStatus, CloseOutcome, NetworkConfig,
};
pub use distribution::{
    compute_distribution, Distribution, DistributionError, DistributionOutcome,
    SessionAllocation, HOUSE_FEE_PERCENT,
};
pub use models::{
    parse_amount, BetSide, Market, MarketCategory, MarketStatus, ThresholdType,
};
pub use pool::{pool_stats, Amount, MarketPool, PoolEntry, PoolError, PoolStats};
pub use registry::MarketRegistry;
pub use sessions::MarketSession;
pub use settlement::{confidence, determine_winner, ReasoningService, WinnerDetermination};
