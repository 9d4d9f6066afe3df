// Application state - the service facade
//
// One AppState owns the ClearNode connection, the session map, the market
// registry, and the balance ledger. Mutating flows for a given market run
// under that market's async lock, so concurrent bets never race on pool
// totals and a bet can never interleave with settlement. The std mutexes
// guard quick map access only and are never held across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::http::StatusCode;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OnceCell};
use tracing::{error, info};

use crate::attention::AttentionService;
use crate::balances::{BalanceError, BalanceLedger, UserBalance};
use crate::clearnode::{ClearNodeClient, ClearNodeError, ClearNodeStatus, NetworkConfig};
use crate::distribution::{
    compute_distribution, Distribution, DistributionError, HOUSE_FEE_PERCENT,
};
use crate::models::{now_millis, BetSide, CreateMarketRequest, Market, MarketStatus};
use crate::pool::{pool_stats, Amount, PoolStats};
use crate::registry::MarketRegistry;
use crate::sessions::{
    add_bet_to_session, create_market_session, settle_and_close, MarketSession,
};
use crate::settlement::{
    confidence, determine_winner, AttentionData, ReasoningService,
};

pub type SharedState = Arc<AppState>;

// ===== ERROR TYPES =====

#[derive(Debug)]
pub enum ServiceError {
    MarketNotFound(String),
    /// Market is not open for betting (locked, settling, or closed)
    MarketClosed(String),
    MarketExpired(String),
    AlreadySettled(String),
    /// Live custody deployments require a confirmed on-chain transfer
    /// before the off-chain balance is credited
    DepositUnconfirmed,
    Balance(BalanceError),
    Distribution(DistributionError),
    Network(ClearNodeError),
    Internal(String),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::MarketNotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::MarketClosed(_)
            | ServiceError::MarketExpired(_)
            | ServiceError::AlreadySettled(_)
            | ServiceError::DepositUnconfirmed
            | ServiceError::Balance(_)
            | ServiceError::Distribution(_) => StatusCode::BAD_REQUEST,
            ServiceError::Network(_) | ServiceError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::MarketNotFound(id) => write!(f, "Market not found: {}", id),
            ServiceError::MarketClosed(status) => write!(f, "Market is {}", status),
            ServiceError::MarketExpired(id) => write!(f, "Market has expired: {}", id),
            ServiceError::AlreadySettled(id) => write!(f, "Market already settled: {}", id),
            ServiceError::DepositUnconfirmed => {
                write!(f, "Deposit requires a confirmed on-chain transaction hash")
            }
            ServiceError::Balance(e) => write!(f, "{}", e),
            ServiceError::Distribution(e) => write!(f, "{}", e),
            ServiceError::Network(e) => write!(f, "{}", e),
            ServiceError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<BalanceError> for ServiceError {
    fn from(e: BalanceError) -> Self {
        ServiceError::Balance(e)
    }
}

impl From<DistributionError> for ServiceError {
    fn from(e: DistributionError) -> Self {
        ServiceError::Distribution(e)
    }
}

impl From<ClearNodeError> for ServiceError {
    fn from(e: ClearNodeError) -> Self {
        ServiceError::Network(e)
    }
}

// ===== SETTLEMENT REPORT =====

/// Full settlement output returned from POST /settle/:id
#[derive(Debug, Serialize)]
pub struct SettlementReport {
    pub market_id: String,
    pub winner: BetSide,
    pub reasoning: String,
    pub attention_data: AttentionData,
    pub data_source: String,
    pub confidence: f64,
    pub distributions: Vec<Distribution>,
    pub total_pot: Amount,
    pub fee: Amount,
}

// ===== APP STATE =====

pub struct AppState {
    registry: Mutex<MarketRegistry>,
    balances: Mutex<BalanceLedger>,
    sessions: Mutex<HashMap<String, MarketSession>>,
    /// Per-market serialization for bet and settlement critical sections
    market_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    clearnode: ClearNodeClient,
    attention: AttentionService,
    reasoning: ReasoningService,
    /// Single-flight connect guard: concurrent callers await one attempt
    connect_guard: OnceCell<()>,
}

impl AppState {
    pub fn new(
        clearnode: ClearNodeClient,
        attention: AttentionService,
        reasoning: ReasoningService,
    ) -> Self {
        Self {
            registry: Mutex::new(MarketRegistry::with_demo_markets()),
            balances: Mutex::new(BalanceLedger::new()),
            sessions: Mutex::new(HashMap::new()),
            market_locks: Mutex::new(HashMap::new()),
            clearnode,
            attention,
            reasoning,
            connect_guard: OnceCell::new(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            ClearNodeClient::from_env(),
            AttentionService::from_env(),
            ReasoningService::from_env(),
        )
    }

    /// Auth handshake with the channel network, at most one attempt in
    /// flight; every market or balance operation awaits its completion.
    async fn ensure_connected(&self) -> Result<(), ServiceError> {
        self.connect_guard
            .get_or_try_init(|| self.clearnode.connect())
            .await
            .map_err(ServiceError::from)?;
        Ok(())
    }

    fn market_lock(&self, market_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.market_locks.lock().unwrap();
        locks
            .entry(market_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    // ========================================================================
    // READS
    // ========================================================================

    pub fn list_markets(&self) -> Vec<Market> {
        let registry = self.registry.lock().unwrap();
        registry.list().into_iter().cloned().collect()
    }

    pub fn get_market(&self, market_id: &str) -> Result<Market, ServiceError> {
        let registry = self.registry.lock().unwrap();
        registry
            .get(market_id)
            .cloned()
            .ok_or_else(|| ServiceError::MarketNotFound(market_id.to_string()))
    }

    pub fn market_pools(&self, market_id: &str) -> Result<PoolStats, ServiceError> {
        let market = self.get_market(market_id)?;
        Ok(pool_stats(&market.up_pool, &market.down_pool))
    }

    pub fn create_market(&self, req: CreateMarketRequest) -> Market {
        let mut registry = self.registry.lock().unwrap();
        let market = registry.create(req).clone();
        info!(market_id = %market.id, topic = %market.topic, "Market created");
        market
    }

    pub fn balance_view(&self, address: &str) -> (Amount, Option<String>) {
        let balances = self.balances.lock().unwrap();
        (balances.balance_of(address), balances.channel_of(address))
    }

    pub fn clearnode_status(&self) -> ClearNodeStatus {
        self.clearnode.status()
    }

    pub fn network_config(&self) -> NetworkConfig {
        self.clearnode.network_config()
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    // ========================================================================
    // BALANCE OPERATIONS
    // ========================================================================

    /// Credit a deposit. Against a live custody contract the off-chain
    /// credit is gated on the confirmed on-chain transfer (two-phase);
    /// in mock mode the credit is immediate.
    ///
    /// The transaction hash is caller-attested: this layer records it as
    /// the gate but does not verify the transfer on chain. A deployment
    /// that cannot trust its callers has to confirm the hash against the
    /// custody contract before routing the request here.
    pub fn deposit(
        &self,
        address: &str,
        amount: Amount,
        tx_hash: Option<&str>,
    ) -> Result<UserBalance, ServiceError> {
        if !self.clearnode.is_mock_mode() && tx_hash.is_none() {
            return Err(ServiceError::DepositUnconfirmed);
        }

        let mut balances = self.balances.lock().unwrap();
        let account = balances.deposit(address, amount).clone();
        info!(address = %address, amount = %amount, "Deposit credited");
        Ok(account)
    }

    pub fn withdraw(&self, address: &str, amount: Amount) -> Result<Amount, ServiceError> {
        let mut balances = self.balances.lock().unwrap();
        let remaining = balances.withdraw(address, amount)?;
        info!(address = %address, amount = %amount, "Withdrawal applied");
        Ok(remaining)
    }

    // ========================================================================
    // BETTING
    // ========================================================================

    /// Place a stake on one side of a market.
    ///
    /// The balance is deducted first; the external session is created or
    /// updated next; only then is the pool mutated. A failed session call
    /// refunds the deduction, so the local ledger and the external
    /// allocation vector never diverge.
    pub async fn place_bet(
        &self,
        market_id: &str,
        user_address: &str,
        side: BetSide,
        amount: Amount,
    ) -> Result<PoolStats, ServiceError> {
        self.ensure_connected().await?;

        let lock = self.market_lock(market_id);
        let _guard = lock.lock().await;

        // Validate market state under the lock
        {
            let registry = self.registry.lock().unwrap();
            let market = registry
                .get(market_id)
                .ok_or_else(|| ServiceError::MarketNotFound(market_id.to_string()))?;
            if market.status != MarketStatus::Open {
                return Err(ServiceError::MarketClosed(
                    market.status.as_str().to_string(),
                ));
            }
            if market.is_expired(now_millis()) {
                return Err(ServiceError::MarketExpired(market_id.to_string()));
            }
        }

        // Deduct before anything is reflected in a pool
        self.balances
            .lock()
            .unwrap()
            .deduct_for_bet(user_address, amount)?;

        // Sync the external session; refund on any failure
        let existing = self.sessions.lock().unwrap().get(market_id).cloned();
        let mut session = match existing {
            Some(session) => session,
            None => {
                match create_market_session(&self.clearnode, market_id, user_address).await {
                    Ok(session) => session,
                    Err(e) => {
                        self.refund(user_address, amount);
                        error!(market_id = %market_id, error = %e, "Session create failed, bet aborted");
                        return Err(e.into());
                    }
                }
            }
        };

        if let Err(e) =
            add_bet_to_session(&self.clearnode, &mut session, user_address, side, amount).await
        {
            // Keep the (possibly fresh) session for retry; its pools were
            // not touched by the failed update
            self.sessions
                .lock()
                .unwrap()
                .insert(market_id.to_string(), session);
            self.refund(user_address, amount);
            error!(market_id = %market_id, error = %e, "Session update failed, bet aborted");
            return Err(e.into());
        }

        let session_id = session.session_id.clone();
        self.sessions
            .lock()
            .unwrap()
            .insert(market_id.to_string(), session);

        // Commit to the pool ledger
        let stats = {
            let mut registry = self.registry.lock().unwrap();
            let market = registry
                .get_mut(market_id)
                .ok_or_else(|| ServiceError::MarketNotFound(market_id.to_string()))?;
            market
                .pool_mut(side)
                .add_stake(user_address, amount)
                .map_err(|e| ServiceError::Internal(e.to_string()))?;
            market.session_id = Some(session_id);
            pool_stats(&market.up_pool, &market.down_pool)
        };

        info!(market_id = %market_id, user = %user_address, side = %side,
            amount = %amount, "Bet placed");
        Ok(stats)
    }

    fn refund(&self, address: &str, amount: Amount) {
        self.balances.lock().unwrap().credit_payout(address, amount);
    }

    // ========================================================================
    // SETTLEMENT
    // ========================================================================

    /// Settle a market: fetch attention data, pick the winner, distribute
    /// the pot, close the channel session, and persist the final state.
    ///
    /// Only the channel-network close may fail the operation; the market
    /// then reverts to open so settlement can be retried.
    pub async fn settle_market(
        &self,
        market_id: &str,
    ) -> Result<SettlementReport, ServiceError> {
        self.ensure_connected().await?;

        let lock = self.market_lock(market_id);
        let _guard = lock.lock().await;

        // Snapshot the market and enter the settling state
        let market = {
            let mut registry = self.registry.lock().unwrap();
            let market = registry
                .get_mut(market_id)
                .ok_or_else(|| ServiceError::MarketNotFound(market_id.to_string()))?;
            if market.status == MarketStatus::Closed {
                return Err(ServiceError::AlreadySettled(market_id.to_string()));
            }
            market.status = MarketStatus::Settling;
            market.clone()
        };

        let snapshot = self
            .attention
            .attention_value(&market.topic, market.baseline)
            .await;
        let det = determine_winner(&market, snapshot.current);
        let attention_data = AttentionData {
            baseline: market.baseline,
            current: snapshot.current,
            change: det.change,
            change_percent: det.change_percent,
        };

        info!(market_id = %market_id, winner = %det.winner,
            current = snapshot.current, source = snapshot.source.as_str(),
            "Settling market");

        let mut distributions: Vec<Distribution> = Vec::new();
        let mut total_pot = market.total_pot();
        let mut fee: Amount = 0;

        if !market.up_pool.is_empty() && !market.down_pool.is_empty() {
            // Financial settlement: proportional distribution + session close
            let outcome = match compute_distribution(
                &market.up_pool,
                &market.down_pool,
                det.winner,
                HOUSE_FEE_PERCENT,
            ) {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.revert_to_open(market_id);
                    return Err(e.into());
                }
            };

            if let Err(e) = self
                .close_session(market_id, &outcome.allocations)
                .await
            {
                self.revert_to_open(market_id);
                error!(market_id = %market_id, error = %e,
                    "Session close failed, settlement aborted");
                return Err(e.into());
            }

            // Credit winners on the local ledger
            {
                let mut balances = self.balances.lock().unwrap();
                for d in &outcome.distributions {
                    if d.payout_amount > 0 {
                        balances.credit_payout(&d.participant, d.payout_amount);
                    }
                }
            }

            total_pot = outcome.total_pot;
            fee = outcome.fee;
            distributions = outcome.distributions;
        } else if market.total_pot() > 0 {
            // One-sided market: nothing to redistribute. Close the session
            // by returning every stake and refund the local ledger.
            let refunds: Vec<crate::distribution::SessionAllocation> = market
                .up_pool
                .entries
                .iter()
                .chain(market.down_pool.entries.iter())
                .map(|e| crate::distribution::SessionAllocation {
                    participant: e.participant.clone(),
                    asset: crate::models::USDC_ASSET.to_string(),
                    amount: e.amount,
                })
                .collect();

            if let Err(e) = self.close_session(market_id, &refunds).await {
                self.revert_to_open(market_id);
                error!(market_id = %market_id, error = %e,
                    "Session close failed, settlement aborted");
                return Err(e.into());
            }

            let mut balances = self.balances.lock().unwrap();
            for refund in &refunds {
                balances.credit_payout(&refund.participant, refund.amount);
            }
        }

        // Narrative step never blocks settlement; it falls back internally
        let reasoning = self
            .reasoning
            .generate_reasoning(
                &market,
                det.winner,
                snapshot.current,
                det.change_percent,
                snapshot.source.as_str(),
            )
            .await;

        // Persist final state
        {
            let mut registry = self.registry.lock().unwrap();
            if let Some(market) = registry.get_mut(market_id) {
                market.status = MarketStatus::Closed;
                market.result = Some(det.winner);
                market.final_value = Some(snapshot.current);
                market.ai_reasoning = Some(reasoning.clone());
                market.resolved_at = Some(now_millis());
            }
        }
        self.sessions.lock().unwrap().remove(market_id);
        // A closed market never takes the lock again; drop its map entry.
        // The guard we hold keeps the mutex itself alive until we return.
        self.market_locks.lock().unwrap().remove(market_id);

        info!(market_id = %market_id, winner = %det.winner, fee = %fee,
            "Market settled");

        Ok(SettlementReport {
            market_id: market_id.to_string(),
            winner: det.winner,
            reasoning,
            attention_data,
            data_source: snapshot.source.as_str().to_string(),
            confidence: confidence(det.change_percent),
            distributions,
            total_pot,
            fee,
        })
    }

    async fn close_session(
        &self,
        market_id: &str,
        allocations: &[crate::distribution::SessionAllocation],
    ) -> Result<(), ClearNodeError> {
        let existing = self.sessions.lock().unwrap().get(market_id).cloned();
        let Some(mut session) = existing else {
            // No session was ever created for this market (no bets reached
            // the network); nothing to close
            return Ok(());
        };

        settle_and_close(&self.clearnode, &mut session, allocations).await?;
        self.sessions
            .lock()
            .unwrap()
            .insert(market_id.to_string(), session);
        Ok(())
    }

    fn revert_to_open(&self, market_id: &str) {
        let mut registry = self.registry.lock().unwrap();
        if let Some(market) = registry.get_mut(market_id) {
            if market.status == MarketStatus::Settling {
                market.status = MarketStatus::Open;
            }
        }
    }
}

// ===== TESTS =====
