// HTTP request handlers for the Pulse Markets API
//
// Amounts cross the boundary as decimal-string integers in the asset's
// smallest unit; the handlers parse and validate them before anything
// touches a ledger.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::{ServiceError, SettlementReport, SharedState};
use crate::models::{
    parse_amount, BalanceQuery, BetRequest, BetSide, CreateMarketRequest, DepositRequest,
    Market, WithdrawRequest,
};
use crate::pool::{pool_stats, MarketPool, PoolStats};

type ApiError = (StatusCode, Json<Value>);

/// Build the full API router with CORS applied.
pub fn router(state: SharedState) -> Router {
    Router::new()
        // ===== MARKET ENDPOINTS =====
        .route("/markets", get(get_markets))
        .route("/markets", post(create_market))
        .route("/markets/:id", get(get_market))
        .route("/markets/:id/pools", get(get_market_pools))
        // ===== BETTING =====
        .route("/markets/:id/bet", post(place_bet))
        // ===== SETTLEMENT =====
        .route("/settle/:id", post(settle_market))
        // ===== YELLOW CHANNEL ENDPOINTS =====
        .route("/yellow/deposit", post(yellow_deposit))
        .route("/yellow/withdraw", post(yellow_withdraw))
        .route("/yellow/balance", get(yellow_balance))
        .route("/yellow/config", get(yellow_config))
        // ===== HEALTH CHECK =====
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

fn service_error(e: ServiceError) -> ApiError {
    (e.status_code(), Json(json!({ "error": e.to_string() })))
}

fn bad_request(msg: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": msg })))
}

// ===== JSON VIEWS =====

fn pools_view(stats: &PoolStats) -> Value {
    json!({
        "upPool": stats.up_total.to_string(),
        "downPool": stats.down_total.to_string(),
        "totalPot": stats.total_pot.to_string(),
        "upParticipants": stats.up_participants,
        "downParticipants": stats.down_participants,
        "upPercentage": stats.up_percentage,
        "downPercentage": stats.down_percentage,
    })
}

fn pool_entries_view(pool: &MarketPool) -> Vec<Value> {
    pool.entries
        .iter()
        .map(|e| {
            json!({
                "participant": e.participant,
                "amount": e.amount.to_string(),
            })
        })
        .collect()
}

fn market_view(market: &Market) -> Value {
    let stats = pool_stats(&market.up_pool, &market.down_pool);
    json!({
        "id": market.id,
        "question": market.question,
        "category": market.category,
        "topic": market.topic,
        "status": market.status,
        "createdAt": market.created_at,
        "closesAt": market.closes_at,
        "baseline": market.baseline,
        "threshold": market.threshold,
        "thresholdType": market.threshold_type,
        "pools": pools_view(&stats),
        "upBets": pool_entries_view(&market.up_pool),
        "downBets": pool_entries_view(&market.down_pool),
        "sessionId": market.session_id,
        "result": market.result,
        "finalValue": market.final_value,
        "aiReasoning": market.ai_reasoning,
        "resolvedAt": market.resolved_at,
    })
}

fn settlement_view(report: &SettlementReport) -> Value {
    let distributions: Vec<Value> = report
        .distributions
        .iter()
        .map(|d| {
            json!({
                "participant": d.participant,
                "side": d.side,
                "stakeAmount": d.stake_amount.to_string(),
                "payoutAmount": d.payout_amount.to_string(),
                "profitPercent": d.profit_percent,
            })
        })
        .collect();

    json!({
        "success": true,
        "marketId": report.market_id,
        "winner": report.winner,
        "reasoning": report.reasoning,
        "attentionData": report.attention_data,
        "dataSource": report.data_source,
        "confidence": report.confidence,
        "distributions": distributions,
        "totalPot": report.total_pot.to_string(),
        "fee": report.fee.to_string(),
    })
}

// ===== MARKET ENDPOINTS =====

pub async fn get_markets(State(state): State<SharedState>) -> Json<Value> {
    let markets: Vec<Value> = state.list_markets().iter().map(market_view).collect();
    Json(json!({ "markets": markets }))
}

pub async fn get_market(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let market = state.get_market(&id).map_err(service_error)?;
    Ok(Json(market_view(&market)))
}

pub async fn get_market_pools(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let stats = state.market_pools(&id).map_err(service_error)?;
    Ok(Json(pools_view(&stats)))
}

pub async fn create_market(
    State(state): State<SharedState>,
    Json(payload): Json<CreateMarketRequest>,
) -> Result<Json<Value>, ApiError> {
    if payload.question.trim().is_empty() {
        return Err(bad_request("Question must not be empty"));
    }
    if payload.topic.trim().is_empty() {
        return Err(bad_request("Topic must not be empty"));
    }
    if payload.closes_in_secs == 0 {
        return Err(bad_request("closesInSecs must be positive"));
    }

    let market = state.create_market(payload);
    Ok(Json(json!({ "success": true, "market": market_view(&market) })))
}

// ===== BETTING =====

pub async fn place_bet(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(payload): Json<BetRequest>,
) -> Result<Json<Value>, ApiError> {
    let side = BetSide::parse(&payload.side)
        .ok_or_else(|| bad_request("Invalid side: expected UP or DOWN"))?;
    let amount = parse_amount(&payload.amount)
        .ok_or_else(|| bad_request("Invalid amount: expected a positive integer string"))?;
    if payload.user_address.trim().is_empty() {
        return Err(bad_request("userAddress must not be empty"));
    }

    let stats = state
        .place_bet(&id, &payload.user_address, side, amount)
        .await
        .map_err(service_error)?;
    let (balance, _) = state.balance_view(&payload.user_address);

    Ok(Json(json!({
        "success": true,
        "marketId": id,
        "side": side,
        "amount": amount.to_string(),
        "newBalance": balance.to_string(),
        "pools": pools_view(&stats),
    })))
}

// ===== SETTLEMENT =====

pub async fn settle_market(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let report = state.settle_market(&id).await.map_err(service_error)?;
    Ok(Json(settlement_view(&report)))
}

// ===== YELLOW CHANNEL ENDPOINTS =====

pub async fn yellow_deposit(
    State(state): State<SharedState>,
    Json(payload): Json<DepositRequest>,
) -> Result<Json<Value>, ApiError> {
    let amount = parse_amount(&payload.amount)
        .ok_or_else(|| bad_request("Invalid amount: expected a positive integer string"))?;
    if payload.user_address.trim().is_empty() {
        return Err(bad_request("userAddress must not be empty"));
    }

    let account = state
        .deposit(&payload.user_address, amount, payload.tx_hash.as_deref())
        .map_err(service_error)?;

    Ok(Json(json!({
        "success": true,
        "address": payload.user_address,
        "balance": account.balance.to_string(),
        "channelId": account.channel_id,
    })))
}

pub async fn yellow_withdraw(
    State(state): State<SharedState>,
    Json(payload): Json<WithdrawRequest>,
) -> Result<Json<Value>, ApiError> {
    let amount = parse_amount(&payload.amount)
        .ok_or_else(|| bad_request("Invalid amount: expected a positive integer string"))?;

    let remaining = state
        .withdraw(&payload.user_address, amount)
        .map_err(service_error)?;

    Ok(Json(json!({
        "success": true,
        "address": payload.user_address,
        "balance": remaining.to_string(),
    })))
}

pub async fn yellow_balance(
    State(state): State<SharedState>,
    Query(query): Query<BalanceQuery>,
) -> Json<Value> {
    let (balance, channel_id) = state.balance_view(&query.address);
    Json(json!({
        "address": query.address,
        "balance": balance.to_string(),
        "channelId": channel_id,
    }))
}

pub async fn yellow_config(State(state): State<SharedState>) -> Json<Value> {
    let config = state.network_config();
    let status = state.clearnode_status();
    Json(json!({
        "network": config,
        "clearnode": status,
    }))
}

// ===== HEALTH CHECK =====

pub async fn health_check(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "pulse-markets",
        "markets": state.list_markets().len(),
        "activeSessions": state.active_session_count(),
        "clearnode": state.clearnode_status(),
    }))
}
