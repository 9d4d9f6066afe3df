// Market sessions - per-market multi-party app session state
//
// One session per market, created lazily on the first bet and closed exactly
// once at settlement. The session mirrors both pools because the external
// session membership must stay in lockstep with pool membership: every bet
// recomputes the full participant/weight/allocation vectors and submits a
// full-state update (O(participants) per bet, fine at expected pool sizes).

use serde::Serialize;
use tracing::info;

use crate::clearnode::{
    AllocationPayload, ClearNodeClient, ClearNodeError, SessionDefinition, CHALLENGE_PERIOD,
};
use crate::distribution::SessionAllocation;
use crate::models::{now_millis, BetSide, USDC_ASSET};
use crate::pool::{Amount, MarketPool, PoolError};

/// Fixed minority weight retained by the operator in every session
pub const OPERATOR_WEIGHT: u32 = 10;

/// Weight share split evenly across user participants
pub const USER_WEIGHT_SHARE: u32 = 90;

/// Quorum once users have joined
pub const SESSION_QUORUM: u32 = 60;

/// Mirrored session state for one market
#[derive(Debug, Clone, Serialize)]
pub struct MarketSession {
    pub market_id: String,
    pub session_id: String,
    pub operator_address: String,
    /// User addresses in join order. Membership order must stay stable
    /// across state submissions, so it is tracked explicitly rather than
    /// derived from the pools (a hedging bettor would shift otherwise).
    pub user_participants: Vec<String>,
    pub up_pool: MarketPool,
    pub down_pool: MarketPool,
    /// Close completion is tracked locally so a retried settle is a no-op
    pub closed: bool,
    pub created_at: u64,
    /// Last allocation vector submitted to the network
    pub allocations: Vec<AllocationPayload>,
}

impl MarketSession {
    /// Unique addresses party to the session: operator first, then users in
    /// join order. A hedged user appears once.
    pub fn participants(&self) -> Vec<String> {
        let mut participants = vec![self.operator_address.clone()];
        participants.extend(self.user_participants.iter().cloned());
        participants
    }

    /// Operator keeps a fixed minority weight; users split the remainder.
    pub fn weights(&self) -> Vec<u32> {
        let user_count = self.participants().len() - 1;
        let user_weight = if user_count > 0 {
            USER_WEIGHT_SHARE / user_count as u32
        } else {
            USER_WEIGHT_SHARE
        };
        let mut weights = vec![OPERATOR_WEIGHT];
        weights.extend(std::iter::repeat(user_weight).take(user_count));
        weights
    }

    /// Total stake a participant holds across both sides
    pub fn total_stake_of(&self, participant: &str) -> Amount {
        self.up_pool.stake_of(participant) + self.down_pool.stake_of(participant)
    }

    /// Full allocation vector: operator deposits 0 (it only collects fees),
    /// each user carries their combined stake.
    pub fn allocation_vector(&self) -> Vec<AllocationPayload> {
        self.participants()
            .into_iter()
            .enumerate()
            .map(|(idx, participant)| {
                let amount = if idx == 0 {
                    0
                } else {
                    self.total_stake_of(&participant)
                };
                AllocationPayload {
                    participant,
                    asset: USDC_ASSET.to_string(),
                    amount: amount.to_string(),
                }
            })
            .collect()
    }

    fn pool_mut(&mut self, side: BetSide) -> &mut MarketPool {
        match side {
            BetSide::Up => &mut self.up_pool,
            BetSide::Down => &mut self.down_pool,
        }
    }
}

// ===== SESSION OPERATIONS =====

/// Create the app session for a market. The network requires at least two
/// named parties, so the operator and the first bettor open it together;
/// the first bettor's stake arrives via the add-bet update that follows.
pub async fn create_market_session(
    client: &ClearNodeClient,
    market_id: &str,
    first_participant: &str,
) -> Result<MarketSession, ClearNodeError> {
    let mut session = MarketSession {
        market_id: market_id.to_string(),
        session_id: String::new(),
        operator_address: client.operator_address().to_string(),
        user_participants: vec![first_participant.to_string()],
        up_pool: MarketPool::new(BetSide::Up),
        down_pool: MarketPool::new(BetSide::Down),
        closed: false,
        created_at: now_millis(),
        allocations: Vec::new(),
    };

    let definition = SessionDefinition {
        application: format!("PulseMarkets:{}", market_id),
        participants: vec![
            session.operator_address.clone(),
            first_participant.to_string(),
        ],
        weights: vec![OPERATOR_WEIGHT, USER_WEIGHT_SHARE],
        quorum: SESSION_QUORUM,
        challenge: CHALLENGE_PERIOD,
        nonce: now_millis(),
    };
    let allocations = vec![
        AllocationPayload {
            participant: session.operator_address.clone(),
            asset: USDC_ASSET.to_string(),
            amount: "0".to_string(),
        },
        AllocationPayload {
            participant: first_participant.to_string(),
            asset: USDC_ASSET.to_string(),
            amount: "0".to_string(),
        },
    ];

    session.session_id = client.create_app_session(&definition, &allocations).await?;
    session.allocations = allocations;

    info!(market_id = %market_id, session_id = %session.session_id,
        "Market session created");
    Ok(session)
}

/// Add a bet to an open session: recompute the full vectors with the new
/// stake and submit them. The mirrored pools are only updated after the
/// network accepts the state, so a failed update leaves the session intact.
pub async fn add_bet_to_session(
    client: &ClearNodeClient,
    session: &mut MarketSession,
    participant: &str,
    side: BetSide,
    amount: Amount,
) -> Result<(), ClearNodeError> {
    if session.closed {
        return Err(ClearNodeError::Protocol(format!(
            "Session {} is closed, cannot add bets",
            session.session_id
        )));
    }

    // Stage the updated membership and pools without touching the live
    // session yet
    let mut staged = session.clone();
    if !staged.user_participants.iter().any(|p| p == participant) {
        staged.user_participants.push(participant.to_string());
    }
    staged
        .pool_mut(side)
        .add_stake(participant, amount)
        .map_err(|e: PoolError| ClearNodeError::Protocol(e.to_string()))?;

    let allocations = staged.allocation_vector();

    client
        .submit_app_state(&session.session_id, &allocations)
        .await?;

    staged.allocations = allocations;
    *session = staged;

    info!(session_id = %session.session_id, participant = %participant,
        side = %side, amount = %amount, "Bet added to market session");
    Ok(())
}

/// Submit the final settlement allocations, then close the session.
/// Idempotent: a session already closed (locally or by the network after a
/// retried timeout) is treated as success.
pub async fn settle_and_close(
    client: &ClearNodeClient,
    session: &mut MarketSession,
    final_allocations: &[SessionAllocation],
) -> Result<(), ClearNodeError> {
    if session.closed {
        info!(session_id = %session.session_id, "Session already closed, skipping");
        return Ok(());
    }

    let payloads: Vec<AllocationPayload> = final_allocations
        .iter()
        .map(|a| AllocationPayload {
            participant: a.participant.clone(),
            asset: a.asset.clone(),
            amount: a.amount.to_string(),
        })
        .collect();

    client
        .submit_app_state(&session.session_id, &payloads)
        .await?;
    client.close_app_session(&session.session_id, &payloads).await?;

    session.closed = true;
    session.allocations = payloads;

    info!(session_id = %session.session_id, market_id = %session.market_id,
        "Market session settled and closed");
    Ok(())
}

// ===== TESTS =====

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clearnode::DEFAULT_OPERATOR_ADDRESS;

    fn mock_client() -> ClearNodeClient {
        ClearNodeClient::new(None, DEFAULT_OPERATOR_ADDRESS.to_string())
    }

    #[tokio::test]
    async fn test_create_session_has_two_parties() {
        let client = mock_client();
        client.connect().await.unwrap();

        let session = create_market_session(&client, "btc-sentiment", "0xalice")
            .await
            .unwrap();

        assert!(session.session_id.starts_with("mock_session_"));
        assert_eq!(session.allocations.len(), 2);
        assert_eq!(session.allocations[0].participant, DEFAULT_OPERATOR_ADDRESS);
        assert!(!session.closed);
    }

    #[tokio::test]
    async fn test_add_bet_updates_vectors() {
        let client = mock_client();
        client.connect().await.unwrap();

        let mut session = create_market_session(&client, "m1", "0xalice")
            .await
            .unwrap();
        add_bet_to_session(&client, &mut session, "0xalice", BetSide::Up, 10_000_000)
            .await
            .unwrap();
        add_bet_to_session(&client, &mut session, "0xbob", BetSide::Down, 20_000_000)
            .await
            .unwrap();
        add_bet_to_session(&client, &mut session, "0xcarol", BetSide::Up, 30_000_000)
            .await
            .unwrap();

        // Operator + 3 users; operator keeps 10, users split 90 evenly
        assert_eq!(session.participants().len(), 4);
        assert_eq!(session.weights(), vec![10, 30, 30, 30]);

        // Join order is stable: bob's DOWN slot does not move when carol
        // (a later UP bettor) joins
        assert_eq!(
            session.participants()[1..],
            ["0xalice", "0xbob", "0xcarol"]
        );

        let allocations = session.allocation_vector();
        assert_eq!(allocations[0].amount, "0");
        assert_eq!(allocations[1].amount, "10000000");
        assert_eq!(allocations[2].amount, "20000000");
        assert_eq!(allocations[3].amount, "30000000");
    }

    #[tokio::test]
    async fn test_hedged_user_appears_once() {
        let client = mock_client();
        client.connect().await.unwrap();

        let mut session = create_market_session(&client, "m1", "0xalice")
            .await
            .unwrap();
        add_bet_to_session(&client, &mut session, "0xalice", BetSide::Up, 10_000_000)
            .await
            .unwrap();
        add_bet_to_session(&client, &mut session, "0xalice", BetSide::Down, 5_000_000)
            .await
            .unwrap();

        let participants = session.participants();
        assert_eq!(participants.len(), 2);
        assert_eq!(session.total_stake_of("0xalice"), 15_000_000);

        let allocations = session.allocation_vector();
        assert_eq!(allocations.len(), 2);
        assert_eq!(allocations[1].amount, "15000000");
    }

    #[tokio::test]
    async fn test_settle_and_close_is_idempotent() {
        let client = mock_client();
        client.connect().await.unwrap();

        let mut session = create_market_session(&client, "m1", "0xalice")
            .await
            .unwrap();
        add_bet_to_session(&client, &mut session, "0xalice", BetSide::Up, 10_000_000)
            .await
            .unwrap();

        let finals = vec![SessionAllocation {
            participant: "0xalice".to_string(),
            asset: USDC_ASSET.to_string(),
            amount: 9_750_000,
        }];

        settle_and_close(&client, &mut session, &finals).await.unwrap();
        assert!(session.closed);

        // Second settle is a no-op, and betting a closed session fails
        settle_and_close(&client, &mut session, &finals).await.unwrap();
        let err =
            add_bet_to_session(&client, &mut session, "0xbob", BetSide::Up, 1_000_000).await;
        assert!(err.is_err());
    }
}
