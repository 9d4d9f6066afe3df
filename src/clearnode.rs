/// PulseMarkets - ClearNode RPC Client
///
/// HTTP client for the external payment-channel network (session create,
/// state submit, session close). Supports mock mode for local development
/// without a live ClearNode connection.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Default timeout for ClearNode RPC round-trips
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Base mainnet chain id
pub const YELLOW_CHAIN_ID: u64 = 8453;

/// USDC contract address on Base mainnet
pub const USDC_ADDRESS: &str = "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913";

/// Custody and adjudicator contracts on Base (fallbacks; a live deployment
/// refreshes them via get_config)
pub const BASE_CUSTODY_ADDRESS: &str = "0x490fb189DdE3a01B00be9BA5F41e3447FbC838b6";
pub const BASE_ADJUDICATOR_ADDRESS: &str = "0x7de4A0736Cf5740fD3Ca2F2e9cc85c9AC223eF0C";

/// Operator (house) wallet used when none is configured
pub const DEFAULT_OPERATOR_ADDRESS: &str = "0x1111111111111111111111111111111111111111";

/// Auth scope requested during the handshake
pub const AUTH_SCOPE: &str = "console";

/// Challenge period for app sessions (0 = instant settlement)
pub const CHALLENGE_PERIOD: u64 = 0;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Clone)]
pub enum ClearNodeError {
    /// Auth handshake has not completed yet
    NotAuthenticated,
    /// HTTP transport failure (retryable)
    RequestFailed(String),
    /// Bounded wait elapsed (retryable)
    Timeout,
    /// The network answered but refused the operation
    Protocol(String),
    /// The network answered with a shape we could not parse
    Decode(String),
    /// Session creation did not yield a session identifier
    SessionCreateFailed(String),
}

impl std::fmt::Display for ClearNodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClearNodeError::NotAuthenticated => write!(f, "ClearNode client not authenticated"),
            ClearNodeError::RequestFailed(msg) => write!(f, "ClearNode request failed: {}", msg),
            ClearNodeError::Timeout => write!(f, "ClearNode RPC timeout"),
            ClearNodeError::Protocol(msg) => write!(f, "ClearNode rejected operation: {}", msg),
            ClearNodeError::Decode(msg) => write!(f, "Invalid ClearNode response: {}", msg),
            ClearNodeError::SessionCreateFailed(msg) => {
                write!(f, "Session creation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ClearNodeError {}

// ============================================================================
// REQUEST/RESPONSE TYPES
// ============================================================================

/// Allocation entry as sent on the wire (amounts as decimal strings)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationPayload {
    pub participant: String,
    pub asset: String,
    pub amount: String,
}

#[derive(Debug, Serialize)]
struct AuthRequest<'a> {
    address: &'a str,
    scope: &'a str,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    session_token: Option<String>,
    error: Option<String>,
}

/// App session definition submitted on create
#[derive(Debug, Clone, Serialize)]
pub struct SessionDefinition {
    pub application: String,
    pub participants: Vec<String>,
    pub weights: Vec<u32>,
    pub quorum: u32,
    pub challenge: u64,
    pub nonce: u64,
}

#[derive(Debug, Serialize)]
struct CreateSessionRequest<'a> {
    definition: &'a SessionDefinition,
    allocations: &'a [AllocationPayload],
}

#[derive(Debug, Deserialize)]
struct CreateSessionResponse {
    app_session_id: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct SubmitStateRequest<'a> {
    app_session_id: &'a str,
    allocations: &'a [AllocationPayload],
}

#[derive(Debug, Deserialize)]
struct SubmitStateResponse {
    version: Option<u64>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct CloseSessionRequest<'a> {
    app_session_id: &'a str,
    allocations: &'a [AllocationPayload],
}

#[derive(Debug, Deserialize)]
struct CloseSessionResponse {
    closed: Option<bool>,
    error: Option<String>,
}

/// Result of a close instruction. "Already closed" is success for callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    AlreadyClosed,
}

/// Network parameters callers need for any on-chain leg
#[derive(Debug, Clone, Serialize)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub asset: String,
    pub usdc_address: String,
    pub custody_address: String,
    pub adjudicator_address: String,
    pub clearnode_url: Option<String>,
    pub mock_mode: bool,
}

/// Connection status snapshot for health reporting
#[derive(Debug, Clone, Serialize)]
pub struct ClearNodeStatus {
    pub connected: bool,
    pub authenticated: bool,
    pub mock_mode: bool,
}

// ============================================================================
// CLEARNODE CLIENT
// ============================================================================

/// Client for the external payment-channel network gateway
pub struct ClearNodeClient {
    /// ClearNode gateway URL. None means mock mode.
    endpoint_url: Option<String>,

    /// Operator (house) wallet address, party to every session
    operator_address: String,

    /// HTTP client with the RPC timeout applied
    client: Client,

    /// Signing capability obtained from the auth handshake
    session_token: std::sync::Mutex<Option<String>>,
}

impl ClearNodeClient {
    pub fn new(endpoint_url: Option<String>, operator_address: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| Client::new());

        ClearNodeClient {
            endpoint_url,
            operator_address,
            client,
            session_token: std::sync::Mutex::new(None),
        }
    }

    /// Build from YELLOW_RPC_URL and OPERATOR_ADDRESS environment variables.
    /// Without YELLOW_RPC_URL the client runs in mock mode.
    pub fn from_env() -> Self {
        let endpoint_url = std::env::var("YELLOW_RPC_URL").ok();
        let operator_address = std::env::var("OPERATOR_ADDRESS")
            .unwrap_or_else(|_| DEFAULT_OPERATOR_ADDRESS.to_string());
        Self::new(endpoint_url, operator_address)
    }

    pub fn is_mock_mode(&self) -> bool {
        self.endpoint_url.is_none()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session_token.lock().unwrap().is_some()
    }

    pub fn operator_address(&self) -> &str {
        &self.operator_address
    }

    pub fn status(&self) -> ClearNodeStatus {
        ClearNodeStatus {
            connected: self.is_mock_mode() || self.is_authenticated(),
            authenticated: self.is_authenticated(),
            mock_mode: self.is_mock_mode(),
        }
    }

    pub fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            chain_id: YELLOW_CHAIN_ID,
            asset: crate::models::USDC_ASSET.to_string(),
            usdc_address: USDC_ADDRESS.to_string(),
            custody_address: BASE_CUSTODY_ADDRESS.to_string(),
            adjudicator_address: BASE_ADJUDICATOR_ADDRESS.to_string(),
            clearnode_url: self.endpoint_url.clone(),
            mock_mode: self.is_mock_mode(),
        }
    }

    // ========================================================================
    // AUTHENTICATION
    // ========================================================================

    /// Complete the auth handshake and store the signing token. Prerequisite
    /// to every session operation.
    pub async fn connect(&self) -> Result<(), ClearNodeError> {
        if self.is_mock_mode() {
            let mut token = self.session_token.lock().unwrap();
            if token.is_none() {
                *token = Some(format!("mock_token_{}", uuid::Uuid::new_v4().simple()));
                info!("ClearNode: mock mode, no live connection");
            }
            return Ok(());
        }

        let url = format!("{}/auth", self.endpoint_url.as_ref().unwrap());
        let request = AuthRequest {
            address: &self.operator_address,
            scope: AUTH_SCOPE,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            return Err(ClearNodeError::RequestFailed(format!(
                "ClearNode returned status {}",
                response.status()
            )));
        }

        let auth: AuthResponse = response
            .json()
            .await
            .map_err(|e| ClearNodeError::Decode(e.to_string()))?;

        if let Some(msg) = auth.error {
            return Err(ClearNodeError::Protocol(msg));
        }

        let token = auth
            .session_token
            .ok_or_else(|| ClearNodeError::Decode("auth response missing session_token".into()))?;

        *self.session_token.lock().unwrap() = Some(token);
        info!(operator = %self.operator_address, "ClearNode: authenticated");
        Ok(())
    }

    fn bearer_token(&self) -> Result<String, ClearNodeError> {
        self.session_token
            .lock()
            .unwrap()
            .clone()
            .ok_or(ClearNodeError::NotAuthenticated)
    }

    // ========================================================================
    // APP SESSIONS
    // ========================================================================

    /// Create a multi-party app session; returns the session identifier.
    pub async fn create_app_session(
        &self,
        definition: &SessionDefinition,
        allocations: &[AllocationPayload],
    ) -> Result<String, ClearNodeError> {
        if self.is_mock_mode() {
            let session_id = format!("mock_session_{}", uuid::Uuid::new_v4().simple());
            info!(session_id = %session_id, application = %definition.application,
                "ClearNode: [mock] session created");
            return Ok(session_id);
        }

        let token = self.bearer_token()?;
        let url = format!("{}/app_sessions", self.endpoint_url.as_ref().unwrap());
        let request = CreateSessionRequest {
            definition,
            allocations,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            return Err(ClearNodeError::SessionCreateFailed(format!(
                "ClearNode returned status {}",
                response.status()
            )));
        }

        let body: CreateSessionResponse = response
            .json()
            .await
            .map_err(|e| ClearNodeError::Decode(e.to_string()))?;

        if let Some(msg) = body.error {
            return Err(ClearNodeError::SessionCreateFailed(msg));
        }

        body.app_session_id
            .ok_or_else(|| ClearNodeError::SessionCreateFailed("no app_session_id in response".into()))
    }

    /// Submit a full-state allocation update to an open session.
    pub async fn submit_app_state(
        &self,
        session_id: &str,
        allocations: &[AllocationPayload],
    ) -> Result<(), ClearNodeError> {
        if self.is_mock_mode() {
            info!(session_id = %session_id, participants = allocations.len(),
                "ClearNode: [mock] state submitted");
            return Ok(());
        }

        let token = self.bearer_token()?;
        let url = format!(
            "{}/app_sessions/{}/state",
            self.endpoint_url.as_ref().unwrap(),
            session_id
        );
        let request = SubmitStateRequest {
            app_session_id: session_id,
            allocations,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            return Err(ClearNodeError::RequestFailed(format!(
                "ClearNode returned status {}",
                response.status()
            )));
        }

        let body: SubmitStateResponse = response
            .json()
            .await
            .map_err(|e| ClearNodeError::Decode(e.to_string()))?;

        if let Some(msg) = body.error {
            return Err(ClearNodeError::Protocol(msg));
        }

        let _ = body.version;
        Ok(())
    }

    /// Issue a close instruction with the final allocation vector.
    /// A session the network already closed reports `AlreadyClosed`.
    pub async fn close_app_session(
        &self,
        session_id: &str,
        allocations: &[AllocationPayload],
    ) -> Result<CloseOutcome, ClearNodeError> {
        if self.is_mock_mode() {
            info!(session_id = %session_id, "ClearNode: [mock] session closed");
            return Ok(CloseOutcome::Closed);
        }

        let token = self.bearer_token()?;
        let url = format!(
            "{}/app_sessions/{}/close",
            self.endpoint_url.as_ref().unwrap(),
            session_id
        );
        let request = CloseSessionRequest {
            app_session_id: session_id,
            allocations,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            return Err(ClearNodeError::RequestFailed(format!(
                "ClearNode returned status {}",
                response.status()
            )));
        }

        let body: CloseSessionResponse = response
            .json()
            .await
            .map_err(|e| ClearNodeError::Decode(e.to_string()))?;

        if let Some(msg) = body.error {
            // Retrying a close after a timeout may find the session gone
            if msg.contains("already closed") || msg.contains("not found") {
                warn!(session_id = %session_id, "ClearNode: session already closed");
                return Ok(CloseOutcome::AlreadyClosed);
            }
            return Err(ClearNodeError::Protocol(msg));
        }

        if body.closed == Some(false) {
            return Err(ClearNodeError::Protocol("close not accepted".into()));
        }

        Ok(CloseOutcome::Closed)
    }
}

fn map_transport_error(e: reqwest::Error) -> ClearNodeError {
    if e.is_timeout() {
        ClearNodeError::Timeout
    } else {
        ClearNodeError::RequestFailed(e.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================
