// Attention data service
//
// Fetches the attention/sentiment signal markets settle against. Uses the
// LunarCrush API when a key is configured, and falls back to a deterministic
// mock generator otherwise, so settlement never blocks on provider outages.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub const LUNARCRUSH_BASE_URL: &str = "https://lunarcrush.com/api4/public";

/// Bounded wait for the attention-data fetch
pub const ATTENTION_TIMEOUT_SECS: u64 = 5;

/// Mock values are stable within a 5-minute window
pub const MOCK_WINDOW_MS: u64 = 300_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AttentionSource {
    #[serde(rename = "lunarcrush")]
    LunarCrush,
    #[serde(rename = "mock")]
    Mock,
}

impl AttentionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttentionSource::LunarCrush => "lunarcrush",
            AttentionSource::Mock => "mock",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AttentionSnapshot {
    pub topic: String,
    pub current: f64,
    pub source: AttentionSource,
}

#[derive(Debug, Deserialize)]
struct LunarCrushResponse {
    data: Option<LunarCrushMetrics>,
}

#[derive(Debug, Deserialize)]
struct LunarCrushMetrics {
    galaxy_score: Option<f64>,
    social_volume: Option<f64>,
}

pub struct AttentionService {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl AttentionService {
    pub fn new(api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(ATTENTION_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, api_key }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var("LUNARCRUSH_API_KEY").ok())
    }

    /// Current attention value for a topic. Tries LunarCrush first, then
    /// falls back to the deterministic mock generator.
    pub async fn attention_value(&self, topic: &str, baseline: f64) -> AttentionSnapshot {
        if let Some(current) = self.fetch_from_lunarcrush(topic).await {
            return AttentionSnapshot {
                topic: topic.to_string(),
                current,
                source: AttentionSource::LunarCrush,
            };
        }

        AttentionSnapshot {
            topic: topic.to_string(),
            current: mock_attention(topic, baseline),
            source: AttentionSource::Mock,
        }
    }

    async fn fetch_from_lunarcrush(&self, topic: &str) -> Option<f64> {
        let api_key = self.api_key.as_ref()?;
        let url = format!("{}/coins/{}/v1", LUNARCRUSH_BASE_URL, topic.to_lowercase());

        let response = match self.client.get(&url).bearer_auth(api_key).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(_) | Err(_) => {
                warn!(topic = %topic, "LunarCrush fetch failed, using mock data");
                return None;
            }
        };

        let body: LunarCrushResponse = match response.json().await {
            Ok(b) => b,
            Err(_) => {
                warn!(topic = %topic, "LunarCrush response unparseable, using mock data");
                return None;
            }
        };

        let metrics = body.data?;
        metrics.galaxy_score.or(metrics.social_volume)
    }
}

/// Deterministic mock attention value: seeded from the topic and the current
/// 5-minute window, varying within +/-30% of the baseline.
pub fn mock_attention(topic: &str, baseline: f64) -> f64 {
    let window = crate::models::now_millis() / MOCK_WINDOW_MS;
    mock_attention_at(topic, baseline, window)
}

pub fn mock_attention_at(topic: &str, baseline: f64, window: u64) -> f64 {
    // 32-bit wrapping arithmetic keeps the sequence stable across platforms
    let mut seed: i32 = 0;
    for unit in topic.encode_utf16() {
        seed = seed.wrapping_mul(31).wrapping_add(unit as i32);
    }
    seed = seed.wrapping_mul(37).wrapping_add(window as i32);

    let normalized = (seed % 1000).abs() as f64 / 1000.0;
    let variation = (normalized - 0.5) * 0.6;
    (baseline * (1.0 + variation)).round()
}
