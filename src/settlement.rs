// Settlement rules and reasoning
//
// The threshold rule is a pure function of (baseline, threshold, type,
// current) so every settlement is exactly reproducible from its inputs.
// The narrative step calls an external model with a deterministic templated
// fallback - settlement never blocks on it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::models::{BetSide, Market, ThresholdType};

pub const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const REASONING_MODEL: &str = "gpt-4o-mini";

/// Bounded wait for the narrative generation call
pub const REASONING_TIMEOUT_SECS: u64 = 10;

// ===== WINNER DETERMINATION =====

/// Attention snapshot recorded with every settlement
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttentionData {
    pub baseline: f64,
    pub current: f64,
    pub change: f64,
    pub change_percent: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct WinnerDetermination {
    pub winner: BetSide,
    pub change: f64,
    pub change_percent: f64,
}

/// Apply the market's threshold rule to the observed attention value.
pub fn determine_winner(market: &Market, current: f64) -> WinnerDetermination {
    let change = current - market.baseline;
    let change_percent = if market.baseline > 0.0 {
        change / market.baseline * 100.0
    } else {
        0.0
    };

    let winner = match market.threshold_type {
        // UP wins if attention grew by at least the threshold percent
        ThresholdType::Percentage => {
            if change_percent >= market.threshold {
                BetSide::Up
            } else {
                BetSide::Down
            }
        }
        // UP wins if the raw value reaches the threshold
        ThresholdType::Absolute => {
            if current >= market.threshold {
                BetSide::Up
            } else {
                BetSide::Down
            }
        }
    };

    WinnerDetermination {
        winner,
        change,
        change_percent,
    }
}

/// Display confidence in the outcome, saturating at 1.0
pub fn confidence(change_percent: f64) -> f64 {
    (change_percent.abs() / 10.0).min(1.0)
}

// ===== REASONING =====

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

pub struct ReasoningService {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl ReasoningService {
    pub fn new(api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REASONING_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, api_key }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var("OPENAI_API_KEY").ok())
    }

    /// Narrative explanation of the outcome. Falls back to a deterministic
    /// templated sentence whenever the model call fails.
    pub async fn generate_reasoning(
        &self,
        market: &Market,
        winner: BetSide,
        current: f64,
        change_percent: f64,
        data_source: &str,
    ) -> String {
        match self
            .generate_remote(market, winner, current, change_percent, data_source)
            .await
        {
            Some(text) => text,
            None => fallback_reasoning(market, winner, current, change_percent),
        }
    }

    async fn generate_remote(
        &self,
        market: &Market,
        winner: BetSide,
        current: f64,
        change_percent: f64,
        data_source: &str,
    ) -> Option<String> {
        let api_key = self.api_key.as_ref()?;

        let threshold_unit = match market.threshold_type {
            ThresholdType::Percentage => "%",
            ThresholdType::Absolute => "",
        };
        let prompt = format!(
            "You are an AI settlement agent for a prediction market about attention/sentiment.\n\n\
             Market: \"{}\"\n\
             Topic: {}\n\
             Baseline: {}\n\
             Current: {}\n\
             Change: {}{:.1}%\n\
             Threshold: {}{}\n\
             Winner: {}\n\
             Data source: {}\n\n\
             Write a concise 2-3 sentence analysis explaining why {} won. \
             Reference the data. Be factual and direct.",
            market.question,
            market.topic,
            market.baseline,
            current,
            if change_percent > 0.0 { "+" } else { "" },
            change_percent,
            market.threshold,
            threshold_unit,
            winner,
            data_source,
            winner,
        );

        let body = json!({
            "model": REASONING_MODEL,
            "max_tokens": 200,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = match self
            .client
            .post(OPENAI_API_URL)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => r,
            Ok(_) | Err(_) => {
                warn!(market_id = %market.id, "Reasoning generation failed, using template");
                return None;
            }
        };

        let chat: ChatResponse = response.json().await.ok()?;
        chat.choices.into_iter().next().map(|c| c.message.content)
    }
}

/// Deterministic templated reasoning built from the same inputs as the prompt
pub fn fallback_reasoning(
    market: &Market,
    winner: BetSide,
    current: f64,
    change_percent: f64,
) -> String {
    let direction = match winner {
        BetSide::Up => "increased",
        BetSide::Down => "decreased",
    };
    let threshold_kind = match market.threshold_type {
        ThresholdType::Percentage => "percentage",
        ThresholdType::Absolute => "absolute",
    };
    format!(
        "Attention for {} {} from {} to {} ({}{:.1}%). {} wins based on {} threshold of {}.",
        market.topic,
        direction,
        market.baseline,
        current,
        if change_percent > 0.0 { "+" } else { "" },
        change_percent,
        winner,
        threshold_kind,
        market.threshold,
    )
}

// ===== TESTS =====

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CreateMarketRequest, MarketCategory};
    use crate::registry::MarketRegistry;

    fn market(baseline: f64, threshold: f64, threshold_type: ThresholdType) -> Market {
        let mut registry = MarketRegistry::new();
        registry
            .create(CreateMarketRequest {
                question: "Will attention rise?".to_string(),
                category: MarketCategory::Sentiment,
                topic: "BTC".to_string(),
                closes_in_secs: 900,
                baseline,
                threshold,
                threshold_type,
            })
            .clone()
    }

    #[test]
    fn test_percentage_threshold_rule() {
        let m = market(100.0, 5.0, ThresholdType::Percentage);

        // +5% exactly hits the threshold: UP
        assert_eq!(determine_winner(&m, 105.0).winner, BetSide::Up);
        assert_eq!(determine_winner(&m, 120.0).winner, BetSide::Up);
        assert_eq!(determine_winner(&m, 104.9).winner, BetSide::Down);
        assert_eq!(determine_winner(&m, 80.0).winner, BetSide::Down);
    }

    #[test]
    fn test_absolute_threshold_rule() {
        let m = market(2_500.0, 10_000.0, ThresholdType::Absolute);

        assert_eq!(determine_winner(&m, 10_000.0).winner, BetSide::Up);
        assert_eq!(determine_winner(&m, 12_345.0).winner, BetSide::Up);
        assert_eq!(determine_winner(&m, 9_999.0).winner, BetSide::Down);
    }

    #[test]
    fn test_winner_is_reproducible() {
        let m = market(65.0, 5.0, ThresholdType::Percentage);
        let a = determine_winner(&m, 70.2);
        let b = determine_winner(&m, 70.2);
        assert_eq!(a.winner, b.winner);
        assert_eq!(a.change_percent, b.change_percent);
    }

    #[test]
    fn test_zero_baseline_change_percent() {
        let m = market(0.0, 5.0, ThresholdType::Percentage);
        let det = determine_winner(&m, 50.0);
        assert_eq!(det.change_percent, 0.0);
        assert_eq!(det.winner, BetSide::Down);
    }

    #[test]
    fn test_confidence_saturates() {
        assert_eq!(confidence(2.5), 0.25);
        assert_eq!(confidence(-7.0), 0.7);
        assert_eq!(confidence(35.0), 1.0);
    }

    #[test]
    fn test_fallback_reasoning_mentions_inputs() {
        let m = market(65.0, 5.0, ThresholdType::Percentage);
        let text = fallback_reasoning(&m, BetSide::Up, 72.0, 10.8);
        assert!(text.contains("BTC"));
        assert!(text.contains("increased"));
        assert!(text.contains("+10.8%"));
        assert!(text.contains("UP wins"));
    }

    #[tokio::test]
    async fn test_reasoning_without_key_uses_template() {
        let service = ReasoningService::new(None);
        let m = market(65.0, 5.0, ThresholdType::Percentage);
        let text = service
            .generate_reasoning(&m, BetSide::Down, 60.0, -7.7, "mock")
            .await;
        assert!(text.contains("decreased"));
        assert!(text.contains("DOWN wins"));
    }
}
