// Market registry - catalog of markets keyed by id
//
// Status writes for a given market are serialized by the facade's per-market
// locks; the registry itself only guards the map.

use std::collections::HashMap;

use crate::models::{
    now_millis, CreateMarketRequest, Market, MarketCategory, MarketStatus, ThresholdType,
};
use crate::pool::MarketPool;
use crate::models::BetSide;

/// Demo markets run on a 15 minute window
pub const DEMO_DURATION_MS: u64 = 15 * 60 * 1000;

#[derive(Debug, Default)]
pub struct MarketRegistry {
    markets: HashMap<String, Market>,
}

impl MarketRegistry {
    pub fn new() -> Self {
        Self {
            markets: HashMap::new(),
        }
    }

    /// Registry seeded with the three demo markets
    pub fn with_demo_markets() -> Self {
        let mut registry = Self::new();
        let now = now_millis();

        for (id, question, category, topic, baseline, threshold, threshold_type) in [
            (
                "btc-sentiment",
                "Will BTC sentiment score increase in the next 15 minutes?",
                MarketCategory::Sentiment,
                "BTC",
                65.0,
                5.0,
                ThresholdType::Percentage,
            ),
            (
                "ai-agents-narrative",
                "Will \"AI Agents\" mentions increase 25% in 15 minutes?",
                MarketCategory::Narrative,
                "AI Agents",
                12_500.0,
                25.0,
                ThresholdType::Percentage,
            ),
            (
                "viral-tweet",
                "Will @VitalikButerin's latest tweet hit 10k likes by market close?",
                MarketCategory::Viral,
                "Viral Tweet",
                2_500.0,
                10_000.0,
                ThresholdType::Absolute,
            ),
        ] {
            registry.markets.insert(
                id.to_string(),
                new_market(
                    id.to_string(),
                    question.to_string(),
                    category,
                    topic.to_string(),
                    now,
                    now + DEMO_DURATION_MS,
                    baseline,
                    threshold,
                    threshold_type,
                ),
            );
        }

        registry
    }

    /// Instantiate a market with empty pools and status open
    pub fn create(&mut self, req: CreateMarketRequest) -> &Market {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let now = now_millis();
        let market = new_market(
            id.clone(),
            req.question,
            req.category,
            req.topic,
            now,
            now + req.closes_in_secs * 1000,
            req.baseline,
            req.threshold,
            req.threshold_type,
        );
        self.markets.insert(id.clone(), market);
        self.markets.get(&id).unwrap()
    }

    pub fn get(&self, id: &str) -> Option<&Market> {
        self.markets.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Market> {
        self.markets.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.markets.contains_key(id)
    }

    /// All markets in creation order (stable across calls)
    pub fn list(&self) -> Vec<&Market> {
        let mut markets: Vec<&Market> = self.markets.values().collect();
        markets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        markets
    }

    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }
}

#[allow(clippy::too_many_arguments)]
fn new_market(
    id: String,
    question: String,
    category: MarketCategory,
    topic: String,
    created_at: u64,
    closes_at: u64,
    baseline: f64,
    threshold: f64,
    threshold_type: ThresholdType,
) -> Market {
    Market {
        id,
        question,
        category,
        topic,
        created_at,
        closes_at,
        status: MarketStatus::Open,
        baseline,
        threshold,
        threshold_type,
        up_pool: MarketPool::new(BetSide::Up),
        down_pool: MarketPool::new(BetSide::Down),
        session_id: None,
        result: None,
        final_value: None,
        ai_reasoning: None,
        resolved_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_markets_seeded_open() {
        let registry = MarketRegistry::with_demo_markets();
        assert_eq!(registry.len(), 3);

        let market = registry.get("btc-sentiment").unwrap();
        assert_eq!(market.status, MarketStatus::Open);
        assert_eq!(market.total_pot(), 0);
        assert_eq!(market.closes_at, market.created_at + DEMO_DURATION_MS);
    }

    #[test]
    fn test_create_and_get() {
        let mut registry = MarketRegistry::new();
        let id = registry
            .create(CreateMarketRequest {
                question: "Will SOL mentions double today?".to_string(),
                category: MarketCategory::Narrative,
                topic: "SOL".to_string(),
                closes_in_secs: 900,
                baseline: 400.0,
                threshold: 100.0,
                threshold_type: ThresholdType::Percentage,
            })
            .id
            .clone();

        let market = registry.get(&id).unwrap();
        assert_eq!(market.topic, "SOL");
        assert_eq!(market.status, MarketStatus::Open);
        assert!(registry.get("missing").is_none());
    }
}
