use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-1K-token prices for one `(provider, model)` pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

/// A pricing row as exposed over the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingEntry {
    pub provider: String,
    pub model: String,
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

/// Static `(provider, model)` price map with a `"*"` wildcard per
/// provider. Mutated rarely (config reload), predominantly read;
/// guarded by a reader-writer lock never held across an await.
pub struct PricingTable {
    prices: RwLock<HashMap<(String, String), ModelPrice>>,
}

impl PricingTable {
    /// Table pre-loaded with the built-in prices
    pub fn new() -> Self {
        Self {
            prices: RwLock::new(default_prices()),
        }
    }

    /// Empty table (prices loaded later via `replace`)
    pub fn empty() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
        }
    }

    /// Price lookup: exact `(provider, model)`, then the lowercased
    /// model, then the provider wildcard.
    pub fn get(&self, provider: &str, model: &str) -> Option<ModelPrice> {
        let prices = self.prices.read();
        prices
            .get(&(provider.to_string(), model.to_string()))
            .or_else(|| prices.get(&(provider.to_string(), model.to_lowercase())))
            .or_else(|| prices.get(&(provider.to_string(), "*".to_string())))
            .copied()
    }

    /// Cost of a call in USD; zero when no price is known
    pub fn cost(&self, provider: &str, model: &str, tokens_in: u64, tokens_out: u64) -> f64 {
        match self.get(provider, model) {
            Some(price) => {
                tokens_in as f64 / 1000.0 * price.input_per_1k
                    + tokens_out as f64 / 1000.0 * price.output_per_1k
            }
            None => 0.0,
        }
    }

    /// Full table, sorted for stable API output
    pub fn entries(&self) -> Vec<PricingEntry> {
        let mut entries: Vec<PricingEntry> = self
            .prices
            .read()
            .iter()
            .map(|((provider, model), price)| PricingEntry {
                provider: provider.clone(),
                model: model.clone(),
                input_per_1k: price.input_per_1k,
                output_per_1k: price.output_per_1k,
            })
            .collect();
        entries.sort_by(|a, b| (&a.provider, &a.model).cmp(&(&b.provider, &b.model)));
        entries
    }

    /// Rows for one provider
    pub fn entries_for_provider(&self, provider: &str) -> Vec<PricingEntry> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.provider == provider)
            .collect()
    }

    /// Swap the whole table (config reload)
    pub fn replace(&self, entries: Vec<PricingEntry>) {
        let mut map = HashMap::new();
        for entry in entries {
            map.insert(
                (entry.provider, entry.model),
                ModelPrice {
                    input_per_1k: entry.input_per_1k,
                    output_per_1k: entry.output_per_1k,
                },
            );
        }
        *self.prices.write() = map;
        tracing::info!("Pricing table reloaded");
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::new()
    }
}

fn price(input_per_1k: f64, output_per_1k: f64) -> ModelPrice {
    ModelPrice {
        input_per_1k,
        output_per_1k,
    }
}

fn default_prices() -> HashMap<(String, String), ModelPrice> {
    let mut map = HashMap::new();
    let mut add = |provider: &str, model: &str, p: ModelPrice| {
        map.insert((provider.to_string(), model.to_string()), p);
    };

    add("openai", "gpt-4", price(0.03, 0.06));
    add("openai", "gpt-4-turbo", price(0.01, 0.03));
    add("openai", "gpt-3.5-turbo", price(0.0005, 0.0015));
    add("openai", "*", price(0.01, 0.03));

    add("anthropic", "claude-3-opus", price(0.015, 0.075));
    add("anthropic", "claude-3-sonnet", price(0.003, 0.015));
    add("anthropic", "claude-3-haiku", price(0.00025, 0.00125));
    add("anthropic", "*", price(0.003, 0.015));

    // On-premise capacity is accounted as free at the gateway
    add("local", "*", price(0.0, 0.0));

    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_chain() {
        let table = PricingTable::new();

        // Exact match
        let exact = table.get("openai", "gpt-4").unwrap();
        assert!((exact.input_per_1k - 0.03).abs() < f64::EPSILON);

        // Lowercased model
        let lowered = table.get("openai", "GPT-4").unwrap();
        assert_eq!(lowered, exact);

        // Wildcard
        let wildcard = table.get("openai", "gpt-5-preview").unwrap();
        assert!((wildcard.input_per_1k - 0.01).abs() < f64::EPSILON);

        // Unknown provider
        assert!(table.get("cohere", "command-r").is_none());
    }

    #[test]
    fn test_cost_is_exact_for_integer_token_counts() {
        let table = PricingTable::new();

        // 1500 in / 500 out on gpt-4: 1.5*0.03 + 0.5*0.06 = 0.075
        let cost = table.cost("openai", "gpt-4", 1500, 500);
        assert!((cost - 0.075).abs() < 1e-12);

        // Unknown pricing yields zero
        assert_eq!(table.cost("cohere", "command-r", 1000, 1000), 0.0);

        // Local is free
        assert_eq!(table.cost("local", "llama-3-8b", 5000, 5000), 0.0);
    }

    #[test]
    fn test_replace_swaps_table() {
        let table = PricingTable::new();
        table.replace(vec![PricingEntry {
            provider: "openai".to_string(),
            model: "*".to_string(),
            input_per_1k: 1.0,
            output_per_1k: 2.0,
        }]);

        assert!(table.get("anthropic", "claude-3-opus").is_none());
        let wildcard = table.get("openai", "anything").unwrap();
        assert!((wildcard.output_per_1k - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_provider_slice() {
        let table = PricingTable::new();
        let openai = table.entries_for_provider("openai");
        assert_eq!(openai.len(), 4);
        assert!(openai.iter().all(|e| e.provider == "openai"));
    }
}
