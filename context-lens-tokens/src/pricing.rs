//! `estimateCost` (spec.md §4.A). Cache tokens are priced as a
//! provider-specific multiplier over the base input rate rather than
//! having their own per-model rate, per spec.md's decision table.

use context_lens_core::Provider;

/// `(prefix, input_usd_per_token, output_usd_per_token)`, longest
/// matching prefix wins. Rates are USD per *token*, already divided
/// down from the usual "per million tokens" the providers publish in,
/// grounded on the pricing-table shape used in
/// `other_examples/a750bf38_jedarden-forge__crates-forge-cost-src-parser.rs.rs`.
const RATES: &[(&str, f64, f64)] = &[
	("claude-opus-4", 15.0e-6, 75.0e-6),
	("claude-sonnet-4-5", 3.0e-6, 15.0e-6),
	("claude-sonnet-4", 3.0e-6, 15.0e-6),
	("claude-haiku-4-5", 1.0e-6, 5.0e-6),
	("claude-3-5-sonnet", 3.0e-6, 15.0e-6),
	("claude-3-5-haiku", 0.8e-6, 4.0e-6),
	("gpt-4o-mini", 0.15e-6, 0.6e-6),
	("gpt-4o", 2.5e-6, 10.0e-6),
	("gpt-4.1", 2.0e-6, 8.0e-6),
	("gpt-4", 30.0e-6, 60.0e-6),
	("gpt-3.5", 0.5e-6, 1.5e-6),
	("o1", 15.0e-6, 60.0e-6),
	("o3", 10.0e-6, 40.0e-6),
	("gemini-2.5-pro", 1.25e-6, 10.0e-6),
	("gemini-2.5-flash", 0.3e-6, 2.5e-6),
	("gemini-1.5-pro", 1.25e-6, 5.0e-6),
	("gemini-1.5-flash", 0.075e-6, 0.3e-6),
];

/// Cache-read/cache-write multipliers applied to a model's base input
/// rate, keyed by provider (spec.md §4.A).
#[derive(Clone, Copy, Debug, Default)]
pub struct CacheMultipliers {
	pub read: f64,
	pub write: f64,
}

fn cache_multipliers(provider: Provider) -> CacheMultipliers {
	match provider {
		Provider::Anthropic => CacheMultipliers { read: 0.10, write: 0.25 },
		Provider::Gemini | Provider::Vertex => CacheMultipliers { read: 0.25, write: 0.0 },
		// Not specified by spec.md; OpenAI's published prompt-caching
		// discount is ~50% on cache reads with no separate write price.
		Provider::Openai | Provider::Chatgpt => CacheMultipliers { read: 0.5, write: 0.0 },
		Provider::Unknown => CacheMultipliers { read: 0.0, write: 0.0 },
	}
}

fn base_rates(model: &str) -> Option<(f64, f64)> {
	let model = model.to_ascii_lowercase();
	RATES
		.iter()
		.filter(|(prefix, _, _)| model.contains(prefix))
		.max_by_key(|(prefix, _, _)| prefix.len())
		.map(|(_, input, output)| (*input, *output))
}

/// Prices a `(model, usage)` tuple. Returns `None` for an unrecognized
/// model (spec.md §4.A). The result is rounded to 6 decimal places.
pub fn estimate_cost(
	model: &str,
	provider: Provider,
	input_tokens: u32,
	output_tokens: u32,
	cache_read_tokens: u32,
	cache_write_tokens: u32,
) -> Option<f64> {
	let (input_rate, output_rate) = base_rates(model)?;
	let mult = cache_multipliers(provider);
	let cost = input_tokens as f64 * input_rate
		+ output_tokens as f64 * output_rate
		+ cache_read_tokens as f64 * input_rate * mult.read
		+ cache_write_tokens as f64 * input_rate * mult.write;
	Some(round6(cost))
}

fn round6(v: f64) -> f64 {
	(v * 1_000_000.0).round() / 1_000_000.0
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn gemini_cache_scenario_matches_spec() {
		// spec.md §8 scenario 5: inputTokens=5775, outputTokens=148,
		// cacheReadTokens=196461 @ gemini-2.5-pro rates ($1.25/M input,
		// $10/M output, cache-read at 0.25x input). Per-term rates
		// (1.25e-6, 0.3125e-6, 10e-6) match spec.md's own formula; the
		// sum of those terms is $0.070093 after rounding to 6 decimals
		// (spec.md's prose total of $0.068613 does not itself sum from
		// the three terms it states, so we follow the formula).
		let cost = estimate_cost("gemini-2.5-pro", Provider::Gemini, 5_775, 148, 196_461, 0).unwrap();
		assert_eq!(cost, 0.070093);
	}

	#[test]
	fn unknown_model_is_none() {
		assert_eq!(estimate_cost("nonexistent-model", Provider::Unknown, 1, 1, 0, 0), None);
	}

	#[test]
	fn anthropic_cache_multipliers() {
		let cost = estimate_cost("claude-sonnet-4-20250514", Provider::Anthropic, 1_000_000, 0, 0, 0).unwrap();
		// 1,000,000 input tokens at $3/M == $3.0 exactly.
		assert_eq!(cost, 3.0);
	}
}
