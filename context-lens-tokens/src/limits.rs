//! `getContextLimit` (spec.md §4.A). The table's exact entries are
//! domain data (spec.md §1: out of scope); what matters is the
//! longest-match lookup contract.

/// `(prefix, context_window_tokens)`, longest matching prefix wins.
const LIMITS: &[(&str, u32)] = &[
	("claude-opus-4", 200_000),
	("claude-sonnet-4-5", 200_000),
	("claude-sonnet-4", 200_000),
	("claude-haiku-4-5", 200_000),
	("claude-3-5-sonnet", 200_000),
	("claude-3-5-haiku", 200_000),
	("claude", 200_000),
	("gpt-4o-mini", 128_000),
	("gpt-4o", 128_000),
	("gpt-4.1", 1_047_576),
	("gpt-4", 8_192),
	("gpt-3.5", 16_385),
	("o1", 200_000),
	("o3", 200_000),
	("o4-mini", 200_000),
	("gemini-2.5-pro", 1_048_576),
	("gemini-2.5-flash", 1_048_576),
	("gemini-1.5-pro", 2_097_152),
	("gemini-1.5-flash", 1_048_576),
	("gemini", 1_048_576),
];

/// Returns `None` for a model that matches no known prefix, per spec.md
/// §4.A ("result is null for unknown models").
pub fn get_context_limit(model: &str) -> Option<u32> {
	let model = model.to_ascii_lowercase();
	LIMITS
		.iter()
		.filter(|(prefix, _)| model.contains(prefix))
		.max_by_key(|(prefix, _)| prefix.len())
		.map(|(_, limit)| *limit)
}
