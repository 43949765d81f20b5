//! raw parse mode (spec.md §4.C) — used when the request body does
//! not parse as JSON at all.

use context_lens_core::{ApiFormat, ContextInfo, ParsedMessage, Provider};
use context_lens_tokens::estimate_tokens_value;
use serde_json::Value;

const RAW_CAPTURE_LIMIT_BYTES: usize = 2_000;

pub fn parse(raw_text: &str) -> ContextInfo {
	let truncated = truncate_to_char_boundary(raw_text, RAW_CAPTURE_LIMIT_BYTES);
	let tokens = estimate_tokens_value(&Value::String(truncated.to_string()), None);

	let message = ParsedMessage { role: "raw".to_string(), content: truncated.to_string(), content_blocks: None, tokens };

	let mut info = ContextInfo {
		provider: Provider::Unknown,
		api_format: ApiFormat::Raw,
		model: String::new(),
		system_prompts: Vec::new(),
		tools: Vec::new(),
		messages: vec![message],
		system_tokens: 0,
		tools_tokens: 0,
		messages_tokens: 0,
		total_tokens: 0,
	};
	info.recompute_totals();
	info
}

/// Truncates `s` to at most `limit` bytes without splitting a
/// multi-byte UTF-8 character.
fn truncate_to_char_boundary(s: &str, limit: usize) -> &str {
	if s.len() <= limit {
		return s;
	}
	let mut end = limit;
	while end > 0 && !s.is_char_boundary(end) {
		end -= 1;
	}
	&s[..end]
}
