//! Component C: turns a provider-specific request body into the
//! provider-agnostic [`ContextInfo`] shape (spec.md §4.C).

mod anthropic;
mod chat_completions;
mod common;
mod gemini;
mod raw;
mod responses;

use context_lens_core::{redistribute_residual, ApiFormat, ContextInfo, ParsedMessage, Provider};
use serde_json::Value;

/// Builds a [`ContextInfo`] from a parsed JSON request body, selecting
/// one of the five parse modes by `(api_format, provider)`.
pub fn parse_context(provider: Provider, api_format: ApiFormat, body: &Value) -> ContextInfo {
	match api_format {
		ApiFormat::AnthropicMessages => anthropic::parse(body),
		ApiFormat::ChatgptBackend | ApiFormat::Responses => responses::parse(body, provider, api_format),
		ApiFormat::Gemini => gemini::parse(body),
		ApiFormat::ChatCompletions => chat_completions::parse(body),
		ApiFormat::Unknown | ApiFormat::Raw => parse_unclassified(body, provider, api_format),
	}
}

/// Builds a raw-mode [`ContextInfo`] for a non-JSON request body
/// (spec.md §4.E's POST-but-not-JSON path).
pub fn parse_raw(raw_text: &str) -> ContextInfo {
	raw::parse(raw_text)
}

/// Best-effort shape for a request that classified with no api format
/// of its own (e.g. a bare `/v1/complete` or an unmatched Anthropic
/// SDK call, spec.md §4.B rules 3-4): follow the chat-completions
/// shape if `messages` is present, otherwise fall back to a single raw
/// message over the whole body.
fn parse_unclassified(body: &Value, provider: Provider, api_format: ApiFormat) -> ContextInfo {
	if body.get("messages").and_then(Value::as_array).is_some() {
		let mut info = chat_completions::parse(body);
		info.provider = provider;
		info.api_format = api_format;
		return info;
	}
	let mut info = raw::parse(&body.to_string());
	info.provider = provider;
	info
}

/// `rescaleContextTokens` (spec.md §4.C): proportionally rescales
/// `system_tokens`, `tools_tokens`, and every message's `tokens` so
/// they sum to `authoritative_total`, preserving the
/// `total == system + tools + messages` invariant exactly.
pub fn rescale_context_tokens(info: &mut ContextInfo, authoritative_total: u32) {
	let mut values = Vec::with_capacity(2 + info.messages.len());
	values.push(info.system_tokens);
	values.push(info.tools_tokens);
	values.extend(info.messages.iter().map(|m| m.tokens));

	let rescaled = redistribute_residual(&values, authoritative_total);

	info.system_tokens = rescaled[0];
	info.tools_tokens = rescaled[1];
	for (msg, tokens) in info.messages.iter_mut().zip(rescaled.iter().skip(2)) {
		msg.tokens = *tokens;
	}
	info.recompute_totals();
}

#[allow(dead_code)]
fn assert_totals_consistent(info: &ContextInfo) -> bool {
	let sum: u32 = info.messages.iter().map(|m: &ParsedMessage| m.tokens).sum();
	sum == info.messages_tokens && info.total_tokens == info.system_tokens + info.tools_tokens + info.messages_tokens
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn dispatches_anthropic_messages() {
		let body = json!({"model": "claude-sonnet-4-5", "messages": [{"role": "user", "content": "hi"}]});
		let info = parse_context(Provider::Anthropic, ApiFormat::AnthropicMessages, &body);
		assert_eq!(info.provider, Provider::Anthropic);
		assert_eq!(info.messages.len(), 1);
	}

	#[test]
	fn unclassified_with_messages_follows_chat_completions_shape() {
		let body = json!({"model": "x", "messages": [{"role": "user", "content": "hi"}]});
		let info = parse_context(Provider::Anthropic, ApiFormat::Unknown, &body);
		assert_eq!(info.provider, Provider::Anthropic);
		assert_eq!(info.api_format, ApiFormat::Unknown);
		assert_eq!(info.messages.len(), 1);
	}

	#[test]
	fn rescale_preserves_total_invariant() {
		let body = json!({
			"model": "claude-sonnet-4-5",
			"system": "You are helpful.",
			"messages": [
				{"role": "user", "content": "a".repeat(400)},
				{"role": "assistant", "content": "b".repeat(40)},
			],
		});
		let mut info = parse_context(Provider::Anthropic, ApiFormat::AnthropicMessages, &body);
		rescale_context_tokens(&mut info, 10_000);
		assert_eq!(info.total_tokens, 10_000);
		assert!(assert_totals_consistent(&info));
	}
}
