//! `parseResponseUsage` (spec.md §4.C): extracts token usage and finish
//! reasons from a captured response, whether that response was a single
//! JSON document or an accumulated SSE chunk blob.

use context_lens_core::ParsedUsage;
use eventsource_stream::Eventsource;
use futures::stream;
use futures::StreamExt;
use serde_json::Value;

/// Parses a non-streaming JSON response body into [`ParsedUsage`].
pub fn parse_non_streaming_usage(response: &Value) -> ParsedUsage {
	let mut usage = ParsedUsage {
		input_tokens: None,
		output_tokens: None,
		cache_read_tokens: None,
		cache_write_tokens: None,
		thinking_tokens: None,
		model: response.get("model").and_then(Value::as_str).map(str::to_string),
		finish_reasons: Vec::new(),
		stream: false,
	};

	apply_anthropic_openai_usage(&mut usage, response.get("usage"));
	apply_gemini_usage_metadata(&mut usage, response.get("usageMetadata").or_else(|| response.pointer("/response/usageMetadata")));

	if let Some(reason) = response.get("stop_reason").and_then(Value::as_str) {
		usage.finish_reasons.push(reason.to_string());
	}
	if let Some(choices) = response.get("choices").and_then(Value::as_array) {
		for choice in choices {
			if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
				usage.finish_reasons.push(reason.to_string());
			}
		}
	}
	if let Some(candidates) = response.pointer("/response/candidates").or_else(|| response.get("candidates")).and_then(Value::as_array)
	{
		for candidate in candidates {
			if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
				usage.finish_reasons.push(reason.to_string());
			}
		}
	}

	usage
}

fn apply_anthropic_openai_usage(usage: &mut ParsedUsage, node: Option<&Value>) {
	let Some(node) = node else { return };
	if let Some(v) = node.get("input_tokens").and_then(Value::as_u64) {
		usage.input_tokens = Some(v as u32);
	}
	if let Some(v) = node.get("prompt_tokens").and_then(Value::as_u64) {
		usage.input_tokens = Some(v as u32);
	}
	if let Some(v) = node.get("output_tokens").and_then(Value::as_u64) {
		usage.output_tokens = Some(v as u32);
	}
	if let Some(v) = node.get("completion_tokens").and_then(Value::as_u64) {
		usage.output_tokens = Some(v as u32);
	}
	if let Some(v) = node.get("cache_read_input_tokens").and_then(Value::as_u64) {
		usage.cache_read_tokens = Some(v as u32);
	}
	if let Some(v) = node.get("cache_creation_input_tokens").and_then(Value::as_u64) {
		usage.cache_write_tokens = Some(v as u32);
	}
	if let Some(v) = node.pointer("/completion_tokens_details/reasoning_tokens").and_then(Value::as_u64) {
		usage.thinking_tokens = Some(v as u32);
	}
}

/// Gemini's `usageMetadata` names its fields differently, and the
/// effective input is cache-adjusted: `inputTokens = promptTokenCount -
/// cachedContentTokenCount` (spec.md §8 scenario 5).
fn apply_gemini_usage_metadata(usage: &mut ParsedUsage, node: Option<&Value>) {
	let Some(node) = node else { return };
	let prompt = node.get("promptTokenCount").and_then(Value::as_u64).unwrap_or(0);
	let cached = node.get("cachedContentTokenCount").and_then(Value::as_u64).unwrap_or(0);
	if node.get("promptTokenCount").is_some() {
		usage.input_tokens = Some(prompt.saturating_sub(cached) as u32);
	}
	if let Some(v) = node.get("candidatesTokenCount").and_then(Value::as_u64) {
		usage.output_tokens = Some(v as u32);
	}
	if cached > 0 {
		usage.cache_read_tokens = Some(cached as u32);
	}
	if let Some(v) = node.get("thoughtsTokenCount").and_then(Value::as_u64) {
		usage.thinking_tokens = Some(v as u32);
	}
}

/// Parses a captured SSE chunk blob (the raw `data: {...}\n\n` text, one
/// event per line-pair) into [`ParsedUsage`], updating from whichever
/// dialect's update events are present. Last-wins for Gemini's
/// per-chunk `usageMetadata`; Anthropic's `message_start` seeds input
/// tokens and `message_delta` supplies the final output/cache counts;
/// OpenAI's usage normally only appears on the terminal chunk.
pub fn parse_streaming_usage(sse_blob: &str) -> ParsedUsage {
	let mut usage = ParsedUsage {
		input_tokens: None,
		output_tokens: None,
		cache_read_tokens: None,
		cache_write_tokens: None,
		thinking_tokens: None,
		model: None,
		finish_reasons: Vec::new(),
		stream: true,
	};

	for event in iter_sse_events(sse_blob) {
		let Ok(parsed) = serde_json::from_str::<Value>(&event) else { continue };
		let kind = parsed.get("type").and_then(Value::as_str).unwrap_or("");

		match kind {
			"message_start" => {
				if let Some(model) = parsed.pointer("/message/model").and_then(Value::as_str) {
					usage.model = Some(model.to_string());
				}
				apply_anthropic_openai_usage(&mut usage, parsed.pointer("/message/usage"));
			},
			"message_delta" => {
				apply_anthropic_openai_usage(&mut usage, parsed.get("usage"));
				if let Some(reason) = parsed.pointer("/delta/stop_reason").and_then(Value::as_str) {
					usage.finish_reasons.push(reason.to_string());
				}
			},
			_ => {},
		}

		if let Some(v) = parsed.get("usageMetadata") {
			apply_gemini_usage_metadata(&mut usage, Some(v));
		}
		if let Some(model) = parsed.get("model").and_then(Value::as_str) {
			usage.model = Some(model.to_string());
		}
		if let Some(choices) = parsed.get("choices").and_then(Value::as_array) {
			for choice in choices {
				if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
					usage.finish_reasons.push(reason.to_string());
				}
			}
			apply_anthropic_openai_usage(&mut usage, parsed.get("usage"));
		}
		if let Some(candidates) = parsed.get("candidates").and_then(Value::as_array) {
			for candidate in candidates {
				if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
					usage.finish_reasons.push(reason.to_string());
				}
			}
		}
	}

	usage
}

/// Splits a captured SSE blob into the JSON payload of each `data:` line,
/// using the same `eventsource-stream` crate the proxy would use on a
/// live upstream body, run here over a synchronous in-memory buffer.
fn iter_sse_events(blob: &str) -> Vec<String> {
	let bytes = bytes::Bytes::from(blob.as_bytes().to_vec());
	let mut events = Vec::new();
	let single_chunk = stream::once(async move { Ok::<_, std::convert::Infallible>(bytes) });
	let mut es = single_chunk.eventsource();

	// `eventsource-stream` is an async `Stream`; we only ever hand it a
	// single already-buffered chunk here, so draining it is a matter of
	// polling without any real async executor wiring.
	while let Some(next) = futures::executor::block_on(es.next()) {
		if let Ok(event) = next {
			if !event.data.is_empty() {
				events.push(event.data);
			}
		}
	}
	events
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn anthropic_non_streaming_usage() {
		let response = json!({
			"model": "claude-sonnet-4-5",
			"stop_reason": "end_turn",
			"usage": {"input_tokens": 120, "output_tokens": 40, "cache_read_input_tokens": 30},
		});
		let usage = parse_non_streaming_usage(&response);
		assert_eq!(usage.input_tokens, Some(120));
		assert_eq!(usage.output_tokens, Some(40));
		assert_eq!(usage.cache_read_tokens, Some(30));
		assert_eq!(usage.finish_reasons, vec!["end_turn".to_string()]);
	}

	#[test]
	fn gemini_scenario_5_cache_adjusted_input() {
		let response = json!({
			"usageMetadata": {
				"promptTokenCount": 202236,
				"cachedContentTokenCount": 196461,
				"candidatesTokenCount": 148,
				"thoughtsTokenCount": 188,
			}
		});
		let usage = parse_non_streaming_usage(&response);
		assert_eq!(usage.input_tokens, Some(5775));
		assert_eq!(usage.output_tokens, Some(148));
		assert_eq!(usage.cache_read_tokens, Some(196461));
		assert_eq!(usage.thinking_tokens, Some(188));
	}

	#[test]
	fn openai_chat_completions_usage_on_terminal_chunk() {
		let response = json!({
			"model": "gpt-4o",
			"choices": [{"finish_reason": "stop"}],
			"usage": {"prompt_tokens": 10, "completion_tokens": 5},
		});
		let usage = parse_non_streaming_usage(&response);
		assert_eq!(usage.input_tokens, Some(10));
		assert_eq!(usage.output_tokens, Some(5));
		assert_eq!(usage.finish_reasons, vec!["stop".to_string()]);
	}

	#[test]
	fn streaming_anthropic_message_start_then_delta() {
		let blob = concat!(
			"event: message_start\n",
			"data: {\"type\":\"message_start\",\"message\":{\"model\":\"claude-sonnet-4-5\",\"usage\":{\"input_tokens\":50}}}\n\n",
			"event: message_delta\n",
			"data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":12}}\n\n",
		);
		let usage = parse_streaming_usage(blob);
		assert_eq!(usage.model.as_deref(), Some("claude-sonnet-4-5"));
		assert_eq!(usage.input_tokens, Some(50));
		assert_eq!(usage.output_tokens, Some(12));
		assert_eq!(usage.finish_reasons, vec!["end_turn".to_string()]);
		assert!(usage.stream);
	}

	#[test]
	fn streaming_gemini_last_chunk_wins() {
		let blob = concat!(
			"data: {\"usageMetadata\":{\"promptTokenCount\":100,\"candidatesTokenCount\":5}}\n\n",
			"data: {\"usageMetadata\":{\"promptTokenCount\":100,\"candidatesTokenCount\":9}}\n\n",
		);
		let usage = parse_streaming_usage(blob);
		assert_eq!(usage.output_tokens, Some(9));
	}
}
