//! anthropic-messages parse mode (spec.md §4.C).

use context_lens_core::{ApiFormat, ContentBlock, ContextInfo, ParsedMessage, Provider, SystemPrompt};
use context_lens_tokens::estimate_tokens_value;
use serde_json::Value;

use super::common::{anthropic_block, estimate_message_tokens, flatten_blocks};

pub fn parse(body: &Value) -> ContextInfo {
	let model = body.get("model").and_then(Value::as_str).unwrap_or_default().to_string();
	let model_hint = Some(model.as_str());

	let system_prompts = system_prompts_from(body.get("system"));
	let tools = body.get("tools").and_then(Value::as_array).cloned().unwrap_or_default();

	let messages = body
		.get("messages")
		.and_then(Value::as_array)
		.map(|items| items.iter().map(|m| parse_message(m, model_hint)).collect())
		.unwrap_or_default();

	let system_tokens: u32 = system_prompts
		.iter()
		.map(|sp| estimate_tokens_value(&Value::String(sp.content.clone()), model_hint))
		.sum();
	let tools_tokens = if tools.is_empty() { 0 } else { estimate_tokens_value(&Value::Array(tools.clone()), model_hint) };

	let mut info = ContextInfo {
		provider: Provider::Anthropic,
		api_format: ApiFormat::AnthropicMessages,
		model,
		system_prompts,
		tools,
		messages,
		system_tokens,
		tools_tokens,
		messages_tokens: 0,
		total_tokens: 0,
	};
	info.recompute_totals();
	info
}

fn system_prompts_from(system: Option<&Value>) -> Vec<SystemPrompt> {
	match system {
		Some(Value::String(s)) => vec![SystemPrompt { content: s.clone() }],
		Some(Value::Array(items)) => items
			.iter()
			.filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
			.map(|b| SystemPrompt { content: b.get("text").and_then(Value::as_str).unwrap_or_default().to_string() })
			.collect(),
		_ => Vec::new(),
	}
}

fn parse_message(m: &Value, model_hint: Option<&str>) -> ParsedMessage {
	let role = m.get("role").and_then(Value::as_str).unwrap_or("user").to_string();
	let content_value = m.get("content").cloned().unwrap_or(Value::String(String::new()));

	let (content, content_blocks): (String, Option<Vec<ContentBlock>>) = match &content_value {
		Value::Array(items) => {
			let blocks: Vec<ContentBlock> = items.iter().map(anthropic_block).collect();
			let text = flatten_blocks(&blocks);
			(text, Some(blocks))
		},
		Value::String(s) => (s.clone(), None),
		other => (other.to_string(), None),
	};

	let tokens = estimate_message_tokens(&content_value, model_hint);
	ParsedMessage { role, content, content_blocks, tokens }
}
