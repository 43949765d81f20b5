//! Fingerprint priority order (spec.md §4.D): session id extraction,
//! Responses-API `previous_response_id` chaining, content hash, else
//! ungrouped.

use context_lens_core::ContextInfo;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::response_chain::ResponseChainCache;

/// Everything the fingerprint computation needs about one entry.
pub struct FingerprintInputs<'a> {
	pub context: &'a ContextInfo,
	pub raw_body: &'a Value,
	/// The detected source tool tag (spec.md §4.D: "for `codex` source,
	/// also mix in the working directory").
	pub source: Option<&'a str>,
}

static ANTHROPIC_SESSION_RE: Lazy<Regex> =
	Lazy::new(|| Regex::new(r"^session_[0-9a-fA-F-]{8,}$").unwrap());

/// Rule 1: a client-supplied session id embedded in the request body.
/// Anthropic puts it at `metadata.user_id` shaped `session_<uuid>`;
/// Gemini (through the Code Assist wrapper) puts it at
/// `request.session_id` (or `session_id` directly when unwrapped)
/// prefixed `gemini_`.
pub fn extract_session_id(raw_body: &Value) -> Option<String> {
	if let Some(user_id) = raw_body.pointer("/metadata/user_id").and_then(Value::as_str) {
		if ANTHROPIC_SESSION_RE.is_match(user_id) {
			return Some(user_id.to_string());
		}
	}

	let unwrapped = raw_body.get("request").unwrap_or(raw_body);
	if let Some(session_id) = unwrapped.get("session_id").and_then(Value::as_str) {
		if session_id.starts_with("gemini_") {
			return Some(session_id.to_string());
		}
	}

	None
}

/// "First real user prompt": the first message whose role is `user`
/// with non-empty text, skipping Responses-API boilerplate (text
/// starting with `#` or `<environment`, e.g. an injected `AGENTS.md` or
/// environment-context preamble).
pub fn first_real_user_text(context: &ContextInfo) -> Option<String> {
	context
		.messages
		.iter()
		.filter(|m| m.role == "user" || m.role == "raw")
		.map(|m| m.content.trim())
		.find(|text| !text.is_empty() && !text.starts_with('#') && !text.starts_with("<environment"))
		.map(str::to_string)
}

/// Rule 3: `SHA-256(systemText || \0 || firstRealUserPromptText)`,
/// truncated to 16 hex characters. Returns `None` if neither piece of
/// text exists — the entry is ungrouped (spec.md invariant 1).
fn content_hash(context: &ContextInfo, first_user_text: Option<&str>, mix_in: Option<&str>) -> Option<String> {
	let system_text = context.system_text();
	let user_text = first_user_text.unwrap_or("");
	if system_text.is_empty() && user_text.is_empty() {
		return None;
	}

	let mut hasher = Sha256::new();
	hasher.update(system_text.as_bytes());
	hasher.update([0u8]);
	hasher.update(user_text.as_bytes());
	if let Some(extra) = mix_in {
		hasher.update([0u8]);
		hasher.update(extra.as_bytes());
	}
	let digest = hasher.finalize();
	Some(hex::encode(&digest[..8]))
}

/// `agentKey` (spec.md §4.D): `SHA-256(first readable user text)`,
/// first 12 hex characters.
pub fn agent_key(first_user_text: &str) -> String {
	let mut hasher = Sha256::new();
	hasher.update(first_user_text.as_bytes());
	let digest = hasher.finalize();
	hex::encode(&digest[..6])
}

/// Computes the conversation fingerprint for one entry, consulting (but
/// not mutating) the `previous_response_id` cache. Callers should record
/// this entry's own response id, if any, against the returned id
/// afterwards via [`ResponseChainCache::insert`]. `working_directory` is
/// the already-extracted working directory for this entry (see
/// [`crate::extract_working_directory`]); it is only mixed into the
/// hash for `codex`-sourced entries.
pub fn compute_fingerprint(
	inputs: &FingerprintInputs<'_>,
	response_chain: &ResponseChainCache,
	working_directory: Option<&str>,
) -> Option<String> {
	if let Some(session_id) = extract_session_id(inputs.raw_body) {
		return Some(session_id);
	}

	if let Some(previous_id) = inputs.raw_body.get("previous_response_id").and_then(Value::as_str) {
		if let Some(conversation_id) = response_chain.get(previous_id) {
			return Some(conversation_id);
		}
	}

	let first_user_text = first_real_user_text(inputs.context);
	let mix_in = if inputs.source == Some("codex") { working_directory } else { None };
	content_hash(inputs.context, first_user_text.as_deref(), mix_in)
}

#[cfg(test)]
mod tests {
	use super::*;
	use context_lens_core::{ApiFormat, ParsedMessage, Provider};
	use serde_json::json;

	fn context_with_messages(system: &str, messages: Vec<(&str, &str)>) -> ContextInfo {
		let mut info = ContextInfo {
			provider: Provider::Anthropic,
			api_format: ApiFormat::AnthropicMessages,
			model: "claude-sonnet-4-5".to_string(),
			system_prompts: vec![context_lens_core::SystemPrompt { content: system.to_string() }],
			tools: Vec::new(),
			messages: messages
				.into_iter()
				.map(|(role, content)| ParsedMessage { role: role.to_string(), content: content.to_string(), content_blocks: None, tokens: 1 })
				.collect(),
			system_tokens: 1,
			tools_tokens: 0,
			messages_tokens: 0,
			total_tokens: 0,
		};
		info.recompute_totals();
		info
	}

	#[test]
	fn extracts_anthropic_session_id() {
		let body = json!({"metadata": {"user_id": "session_3f9a8b7c-1111-2222-3333-444455556666"}});
		assert_eq!(extract_session_id(&body).as_deref(), Some("session_3f9a8b7c-1111-2222-3333-444455556666"));
	}

	#[test]
	fn extracts_gemini_session_id_through_wrapper() {
		let body = json!({"request": {"session_id": "gemini_abc123"}});
		assert_eq!(extract_session_id(&body).as_deref(), Some("gemini_abc123"));
	}

	#[test]
	fn first_real_user_text_skips_agents_md_boilerplate() {
		let context = context_with_messages(
			"",
			vec![("user", "# AGENTS.md\nsome boilerplate"), ("user", "Fix the login bug")],
		);
		assert_eq!(first_real_user_text(&context).as_deref(), Some("Fix the login bug"));
	}

	#[test]
	fn content_hash_is_stable_16_hex_chars() {
		let context = context_with_messages("You are helpful.", vec![("user", "Hello")]);
		let hash = content_hash(&context, first_real_user_text(&context).as_deref(), None).unwrap();
		assert_eq!(hash.len(), 16);
		let again = content_hash(&context, first_real_user_text(&context).as_deref(), None).unwrap();
		assert_eq!(hash, again);
	}

	#[test]
	fn content_hash_none_when_no_text_at_all() {
		let context = context_with_messages("", vec![]);
		assert_eq!(content_hash(&context, None, None), None);
	}

	#[test]
	fn codex_source_mixes_working_directory_into_hash() {
		let context = context_with_messages("", vec![("user", "hello")]);
		let a = content_hash(&context, Some("hello"), Some("/home/a"));
		let b = content_hash(&context, Some("hello"), Some("/home/b"));
		assert_ne!(a, b);
	}
}
