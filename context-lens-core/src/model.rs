//! The provider-agnostic request/response view (`ContextInfo`) and the
//! handful of plain records (`Conversation`, `Timings`) shared across
//! every component downstream of the normalizer.

use serde::{Deserialize, Serialize};

/// One of the six upstream providers Context Lens recognizes. `Unknown`
/// is a valid, persisted value — not an error — for traffic the router
/// could not classify.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
	Anthropic,
	Openai,
	Chatgpt,
	Gemini,
	Vertex,
	Unknown,
}

impl Default for Provider {
	fn default() -> Self {
		Provider::Unknown
	}
}

/// The wire schema a request/response pair was parsed with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApiFormat {
	AnthropicMessages,
	ChatgptBackend,
	Responses,
	ChatCompletions,
	Gemini,
	Raw,
	Unknown,
}

impl Default for ApiFormat {
	fn default() -> Self {
		ApiFormat::Unknown
	}
}

/// One system prompt block. Kept as its own type (rather than a bare
/// `String`) because several providers allow an ordered array of system
/// text blocks rather than a single string.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemPrompt {
	pub content: String,
}

/// A single content block inside a message. Variants mirror the union
/// spec.md describes for `ParsedMessage.contentBlocks`; `ToolResult` can
/// recursively nest further blocks (notably images returned from a tool
/// call), which is why `content` is `Vec<ContentBlock>` rather than a
/// plain string.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
	Text {
		text: String,
	},
	InputText {
		text: String,
	},
	Thinking {
		text: String,
	},
	ToolUse {
		id: String,
		name: String,
		input: serde_json::Value,
	},
	ToolResult {
		tool_use_id: String,
		content: Vec<ContentBlock>,
		#[serde(default, skip_serializing_if = "std::ops::Not::not")]
		is_error: bool,
	},
	/// Image content is never retained verbatim (spec.md §3: "Image
	/// content is never stored base64"); by the time a block reaches
	/// this type it is already a placeholder.
	Image {
		#[serde(skip_serializing_if = "Option::is_none")]
		media_type: Option<String>,
	},
	/// Anything the normalizer recognized as a content block but did not
	/// have a specific variant for — kept opaquely so the composition
	/// pass can still count its bytes under `other`.
	Fallback {
		raw: serde_json::Value,
	},
}

impl ContentBlock {
	/// True for the variant spec.md treats as a fixed-cost image token
	/// estimate, regardless of where it appears (top-level or nested
	/// inside a `tool_result`).
	pub fn is_image(&self) -> bool {
		matches!(self, ContentBlock::Image { .. })
	}

	/// Depth-first count of image blocks in this block and any blocks it
	/// nests (only `ToolResult` nests).
	pub fn image_count(&self) -> usize {
		match self {
			ContentBlock::Image { .. } => 1,
			ContentBlock::ToolResult { content, .. } => content.iter().map(ContentBlock::image_count).sum(),
			_ => 0,
		}
	}
}

/// One message in the normalized conversation, after parsing whichever
/// of the five wire schemas it came from.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedMessage {
	pub role: String,
	pub content: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub content_blocks: Option<Vec<ContentBlock>>,
	pub tokens: u32,
}

/// The normalized, provider-agnostic view of one outbound LLM request.
///
/// Invariant (spec.md §3): `total_tokens == system_tokens + tools_tokens
/// + messages_tokens`, and `messages_tokens == sum(m.tokens for m in
/// messages)`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ContextInfo {
	pub provider: Provider,
	pub api_format: ApiFormat,
	pub model: String,
	pub system_prompts: Vec<SystemPrompt>,
	pub tools: Vec<serde_json::Value>,
	pub messages: Vec<ParsedMessage>,
	pub system_tokens: u32,
	pub tools_tokens: u32,
	pub messages_tokens: u32,
	pub total_tokens: u32,
}

impl ContextInfo {
	/// Recomputes `messages_tokens`/`total_tokens` from the per-message
	/// tallies. Called after any pass that mutates individual message
	/// token counts (rescale, migration) so the invariant never has to be
	/// maintained by hand in more than one place.
	pub fn recompute_totals(&mut self) {
		self.messages_tokens = self.messages.iter().map(|m| m.tokens).sum();
		self.total_tokens = self.system_tokens + self.tools_tokens + self.messages_tokens;
	}

	/// Concatenated system prompt text, used by the conversation engine's
	/// fingerprint hash.
	pub fn system_text(&self) -> String {
		self.system_prompts
			.iter()
			.map(|p| p.content.as_str())
			.collect::<Vec<_>>()
			.join("\n")
	}
}

/// Token usage parsed out of a (possibly streamed) upstream response.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ParsedUsage {
	pub input_tokens: Option<u32>,
	pub output_tokens: Option<u32>,
	pub cache_read_tokens: Option<u32>,
	pub cache_write_tokens: Option<u32>,
	pub thinking_tokens: Option<u32>,
	pub model: Option<String>,
	pub finish_reasons: Vec<String>,
	pub stream: bool,
}

/// Proxy-observed timings for one request/response pair, in
/// milliseconds.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Timings {
	pub send_ms: u64,
	pub wait_ms: u64,
	pub receive_ms: u64,
	pub total_ms: u64,
}

/// One logical exchange, identified by a 16-hex-char fingerprint.
/// Contains 1..N agents distinguished by `agentKey` on the entries that
/// belong to it (spec.md §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Conversation {
	pub id: String,
	pub label: String,
	pub source: Option<String>,
	pub working_directory: Option<String>,
	pub first_seen: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
	#[serde(default)]
	pub tags: std::collections::BTreeSet<String>,
}

impl Conversation {
	pub fn new(id: impl Into<String>, label: impl Into<String>, first_seen: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			label: label.into(),
			source: None,
			working_directory: None,
			first_seen: first_seen.into(),
			session_id: None,
			tags: Default::default(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn recompute_totals_matches_message_sum() {
		let mut ctx = ContextInfo {
			system_tokens: 10,
			tools_tokens: 5,
			messages: vec![
				ParsedMessage { tokens: 3, ..Default::default() },
				ParsedMessage { tokens: 7, ..Default::default() },
			],
			..Default::default()
		};
		ctx.recompute_totals();
		assert_eq!(ctx.messages_tokens, 10);
		assert_eq!(ctx.total_tokens, 25);
	}

	#[test]
	fn image_count_recurses_into_tool_result() {
		let block = ContentBlock::ToolResult {
			tool_use_id: "t1".into(),
			content: vec![
				ContentBlock::Image { media_type: None },
				ContentBlock::Text { text: "ok".into() },
				ContentBlock::Image { media_type: None },
			],
			is_error: false,
		};
		assert_eq!(block.image_count(), 2);
	}
}
