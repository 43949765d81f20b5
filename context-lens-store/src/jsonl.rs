//! The append-only JSONL state file (spec.md §4.F, §6): one line per
//! conversation or entry, each written atomically (the full line is
//! built in memory, then committed with a single write). Replay on
//! startup treats later lines as superseding earlier ones with the same
//! id.

use std::collections::BTreeMap;
use std::path::Path;

use context_lens_core::Conversation;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::entry::CapturedEntry;
use crate::error::StoreError;

/// One line of `state.jsonl`. Internally tagged on `type` so the wire
/// shape matches spec.md §6 exactly: `{"type":"conversation",...}` or
/// `{"type":"entry",...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateLine {
	Conversation(Conversation),
	Entry(Box<CapturedEntry>),
}

/// A single-writer, line-atomic JSONL appender. Every call to
/// [`Self::append`] builds the complete serialized line before issuing
/// one `write_all`, so a crash mid-write never leaves a partial line
/// (spec.md §5).
pub struct JsonlAppender {
	file: tokio::fs::File,
}

impl JsonlAppender {
	pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
		let file = tokio::fs::OpenOptions::new().create(true).append(true).open(path).await.map_err(StoreError::Append)?;
		Ok(Self { file })
	}

	pub async fn append(&mut self, value: &impl Serialize) -> Result<(), StoreError> {
		let mut line = serde_json::to_string(value).expect("state line always serializes");
		line.push('\n');
		self.file.write_all(line.as_bytes()).await.map_err(StoreError::Append)?;
		self.file.flush().await.map_err(StoreError::Append)?;
		Ok(())
	}

	/// Truncates the file to empty, for `reset` (spec.md invariant 5).
	pub async fn truncate(&mut self) -> Result<(), StoreError> {
		self.file.set_len(0).await.map_err(StoreError::Append)?;
		Ok(())
	}
}

/// Result of replaying `state.jsonl`: the last-write-wins conversations
/// and entries, plus a count of lines that failed to parse (logged by
/// the caller, never fatal per spec.md §7).
pub struct ReplayedState {
	pub conversations: Vec<Conversation>,
	pub entries: Vec<CapturedEntry>,
	pub invalid_lines: usize,
}

/// Parses the full contents of `state.jsonl`, applying last-line-wins
/// per id. Pure function over the file's text so it's testable without
/// touching a filesystem.
pub fn replay_state(content: &str) -> ReplayedState {
	let mut conversations: BTreeMap<String, Conversation> = BTreeMap::new();
	// Preserve conversation insertion order for stable iteration later.
	let mut conversation_order: Vec<String> = Vec::new();
	let mut entries: BTreeMap<u64, CapturedEntry> = BTreeMap::new();
	let mut invalid_lines = 0usize;

	for line in content.lines() {
		let trimmed = line.trim();
		if trimmed.is_empty() {
			continue;
		}
		match serde_json::from_str::<StateLine>(trimmed) {
			Ok(StateLine::Conversation(conversation)) => {
				if !conversations.contains_key(&conversation.id) {
					conversation_order.push(conversation.id.clone());
				}
				conversations.insert(conversation.id.clone(), conversation);
			},
			Ok(StateLine::Entry(entry)) => {
				entries.insert(entry.id, *entry);
			},
			Err(err) => {
				tracing::warn!(error = %err, line = trimmed, "skipping invalid state.jsonl line");
				invalid_lines += 1;
			},
		}
	}

	let ordered_conversations = conversation_order.into_iter().filter_map(|id| conversations.remove(&id)).collect();

	ReplayedState { conversations: ordered_conversations, entries: entries.into_values().collect(), invalid_lines }
}

/// Reads and replays `state.jsonl` from disk. A completely unreadable
/// file stops startup (spec.md §7); individual bad lines do not.
pub async fn load_state_file(path: impl AsRef<Path>) -> Result<ReplayedState, StoreError> {
	match tokio::fs::read_to_string(path).await {
		Ok(content) => Ok(replay_state(&content)),
		Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
			Ok(ReplayedState { conversations: Vec::new(), entries: Vec::new(), invalid_lines: 0 })
		},
		Err(err) => Err(StoreError::Read(err)),
	}
}

/// One line of the tags sidecar file (spec.md §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TagEvent {
	pub conversation_id: String,
	pub tag: String,
	pub action: TagAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagAction {
	Add,
	Remove,
}

/// Replays the tags sidecar onto an already-loaded conversation map,
/// applying each add/remove in file order.
pub fn replay_tags(content: &str, conversations: &mut BTreeMap<String, Conversation>) {
	for line in content.lines() {
		let trimmed = line.trim();
		if trimmed.is_empty() {
			continue;
		}
		match serde_json::from_str::<TagEvent>(trimmed) {
			Ok(event) => {
				if let Some(conversation) = conversations.get_mut(&event.conversation_id) {
					match event.action {
						TagAction::Add => {
							conversation.tags.insert(event.tag);
						},
						TagAction::Remove => {
							conversation.tags.remove(&event.tag);
						},
					}
				}
			},
			Err(err) => {
				tracing::warn!(error = %err, line = trimmed, "skipping invalid tags.jsonl line");
			},
		}
	}
}
