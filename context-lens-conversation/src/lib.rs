//! Component D: the conversation-grouping state machine. Computes, for
//! each captured entry, which conversation it belongs to, which logical
//! agent within that conversation produced it, a human-readable label,
//! and the agent's working directory — all from the raw request body
//! plus the already-normalized [`ContextInfo`].

mod fingerprint;
mod label;
mod response_chain;
mod role;
mod source;
mod working_directory;

pub use fingerprint::{agent_key, compute_fingerprint, extract_session_id, first_real_user_text, FingerprintInputs};
pub use label::conversation_label;
pub use response_chain::ResponseChainCache;
pub use role::{majority_agent_key, role_for, AgentRole};
pub use source::detect_source_tool;
pub use working_directory::extract_working_directory;

/// Everything D produces for one stored entry.
#[derive(Debug, Clone)]
pub struct Assignment {
	pub conversation_id: Option<String>,
	pub agent_key: Option<String>,
	pub label: String,
	pub working_directory: Option<String>,
}

/// Computes a full [`Assignment`] for one entry. `response_chain` is the
/// caller-owned `previous_response_id -> conversation_id` cache (spec.md
/// §4.D rule 2); callers are responsible for updating it afterwards with
/// this response's own `id`, if present, once a conversation id is
/// known.
pub fn assign(inputs: &FingerprintInputs, response_chain: &ResponseChainCache) -> Assignment {
	let working_directory = extract_working_directory(inputs.context, inputs.raw_body);
	let conversation_id = compute_fingerprint(inputs, response_chain, working_directory.as_deref());
	let first_user_text = first_real_user_text(inputs.context);
	let agent_key = first_user_text.as_deref().map(agent_key);
	let label = conversation_label(first_user_text.as_deref());

	Assignment { conversation_id, agent_key, label, working_directory }
}
