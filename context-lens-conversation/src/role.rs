//! Main/subagent labeling (spec.md §4.D): within one conversation, the
//! `agentKey` with the most entries is `main`; every other key is a
//! `subagent`.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
	Main,
	Subagent,
}

/// Finds the agent key with the most occurrences in `agent_keys`. Ties
/// are broken in favor of whichever key was seen first, so the result
/// is deterministic regardless of hash-map iteration order.
pub fn majority_agent_key<'a>(agent_keys: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
	let mut counts: HashMap<&str, usize> = HashMap::new();
	let mut first_seen_order: Vec<&str> = Vec::new();

	for key in agent_keys {
		if !counts.contains_key(key) {
			first_seen_order.push(key);
		}
		*counts.entry(key).or_insert(0) += 1;
	}

	first_seen_order
		.into_iter()
		.max_by_key(|key| counts[key])
}

/// Returns [`AgentRole::Main`] when `agent_key` equals the conversation's
/// majority key, [`AgentRole::Subagent`] otherwise.
pub fn role_for(agent_key: &str, majority_key: Option<&str>) -> AgentRole {
	if majority_key == Some(agent_key) {
		AgentRole::Main
	} else {
		AgentRole::Subagent
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn picks_the_most_frequent_key() {
		let keys = vec!["a", "b", "a", "a", "b"];
		assert_eq!(majority_agent_key(keys), Some("a"));
	}

	#[test]
	fn ties_break_toward_first_seen() {
		let keys = vec!["a", "b", "a", "b"];
		assert_eq!(majority_agent_key(keys), Some("a"));
	}

	#[test]
	fn empty_input_has_no_majority() {
		let keys: Vec<&str> = vec![];
		assert_eq!(majority_agent_key(keys), None);
	}

	#[test]
	fn role_for_matches_majority() {
		assert_eq!(role_for("a", Some("a")), AgentRole::Main);
		assert_eq!(role_for("b", Some("a")), AgentRole::Subagent);
	}
}
