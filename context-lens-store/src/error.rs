use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("failed to append to state file: {0}")]
	Append(#[source] std::io::Error),
	#[error("failed to read state file: {0}")]
	Read(#[source] std::io::Error),
	#[error("conversation {0} not found")]
	ConversationNotFound(String),
}
