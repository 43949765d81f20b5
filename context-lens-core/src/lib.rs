//! Shared data model for Context Lens.
//!
//! Every other crate in the workspace builds on the types defined here:
//! the provider-agnostic [`ContextInfo`] view of a single LLM request,
//! the [`CapturedEntry`]/[`Conversation`] records the store persists, and
//! the handful of small enums (`Provider`, `ApiFormat`) that travel
//! between the router, the normalizer, and the store.

pub mod ids;
pub mod model;
pub mod redistribute;
pub mod time;

pub use ids::EntryIdAllocator;
pub use model::{
	ApiFormat, ContentBlock, ContextInfo, Conversation, ParsedMessage, ParsedUsage, Provider,
	SystemPrompt, Timings,
};
pub use redistribute::redistribute_residual;
pub use time::{now_iso8601, parse_iso8601};
