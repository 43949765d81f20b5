//! Components F, G, J: the in-memory/on-disk store, the LHAR export
//! builder, and the offline session analyzer. Everything upstream of
//! this crate (normalizer, conversation engine, audits) is pure; this
//! crate is where state actually lives.

mod analyzer;
mod entry;
mod error;
mod jsonl;
mod lhar;
mod store;

pub use analyzer::{analyze, CacheStats, Compaction, GrowthBlock, SessionAnalysis, TimingAggregates, UserTurn};
pub use entry::{CapturedEntry, ResponseSummary, DEFAULT_MAX_COMPACTED_MESSAGES};
pub use error::StoreError;
pub use lhar::{build_entries, build_session, export_jsonl, export_wrapped, trace_id_for, LharEntry, LharSession, PrivacyLevel, LHAR_CREATOR, LHAR_VERSION};
pub use store::{ChangeEvent, ProxyResponse, Store, StoreConfig, StoreRequestInput};
