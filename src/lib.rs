//! Context Lens: a local reverse-proxy observability sidecar for
//! agentic LLM tools (spec.md §1). This crate wires together the
//! workspace's components — router/normalizer (`context-lens-normalize`),
//! conversation engine (`context-lens-conversation`), composition/
//! security/health audits (`context-lens-audit`), and the store/LHAR/
//! analyzer (`context-lens-store`) — into the two HTTP surfaces
//! described in spec.md §4.E/§4.I: the reverse proxy itself, and the
//! ingest+query API plus a Prometheus `/metrics` endpoint.

pub mod api;
pub mod captures;
pub mod config;
pub mod metrics;
pub mod proxy;
pub mod telemetry;
pub mod upstream;
pub mod watcher;
