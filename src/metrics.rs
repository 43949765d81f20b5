//! Prometheus text-format metrics endpoint, grounded directly on the
//! teacher's `src/metrics.rs` `App`/`router()` shape: an `Arc<Registry>`
//! behind one `GET /metrics` route, encoded with `prometheus_client`'s
//! own text encoder.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Router};
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

/// The handful of counters/gauges the proxy and store paths update.
/// Kept as one small struct rather than scattering `Counter::default()`
/// fields through `AppState`, matching the teacher's one-`Metrics`-struct
/// convention.
#[derive(Clone)]
pub struct Metrics {
	pub requests_total: Counter,
	pub requests_captured_total: Counter,
	pub upstream_errors_total: Counter,
	pub active_conversations: Gauge,
}

impl Metrics {
	pub fn new(registry: &mut Registry) -> Self {
		let requests_total = Counter::default();
		let requests_captured_total = Counter::default();
		let upstream_errors_total = Counter::default();
		let active_conversations = Gauge::default();

		registry.register("context_lens_requests_total", "Total proxied requests", requests_total.clone());
		registry.register("context_lens_requests_captured_total", "Requests captured to the store", requests_captured_total.clone());
		registry.register("context_lens_upstream_errors_total", "Upstream connection/5xx errors", upstream_errors_total.clone());
		registry.register("context_lens_active_conversations", "Conversations currently held in memory", active_conversations.clone());

		Self { requests_total, requests_captured_total, upstream_errors_total, active_conversations }
	}
}

#[derive(Clone)]
pub struct App {
	registry: Arc<Registry>,
}

impl App {
	pub fn new(registry: Arc<Registry>) -> Self {
		Self { registry }
	}

	pub fn router(&self) -> Router {
		Router::new().route("/metrics", get(metrics_handler)).with_state(self.clone())
	}
}

async fn metrics_handler(State(app): State<App>) -> Result<String, StatusCode> {
	let mut buffer = String::new();
	encode(&mut buffer, &app.registry).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
	Ok(buffer)
}
