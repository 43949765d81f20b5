//! Component 4.E.1: the raw capture sidecar file. Per `original_source/`,
//! the original proxy wrote one `{request, response, meta}` JSON
//! document per captured entry under a per-day directory for offline
//! replay; this is purely an export convenience for the watcher in
//! §4.I.1; capture failures are logged and otherwise ignored (spec.md
//! §7's "capture error" never fails the proxied request).

use std::path::PathBuf;

use serde_json::Value;

pub struct CaptureWriter {
	data_dir: PathBuf,
}

impl CaptureWriter {
	pub fn new(data_dir: PathBuf) -> Self {
		Self { data_dir }
	}

	pub async fn write_best_effort(&self, entry_id: u64, timestamp: &str, request: &Value, response: &Value, meta: &Value) {
		if let Err(err) = self.write(entry_id, timestamp, request, response, meta).await {
			tracing::warn!(error = %err, entry_id, "failed to write capture sidecar file");
		}
	}

	async fn write(&self, entry_id: u64, timestamp: &str, request: &Value, response: &Value, meta: &Value) -> std::io::Result<()> {
		let date = &timestamp.get(..10).unwrap_or("unknown-date");
		let dir = self.data_dir.join("captures").join(date);
		tokio::fs::create_dir_all(&dir).await?;
		let path: PathBuf = dir.join(format!("{entry_id}.json"));
		let document = serde_json::json!({ "request": request, "response": response, "meta": meta });
		tokio::fs::write(&path, serde_json::to_vec(&document)?).await
	}
}
