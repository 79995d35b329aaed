//! Usage sink: one record per upstream attempt.
//!
//! [`UsageLogger`] is the production sink. Records go through a bounded
//! channel to a single writer task, which enriches them from the route
//! table, stamps them, emits a tracing event and optionally appends them to
//! a JSONL file. [`MemoryUsageSink`] keeps records in memory.

use crate::core::config::UsageLogConfig;
use crate::core::metrics::get_metrics;
use crate::services::route_store::RouteStore;
use crate::transformer::Protocol;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

/// Token counts, outcome and latency of one upstream attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Set by the sink
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub request_id: String,
    /// Model as the client requested it
    pub model: String,
    /// Model sent upstream
    pub upstream_model: String,
    pub route_name: String,
    pub route_id: Option<i64>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Client protocol
    pub style: Protocol,
    pub stream: bool,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// 1-based position in the candidate list
    pub attempt: usize,
}

/// Append-only destination for usage records.
///
/// `record` never fails the caller; sinks log their own write errors.
pub trait UsageSink: Send + Sync {
    fn record(&self, record: UsageRecord);
}

/// Fill in route name and upstream model from the route table when missing.
pub fn enrich_record(record: &mut UsageRecord, store: &dyn RouteStore) {
    if !record.route_name.is_empty() && !record.upstream_model.is_empty() {
        return;
    }
    let Some(route) = record.route_id.and_then(|id| store.get(id)) else {
        return;
    };
    if record.route_name.is_empty() {
        record.route_name = route.name;
    }
    if record.upstream_model.is_empty() {
        record.upstream_model = route.model;
    }
}

fn record_token_metrics(record: &UsageRecord) {
    if record.prompt_tokens == 0 && record.completion_tokens == 0 {
        return;
    }
    let metrics = get_metrics();
    metrics
        .token_usage
        .with_label_values(&[&record.model, &record.route_name, "prompt"])
        .inc_by(record.prompt_tokens);
    metrics
        .token_usage
        .with_label_values(&[&record.model, &record.route_name, "completion"])
        .inc_by(record.completion_tokens);
}

/// Async usage logger backed by a single writer task.
pub struct UsageLogger {
    tx: Mutex<Option<mpsc::Sender<UsageRecord>>>,
    done_rx: Mutex<Option<oneshot::Receiver<()>>>,
}

impl UsageLogger {
    /// Spawn the writer task. Must be called inside a tokio runtime.
    pub fn new(store: Arc<dyn RouteStore>, config: &UsageLogConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.buffer_size.max(1));
        let (done_tx, done_rx) = oneshot::channel();
        let log_path = config.enabled.then(|| PathBuf::from(&config.path));
        tokio::spawn(Self::writer_task(rx, store, log_path, done_tx));
        Self {
            tx: Mutex::new(Some(tx)),
            done_rx: Mutex::new(Some(done_rx)),
        }
    }

    async fn writer_task(
        mut rx: mpsc::Receiver<UsageRecord>,
        store: Arc<dyn RouteStore>,
        log_path: Option<PathBuf>,
        done_tx: oneshot::Sender<()>,
    ) {
        let mut file = match log_path {
            Some(path) => open_log_file(&path).await,
            None => None,
        };

        while let Some(mut record) = rx.recv().await {
            enrich_record(&mut record, store.as_ref());
            record.timestamp = Some(Utc::now());
            record_token_metrics(&record);

            tracing::info!(
                request_id = %record.request_id,
                model = %record.model,
                upstream_model = %record.upstream_model,
                route = %record.route_name,
                attempt = record.attempt,
                success = record.success,
                prompt_tokens = record.prompt_tokens,
                completion_tokens = record.completion_tokens,
                total_tokens = record.total_tokens,
                elapsed_ms = record.elapsed_ms,
                stream = record.stream,
                error = record.error_message.as_deref().unwrap_or(""),
                "usage"
            );

            if let Some(f) = file.as_mut() {
                match serde_json::to_string(&record) {
                    Ok(mut line) => {
                        line.push('\n');
                        if let Err(e) = f.write_all(line.as_bytes()).await {
                            tracing::error!("Failed to write usage record: {}", e);
                        } else if let Err(e) = f.flush().await {
                            tracing::error!("Failed to flush usage log: {}", e);
                        }
                    }
                    Err(e) => tracing::error!("Failed to serialize usage record: {}", e),
                }
            }
        }

        tracing::info!("Usage logger writer task stopped");
        let _ = done_tx.send(());
    }

    /// Drop the sender so the writer drains the channel and exits, then wait for it.
    pub async fn shutdown(&self) {
        let sender = self.tx.lock().ok().and_then(|mut tx| tx.take());
        let done_rx = self.done_rx.lock().ok().and_then(|mut rx| rx.take());
        if sender.is_none() {
            return;
        }
        drop(sender);
        if let Some(rx) = done_rx {
            let _ = tokio::time::timeout(std::time::Duration::from_secs(5), rx).await;
        }
        tracing::info!("Usage logger shut down");
    }
}

impl UsageSink for UsageLogger {
    fn record(&self, record: UsageRecord) {
        let Ok(guard) = self.tx.lock() else {
            return;
        };
        if let Some(tx) = guard.as_ref() {
            if let Err(e) = tx.try_send(record) {
                tracing::warn!("Usage channel full, dropping record: {}", e);
            }
        }
    }
}

async fn open_log_file(path: &Path) -> Option<tokio::fs::File> {
    if let Some(parent) = path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            tracing::error!("Failed to create usage log directory: {}", e);
            return None;
        }
    }
    match OpenOptions::new().create(true).append(true).open(path).await {
        Ok(f) => {
            tracing::info!("Usage log enabled, writing to: {}", path.display());
            Some(f)
        }
        Err(e) => {
            tracing::error!("Failed to open usage log file: {}", e);
            None
        }
    }
}

/// In-memory sink with the same enrichment as [`UsageLogger`].
#[derive(Default)]
pub struct MemoryUsageSink {
    store: Option<Arc<dyn RouteStore>>,
    records: Mutex<Vec<UsageRecord>>,
}

impl MemoryUsageSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(store: Arc<dyn RouteStore>) -> Self {
        Self {
            store: Some(store),
            records: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of everything recorded so far, in write order.
    pub fn records(&self) -> Vec<UsageRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl UsageSink for MemoryUsageSink {
    fn record(&self, mut record: UsageRecord) {
        if let Some(store) = &self.store {
            enrich_record(&mut record, store.as_ref());
        }
        record.timestamp = Some(Utc::now());
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::route_store::{Route, StaticRouteStore};
    use tempfile::TempDir;

    fn store() -> Arc<dyn RouteStore> {
        Arc::new(StaticRouteStore::new(vec![Route::new(
            7,
            "primary",
            "claude-3",
            "https://api.anthropic.com",
            Protocol::Claude,
        )]))
    }

    #[test]
    fn test_enrich_fills_missing_fields() {
        let mut record = UsageRecord {
            route_id: Some(7),
            ..Default::default()
        };
        enrich_record(&mut record, store().as_ref());
        assert_eq!(record.route_name, "primary");
        assert_eq!(record.upstream_model, "claude-3");
    }

    #[test]
    fn test_enrich_keeps_present_fields() {
        let mut record = UsageRecord {
            route_id: Some(7),
            route_name: "explicit".into(),
            ..Default::default()
        };
        enrich_record(&mut record, store().as_ref());
        assert_eq!(record.route_name, "explicit");
        assert_eq!(record.upstream_model, "claude-3");
    }

    #[test]
    fn test_memory_sink_stamps_and_orders() {
        let sink = MemoryUsageSink::with_store(store());
        sink.record(UsageRecord {
            route_id: Some(7),
            attempt: 1,
            ..Default::default()
        });
        sink.record(UsageRecord {
            attempt: 2,
            success: true,
            ..Default::default()
        });
        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].route_name, "primary");
        assert!(records[0].timestamp.is_some());
        assert_eq!(records[1].attempt, 2);
    }

    #[tokio::test]
    async fn test_logger_writes_jsonl() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("usage.jsonl");
        let config = UsageLogConfig {
            enabled: true,
            path: path.to_string_lossy().to_string(),
            buffer_size: 16,
        };
        let logger = UsageLogger::new(store(), &config);
        logger.record(UsageRecord {
            request_id: "req-1".into(),
            model: "gpt-4".into(),
            route_id: Some(7),
            prompt_tokens: 5,
            completion_tokens: 3,
            total_tokens: 8,
            success: true,
            ..Default::default()
        });
        logger.shutdown().await;

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 1);
        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["route_name"], "primary");
        assert_eq!(value["total_tokens"], 8);
        assert!(value["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_record_after_shutdown_is_ignored() {
        let logger = UsageLogger::new(store(), &UsageLogConfig::default());
        logger.shutdown().await;
        logger.record(UsageRecord::default());
        logger.shutdown().await;
    }
}
