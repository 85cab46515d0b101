//! Best-effort observability sink: request details and usage records are
//! buffered in memory and flushed in batches. Failures are logged and
//! dropped; the sink never affects a response.

use sea_orm::{ActiveValue::Set, ConnectionTrait, DatabaseConnection, EntityTrait, Statement};
use serde_json::Value as JsonValue;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::warn;

use promux_common::ObservabilityConfig;

use crate::entities::{request_details, usage_records};

#[derive(Debug, Clone)]
pub struct RequestDetailRecord {
    pub trace_id: String,
    pub machine_id: String,
    pub provider: String,
    pub model: String,
    pub connection_id: Option<String>,
    pub source_format: String,
    pub target_format: String,
    pub streaming: bool,
    pub status: u16,
    pub started_at: OffsetDateTime,
    pub ttft_ms: Option<i64>,
    pub duration_ms: Option<i64>,
    pub content_len: i64,
    pub thinking_len: i64,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub usage_estimated: bool,
    pub error: Option<String>,
    pub detail: Option<JsonValue>,
}

#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub machine_id: String,
    pub provider: String,
    pub model: String,
    pub connection_id: Option<String>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub estimated: bool,
    pub at: OffsetDateTime,
}

#[derive(Debug)]
enum ObsEvent {
    Request(Box<RequestDetailRecord>),
    Usage(UsageRecord),
}

/// Cloneable handle; `disabled()` yields a no-op sink so call sites never
/// branch on the config.
#[derive(Clone, Default)]
pub struct ObservabilitySink {
    tx: Option<mpsc::Sender<ObsEvent>>,
}

impl ObservabilitySink {
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn spawn(db: DatabaseConnection, config: ObservabilityConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(run_sink(db, config, rx));
        Self { tx: Some(tx) }
    }

    pub fn record_request(&self, record: RequestDetailRecord) {
        if let Some(tx) = &self.tx {
            if tx.try_send(ObsEvent::Request(Box::new(record))).is_err() {
                warn!("observability buffer full, dropping request detail");
            }
        }
    }

    pub fn record_usage(&self, record: UsageRecord) {
        if let Some(tx) = &self.tx {
            if tx.try_send(ObsEvent::Usage(record)).is_err() {
                warn!("observability buffer full, dropping usage record");
            }
        }
    }
}

async fn run_sink(
    db: DatabaseConnection,
    config: ObservabilityConfig,
    mut rx: mpsc::Receiver<ObsEvent>,
) {
    let mut requests: Vec<request_details::ActiveModel> = Vec::new();
    let mut usages: Vec<usage_records::ActiveModel> = Vec::new();
    let mut ticker =
        tokio::time::interval(std::time::Duration::from_millis(config.flush_interval_ms.max(100)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let max_json_bytes = config.max_json_kb.saturating_mul(1024);

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                match event {
                    ObsEvent::Request(record) => requests.push(request_model(*record, max_json_bytes)),
                    ObsEvent::Usage(record) => usages.push(usage_model(record)),
                }
                if requests.len() + usages.len() >= config.batch_size {
                    flush(&db, &config, &mut requests, &mut usages).await;
                }
            }
            _ = ticker.tick() => {
                flush(&db, &config, &mut requests, &mut usages).await;
            }
        }
    }
    flush(&db, &config, &mut requests, &mut usages).await;
}

fn request_model(record: RequestDetailRecord, max_json_bytes: usize) -> request_details::ActiveModel {
    let detail = record.detail.filter(|d| {
        serde_json::to_vec(d)
            .map(|b| b.len() <= max_json_bytes)
            .unwrap_or(false)
    });
    request_details::ActiveModel {
        id: Default::default(),
        trace_id: Set(record.trace_id),
        machine_id: Set(record.machine_id),
        provider: Set(record.provider),
        model: Set(record.model),
        connection_id: Set(record.connection_id),
        source_format: Set(record.source_format),
        target_format: Set(record.target_format),
        streaming: Set(record.streaming),
        status: Set(record.status as i32),
        started_at: Set(record.started_at),
        ttft_ms: Set(record.ttft_ms),
        duration_ms: Set(record.duration_ms),
        content_len: Set(record.content_len),
        thinking_len: Set(record.thinking_len),
        input_tokens: Set(record.input_tokens),
        output_tokens: Set(record.output_tokens),
        usage_estimated: Set(record.usage_estimated),
        error: Set(record.error),
        detail: Set(detail),
    }
}

fn usage_model(record: UsageRecord) -> usage_records::ActiveModel {
    usage_records::ActiveModel {
        id: Default::default(),
        machine_id: Set(record.machine_id),
        provider: Set(record.provider),
        model: Set(record.model),
        connection_id: Set(record.connection_id),
        input_tokens: Set(record.input_tokens),
        output_tokens: Set(record.output_tokens),
        total_tokens: Set(record.input_tokens + record.output_tokens),
        estimated: Set(record.estimated),
        at: Set(record.at),
    }
}

async fn flush(
    db: &DatabaseConnection,
    config: &ObservabilityConfig,
    requests: &mut Vec<request_details::ActiveModel>,
    usages: &mut Vec<usage_records::ActiveModel>,
) {
    if !requests.is_empty() {
        let batch = std::mem::take(requests);
        if let Err(err) = request_details::Entity::insert_many(batch).exec(db).await {
            warn!(error = %err, "request detail flush failed");
        }
        prune(db, "request_details", config.max_records).await;
    }
    if !usages.is_empty() {
        let batch = std::mem::take(usages);
        if let Err(err) = usage_records::Entity::insert_many(batch).exec(db).await {
            warn!(error = %err, "usage record flush failed");
        }
        prune(db, "usage_records", config.max_records).await;
    }
}

async fn prune(db: &DatabaseConnection, table: &str, max_records: u64) {
    let sql = format!(
        "DELETE FROM {table} WHERE id NOT IN (SELECT id FROM {table} ORDER BY id DESC LIMIT {max_records})"
    );
    if let Err(err) = db
        .execute(Statement::from_string(db.get_database_backend(), sql))
        .await
    {
        warn!(error = %err, table, "prune failed");
    }
}
