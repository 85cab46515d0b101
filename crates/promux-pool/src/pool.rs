use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use promux_common::{
    ConnectionStatus, FallbackStrategy, MachineData, MachineSettings, ProviderConnection,
};

use crate::model_locks::ModelLockMap;
use crate::policy::{classify_failure, FailureDecision, MODEL_LOCK_DEFAULT, MODEL_LOCK_RETRY_SECS};

#[derive(Debug, Clone)]
pub enum SelectOutcome {
    Selected(Selected),
    /// Every active connection is cooling down (or model-locked); carries the
    /// earliest expiry and the error fields of the connection bearing it.
    AllRateLimited {
        retry_at: OffsetDateTime,
        last_error: Option<String>,
        last_error_code: Option<u16>,
    },
    NoCredentials,
}

#[derive(Debug, Clone)]
pub struct Selected {
    pub connection_id: String,
    pub connection: ProviderConnection,
}

/// Shared pool machinery: per-machine mutexes and the process-local model
/// locks. Credential data itself lives in the machine document.
#[derive(Default)]
pub struct CredentialPool {
    mutexes: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    model_locks: ModelLockMap,
}

impl CredentialPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// At-most-one in-flight selection per machine. The caller holds the
    /// guard across load -> select -> persist so the recency ordering never
    /// tears.
    pub async fn machine_guard(&self, machine_id: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut guard = self.mutexes.lock().unwrap_or_else(|e| e.into_inner());
            guard
                .entry(machine_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        mutex.lock_owned().await
    }

    pub fn model_locks(&self) -> &ModelLockMap {
        &self.model_locks
    }

    /// Select an eligible connection and apply the recency update to the
    /// document in place. The caller persists the document before releasing
    /// the machine guard.
    pub fn select(
        &self,
        data: &mut MachineData,
        provider_ids: &[&str],
        model: Option<&str>,
        multi_bucket: bool,
        exclude: &HashSet<String>,
        now: OffsetDateTime,
    ) -> SelectOutcome {
        let matches_provider =
            |conn: &ProviderConnection| provider_ids.iter().any(|p| conn.provider == *p);

        let active: Vec<String> = data
            .providers
            .iter()
            .filter(|(_, conn)| conn.is_active && matches_provider(conn))
            .map(|(id, _)| id.clone())
            .collect();
        if active.is_empty() {
            return SelectOutcome::NoCredentials;
        }

        let mut model_locked_only = false;
        let eligible: Vec<String> = active
            .iter()
            .filter(|id| !exclude.contains(*id))
            .filter(|id| {
                let conn = &data.providers[*id];
                if conn.rate_limited_at(now) {
                    return false;
                }
                if multi_bucket {
                    if let Some(model) = model {
                        if self.model_locks.is_locked(id.as_str(), model) {
                            model_locked_only = true;
                            return false;
                        }
                    }
                }
                true
            })
            .cloned()
            .collect();

        if eligible.is_empty() {
            let rate_limited = active
                .iter()
                .filter_map(|id| {
                    let conn = &data.providers[id];
                    conn.health
                        .rate_limited_until
                        .filter(|until| *until > now)
                        .map(|until| (until, id.clone()))
                })
                .min_by_key(|(until, _)| *until);
            if let Some((retry_at, id)) = rate_limited {
                let health = &data.providers[&id].health;
                return SelectOutcome::AllRateLimited {
                    retry_at,
                    last_error: health.last_error.clone(),
                    last_error_code: health.error_code,
                };
            }
            if model_locked_only {
                return SelectOutcome::AllRateLimited {
                    retry_at: now + Duration::from_secs(MODEL_LOCK_RETRY_SECS),
                    last_error: model.map(|m| format!("model {m} cooling down on all connections")),
                    last_error_code: Some(429),
                };
            }
            return SelectOutcome::NoCredentials;
        }

        let chosen = match data.settings.fallback_strategy {
            FallbackStrategy::FillFirst => fill_first(data, &eligible),
            FallbackStrategy::RoundRobin => round_robin(data, &eligible, &data.settings),
        };

        // Recency update. Count continues while the same connection stays
        // current and resets to 1 on every switch.
        let previous = data
            .providers
            .iter()
            .filter(|(_, conn)| conn.is_active && matches_provider(conn))
            .filter_map(|(id, conn)| conn.usage.last_used_at.map(|at| (at, id.clone())))
            .max_by_key(|(at, _)| *at)
            .map(|(_, id)| id);
        let conn = data
            .providers
            .get_mut(&chosen)
            .expect("chosen id comes from the provider index");
        conn.usage.consecutive_use_count = if previous.as_deref() == Some(chosen.as_str()) {
            conn.usage.consecutive_use_count.saturating_add(1)
        } else {
            1
        };
        conn.usage.last_used_at = Some(now);
        debug!(connection = %chosen, count = conn.usage.consecutive_use_count, "selected credential");

        SelectOutcome::Selected(Selected {
            connection_id: chosen.clone(),
            connection: data.providers[&chosen].clone(),
        })
    }

    /// Classify a failure and apply it: a 429 on a multi-bucket provider with
    /// a known model only locks that `(connection, model)` pair in memory;
    /// everything else lands in the persisted health triple.
    #[allow(clippy::too_many_arguments)]
    pub fn mark_failed(
        &self,
        connection_id: &str,
        conn: &mut ProviderConnection,
        model: Option<&str>,
        multi_bucket: bool,
        status: Option<u16>,
        error_text: &str,
        retry_hint: Option<Duration>,
        now: OffsetDateTime,
    ) -> FailureDecision {
        let decision = classify_failure(status, error_text, conn.health.backoff_level);

        if multi_bucket && decision.effective_status == Some(429) {
            if let Some(model) = model {
                self.model_locks
                    .lock(connection_id, model, retry_hint.unwrap_or(MODEL_LOCK_DEFAULT));
                return decision;
            }
        }

        if decision.fallback {
            conn.health.status = ConnectionStatus::Unavailable;
            conn.health.rate_limited_until = Some(now + decision.cooldown);
            conn.health.last_error = Some(truncate_error(error_text));
            conn.health.error_code = decision.effective_status.or(status);
            conn.health.last_error_at = Some(now);
            conn.health.backoff_level = decision.next_backoff_level;
        }
        decision
    }

    /// Clear the error triple after a success. Returns whether anything
    /// changed (a clean connection skips the write).
    pub fn mark_success(&self, conn: &mut ProviderConnection) -> bool {
        let dirty = conn.health.status != ConnectionStatus::Active
            || conn.health.last_error.is_some()
            || conn.health.rate_limited_until.is_some()
            || conn.health.backoff_level != 0;
        if dirty {
            conn.health.status = ConnectionStatus::Active;
            conn.health.last_error = None;
            conn.health.error_code = None;
            conn.health.last_error_at = None;
            conn.health.rate_limited_until = None;
            conn.health.backoff_level = 0;
        }
        dirty
    }
}

fn fill_first(data: &MachineData, eligible: &[String]) -> String {
    eligible
        .iter()
        .min_by_key(|id| (data.providers[*id].priority, (*id).clone()))
        .expect("eligible is non-empty")
        .clone()
}

fn round_robin(data: &MachineData, eligible: &[String], settings: &MachineSettings) -> String {
    let limit = settings.sticky_round_robin_limit.max(1);
    let current = eligible
        .iter()
        .filter_map(|id| {
            data.providers[id]
                .usage
                .last_used_at
                .map(|at| (at, id.clone()))
        })
        .max_by_key(|(at, _)| *at)
        .map(|(_, id)| id);

    if let Some(current) = current {
        if data.providers[&current].usage.consecutive_use_count < limit {
            return current;
        }
    }

    // Least-recent next; never-used connections go first, ties break on
    // priority then id for stability.
    eligible
        .iter()
        .min_by_key(|id| {
            let conn = &data.providers[*id];
            (
                conn.usage.last_used_at.unwrap_or(OffsetDateTime::UNIX_EPOCH),
                conn.priority,
                (*id).clone(),
            )
        })
        .expect("eligible is non-empty")
        .clone()
}

fn truncate_error(text: &str) -> String {
    const MAX: usize = 1024;
    if text.len() <= MAX {
        text.to_string()
    } else {
        let mut end = MAX;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text[..end].to_string()
    }
}
