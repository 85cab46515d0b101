use std::collections::HashSet;
use std::time::Duration;

use promux_common::{
    ConnectionStatus, FallbackStrategy, MachineData, ProviderConnection,
};
use promux_pool::{CredentialPool, SelectOutcome};
use time::OffsetDateTime;

fn conn(provider: &str, priority: i32) -> ProviderConnection {
    ProviderConnection {
        provider: provider.to_string(),
        is_active: true,
        priority,
        api_key: Some("sk-test".to_string()),
        access_token: None,
        refresh_token: None,
        expires_at: None,
        project_id: None,
        provider_specific_data: Default::default(),
        health: Default::default(),
        usage: Default::default(),
    }
}

fn machine(strategy: FallbackStrategy) -> MachineData {
    let mut data = MachineData::default();
    data.settings.fallback_strategy = strategy;
    data.providers.insert("a".to_string(), conn("openai", 1));
    data.providers.insert("b".to_string(), conn("openai", 2));
    data
}

fn select_id(pool: &CredentialPool, data: &mut MachineData, now: OffsetDateTime) -> String {
    match pool.select(data, &["openai"], None, false, &HashSet::new(), now) {
        SelectOutcome::Selected(sel) => sel.connection_id,
        other => panic!("expected selection, got {other:?}"),
    }
}

#[test]
fn fill_first_prefers_lowest_priority_and_falls_back() {
    let pool = CredentialPool::new();
    let mut data = machine(FallbackStrategy::FillFirst);
    let t0 = OffsetDateTime::now_utc();

    assert_eq!(select_id(&pool, &mut data, t0), "a");

    // A hits 429: cooldown 60 s at level 0, B takes over.
    {
        let conn = data.providers.get_mut("a").unwrap();
        let decision =
            pool.mark_failed("a", conn, None, false, Some(429), "rate limited", None, t0);
        assert!(decision.fallback);
        assert_eq!(conn.health.backoff_level, 1);
        assert_eq!(conn.health.status, ConnectionStatus::Unavailable);
    }
    assert_eq!(select_id(&pool, &mut data, t0), "b");

    // After the cooldown passes A is preferred again.
    let later = t0 + Duration::from_secs(61);
    assert_eq!(select_id(&pool, &mut data, later), "a");
}

#[test]
fn round_robin_sticks_for_the_configured_limit() {
    let pool = CredentialPool::new();
    let mut data = machine(FallbackStrategy::RoundRobin);
    data.settings.sticky_round_robin_limit = 3;

    let mut now = OffsetDateTime::now_utc();
    let mut picks = Vec::new();
    for _ in 0..5 {
        picks.push(select_id(&pool, &mut data, now));
        now += Duration::from_secs(1);
    }
    assert_eq!(picks, ["a", "a", "a", "b", "b"]);
    assert_eq!(data.providers["b"].usage.consecutive_use_count, 2);
}

#[test]
fn all_rate_limited_reports_earliest_expiry() {
    let pool = CredentialPool::new();
    let mut data = machine(FallbackStrategy::FillFirst);
    let t0 = OffsetDateTime::now_utc();

    let until_a = t0 + Duration::from_secs(120);
    let until_b = t0 + Duration::from_secs(30);
    {
        let a = data.providers.get_mut("a").unwrap();
        a.health.rate_limited_until = Some(until_a);
        a.health.last_error = Some("quota".to_string());
        a.health.error_code = Some(429);
    }
    {
        let b = data.providers.get_mut("b").unwrap();
        b.health.rate_limited_until = Some(until_b);
        b.health.last_error = Some("slow down".to_string());
        b.health.error_code = Some(429);
    }

    match pool.select(&mut data, &["openai"], None, false, &HashSet::new(), t0) {
        SelectOutcome::AllRateLimited {
            retry_at,
            last_error,
            ..
        } => {
            assert_eq!(retry_at, until_b);
            assert_eq!(last_error.as_deref(), Some("slow down"));
        }
        other => panic!("expected AllRateLimited, got {other:?}"),
    }
}

#[test]
fn excluded_connection_is_skipped() {
    let pool = CredentialPool::new();
    let mut data = machine(FallbackStrategy::FillFirst);
    let now = OffsetDateTime::now_utc();
    let exclude: HashSet<String> = ["a".to_string()].into();
    match pool.select(&mut data, &["openai"], None, false, &exclude, now) {
        SelectOutcome::Selected(sel) => assert_eq!(sel.connection_id, "b"),
        other => panic!("expected selection, got {other:?}"),
    }
}

#[test]
fn no_credentials_for_unknown_provider() {
    let pool = CredentialPool::new();
    let mut data = machine(FallbackStrategy::FillFirst);
    let now = OffsetDateTime::now_utc();
    assert!(matches!(
        pool.select(&mut data, &["mistral"], None, false, &HashSet::new(), now),
        SelectOutcome::NoCredentials
    ));
}

#[test]
fn multi_bucket_lock_excludes_only_that_model() {
    let pool = CredentialPool::new();
    let mut data = MachineData::default();
    data.providers
        .insert("x".to_string(), conn("antigravity", 1));
    let now = OffsetDateTime::now_utc();

    // 429 for the claude family locks only (x, claude-*); the persisted
    // health triple stays clean.
    {
        let conn = data.providers.get_mut("x").unwrap();
        pool.mark_failed(
            "x",
            conn,
            Some("claude-sonnet-4-5"),
            true,
            Some(429),
            "resource exhausted",
            None,
            now,
        );
        assert_eq!(conn.health.status, ConnectionStatus::Active);
        assert!(conn.health.rate_limited_until.is_none());
    }

    let gemini = pool.select(
        &mut data,
        &["antigravity"],
        Some("gemini-3-pro"),
        true,
        &HashSet::new(),
        now,
    );
    assert!(matches!(gemini, SelectOutcome::Selected(_)));

    let claude = pool.select(
        &mut data,
        &["antigravity"],
        Some("claude-sonnet-4-5"),
        true,
        &HashSet::new(),
        now,
    );
    match claude {
        SelectOutcome::AllRateLimited { last_error_code, .. } => {
            assert_eq!(last_error_code, Some(429));
        }
        other => panic!("expected AllRateLimited, got {other:?}"),
    }
}

#[test]
fn success_clears_error_triple_once() {
    let pool = CredentialPool::new();
    let mut c = conn("openai", 1);
    let now = OffsetDateTime::now_utc();
    pool.mark_failed("c", &mut c, None, false, Some(500), "boom", None, now);
    assert!(pool.mark_success(&mut c));
    assert_eq!(c.health.backoff_level, 0);
    assert!(c.health.last_error.is_none());
    // Clean connection: nothing to write.
    assert!(!pool.mark_success(&mut c));
}

#[tokio::test]
async fn machine_guard_serialises_selection() {
    use std::sync::Arc;

    let pool = Arc::new(CredentialPool::new());
    let guard = pool.machine_guard("m1").await;
    let pool2 = pool.clone();
    let contender = tokio::spawn(async move {
        let _guard = pool2.machine_guard("m1").await;
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!contender.is_finished());
    drop(guard);
    tokio::time::timeout(Duration::from_secs(1), contender)
        .await
        .expect("guard released")
        .unwrap();
}
