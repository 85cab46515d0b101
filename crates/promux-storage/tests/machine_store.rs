use promux_common::{ConnectionStatus, MachineData, ProviderConnection};
use promux_storage::{connect, init_machine_schema, MachineStore};

fn sample_machine() -> MachineData {
    let mut data = MachineData::default();
    data.model_aliases
        .insert("fast".to_string(), "groq/llama-3.3-70b".to_string());
    data.providers.insert(
        "c1".to_string(),
        ProviderConnection {
            provider: "openai".to_string(),
            is_active: true,
            priority: 1,
            api_key: Some("sk-upstream".to_string()),
            access_token: None,
            refresh_token: None,
            expires_at: None,
            project_id: None,
            provider_specific_data: Default::default(),
            health: Default::default(),
            usage: Default::default(),
        },
    );
    data
}

async fn store() -> MachineStore {
    let db = connect("sqlite::memory:").await.unwrap();
    init_machine_schema(&db).await.unwrap();
    MachineStore::new(db)
}

#[tokio::test]
async fn save_load_round_trip() {
    let store = store().await;
    assert!(store.load("m1").await.unwrap().is_none());

    let data = sample_machine();
    store.save("m1", &data).await.unwrap();
    let loaded = store.load("m1").await.unwrap().unwrap();
    assert_eq!(loaded.model_aliases["fast"], "groq/llama-3.3-70b");
    assert_eq!(loaded.providers["c1"].priority, 1);
}

#[tokio::test]
async fn save_is_an_upsert() {
    let store = store().await;
    let mut data = sample_machine();
    store.save("m1", &data).await.unwrap();

    data.providers.get_mut("c1").unwrap().priority = 9;
    store.save("m1", &data).await.unwrap();
    let loaded = store.load("m1").await.unwrap().unwrap();
    assert_eq!(loaded.providers["c1"].priority, 9);
}

#[tokio::test]
async fn update_connection_mutates_one_entry() {
    let store = store().await;
    store.save("m1", &sample_machine()).await.unwrap();

    let changed = store
        .update_connection("m1", "c1", |conn| {
            conn.health.status = ConnectionStatus::Unavailable;
            conn.health.backoff_level = 2;
        })
        .await
        .unwrap();
    assert!(changed);

    let loaded = store.load("m1").await.unwrap().unwrap();
    assert_eq!(loaded.providers["c1"].health.backoff_level, 2);
    assert_eq!(
        loaded.providers["c1"].health.status,
        ConnectionStatus::Unavailable
    );

    // Unknown targets are a no-op, not an error.
    assert!(!store.update_connection("m1", "nope", |_| {}).await.unwrap());
    assert!(!store.update_connection("m2", "c1", |_| {}).await.unwrap());
}
