use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shelf_store::{Record, Store, StoreConfig, StoreError, SyncMode};
use tempfile::TempDir;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct User {
    id: u64,
    name: String,
}

impl Record for User {
    fn indexes() -> &'static [&'static str] {
        &["name"]
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Order {
    id: String,
    user_id: u64,
}

impl Record for Order {}

fn user(id: u64, name: &str) -> User {
    User {
        id,
        name: name.into(),
    }
}

fn open(dir: &TempDir) -> Store {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut config = StoreConfig::new(dir.path());
    config.sync = SyncMode::EveryWrite;
    Store::open(config).unwrap()
}

#[test]
fn save_then_get_by_field() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    store.save(&user(1, "alice")).unwrap();

    let alice: User = store.get("name", "alice").unwrap();
    assert_eq!(alice, user(1, "alice"));
    assert!(dir.path().join("User.db").exists());
}

#[test]
fn records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open(&dir);
        store.save(&user(1, "alice")).unwrap();
        store.save(&user(2, "bob")).unwrap();
        store.save(&user(2, "robert")).unwrap();
        store.remove(&user(1, "alice")).unwrap();
    }

    let store = open(&dir);
    let all: Vec<User> = store.get_all().unwrap();
    assert_eq!(all, vec![user(2, "robert")]);
    assert!(store.get::<User>("name", "bob").unwrap_err().is_not_found());
}

#[test]
fn compact_keeps_live_records() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    for round in 0..5 {
        store.save(&user(1, &format!("alice-{round}"))).unwrap();
    }
    store.compact::<User>().unwrap();
    assert_eq!(store.count::<User>().unwrap(), 1);

    drop(store);
    let store = open(&dir);
    let alice: User = store.get("id", 1).unwrap();
    assert_eq!(alice.name, "alice-4");
}

#[test]
fn distinct_types_use_distinct_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    store.save(&user(1, "alice")).unwrap();
    store
        .save(&Order {
            id: "o-1".into(),
            user_id: 1,
        })
        .unwrap();

    assert!(dir.path().join("User.db").exists());
    assert!(dir.path().join("Order.db").exists());
    let (_, a) = store.resolver().resolve::<User>().unwrap();
    let (_, b) = store.resolver().resolve::<User>().unwrap();
    assert!(Arc::ptr_eq(&a, &b));
}

#[test]
fn drop_bucket_then_reopen_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    store.save(&user(1, "alice")).unwrap();
    assert!(store.drop_type::<User>().unwrap());
    assert!(!dir.path().join("User.db").exists());
    assert!(store.get_all::<User>().unwrap().is_empty());
    drop(store);

    let store = open(&dir);
    assert_eq!(store.count::<User>().unwrap(), 0);
}

#[test]
fn registered_name_routes_storage() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    store.register::<Order>("orders").unwrap();
    store
        .save(&Order {
            id: "o-1".into(),
            user_id: 7,
        })
        .unwrap();

    assert!(dir.path().join("orders.db").exists());
    assert!(!dir.path().join("Order.db").exists());
    assert!(matches!(
        store.register::<Order>("other"),
        Err(StoreError::AlreadyBound { .. })
    ));
}

#[test]
fn config_file_is_honored() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data");
    let config_path = dir.path().join("shelf.toml");
    std::fs::write(
        &config_path,
        format!(
            "root = {:?}\nextension = \"shelf\"\nsync = \"every-write\"\n",
            data.display().to_string()
        ),
    )
    .unwrap();

    let store = Store::open(StoreConfig::load(&config_path).unwrap()).unwrap();
    store.save(&user(1, "alice")).unwrap();
    assert!(data.join("User.shelf").exists());
}

#[tokio::test]
async fn subscriber_sees_saves_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    let mut users = store.subscribe_typed::<User>().unwrap();

    store.save(&user(1, "bob")).unwrap();
    store.save(&user(2, "carol")).unwrap();
    store
        .save(&Order {
            id: "o-1".into(),
            user_id: 1,
        })
        .unwrap();

    for expected in [user(1, "bob"), user(2, "carol")] {
        let got = tokio::time::timeout(Duration::from_secs(5), users.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*got, expected);
    }
    assert!(users.try_recv().is_none());
}

#[tokio::test]
async fn late_subscriber_gets_no_history() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    let mut early = store.subscribe("User").unwrap();
    store.save(&user(1, "alice")).unwrap();
    tokio::time::timeout(Duration::from_secs(5), early.recv())
        .await
        .unwrap()
        .unwrap();

    let mut late = store.subscribe_typed::<User>().unwrap();
    store.save(&user(2, "bob")).unwrap();
    let got = tokio::time::timeout(Duration::from_secs(5), late.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got.name, "bob");
}

#[tokio::test]
async fn subscriptions_survive_drop() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    let mut users = store.subscribe_typed::<User>().unwrap();
    store.save(&user(1, "alice")).unwrap();
    store.drop_bucket("User").unwrap();
    store.save(&user(2, "bob")).unwrap();

    let first = users.recv().await.unwrap();
    let second = users.recv().await.unwrap();
    assert_eq!((first.id, second.id), (1, 2));
    assert_eq!(store.count::<User>().unwrap(), 1);
}
