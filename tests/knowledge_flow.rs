//! Integration tests for knowledge exchange through a connected session:
//! append, read back, and the offline snapshot.

use std::sync::Arc;

use agent_colab::config::ColabConfig;
use agent_colab::error::ConnectionError;
use agent_colab::knowledge::{KnowledgeType, NewEntry, SearchParams};
use agent_colab::session::Session;
use agent_colab::store::{MemoryStore, StoreClient};

fn session_as(store: &Arc<MemoryStore>, name: &str, dir: &tempfile::TempDir) -> Session {
    let config = ColabConfig {
        cache_path: dir.path().join("knowledge_cache.json"),
        config_path: dir.path().join("config.json"),
        ..ColabConfig::default()
    };
    let mut session = Session::new(StoreClient::new(store.clone()), &config);
    session.connect_as(name);
    session
}

#[tokio::test]
async fn disconnected_session_refuses_access() {
    let dir = tempfile::tempdir().unwrap();
    let config = ColabConfig {
        cache_path: dir.path().join("knowledge_cache.json"),
        ..ColabConfig::default()
    };
    let session = Session::new(StoreClient::new(Arc::new(MemoryStore::new())), &config);

    assert!(!session.is_connected());
    assert!(matches!(session.knowledge().err(), Some(ConnectionError::NotConnected)));
    assert!(matches!(session.tasks().err(), Some(ConnectionError::NotConnected)));
}

#[tokio::test]
async fn saved_entry_is_visible_to_other_workers() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let writer = session_as(&store, "BLACK", &dir);
    let reader = session_as(&store, "INTOLERANT", &dir);

    let saved = writer
        .knowledge()
        .unwrap()
        .save(NewEntry::new("X", KnowledgeType::Lesson).with_tags(["a"]))
        .await
        .unwrap();

    let recent = reader.knowledge().unwrap().recent(20).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].id, saved.id);
    assert_eq!(recent[0].content, "X");
    assert_eq!(recent[0].tags, vec!["a"]);
    assert_eq!(recent[0].author, "BLACK");

    let from_other = reader.knowledge().unwrap().from_other(20).await.unwrap();
    assert_eq!(from_other.len(), 1);
    assert!(writer.knowledge().unwrap().from_other(20).await.unwrap().is_empty());

    let tagged = reader
        .knowledge()
        .unwrap()
        .search(SearchParams::tag("a"))
        .await
        .unwrap();
    assert_eq!(tagged.len(), 1);
}

#[tokio::test]
async fn snapshot_survives_without_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let online = session_as(&store, "R", &dir);
    let log = online.knowledge().unwrap();
    for n in 0..3 {
        log.learn(&format!("lesson {n} about retries"), ["retry"])
            .await
            .unwrap();
    }
    let report = log.sync_to_cache().await.unwrap();
    assert_eq!(report.count, 3);

    // A fresh, empty store: only the snapshot on disk has the entries
    let offline = session_as(&Arc::new(MemoryStore::new()), "R", &dir);
    let cached = offline.knowledge().unwrap().load_from_cache().await.unwrap();
    assert_eq!(cached.len(), 3);
    let hits = offline
        .knowledge()
        .unwrap()
        .search_cache("RETRIES")
        .await
        .unwrap();
    assert_eq!(hits.len(), 3);
}
