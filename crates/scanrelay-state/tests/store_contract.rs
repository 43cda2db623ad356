//! Contract tests for ScanStore.
//!
//! These exercise the behavioral guarantees of the trait through the
//! in-memory backend. Any conforming implementation must pass these.

use std::collections::BTreeMap;
use std::sync::Arc;

use scanrelay_state::{BucketItem, MemoryScanStore, ScanStore};

fn item(n: usize) -> BucketItem {
    BTreeMap::from([("title".to_string(), format!("scan-{n}"))])
}

#[tokio::test]
async fn concurrent_appends_never_lose_or_duplicate_items() {
    let store: Arc<dyn ScanStore> = Arc::new(MemoryScanStore::new());
    let threshold = 4;
    let total = 40;

    let mut tasks = Vec::new();
    for n in 0..total {
        let store = Arc::clone(&store);
        tasks.push(tokio::spawn(async move {
            store
                .append_to_bucket("route/output", item(n), threshold, false)
                .await
                .unwrap()
        }));
    }

    let mut delivered = Vec::new();
    for task in tasks {
        let batch = task.await.unwrap();
        if !batch.is_empty() {
            assert_eq!(batch.len(), threshold, "every drain returns a full batch");
        }
        delivered.extend(batch);
    }
    delivered.extend(store.drain_bucket("route/output").await.unwrap());

    let mut titles: Vec<String> = delivered.iter().map(|i| i["title"].clone()).collect();
    titles.sort();
    titles.dedup();
    assert_eq!(titles.len(), total);
}

#[tokio::test]
async fn concurrent_lookups_report_exactly_one_first_sighting() {
    let store: Arc<dyn ScanStore> = Arc::new(MemoryScanStore::new());

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let store = Arc::clone(&store);
        tasks.push(tokio::spawn(async move {
            store
                .lookup_and_record("docker.io/alpine:3.18", b"{\"image\":\"alpine:3.18\"}")
                .await
                .unwrap()
                .is_new
        }));
    }

    let mut new_count = 0;
    for task in tasks {
        if task.await.unwrap() {
            new_count += 1;
        }
    }
    assert_eq!(new_count, 1);
}

#[tokio::test]
async fn drain_of_unknown_bucket_is_empty() {
    let store = MemoryScanStore::new();
    assert!(store.drain_bucket("nobody/home").await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_item_does_not_count_toward_threshold() {
    let store = MemoryScanStore::new();
    store
        .append_to_bucket("r/o", BucketItem::new(), 1, false)
        .await
        .unwrap();
    assert_eq!(store.pending("r/o"), 0);
}
