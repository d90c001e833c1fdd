use std::time::Duration;

use crate::error::StoreError;
use crate::store::{KeyValueStore, get_json, set_json};

/// Run the full key-value store conformance test suite.
///
/// Call this from your backend's test module with a fresh store instance.
///
/// # Errors
///
/// Returns an error if any conformance test fails.
pub async fn run_store_conformance_tests(store: &dyn KeyValueStore) -> Result<(), StoreError> {
    test_get_missing(store).await?;
    test_set_and_get(store).await?;
    test_overwrite(store).await?;
    test_delete(store).await?;
    test_keys_by_prefix(store).await?;
    test_ttl_set(store).await?;
    test_json_helpers(store).await?;
    test_change_notifications(store).await?;
    Ok(())
}

async fn test_get_missing(store: &dyn KeyValueStore) -> Result<(), StoreError> {
    let val = store.get("conformance:missing").await?;
    assert!(val.is_none(), "get on missing key should return None");
    Ok(())
}

async fn test_set_and_get(store: &dyn KeyValueStore) -> Result<(), StoreError> {
    store.set("conformance:set-get", "hello", None).await?;
    let val = store.get("conformance:set-get").await?;
    assert_eq!(val.as_deref(), Some("hello"));
    Ok(())
}

async fn test_overwrite(store: &dyn KeyValueStore) -> Result<(), StoreError> {
    store.set("conformance:overwrite", "v1", None).await?;
    store.set("conformance:overwrite", "v2", None).await?;
    let val = store.get("conformance:overwrite").await?;
    assert_eq!(val.as_deref(), Some("v2"), "set should overwrite");
    Ok(())
}

async fn test_delete(store: &dyn KeyValueStore) -> Result<(), StoreError> {
    store.set("conformance:to-delete", "bye", None).await?;
    let existed = store.delete("conformance:to-delete").await?;
    assert!(existed, "delete should return true for existing key");
    let val = store.get("conformance:to-delete").await?;
    assert!(val.is_none(), "get after delete should return None");

    let existed = store.delete("conformance:to-delete").await?;
    assert!(!existed, "delete on missing key should return false");
    Ok(())
}

async fn test_keys_by_prefix(store: &dyn KeyValueStore) -> Result<(), StoreError> {
    store.set("conformance:scan:b", "2", None).await?;
    store.set("conformance:scan:a", "1", None).await?;
    store.set("conformance:other", "x", None).await?;
    let keys = store.keys("conformance:scan:").await?;
    assert_eq!(keys, vec!["conformance:scan:a", "conformance:scan:b"]);
    Ok(())
}

async fn test_ttl_set(store: &dyn KeyValueStore) -> Result<(), StoreError> {
    store
        .set("conformance:ttl", "ephemeral", Some(Duration::from_secs(3600)))
        .await?;
    let val = store.get("conformance:ttl").await?;
    assert_eq!(val.as_deref(), Some("ephemeral"));
    Ok(())
}

async fn test_json_helpers(store: &dyn KeyValueStore) -> Result<(), StoreError> {
    set_json(store, "conformance:json", &vec![1, 2, 3], None).await?;
    let back: Option<Vec<i32>> = get_json(store, "conformance:json").await?;
    assert_eq!(back, Some(vec![1, 2, 3]));
    Ok(())
}

async fn test_change_notifications(store: &dyn KeyValueStore) -> Result<(), StoreError> {
    let mut rx = store.subscribe();
    store.set("conformance:notify", "on", None).await?;
    store.delete("conformance:notify").await?;

    let first = rx
        .recv()
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
    assert_eq!(first.key, "conformance:notify");
    assert_eq!(first.value.as_deref(), Some("on"));

    let second = rx
        .recv()
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
    assert_eq!(second.value, None, "delete should notify with no value");
    Ok(())
}
