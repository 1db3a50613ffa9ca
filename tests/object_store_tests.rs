use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use file_vault::object_store::signing::SignatureError;
use file_vault::object_store::{LocalStore, ObjectStore, ObjectStoreError, UrlSigner};

const SECRET: &[u8] = b"object-store-test-secret";

fn store(dir: &tempfile::TempDir) -> LocalStore {
    let signer = UrlSigner::new("http://localhost:8080/", SECRET);
    LocalStore::new(dir.path(), signer).unwrap()
}

#[tokio::test]
async fn test_local_store_put_get_nested_key() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);

    let data = Bytes::from("hello world");
    store.put("owner/file/v1/a.txt", data.clone()).await.unwrap();

    let retrieved = store.get("owner/file/v1/a.txt").await.unwrap();
    assert_eq!(retrieved, data);
    assert!(dir.path().join("owner/file/v1/a.txt").exists());
}

#[tokio::test]
async fn test_local_store_exists() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);

    assert!(!store.exists("missing").await.unwrap());

    store.put("present", Bytes::from("data")).await.unwrap();
    assert!(store.exists("present").await.unwrap());
}

#[tokio::test]
async fn test_local_store_delete() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);

    store.put("to-delete", Bytes::from("data")).await.unwrap();
    store.delete("to-delete").await.unwrap();
    assert!(!store.exists("to-delete").await.unwrap());

    // Deleting again is not an error
    store.delete("to-delete").await.unwrap();
}

#[tokio::test]
async fn test_local_store_get_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);

    let result = store.get("missing").await;
    assert!(matches!(result, Err(ObjectStoreError::NotFound(_))));
}

#[tokio::test]
async fn test_local_store_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);

    store.put("key", Bytes::from("first")).await.unwrap();
    store.put("key", Bytes::from("second")).await.unwrap();

    let data = store.get("key").await.unwrap();
    assert_eq!(data, Bytes::from("second"));
}

#[tokio::test]
async fn test_local_store_rejects_escaping_keys() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);

    for key in ["../outside", "/abs", "a//b", "a/./b", ""] {
        let result = store.put(key, Bytes::from("x")).await;
        assert!(
            matches!(result, Err(ObjectStoreError::InvalidKey(_))),
            "{key:?} should be rejected"
        );
    }
}

#[tokio::test]
async fn test_upload_url_is_verifiable_for_put_only() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);

    let presigned = store
        .upload_url("owner/file/v1/a.txt", Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(presigned.method, "PUT");
    assert!(presigned
        .url
        .starts_with("http://localhost:8080/storage/owner/file/v1/a.txt?expires="));
    assert!(presigned.expires_at > Utc::now());

    let signature = presigned.url.split("signature=").nth(1).unwrap();
    let expires = presigned.expires_at.timestamp();
    let signer = store.signer();

    assert_eq!(
        signer.verify("PUT", "owner/file/v1/a.txt", expires, signature, Utc::now()),
        Ok(())
    );
    assert_eq!(
        signer.verify("GET", "owner/file/v1/a.txt", expires, signature, Utc::now()),
        Err(SignatureError::Mismatch)
    );
}

#[tokio::test]
async fn test_download_url_expires() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);

    let presigned = store
        .download_url("previews/v1.jpg", Duration::from_secs(30))
        .await
        .unwrap();
    assert_eq!(presigned.method, "GET");

    let signature = presigned.url.split("signature=").nth(1).unwrap();
    let later = presigned.expires_at + chrono::Duration::seconds(1);
    assert_eq!(
        store.signer().verify(
            "GET",
            "previews/v1.jpg",
            presigned.expires_at.timestamp(),
            signature,
            later
        ),
        Err(SignatureError::Expired)
    );
}
