//! Round trip against an S3-compatible endpoint (MinIO in CI).
//!
//! Run with `cargo test -p storage -- --ignored` once `AWS_ENDPOINT` points
//! at a reachable server.

use bytes::Bytes;
use rand::{RngCore, SeedableRng};
use std::env;
use storage::providers::S3Provider;
use storage::StorageProvider;

async fn provider() -> (S3Provider, String) {
    let endpoint = env::var("AWS_ENDPOINT").unwrap_or_else(|_| "http://localhost:9000".to_string());
    let access_key = env::var("AWS_ACCESS_KEY_ID").unwrap_or_else(|_| "minioadmin".to_string());
    let secret_key = env::var("AWS_SECRET_ACCESS_KEY").unwrap_or_else(|_| "minioadmin".to_string());
    let region = env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string());
    let bucket = env::var("AWS_TEST_BUCKET").unwrap_or_else(|_| "test-bucket".to_string());

    let provider = S3Provider::new(Some(region), Some(endpoint), Some(access_key), Some(secret_key))
        .await
        .expect("provider init");
    (provider, bucket)
}

#[tokio::test]
#[ignore = "requires an S3-compatible endpoint"]
async fn test_upload_stream_list_and_delete() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (provider, bucket) = provider().await;
    assert!(provider.bucket_exists(&bucket).await.unwrap(), "bucket {bucket} missing");

    // 13 MB: two full 5 MB parts and a short last part
    let mut data = vec![0u8; 13 * 1024 * 1024];
    rand::rngs::StdRng::seed_from_u64(42).fill_bytes(&mut data);
    let chunks: Vec<Result<Bytes, std::io::Error>> = data
        .chunks(64 * 1024)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();

    let key = format!("matrix/site_{}.zip", uuid::Uuid::new_v4());
    provider
        .upload_stream(
            &bucket,
            &key,
            Box::pin(futures::stream::iter(chunks)),
            Some("application/zip"),
            None,
        )
        .await
        .expect("multipart upload");

    let objects = provider.list_objects(&bucket, Some("matrix/")).await.unwrap();
    let uploaded = objects.iter().find(|o| o.key == key).expect("uploaded object listed");
    assert_eq!(uploaded.size, data.len() as u64);

    provider.delete_object(&bucket, &key).await.unwrap();
    let objects = provider.list_objects(&bucket, Some("matrix/")).await.unwrap();
    assert!(!objects.iter().any(|o| o.key == key), "object not deleted");
}
