//! Worker-pool limits, xorb sealing under load, cancellation, and
//! upload-failure propagation.

use std::sync::Arc;

use seine_cas::parse_shard;
use seine_types::{ChunkerConfig, UploadConfig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::client::MemoryCasClient;
use crate::error::EngineError;
use crate::uploader::{UploadSource, Uploader};

use super::helpers::{reassemble_file, run_upload, small_config, test_data};

#[tokio::test]
async fn test_many_files_with_bounded_workers() {
    let client = Arc::new(MemoryCasClient::new());
    let config = UploadConfig {
        file_workers: 2,
        upload_workers: 2,
        ..small_config()
    };

    let sources: Vec<_> = (0..8)
        .map(|i| {
            // Distinct content per file.
            let mut data = test_data(20_000 + i * 1000);
            data[0] = i as u8;
            UploadSource::from_bytes(format!("file-{i}"), data)
        })
        .collect();

    let (result, _) = run_upload(&client, config, sources).await;
    let results = result.unwrap();

    assert_eq!(results.len(), 8);
    // Results come back in input order regardless of completion order.
    for (i, file) in results.iter().enumerate() {
        assert_eq!(file.path, format!("file-{i}"));
        assert_eq!(file.total_bytes, 20_000 + i as u64 * 1000);
    }
    assert_eq!(client.shard_count(), 1);
}

#[tokio::test]
async fn test_xorb_sealing_under_small_caps() {
    let client = Arc::new(MemoryCasClient::new());
    let config = UploadConfig {
        chunker: ChunkerConfig::from_target(1024),
        max_xorb_chunks: 8,
        ..UploadConfig::default()
    };
    let data = test_data(100_000);

    let (result, _) = run_upload(
        &client,
        config,
        vec![UploadSource::from_bytes("f", data.clone())],
    )
    .await;
    result.unwrap();

    // ~100 chunks across 8-chunk xorbs.
    assert!(client.xorb_count() > 2, "expected multiple sealed xorbs");

    let shard = parse_shard(&client.shards()[0]).unwrap();
    assert_eq!(shard.xorbs.len(), client.xorb_count());
    for xorb in &shard.xorbs {
        assert!(xorb.chunks.len() <= 8);
        assert!(client.has_xorb(xorb.hash), "every listed xorb was uploaded");
    }

    // The file spans several xorbs but still reassembles exactly.
    let file = &shard.files[0];
    assert!(file.reps.len() > 2);
    assert_eq!(reassemble_file(&client, file), data);
}

#[tokio::test]
async fn test_pre_cancelled_batch_aborts() {
    let client = Arc::new(MemoryCasClient::new());
    let uploader = Uploader::new(client.clone(), small_config());
    let (tx, _rx) = mpsc::unbounded_channel();

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = uploader
        .upload(
            vec![UploadSource::from_bytes("f", test_data(10_000))],
            tx,
            cancel,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));

    // Nothing was finalized.
    assert_eq!(client.shard_count(), 0);
}

#[tokio::test]
async fn test_upload_failure_fails_batch() {
    let client = Arc::new(MemoryCasClient::new());
    client.set_fail_uploads(true);

    let (result, _) = run_upload(
        &client,
        small_config(),
        vec![UploadSource::from_bytes("f", test_data(10_000))],
    )
    .await;
    assert!(result.is_err());
    assert_eq!(client.shard_count(), 0);
}

#[tokio::test]
async fn test_interleaved_files_share_xorb() {
    // Two files small enough to land in the same open xorb; the shard
    // must keep each file's chunk ranges separate.
    let client = Arc::new(MemoryCasClient::new());
    let data_a = test_data(5_000);
    let data_b = test_data(10_000)[5_000..].to_vec();

    let (result, _) = run_upload(
        &client,
        small_config(),
        vec![
            UploadSource::from_bytes("a", data_a.clone()),
            UploadSource::from_bytes("b", data_b.clone()),
        ],
    )
    .await;
    result.unwrap();

    assert_eq!(client.xorb_count(), 1);
    let shard = parse_shard(&client.shards()[0]).unwrap();
    assert_eq!(shard.files.len(), 2);

    let by_path: Vec<_> = shard.files.iter().collect();
    let totals: Vec<u64> = by_path
        .iter()
        .map(|f| f.reps.iter().map(|r| r.unpacked_len as u64).sum())
        .collect();
    let mut sorted = totals.clone();
    sorted.sort();
    assert_eq!(sorted, vec![5_000, 10_000 - 5_000]);

    for file in &shard.files {
        let reassembled = reassemble_file(&client, file);
        assert!(reassembled == data_a || reassembled == data_b);
    }
}
