//! Shared test utilities for seine-engine tests.

use std::sync::Arc;

use seine_types::{ChunkerConfig, FileUploadResult, UploadConfig, UploadEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::client::{CasClient, MemoryCasClient};
use crate::error::EngineError;
use crate::uploader::{UploadSource, Uploader};

/// Generate deterministic, non-repeating test data.
pub fn test_data(size: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut state: u32 = 0xDEAD_BEEF;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}

/// Small chunk sizes so modest inputs exercise multi-chunk paths.
pub fn small_config() -> UploadConfig {
    UploadConfig {
        chunker: ChunkerConfig::from_target(1024),
        read_block_size: 4096,
        ..UploadConfig::default()
    }
}

/// Run one upload batch, collecting emitted events.
pub async fn run_upload(
    client: &Arc<MemoryCasClient>,
    config: UploadConfig,
    sources: Vec<UploadSource>,
) -> (
    Result<Vec<FileUploadResult>, EngineError>,
    Vec<UploadEvent>,
) {
    let uploader = Uploader::new(client.clone() as Arc<dyn CasClient>, config);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let result = uploader
        .upload(sources, tx, CancellationToken::new())
        .await;

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    (result, events)
}

/// Decode a xorb payload back into its unframed chunks.
pub fn unframe(xorb: &[u8]) -> Vec<Vec<u8>> {
    let mut chunks = Vec::new();
    let mut pos = 0;
    while pos < xorb.len() {
        assert_eq!(xorb[pos], 0, "frame version");
        let stored =
            u32::from_le_bytes([xorb[pos + 1], xorb[pos + 2], xorb[pos + 3], 0]) as usize;
        assert_eq!(xorb[pos + 4], 0, "compression scheme");
        let raw = u32::from_le_bytes([xorb[pos + 5], xorb[pos + 6], xorb[pos + 7], 0]) as usize;
        assert_eq!(stored, raw, "scheme 0 stores chunks verbatim");
        chunks.push(xorb[pos + 8..pos + 8 + stored].to_vec());
        pos += 8 + stored;
    }
    chunks
}

/// Reassemble every chunk stored on the client, in shard listing order,
/// for one uploaded file's rep ranges.
pub fn reassemble_file(
    client: &MemoryCasClient,
    file: &seine_cas::ParsedFileInfo,
) -> Vec<u8> {
    let mut out = Vec::new();
    for rep in &file.reps {
        let xorb = client.xorb_bytes(rep.xorb_hash).expect("xorb missing");
        let chunks = unframe(&xorb);
        for chunk in
            &chunks[rep.chunk_index_start as usize..rep.chunk_index_end as usize]
        {
            out.extend_from_slice(chunk);
        }
    }
    out
}
