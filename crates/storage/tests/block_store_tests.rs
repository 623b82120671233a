// Behaviour every block store backend must share.

mod common;

use bytes::Bytes;
use cask_core::BlockId;
use cask_storage::{ObjectProperties, StorageError};
use common::{all_backends, seeded_bytes, split_blocks};

#[tokio::test]
async fn test_parallel_staging_commits_in_index_order() {
    for (store, _guard) in all_backends().await {
        let data = seeded_bytes(7, 100_000);
        let blocks = split_blocks(&data, 4096);

        // Stage every block from its own task; completion order is arbitrary.
        let handles: Vec<_> = blocks
            .iter()
            .cloned()
            .map(|(id, bytes)| {
                let store = store.clone();
                tokio::spawn(async move { store.stage_block("big.bin", &id, bytes).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let ids: Vec<BlockId> = blocks.iter().map(|(id, _)| id.clone()).collect();
        assert_eq!(store.staged_blocks("big.bin").await.unwrap(), ids);

        let location = store
            .commit_block_list("big.bin", &ids, ObjectProperties::default())
            .await
            .unwrap();
        assert_eq!(location.size, data.len() as u64, "{}", store.backend_name());
        assert_eq!(store.get("big.bin").await.unwrap(), data);
    }
}

#[tokio::test]
async fn test_retried_block_does_not_duplicate() {
    for (store, _guard) in all_backends().await {
        let data = seeded_bytes(3, 30);
        let blocks = split_blocks(&data, 10);

        for (id, bytes) in &blocks {
            store.stage_block("r.bin", id, bytes.clone()).await.unwrap();
        }
        // Block 1 staged again, as a retry would.
        store
            .stage_block("r.bin", &blocks[1].0, blocks[1].1.clone())
            .await
            .unwrap();

        let ids: Vec<_> = blocks.iter().map(|(id, _)| id.clone()).collect();
        let location = store
            .commit_block_list("r.bin", &ids, ObjectProperties::default())
            .await
            .unwrap();
        assert_eq!(location.size, 30);
        assert_eq!(store.get("r.bin").await.unwrap(), data);
    }
}

#[tokio::test]
async fn test_partial_list_is_rejected_without_side_effects() {
    for (store, _guard) in all_backends().await {
        let blocks = split_blocks(&Bytes::from_static(b"abcdefgh"), 2);
        for (id, bytes) in blocks.iter().take(3) {
            store.stage_block("p.bin", id, bytes.clone()).await.unwrap();
        }

        let ids: Vec<_> = blocks.iter().map(|(id, _)| id.clone()).collect();
        let result = store
            .commit_block_list("p.bin", &ids, ObjectProperties::default())
            .await;
        match result {
            Err(StorageError::MissingBlock { block, .. }) => {
                assert_eq!(block, BlockId::from_index(3).to_string());
            }
            other => panic!("expected MissingBlock, got {other:?}"),
        }
        assert!(!store.exists("p.bin").await.unwrap());
        assert!(matches!(
            store.head("p.bin").await,
            Err(StorageError::NotFound(_))
        ));
    }
}

#[tokio::test]
async fn test_content_type_stored_with_object() {
    for (store, _guard) in all_backends().await {
        let id = BlockId::from_index(0);
        store
            .stage_block("doc.pdf", &id, Bytes::from_static(b"%PDF"))
            .await
            .unwrap();
        store
            .commit_block_list(
                "doc.pdf",
                &[id],
                ObjectProperties {
                    content_type: Some("application/pdf".to_string()),
                },
            )
            .await
            .unwrap();

        let meta = store.head("doc.pdf").await.unwrap();
        assert_eq!(meta.size, 4);
        assert_eq!(meta.content_type.as_deref(), Some("application/pdf"));
        assert!(meta.last_modified.is_some());
    }
}

#[tokio::test]
async fn test_recommit_replaces_object() {
    for (store, _guard) in all_backends().await {
        for content in [&b"first version"[..], &b"second"[..]] {
            let id = BlockId::from_index(0);
            store
                .stage_block("v.txt", &id, Bytes::copy_from_slice(content))
                .await
                .unwrap();
            store
                .commit_block_list("v.txt", &[id], ObjectProperties::default())
                .await
                .unwrap();
        }
        assert_eq!(store.get("v.txt").await.unwrap(), Bytes::from_static(b"second"));
    }
}
