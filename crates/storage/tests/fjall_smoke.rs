#![cfg(feature = "fjall")]

use sispopd_storage::fjall::FjallStore;
use sispopd_storage::{Column, KeyValueStore, WriteBatch};

#[test]
fn fjall_checkpoint_column_roundtrip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FjallStore::open(dir.path()).expect("open fjall");

    store
        .put(Column::Checkpoint, &60u64.to_be_bytes(), b"sixty")
        .expect("put");
    store
        .put(Column::Checkpoint, &4u64.to_be_bytes(), b"four")
        .expect("put");

    let mut batch = WriteBatch::new();
    batch.put(Column::Checkpoint, 8u64.to_be_bytes(), b"eight".to_vec());
    batch.delete(Column::Checkpoint, 4u64.to_be_bytes());
    store.write_batch(&batch).expect("batch commit");

    let keys: Vec<Vec<u8>> = store
        .scan_prefix(Column::Checkpoint, &[])
        .expect("scan")
        .into_iter()
        .map(|(key, _)| key)
        .collect();
    assert_eq!(
        keys,
        vec![8u64.to_be_bytes().to_vec(), 60u64.to_be_bytes().to_vec()]
    );

    assert_eq!(
        store
            .get(Column::Checkpoint, &8u64.to_be_bytes())
            .expect("get"),
        Some(b"eight".to_vec())
    );
    assert!(store
        .get(Column::Checkpoint, &4u64.to_be_bytes())
        .expect("get")
        .is_none());
}
