#![allow(dead_code)]

use std::fs;

use ledger_core::{Block, Chain, ChainConfig};
use ledger_storage::SledStore;
use tempfile::{tempdir, TempDir};

pub const TS: u64 = 1_600_000_000_000;

pub fn create_temp_store() -> (TempDir, SledStore) {
    // Create a temporary directory for the sled database
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let db_path = temp_dir.path().to_path_buf();
    (
        temp_dir,
        SledStore::open(&db_path).expect("Failed to open SledStore"),
    )
}

pub fn teardown_store(temp_dir: TempDir, store: SledStore) {
    let db_path = temp_dir.path().to_path_buf();
    store.clear().expect("Failed to clear the store");
    drop(store);
    temp_dir.close().expect("Failed to delete temp dir");
    let _ = fs::remove_dir_all(&db_path);
    assert!(!db_path.exists(), "Database directory should be removed");
}

/// Genesis plus the two demonstration blocks, mined at difficulty 2.
pub fn demo_chain() -> Chain {
    let mut chain = Chain::with_config(ChainConfig::new(2).unwrap()).unwrap();
    chain
        .append(Block::new(1, TS, vec!["Transaction 1".to_string()]).unwrap())
        .unwrap();
    chain
        .append(Block::new(2, TS + 1, vec!["Transaction 2".to_string()]).unwrap())
        .unwrap();
    chain
}
