//! Common test utilities.
//!
//! Shared helpers for integration tests. Import with `mod common;`.

#![allow(dead_code)]

use std::io::Write;
use std::sync::Arc;

use dkv::config::Config;
use dkv::memory::MemStore;
use dkv::proto::{ChangeRecord, RegionInfo, RegionStatus, TrxnRecord};
use dkv::storage::KvStore;
use tempfile::NamedTempFile;

/// Create a minimal valid standalone-node configuration file.
pub fn create_standalone_config() -> NamedTempFile {
    let config_content = r#"
[node]
listen_addr = "127.0.0.1:7070"
role = "standalone"
dc_id = "dc-a"
database = "default"

[storage]
engine = "memory"
"#;

    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(config_content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Create a slave configuration file with the given discovery endpoint.
pub fn create_slave_config(discovery_endpoint: &str) -> NamedTempFile {
    let config_content = format!(
        r#"
[node]
listen_addr = "127.0.0.1:7071"
role = "slave"
dc_id = "dc-a"
database = "default"

[storage]
engine = "memory"

[discovery]
endpoints = ["{}"]
"#,
        discovery_endpoint
    );

    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(config_content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Load a config from a temp file.
pub fn load_config(file: &NamedTempFile) -> Config {
    Config::from_file(file.path()).expect("Failed to load config")
}

/// Create a temporary directory for test data.
pub fn temp_test_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Create an in-memory store with a generous change window.
pub fn mem_store() -> Arc<MemStore> {
    Arc::new(MemStore::new(1024))
}

/// Put `count` keys of the form `{prefix}_{i}` with matching values.
pub fn put_keys(store: &dyn KvStore, count: usize, key_prefix: &str, val_prefix: &str) {
    for i in 1..=count {
        let key = format!("{}_{}", key_prefix, i);
        let value = format!("{}_{}", val_prefix, i);
        store
            .put(key.as_bytes(), value.as_bytes(), 0)
            .expect("put failed");
    }
}

/// Single-key get.
pub fn get_one(store: &dyn KvStore, key: &[u8]) -> Vec<u8> {
    store.get(&[key]).expect("get failed").remove(0)
}

/// Build a single-Put change record.
pub fn put_record(change_number: u64, key: &[u8], value: &[u8]) -> ChangeRecord {
    ChangeRecord::new(
        change_number,
        vec![TrxnRecord::put(key.to_vec(), value.to_vec(), 0)],
    )
}

/// Build a region heartbeat payload.
pub fn region(dc: &str, db: &str, vb: u32, addr: &str, status: RegionStatus) -> RegionInfo {
    let mut info = RegionInfo {
        dc_id: dc.to_string(),
        database: db.to_string(),
        vbucket: vb,
        node_address: addr.to_string(),
        ..Default::default()
    };
    info.set_status(status);
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standalone_config_loads() {
        let file = create_standalone_config();
        let config = load_config(&file);
        assert_eq!(config.node.dc_id, "dc-a");
        assert_eq!(config.storage.engine, "memory");
    }

    #[test]
    fn put_keys_round_trip() {
        let store = mem_store();
        put_keys(store.as_ref(), 3, "key", "val");
        assert_eq!(get_one(store.as_ref(), b"key_2"), b"val_2");
    }
}
