//! Configuration parsing and validation tests.

mod common;

use common::{create_slave_config, create_standalone_config, load_config};
use dkv::config::{Config, ConfigOverrides, NodeRole};

#[test]
fn minimal_standalone_config_loads_with_defaults() {
    let file = create_standalone_config();
    let config = load_config(&file);

    assert_eq!(config.node.role, NodeRole::Standalone);
    assert_eq!(config.node.listen_addr, "127.0.0.1:7070");
    assert_eq!(config.storage.engine, "memory");
    assert_eq!(config.storage.retained_changes, 4096);
    assert_eq!(config.replication.max_changes_per_pull, 256);
    assert_eq!(config.replication.lag_bound, 1_024);
    assert_eq!(config.discovery.region_ttl_secs, 10);
    assert_eq!(config.telemetry.log_level, "info");
}

#[test]
fn slave_config_requires_discovery_endpoints() {
    let file = create_slave_config("127.0.0.1:7090");
    let config = load_config(&file);
    assert_eq!(config.node.role, NodeRole::Slave);
    assert_eq!(config.discovery.endpoints, vec!["127.0.0.1:7090"]);

    let without_endpoints = r#"
[node]
listen_addr = "127.0.0.1:7071"
role = "slave"
"#;
    assert!(Config::from_toml(without_endpoints).is_err());
}

#[test]
fn invalid_values_are_rejected() {
    let bad_addr = r#"
[node]
listen_addr = "not-an-address"
role = "standalone"
"#;
    assert!(Config::from_toml(bad_addr).is_err());

    let bad_engine = r#"
[node]
listen_addr = "127.0.0.1:7070"
role = "standalone"

[storage]
engine = "rocks"
"#;
    assert!(Config::from_toml(bad_engine).is_err());

    let bad_level = r#"
[node]
listen_addr = "127.0.0.1:7070"
role = "standalone"

[telemetry]
log_level = "loud"
"#;
    assert!(Config::from_toml(bad_level).is_err());

    let heartbeat_slower_than_ttl = r#"
[node]
listen_addr = "127.0.0.1:7070"
role = "standalone"

[discovery]
heartbeat_interval_ms = 20000
region_ttl_secs = 10
"#;
    assert!(Config::from_toml(heartbeat_slower_than_ttl).is_err());
}

#[test]
fn cluster_peers_require_a_self_url() {
    let missing_self = r#"
[node]
listen_addr = "127.0.0.1:7070"
role = "master"

[cluster]
nexus_cluster_url = "http://n1:7071,http://n2:7071"
"#;
    assert!(Config::from_toml(missing_self).is_err());

    let with_self = r#"
[node]
listen_addr = "127.0.0.1:7070"
role = "master"

[cluster]
nexus_cluster_url = "http://n1:7071,http://n2:7071"
nexus_node_url = "http://n1:7071"

[[cluster.peers]]
url = "http://n3:7071"
dc_id = "dc-b"
"#;
    let config = Config::from_toml(with_self).unwrap();
    assert_eq!(config.cluster.peers.len(), 1);
    assert_eq!(config.cluster.peers[0].dc_id, "dc-b");
}

#[test]
fn overrides_take_effect() {
    let file = create_standalone_config();
    let mut config = load_config(&file);

    config.apply_overrides(&ConfigOverrides {
        listen_addr: Some("0.0.0.0:9000".to_string()),
        db_folder: Some("/tmp/dkv-test".to_string()),
        log_level: Some("debug".to_string()),
        discovery_endpoints: Some(vec!["d1:7090".to_string(), "d2:7090".to_string()]),
    });

    assert_eq!(config.node.listen_addr, "0.0.0.0:9000");
    assert_eq!(config.storage.db_folder, "/tmp/dkv-test");
    assert_eq!(config.telemetry.log_level, "debug");
    assert_eq!(config.discovery.endpoints.len(), 2);
    config.validate().unwrap();
}
