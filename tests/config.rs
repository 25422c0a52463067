//! Configuration files on disk.

use std::net::Ipv4Addr;
use std::time::Duration;

use diamond_controller::config::Config;
use diamond_controller::error::{Error, TopologyError};
use diamond_controller::types::{DatapathId, Rail};

#[test]
fn test_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("controller.toml");

    let mut config = Config::example();
    config.topology.default_rail = Rail::Bottom;
    config.rules.flow_idle_timeout = Duration::from_secs(90);
    config.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded.topology, config.topology);
    assert_eq!(loaded.rules.flow_idle_secs(), 90);

    let topology = loaded.topology().unwrap();
    assert_eq!(topology.default_rail(), Rail::Bottom);
    assert_eq!(topology.host_count(), 8);
    assert_eq!(topology.edge_for_host(Ipv4Addr::new(10, 0, 0, 8)), Some(DatapathId(4)));
}

#[test]
fn test_partial_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("partial.toml");
    std::fs::write(
        &path,
        r#"
        [side_channel]
        listen_addr = "127.0.0.1:7000"
        "#,
    )
    .unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.side_channel.listen_addr.port(), 7000);
    assert_eq!(config.controller.listen_addr.port(), 6633);
    config.validate().unwrap();
}

#[test]
fn test_duplicate_host_rejected() {
    let mut config = Config::example();
    let stray = config.topology.switches[0].hosts[0];
    config.topology.switches[3].hosts.push(stray);

    let err = config.validate().unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, Error::Topology(TopologyError::DuplicateHost(_))));
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Config::load(dir.path().join("absent.toml")).is_err());
}
