//! Configuration files on disk

mod common;

use common::builders::{ConfigBuilder, RESIZED, SENSOR};
use p1node_rs::config::{MagicSource, WaitBudget};
use p1node_rs::types::{RawType, ReceiveMode, Size};
use p1node_rs::{NodeConfig, NodeError};
use std::io::Write;
use tempfile::{tempdir, NamedTempFile};

#[test]
fn test_save_then_load_keeps_every_section() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("p1node.toml");

    let mut config = ConfigBuilder::new().burst(4).build();
    config.receive_mode = ReceiveMode::Conservative;
    config.raw_type = RawType::Pure;
    config.magic_source = MagicSource::Local;
    config.sensor.mode = 3;
    config.dump.delivery_batches = true;
    config.save(&path).unwrap();

    let loaded = NodeConfig::load(&path).unwrap();
    assert_eq!(loaded.burst_size, 4);
    assert_eq!(loaded.depth_factor(), 2);
    assert_eq!(loaded.receive_mode, ReceiveMode::Conservative);
    assert_eq!(loaded.raw_type, RawType::Pure);
    assert_eq!(loaded.magic_source, MagicSource::Local);
    assert_eq!(loaded.sensor.size, SENSOR);
    assert_eq!(loaded.sensor.mode, 3);
    assert_eq!(loaded.ports.imgo, Some(SENSOR));
    assert_eq!(loaded.ports.rrzo, Some(RESIZED));
    assert_eq!(loaded.ports.lcso, None);
    assert_eq!(loaded.timing.start_ready, WaitBudget::new(5, 100));
    assert_eq!(loaded.timing.deque_timeout_ms, 10);
    assert!(loaded.dump.delivery_batches);
}

#[test]
fn test_partial_file_fills_defaults() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
burst_size = 2

[sensor]
size = {{ w = 1280, h = 960 }}

[ports]
imgo = {{ w = 1280, h = 960 }}
"#
    )
    .unwrap();

    let config = NodeConfig::load(file.path()).unwrap();
    let defaults = NodeConfig::default();
    assert_eq!(config.burst_size, 2);
    assert_eq!(config.sensor.size, Size::new(1280, 960));
    assert_eq!(config.ports.enabled().len(), 1);
    assert_eq!(config.queue_depth, defaults.queue_depth);
    assert_eq!(config.timing.flush_drain, defaults.timing.flush_drain);
    assert_eq!(config.magic_source, MagicSource::Driver);
    assert!(config.dump.processing_queue_on_mismatch);
}

#[test]
fn test_malformed_toml_is_a_config_error() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "burst_size = [not toml").unwrap();
    let err = NodeConfig::load(file.path()).unwrap_err();
    assert!(matches!(err, NodeError::Config(_)), "{}", err);
}

#[test]
fn test_invalid_values_rejected_on_load() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "burst_size = 0").unwrap();
    let err = NodeConfig::load(file.path()).unwrap_err();
    assert!(err.to_string().contains("burst_size"), "{}", err);

    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        "enable_capture_flow = true\ninit_request_count = 2"
    )
    .unwrap();
    assert!(NodeConfig::load(file.path()).is_err());
}

#[test]
fn test_missing_file_names_the_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    let err = NodeConfig::load(&path).unwrap_err();
    assert!(err.to_string().contains("absent.toml"), "{}", err);
}

#[test]
fn test_oversized_imgo_fails_validation() {
    let mut config = ConfigBuilder::new().build();
    config.ports.imgo = Some(Size::new(SENSOR.w + 2, SENSOR.h));
    assert!(matches!(config.validate(), Err(NodeError::Config(_))));

    config.ports = Default::default();
    assert!(config.validate().is_err());
}
