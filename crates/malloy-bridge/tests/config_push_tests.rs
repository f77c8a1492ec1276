//! Configuration push tests
//!
//! Pushing the same configuration twice must leave workers and the
//! connection table in the same state as pushing it once.

use malloy_bridge::types::CONFIG_METHOD;
use malloy_bridge::{
    ConfigLoader, ConfigPush, Connection, ConnectionFactory, ConnectionManager, Dispatcher,
};

const CONFIG: &str = r#"
config:
  rowLimit: 100
  downloadsPath: /tmp/downloads/
  connections:
    - name: local
      is: duckdb
      workingDirectory: /data
    - name: warehouse
      is: bigquery
      maximumBytesBilled: 2GB
"#;

#[test]
fn test_apply_same_config_twice_is_idempotent() {
    let config = ConfigLoader::load_from_string(CONFIG).unwrap().config;
    let manager = ConnectionManager::new(ConnectionFactory::new());

    manager.apply_config(&config);
    let names_once = manager.names();
    let settings_once = manager.settings();
    let local_once = manager.get("local").unwrap();

    manager.apply_config(&config);
    assert_eq!(manager.names(), names_once);
    assert_eq!(manager.settings(), settings_once);
    assert_eq!(*manager.get("local").unwrap(), *local_once);

    let warehouse = settings_once
        .iter()
        .find(|c| c.name == "warehouse")
        .unwrap();
    assert_eq!(warehouse.maximum_bytes_billed.as_deref(), Some("2147483648"));
}

#[tokio::test]
async fn test_worker_receives_full_config_each_push() {
    let config = ConfigLoader::load_from_string(CONFIG).unwrap().config;
    let payload = serde_json::to_value(ConfigPush::new(config)).unwrap();

    let (controller_io, worker_io) = tokio::io::duplex(64 * 1024);
    let (c_read, c_write) = tokio::io::split(controller_io);
    let (w_read, w_write) = tokio::io::split(worker_io);
    let controller = Connection::start("controller", c_read, c_write, Dispatcher::new());
    let worker = Connection::start("worker", w_read, w_write, Dispatcher::new());
    let mut received = worker.subscribe_notifications();

    controller
        .send_notification(CONFIG_METHOD, Some(payload.clone()))
        .unwrap();
    controller
        .send_notification(CONFIG_METHOD, Some(payload.clone()))
        .unwrap();

    let (first_method, first) = received.recv().await.unwrap();
    let (second_method, second) = received.recv().await.unwrap();
    assert_eq!(first_method, "malloy/config");
    assert_eq!(second_method, "malloy/config");
    assert_eq!(first, second);

    let first = first.unwrap();
    assert_eq!(first["config"]["rowLimit"], 100);
    assert_eq!(first["config"]["downloadsPath"], "/tmp/downloads/");
    assert_eq!(first["config"]["connections"].as_array().unwrap().len(), 2);
}
