//! test_utils 与配置加载的集成测试

use std::io::Write;

use dispatch_shared::config::{AppConfig, SenderKind};
use dispatch_shared::test_utils::*;

#[test]
fn test_module_key_prefix_and_uniqueness() {
    let keys: Vec<String> = (0..50).map(|_| test_module_key("deploy")).collect();
    let mut deduped = keys.clone();
    deduped.sort();
    deduped.dedup();
    assert_eq!(keys.len(), deduped.len());
    assert!(keys.iter().all(|k| k.starts_with("deploy_")));
}

#[test]
fn test_endpoint_tokens_are_unique() {
    assert_ne!(test_endpoint_token(), test_endpoint_token());
}

#[test]
fn test_queue_config_uses_millisecond_backoff() {
    let queue = test_queue_config();
    let policy = queue.retry_policy();
    assert_eq!(policy.max_attempts, 5);
    assert!(policy.delay_for_attempt(1).as_millis() <= 1);
    assert!(policy.delay_for_attempt(5).as_millis() <= 20);
}

// 唯一修改进程环境变量的测试，集中在一个用例中避免并行干扰
#[test]
fn test_load_layers_files_and_env() {
    let dir = std::env::temp_dir().join(format!("notify-config-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();

    let mut default = std::fs::File::create(dir.join("default.toml")).unwrap();
    writeln!(
        default,
        r#"
[server]
port = 8181

[queue]
max_attempts = 4

[worker]
sender = "http"
http_endpoint = "http://gateway.local/send"
"#
    )
    .unwrap();

    let mut service = std::fs::File::create(dir.join("notification-worker.toml")).unwrap();
    writeln!(service, "[worker]\nconcurrency = 8").unwrap();

    // SAFETY: 本测试文件内没有其他用例读取这些环境变量
    unsafe {
        std::env::set_var("CONFIG_DIR", &dir);
        std::env::set_var("NOTIFY_QUEUE__LEASE_TIMEOUT_SECS", "45");
    }

    let config = tokio_test::assert_ok!(AppConfig::load("notification-worker"));

    // 服务配置把续租间隔调到租约时长之上，加载应被拒绝
    let mut service = std::fs::File::create(dir.join("notification-worker.toml")).unwrap();
    writeln!(service, "[worker]\nconcurrency = 8\nheartbeat_interval_secs = 60").unwrap();
    let rejected = AppConfig::load("notification-worker");

    unsafe {
        std::env::remove_var("CONFIG_DIR");
        std::env::remove_var("NOTIFY_QUEUE__LEASE_TIMEOUT_SECS");
    }
    let _ = std::fs::remove_dir_all(&dir);

    assert_eq!(config.service_name, "notification-worker");
    assert_eq!(config.observability.service_name, "notification-worker");
    assert_eq!(config.server.port, 8181);
    assert_eq!(config.queue.max_attempts, 4);
    assert_eq!(config.queue.lease_timeout_secs, 45);
    assert_eq!(config.worker.sender, SenderKind::Http);
    assert_eq!(config.worker.concurrency, 8);

    let err = rejected.unwrap_err();
    assert!(err.to_string().contains("heartbeat_interval_secs"));
}
