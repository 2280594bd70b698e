//! 配置加载测试：宿主通过 TOML 文件给出调优参数。

use spark_stream_pool::{StreamManager, StreamPoolConfig, codes};

#[test]
fn partial_toml_falls_back_to_defaults() {
    let config: StreamPoolConfig = toml::from_str(
        r#"
        small_block_size = 8192
        small_threshold = 8192
        max_pooled_bytes = 67108864
        "#,
    )
    .expect("解析 TOML");

    assert_eq!(config.small_block_size, 8192);
    assert_eq!(config.large_block_size, 1024 * 1024);
    assert_eq!(config.max_pooled_bytes, 64 * 1024 * 1024);
    assert_eq!(config.max_stream_capacity, usize::MAX);
    assert!(!config.zero_on_return);

    let manager = StreamManager::new(config).expect("合法配置");
    assert_eq!(manager.pool().max_pooled_bytes(), 64 * 1024 * 1024);
}

#[test]
fn unknown_keys_are_rejected() {
    let result = toml::from_str::<StreamPoolConfig>("block_size = 4096");
    assert!(result.is_err(), "拼写错误的键不应被静默忽略");
}

#[test]
fn inconsistent_toml_fails_validation() {
    let config: StreamPoolConfig = toml::from_str(
        r#"
        small_block_size = 2097152
        large_block_size = 1048576
        "#,
    )
    .expect("解析 TOML");
    let err = StreamManager::new(config).expect_err("小块大于大块");
    assert_eq!(err.code(), codes::POOL_INVALID_CONFIG);
}

#[test]
fn json_config_is_accepted() {
    let config: StreamPoolConfig =
        serde_json::from_str(r#"{ "max_large_multiple": 4, "zero_on_return": true }"#)
            .expect("解析 JSON");
    assert_eq!(config.max_large_multiple, 4);
    assert!(config.zero_on_return);
    config.validate().expect("合法配置");
}
