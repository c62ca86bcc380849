pub mod config;
pub mod core;
pub mod models;
pub mod scanner;

/// 初始化日志，默认 info 级别，可用 `RUST_LOG` 覆盖
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}
