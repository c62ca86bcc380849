//! 配置加载：默认值 → json5 配置文件（`QR_GATE_CONFIG`）→ 环境变量（含 `.env`）

use crate::core::notify::WebhookConfig;
use crate::scanner::{ScannerConfig, TokenSet};
use log::{debug, info};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_PATH_VAR: &str = "QR_GATE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} is not set, check .env")]
    Missing(String),
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
    #[error("cannot read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config file {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub device: PathBuf,
    pub width: u32,
    pub height: u32,
    /// 单次读帧最长等待时间，超时按读取失败计数
    pub read_timeout_sec: f64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/tmp/qr_gate.fifo"),
            width: 640,
            height: 480,
            read_timeout_sec: 1.0,
        }
    }
}

impl CameraConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.read_timeout_sec).unwrap_or(Duration::from_secs(1))
    }
}

/// json5 配置文件结构，所有字段可省略
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub scanner: ScannerConfig,
    pub webhook: WebhookConfig,
    pub camera: CameraConfig,
    pub log_raw_qr: bool,
}

impl FileConfig {
    pub fn from_json5(text: &str, path: &Path) -> Result<Self, ConfigError> {
        json5::from_str(text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json5(&text, path)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub tokens: TokenSet,
    pub webhook: WebhookConfig,
    pub scanner: ScannerConfig,
    pub camera: CameraConfig,
    pub log_raw_qr: bool,
}

impl ServiceConfig {
    /// Loads `.env`, the optional json5 file, then the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => info!("📄 Loaded {}", path.display()),
            Err(e) => debug!("no .env loaded: {}", e),
        }

        let file = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) => {
                info!("📄 Reading config file {}", path);
                FileConfig::load(Path::new(&path))?
            }
            Err(_) => FileConfig::default(),
        };

        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Applies environment overrides from `lookup` on top of `file`.
    pub fn resolve<F>(file: FileConfig, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup: &lookup };

        let tokens = TokenSet::new(
            env.required("OPEN_QR")?,
            env.required("CLOSE_QR")?,
            env.required("TEST_QR")?,
        );

        let mut webhook = file.webhook;
        if let Some(url) = env.string("DISCORD_WEBHOOK_URL") {
            webhook.url = url;
        }
        if webhook.url.trim().is_empty() {
            return Err(ConfigError::Missing("DISCORD_WEBHOOK_URL".into()));
        }
        env.apply("WEBHOOK_TIMEOUT_SEC", &mut webhook.timeout_sec)?;
        env.apply("WEBHOOK_MAX_ATTEMPTS", &mut webhook.max_attempts)?;
        env.apply("WEBHOOK_RETRY_BACKOFF_SEC", &mut webhook.retry_backoff_sec)?;
        env.apply("WEBHOOK_QUEUE_CAPACITY", &mut webhook.queue_capacity)?;
        env.apply("WEBHOOK_DRAIN_TIMEOUT_SEC", &mut webhook.drain_timeout_sec)?;

        let mut scanner = file.scanner;
        env.apply("SCAN_EVERY_N_FRAMES", &mut scanner.scan_every_n_frames)?;
        env.apply("REARM_MISS_SEC", &mut scanner.rearm_miss_sec)?;
        env.apply("CAM_FAIL_THRESHOLD", &mut scanner.cam_fail_threshold)?;
        env.apply("CAM_REOPEN_WAIT_SEC", &mut scanner.cam_reopen_wait_sec)?;
        env.apply("ROI_PADDING", &mut scanner.roi_padding)?;
        env.apply("ROI_TIMEOUT_SEC", &mut scanner.roi_timeout_sec)?;
        env.apply("IDLE_SLEEP_MS", &mut scanner.idle_sleep_ms)?;
        env.apply_bool("EQUALIZE_HISTOGRAM", &mut scanner.equalize_histogram)?;

        let mut camera = file.camera;
        if let Some(device) = env.string("CAMERA_DEVICE") {
            camera.device = PathBuf::from(device);
        }
        env.apply("FRAME_WIDTH", &mut camera.width)?;
        env.apply("FRAME_HEIGHT", &mut camera.height)?;
        env.apply("CAM_READ_TIMEOUT_SEC", &mut camera.read_timeout_sec)?;

        let mut log_raw_qr = file.log_raw_qr;
        env.apply_bool("LOG_RAW_QR", &mut log_raw_qr)?;

        let config = Self {
            tokens,
            webhook,
            scanner,
            camera,
            log_raw_qr,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.scanner;
        if s.scan_every_n_frames == 0 {
            return Err(invalid("SCAN_EVERY_N_FRAMES", "0", "must be at least 1"));
        }
        if s.cam_fail_threshold == 0 {
            return Err(invalid("CAM_FAIL_THRESHOLD", "0", "must be at least 1"));
        }
        for (key, value) in [
            ("REARM_MISS_SEC", s.rearm_miss_sec),
            ("CAM_REOPEN_WAIT_SEC", s.cam_reopen_wait_sec),
            ("ROI_TIMEOUT_SEC", s.roi_timeout_sec),
            ("WEBHOOK_TIMEOUT_SEC", self.webhook.timeout_sec),
            ("WEBHOOK_RETRY_BACKOFF_SEC", self.webhook.retry_backoff_sec),
            ("WEBHOOK_DRAIN_TIMEOUT_SEC", self.webhook.drain_timeout_sec),
            ("CAM_READ_TIMEOUT_SEC", self.camera.read_timeout_sec),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(key, &value.to_string(), "must be a non-negative number of seconds"));
            }
        }
        if self.camera.read_timeout_sec == 0.0 {
            return Err(invalid("CAM_READ_TIMEOUT_SEC", "0", "must be greater than zero"));
        }
        if self.webhook.max_attempts == 0 {
            return Err(invalid("WEBHOOK_MAX_ATTEMPTS", "0", "must be at least 1"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            let value = format!("{}x{}", self.camera.width, self.camera.height);
            return Err(invalid("FRAME_WIDTH/FRAME_HEIGHT", &value, "frame size must be non-zero"));
        }

        let t = &self.tokens;
        if t.open == t.close || t.open == t.test || t.close == t.test {
            return Err(invalid("OPEN_QR/CLOSE_QR/TEST_QR", "<redacted>", "tokens must be distinct"));
        }
        Ok(())
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.string(key)
            .ok_or_else(|| ConfigError::Missing(key.to_string()))
    }

    fn apply<T: FromStr>(&self, key: &str, slot: &mut T) -> Result<(), ConfigError>
    where
        T::Err: std::fmt::Display,
    {
        if let Some(raw) = self.string(key) {
            *slot = raw
                .trim()
                .parse()
                .map_err(|e: T::Err| invalid(key, &raw, &e.to_string()))?;
        }
        Ok(())
    }

    fn apply_bool(&self, key: &str, slot: &mut bool) -> Result<(), ConfigError> {
        if let Some(raw) = self.string(key) {
            *slot = match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => true,
                "false" | "0" | "no" | "off" => false,
                _ => return Err(invalid(key, &raw, "expected true or false")),
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("OPEN_QR", "open-secret"),
            ("CLOSE_QR", "close-secret"),
            ("TEST_QR", "test-secret"),
            ("DISCORD_WEBHOOK_URL", "https://discord.com/api/webhooks/1/abc"),
        ])
    }

    fn resolve(file: FileConfig, env: &HashMap<&'static str, &'static str>) -> Result<ServiceConfig, ConfigError> {
        ServiceConfig::resolve(file, |k| env.get(k).map(|v| v.to_string()))
    }

    #[test]
    fn test_defaults_with_required_env() {
        let config = resolve(FileConfig::default(), &base_env()).unwrap();

        assert_eq!(config.tokens.open, "open-secret");
        assert_eq!(config.webhook.url, "https://discord.com/api/webhooks/1/abc");
        assert_eq!(config.scanner, ScannerConfig::default());
        assert_eq!(config.camera, CameraConfig::default());
        assert!(!config.log_raw_qr);
    }

    #[test]
    fn test_missing_token_is_reported() {
        let mut env = base_env();
        env.remove("CLOSE_QR");
        match resolve(FileConfig::default(), &env) {
            Err(ConfigError::Missing(key)) => assert_eq!(key, "CLOSE_QR"),
            other => panic!("expected Missing, got {:?}", other),
        }
    }

    #[test]
    fn test_blank_webhook_is_missing() {
        let mut env = base_env();
        env.insert("DISCORD_WEBHOOK_URL", "   ");
        assert!(matches!(
            resolve(FileConfig::default(), &env),
            Err(ConfigError::Missing(_))
        ));
    }

    #[test]
    fn test_env_overrides_tunables() {
        let mut env = base_env();
        env.insert("SCAN_EVERY_N_FRAMES", "3");
        env.insert("REARM_MISS_SEC", "1.5");
        env.insert("CAM_FAIL_THRESHOLD", "10");
        env.insert("ROI_PADDING", "24");
        env.insert("LOG_RAW_QR", "TRUE");
        env.insert("CAMERA_DEVICE", "/run/cam.gray");

        let config = resolve(FileConfig::default(), &env).unwrap();
        assert_eq!(config.scanner.scan_every_n_frames, 3);
        assert_eq!(config.scanner.rearm_miss(), Duration::from_millis(1500));
        assert_eq!(config.scanner.cam_fail_threshold, 10);
        assert_eq!(config.scanner.roi_padding, 24);
        assert!(config.log_raw_qr);
        assert_eq!(config.camera.device, PathBuf::from("/run/cam.gray"));
    }

    #[test]
    fn test_unparsable_value() {
        let mut env = base_env();
        env.insert("CAM_FAIL_THRESHOLD", "thirty");
        match resolve(FileConfig::default(), &env) {
            Err(ConfigError::Invalid { key, .. }) => assert_eq!(key, "CAM_FAIL_THRESHOLD"),
            other => panic!("expected Invalid, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_sampling_rejected() {
        let mut env = base_env();
        env.insert("SCAN_EVERY_N_FRAMES", "0");
        assert!(matches!(
            resolve(FileConfig::default(), &env),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_negative_seconds_rejected() {
        let mut env = base_env();
        env.insert("ROI_TIMEOUT_SEC", "-2");
        assert!(matches!(
            resolve(FileConfig::default(), &env),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_read_timeout_override_and_zero_rejected() {
        let mut env = base_env();
        env.insert("CAM_READ_TIMEOUT_SEC", "0.25");
        let config = resolve(FileConfig::default(), &env).unwrap();
        assert_eq!(config.camera.read_timeout(), Duration::from_millis(250));

        env.insert("CAM_READ_TIMEOUT_SEC", "0");
        match resolve(FileConfig::default(), &env) {
            Err(ConfigError::Invalid { key, .. }) => assert_eq!(key, "CAM_READ_TIMEOUT_SEC"),
            other => panic!("expected Invalid, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_tokens_rejected() {
        let mut env = base_env();
        env.insert("TEST_QR", "open-secret");
        assert!(matches!(
            resolve(FileConfig::default(), &env),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_json5_file_then_env() {
        let text = r#"{
            // partial file, everything else defaults
            scanner: { rearm_miss_sec: 2.5, roi_padding: 16 },
            webhook: { url: "https://example.invalid/hook", max_attempts: 5 },
            camera: { width: 320, height: 240 },
        }"#;
        let file = FileConfig::from_json5(text, Path::new("test.json5")).unwrap();
        assert_eq!(file.scanner.rearm_miss_sec, 2.5);
        assert_eq!(file.scanner.scan_every_n_frames, 2);

        let mut env = base_env();
        env.remove("DISCORD_WEBHOOK_URL");
        env.insert("ROI_PADDING", "8");

        let config = resolve(file, &env).unwrap();
        assert_eq!(config.webhook.url, "https://example.invalid/hook");
        assert_eq!(config.webhook.max_attempts, 5);
        assert_eq!(config.scanner.roi_padding, 8);
        assert_eq!(config.camera.width, 320);
    }

    #[test]
    fn test_bad_json5_file() {
        let err = FileConfig::from_json5("{ scanner: ", Path::new("broken.json5")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = FileConfig::load(Path::new("/nonexistent/qr_gate.json5")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
