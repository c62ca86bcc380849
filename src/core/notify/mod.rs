//! Webhook 通知：扫描循环只负责投递到队列，HTTP 发送与重试在独立线程完成

use crate::models::webhook::WebhookPayload;
use crate::scanner::{FireEvent, Notifier};
use log::{debug, error, info, warn};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

mod error;
mod transport;

pub use error::NotifyError;
pub use transport::{ReqwestTransport, WebhookTransport};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub url: String,
    pub timeout_sec: f64,
    pub max_attempts: u32,
    pub retry_backoff_sec: f64,
    pub queue_capacity: usize,
    /// 退出时等待队列发送完毕的最长时间，超时后丢弃剩余事件
    pub drain_timeout_sec: f64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_sec: 10.0,
            max_attempts: 3,
            retry_backoff_sec: 1.0,
            queue_capacity: 32,
            drain_timeout_sec: 5.0,
        }
    }
}

impl WebhookConfig {
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_sec).unwrap_or(Duration::from_secs(10))
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.drain_timeout_sec).unwrap_or(Duration::ZERO)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_backoff: Duration::try_from_secs_f64(self.retry_backoff_sec)
                .unwrap_or(Duration::ZERO),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

/// Posts `payload`, retrying with doubling backoff. Returns the number of attempts used.
/// Once `cancel` is set no further attempt is made.
pub fn send_with_retry(
    transport: &dyn WebhookTransport,
    payload: &WebhookPayload,
    policy: &RetryPolicy,
    cancel: &AtomicBool,
) -> Result<u32, NotifyError> {
    let mut backoff = policy.initial_backoff;
    let mut attempt = 1;

    loop {
        match transport.post(payload) {
            Ok(()) => return Ok(attempt),
            Err(e) if attempt >= policy.max_attempts || cancel.load(Ordering::Relaxed) => {
                return Err(e)
            }
            Err(e) => {
                warn!(
                    "⚠️ WEBHOOK_FAIL: attempt {}/{}: {}",
                    attempt, policy.max_attempts, e
                );
                std::thread::sleep(backoff);
                backoff *= 2;
                attempt += 1;
            }
        }
    }
}

fn run_worker(
    rx: Receiver<FireEvent>,
    transport: Box<dyn WebhookTransport>,
    policy: RetryPolicy,
    cancel: Arc<AtomicBool>,
) {
    for event in rx {
        if cancel.load(Ordering::Relaxed) {
            warn!("⚠️ IGNORED: {} (shutting down)", event.token);
            continue;
        }

        let Some(message) = event.token.webhook_message() else {
            info!(
                "❔ UNKNOWN: unrecognized QR code ignored (preview={})",
                event.raw_text_preview
            );
            continue;
        };

        let payload = WebhookPayload::new(message);
        match send_with_retry(transport.as_ref(), &payload, &policy, &cancel) {
            Ok(1) => info!("📨 SENT: {} -> {}", event.token, message),
            Ok(attempts) => info!(
                "📨 SENT: {} -> {} (after {} attempts)",
                event.token, message, attempts
            ),
            Err(e) => warn!("⚠️ IGNORED: {} (webhook failed: {})", event.token, e),
        }
    }
    debug!("webhook worker exiting");
}

/// 非阻塞通知器：`deliver` 只做 `try_send`，队列满时丢弃并告警
pub struct WebhookNotifier {
    tx: Option<SyncSender<FireEvent>>,
    worker: Option<JoinHandle<()>>,
    cancel: Arc<AtomicBool>,
    drain_timeout: Duration,
}

impl WebhookNotifier {
    pub fn spawn(config: &WebhookConfig) -> Result<Self, NotifyError> {
        let transport = ReqwestTransport::new(&config.url, config.timeout())?;
        Self::with_transport(Box::new(transport), config)
    }

    pub fn with_transport(
        transport: Box<dyn WebhookTransport>,
        config: &WebhookConfig,
    ) -> Result<Self, NotifyError> {
        let (tx, rx) = mpsc::sync_channel(config.queue_capacity.max(1));
        let policy = config.retry_policy();
        let cancel = Arc::new(AtomicBool::new(false));
        let worker_cancel = cancel.clone();

        let worker = std::thread::Builder::new()
            .name("webhook".into())
            .spawn(move || run_worker(rx, transport, policy, worker_cancel))?;

        info!("✅ WebhookNotifier: worker started");
        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
            cancel,
            drain_timeout: config.drain_timeout(),
        })
    }
}

impl Notifier for WebhookNotifier {
    fn deliver(&self, event: FireEvent) {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!("⚠️ IGNORED: {} (notification queue full)", event.token);
            }
            Err(TrySendError::Disconnected(event)) => {
                warn!("⚠️ IGNORED: {} (webhook worker stopped)", event.token);
            }
        }
    }
}

const DRAIN_POLL: Duration = Duration::from_millis(10);

impl Drop for WebhookNotifier {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain what is queued and exit.
        self.tx.take();
        let Some(worker) = self.worker.take() else {
            return;
        };

        let deadline = Instant::now() + self.drain_timeout;
        while !worker.is_finished() {
            if Instant::now() >= deadline {
                // The worker drops the rest of the queue and is left to finish on its own.
                self.cancel.store(true, Ordering::Relaxed);
                warn!(
                    "⚠️ WebhookNotifier: drain not finished after {:.1}s, dropping queued events",
                    self.drain_timeout.as_secs_f64()
                );
                return;
            }
            std::thread::sleep(DRAIN_POLL);
        }

        if worker.join().is_err() {
            error!("❌ webhook worker panicked");
        }
        info!("🗑️ WebhookNotifier: released");
    }
}
