use super::source::FrameSource;
use crate::scanner::clock::Clock;
use crate::scanner::frame::Frame;
use log::{debug, error, info};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraState {
    Open,
    Recovering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraHealth {
    pub consecutive_failures: u32,
    pub state: CameraState,
}

/// 摄像头守护：统计连续读取失败，达到阈值后关闭并按固定间隔无限重试打开
pub struct CameraSupervisor<S: FrameSource> {
    source: S,
    clock: Arc<dyn Clock>,
    fail_threshold: u32,
    reopen_wait: Duration,
    health: CameraHealth,
    reopen_attempts: u32,
    frames_read: u64,
}

impl<S: FrameSource> CameraSupervisor<S> {
    pub fn new(source: S, clock: Arc<dyn Clock>, fail_threshold: u32, reopen_wait: Duration) -> Self {
        Self {
            source,
            clock,
            fail_threshold: fail_threshold.max(1),
            reopen_wait,
            health: CameraHealth {
                consecutive_failures: 0,
                state: CameraState::Open,
            },
            reopen_attempts: 0,
            frames_read: 0,
        }
    }

    /// Opens the device once. On failure the supervisor starts in `Recovering` and the
    /// following `read_frame` calls keep retrying.
    pub fn start(&mut self) -> bool {
        match self.source.open() {
            Ok(()) => {
                self.health.state = CameraState::Open;
                true
            }
            Err(e) => {
                error!("❌ CAMERA_FAIL: initial open of {} failed: {}", self.source.device(), e);
                self.enter_recovering();
                false
            }
        }
    }

    /// Returns a frame, or `None` when there is nothing this cycle. Never fails.
    pub fn read_frame(&mut self) -> Option<Frame> {
        if self.health.state == CameraState::Recovering && !self.try_reopen() {
            return None;
        }

        match self.source.read() {
            Ok(mut frame) => {
                self.health.consecutive_failures = 0;
                self.frames_read += 1;
                frame.frame_number = self.frames_read;
                frame.timestamp = self.clock.now();
                Some(frame)
            }
            Err(e) => {
                self.health.consecutive_failures += 1;
                debug!(
                    "read failure {}/{}: {}",
                    self.health.consecutive_failures, self.fail_threshold, e
                );

                if self.health.consecutive_failures >= self.fail_threshold {
                    error!(
                        "❌ CAMERA_FAIL: {} consecutive read failures on {}, reopening",
                        self.health.consecutive_failures,
                        self.source.device()
                    );
                    self.source.close();
                    self.enter_recovering();
                }
                None
            }
        }
    }

    fn enter_recovering(&mut self) {
        self.health.state = CameraState::Recovering;
        self.reopen_attempts = 0;
    }

    fn try_reopen(&mut self) -> bool {
        self.reopen_attempts += 1;
        info!(
            "🔄 CAMERA_REOPEN: waiting {:.1}s before attempt {}",
            self.reopen_wait.as_secs_f64(),
            self.reopen_attempts
        );
        self.clock.sleep(self.reopen_wait);

        match self.source.open() {
            Ok(()) => {
                info!(
                    "✅ CAMERA_REOPEN: {} back after {} attempt(s)",
                    self.source.device(),
                    self.reopen_attempts
                );
                self.health = CameraHealth {
                    consecutive_failures: 0,
                    state: CameraState::Open,
                };
                self.reopen_attempts = 0;
                true
            }
            Err(e) => {
                error!("❌ CAMERA_REOPEN: attempt {} failed: {}", self.reopen_attempts, e);
                false
            }
        }
    }

    pub fn health(&self) -> CameraHealth {
        self.health
    }

    pub fn reopen_attempts(&self) -> u32 {
        self.reopen_attempts
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Releases the device. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.source.is_open() {
            self.source.close();
            info!("🗑️ Camera {} released", self.source.device());
        }
    }
}

impl<S: FrameSource> Drop for CameraSupervisor<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
