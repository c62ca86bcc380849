use crate::scanner::arming::{ArmingRegistry, FireEvent};
use crate::scanner::camera::{CameraState, CameraSupervisor, FrameSource};
use crate::scanner::clock::Clock;
use crate::scanner::decoder::{Decoder, Detection};
use crate::scanner::roi::RoiTracker;
use crate::scanner::token::{preview, TokenSet, PREVIEW_LEN};
use log::info;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 扫描参数，全部可通过配置文件或环境变量覆盖
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub scan_every_n_frames: u32,
    pub rearm_miss_sec: f64,
    pub cam_fail_threshold: u32,
    pub cam_reopen_wait_sec: f64,
    pub roi_padding: u32,
    pub roi_timeout_sec: f64,
    pub idle_sleep_ms: u64,
    pub equalize_histogram: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            scan_every_n_frames: 2,
            rearm_miss_sec: 1.0,
            cam_fail_threshold: 30,
            cam_reopen_wait_sec: 3.0,
            roi_padding: 40,
            roi_timeout_sec: 2.0,
            idle_sleep_ms: 10,
            equalize_histogram: true,
        }
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

impl ScannerConfig {
    pub fn rearm_miss(&self) -> Duration {
        secs(self.rearm_miss_sec)
    }

    pub fn cam_reopen_wait(&self) -> Duration {
        secs(self.cam_reopen_wait_sec)
    }

    pub fn roi_timeout(&self) -> Duration {
        secs(self.roi_timeout_sec)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }
}

/// Receives fire events. Implementations must hand off and return immediately.
pub trait Notifier: Send {
    fn deliver(&self, event: FireEvent);
}

/// Cooperative stop flag, checked once per cycle.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub frames_read: u64,
    pub frames_scanned: u64,
    pub roi_scans: u64,
    pub detections: u64,
    pub fires: u64,
    pub empty_cycles: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    NoFrame,
    Skipped,
    Scanned { detections: usize, fired: usize },
}

pub struct ScanLoop<S: FrameSource> {
    camera: CameraSupervisor<S>,
    decoder: Box<dyn Decoder>,
    tokens: TokenSet,
    roi: RoiTracker,
    arming: ArmingRegistry,
    notifier: Box<dyn Notifier>,
    clock: Arc<dyn Clock>,
    scan_every: u64,
    idle_sleep: Duration,
    log_raw: bool,
    stats: ScanStats,
}

impl<S: FrameSource> ScanLoop<S> {
    pub fn new(
        camera: CameraSupervisor<S>,
        decoder: Box<dyn Decoder>,
        tokens: TokenSet,
        notifier: Box<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: &ScannerConfig,
    ) -> Self {
        Self {
            camera,
            decoder,
            tokens,
            roi: RoiTracker::new(config.roi_padding, config.roi_timeout()),
            arming: ArmingRegistry::new(config.rearm_miss()),
            notifier,
            clock,
            scan_every: config.scan_every_n_frames.max(1) as u64,
            idle_sleep: config.idle_sleep(),
            log_raw: false,
            stats: ScanStats::default(),
        }
    }

    /// Logs full decoded text instead of a preview.
    pub fn with_raw_logging(mut self, log_raw: bool) -> Self {
        self.log_raw = log_raw;
        self
    }

    pub fn run_cycle(&mut self) -> CycleOutcome {
        let Some(frame) = self.camera.read_frame() else {
            // After a reconnect the camera may point elsewhere.
            if self.camera.health().state == CameraState::Recovering {
                self.roi.reset();
            }
            self.stats.empty_cycles += 1;
            self.clock.sleep(self.idle_sleep);
            return CycleOutcome::NoFrame;
        };

        self.stats.frames_read += 1;
        if self.stats.frames_read % self.scan_every != 0 {
            return CycleOutcome::Skipped;
        }

        let now = frame.timestamp;
        self.stats.frames_scanned += 1;

        let symbols = match self.roi.active_region(now) {
            Some(region) => {
                self.stats.roi_scans += 1;
                self.decoder.decode_region(&frame, region)
            }
            None => self.decoder.decode(&frame),
        };

        let detections: Vec<Detection> = symbols
            .into_iter()
            .map(|symbol| Detection {
                token: self.tokens.classify(&symbol.text),
                raw_text: symbol.text,
                bbox: symbol.bbox,
                timestamp: now,
            })
            .collect();

        for d in &detections {
            if self.log_raw {
                info!("🔍 QR_DETECTED: {} raw={}", d.token, d.raw_text);
            } else {
                info!(
                    "🔍 QR_DETECTED: {} preview={}",
                    d.token,
                    preview(&d.raw_text, PREVIEW_LEN)
                );
            }
        }
        self.stats.detections += detections.len() as u64;

        self.roi.update(&detections, (frame.width(), frame.height()), now);

        let fired = self.arming.observe(&detections, now);
        let fired_count = fired.len();
        for event in fired {
            info!(
                "🚨 FIRE: {} at {:.3}s preview={}",
                event.token,
                event.timestamp.as_secs_f64(),
                event.raw_text_preview
            );
            self.notifier.deliver(event);
        }
        self.stats.fires += fired_count as u64;

        CycleOutcome::Scanned {
            detections: detections.len(),
            fired: fired_count,
        }
    }

    /// Runs until `shutdown` is triggered, then releases the camera.
    pub fn run(&mut self, shutdown: &ShutdownSignal) -> ScanStats {
        info!("▶️ Scan loop started (every {} frame(s))", self.scan_every);

        while !shutdown.is_triggered() {
            self.run_cycle();
        }

        self.camera.shutdown();
        let s = self.stats;
        info!(
            "⏹️ Scan loop stopped: read={} scanned={} roi={} detections={} fires={} empty={}",
            s.frames_read, s.frames_scanned, s.roi_scans, s.detections, s.fires, s.empty_cycles
        );
        s
    }

    pub fn stats(&self) -> ScanStats {
        self.stats
    }

    pub fn camera(&self) -> &CameraSupervisor<S> {
        &self.camera
    }

    pub fn arming(&self) -> &ArmingRegistry {
        &self.arming
    }
}
