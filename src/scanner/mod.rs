//! QR 令牌扫描核心
//!
//! 核心策略：
//! 1. 摄像头守护 - 连续读取失败达到阈值后关闭设备，固定间隔重试打开
//! 2. 隔帧解码 - 每 N 帧解码一次，命中后只扫描 ROI 区域
//! 3. 边沿触发 - 每个令牌类别独立布防，持续可见只通知一次，消失足够久后重新布防
//! 4. 异步通知 - 触发事件交给通知器，扫描循环从不等待投递结果

pub mod arming;
pub mod camera;
pub mod clock;
pub mod decoder;
pub mod frame;
pub mod roi;
pub mod scan_loop;
pub mod token;

pub use arming::{ArmAction, ArmState, ArmingRegistry, FireEvent};
pub use camera::{CameraError, CameraHealth, CameraState, CameraSupervisor, FrameSource, MockFrameSource, RawGraySource};
pub use clock::{Clock, ManualClock, SystemClock};
pub use decoder::{DecodedSymbol, Decoder, Detection, MockDecoder, RqrrDecoder};
pub use frame::{Frame, Region};
pub use roi::RoiTracker;
pub use scan_loop::{CycleOutcome, Notifier, ScanLoop, ScanStats, ScannerConfig, ShutdownSignal};
pub use token::{preview, TokenClass, TokenSet, PREVIEW_LEN};
