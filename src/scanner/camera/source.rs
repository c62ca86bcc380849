//! Frame sources. Only [`super::CameraSupervisor`] opens, reads and closes them.

use super::error::CameraError;
use crate::scanner::frame::Frame;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

const POLL_INTERVAL: Duration = Duration::from_millis(5);
const QUEUED_FRAMES: usize = 2;

type FrameBytes = io::Result<Vec<u8>>;

pub trait FrameSource: Send {
    fn open(&mut self) -> Result<(), CameraError>;

    /// Frames come back unstamped; the supervisor assigns timestamp and frame number.
    fn read(&mut self) -> Result<Frame, CameraError>;

    fn close(&mut self);

    fn is_open(&self) -> bool;

    fn device(&self) -> String;
}

/// 从文件/FIFO 读取定长 8 位灰度帧（例如由 ffmpeg 以 `-pix_fmt gray -f rawvideo` 输出）
///
/// 读取在独立线程中进行，`read` 最多等待 `read_timeout`，因此写端卡住或消失都不会阻塞扫描循环。
pub struct RawGraySource {
    path: PathBuf,
    width: u32,
    height: u32,
    read_timeout: Duration,
    pump: Option<Pump>,
}

impl RawGraySource {
    pub fn new(path: impl AsRef<Path>, width: u32, height: u32) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            width,
            height,
            read_timeout: DEFAULT_READ_TIMEOUT,
            pump: None,
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    fn frame_len(&self) -> usize {
        (self.width * self.height) as usize
    }
}

fn open_nonblocking(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        // Opening a FIFO without a writer would otherwise block.
        options.custom_flags(libc::O_NONBLOCK);
    }
    options.open(path)
}

impl FrameSource for RawGraySource {
    fn open(&mut self) -> Result<(), CameraError> {
        self.close();

        let to_open_error = |source| CameraError::Open {
            device: self.path.clone(),
            source,
        };
        let file = open_nonblocking(&self.path).map_err(to_open_error)?;
        let pump = Pump::spawn(file, self.frame_len()).map_err(to_open_error)?;
        self.pump = Some(pump);

        info!(
            "📷 CAMERA_OPEN: {} ({}x{} gray, read timeout {:?})",
            self.path.display(),
            self.width,
            self.height,
            self.read_timeout
        );
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, CameraError> {
        let pump = self.pump.as_ref().ok_or(CameraError::NotOpen)?;

        let data = match pump.rx.recv_timeout(self.read_timeout) {
            Ok(result) => result?,
            Err(RecvTimeoutError::Timeout) => return Err(CameraError::Timeout(self.read_timeout)),
            Err(RecvTimeoutError::Disconnected) => {
                return Err(CameraError::Unavailable("frame reader stopped".into()))
            }
        };

        Frame::new(self.width, self.height, data, Duration::ZERO, 0).ok_or(
            CameraError::InvalidFrame {
                width: self.width,
                height: self.height,
            },
        )
    }

    fn close(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.stop();
            debug!("closed {}", self.path.display());
        }
    }

    fn is_open(&self) -> bool {
        self.pump.is_some()
    }

    fn device(&self) -> String {
        self.path.display().to_string()
    }
}

impl Drop for RawGraySource {
    fn drop(&mut self) {
        self.close();
    }
}

/// 后台读取线程：轮询非阻塞文件，凑满一帧后放入有界队列
struct Pump {
    rx: Receiver<FrameBytes>,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Pump {
    fn spawn(file: File, frame_len: usize) -> io::Result<Self> {
        let (tx, rx) = mpsc::sync_channel(QUEUED_FRAMES);
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::Builder::new()
            .name("frame-reader".into())
            .spawn(move || pump_frames(file, frame_len, tx, flag))?;
        Ok(Self { rx, stop, handle })
    }

    /// Returns within one poll interval; the reader never blocks on the file.
    fn stop(self) {
        let Pump { rx, stop, handle } = self;
        stop.store(true, Ordering::Relaxed);
        drop(rx);
        if handle.join().is_err() {
            warn!("⚠️ frame reader thread panicked");
        }
    }
}

fn pump_frames(mut file: File, frame_len: usize, tx: SyncSender<FrameBytes>, stop: Arc<AtomicBool>) {
    let mut buf = vec![0u8; frame_len];
    let mut filled = 0;

    while !stop.load(Ordering::Relaxed) {
        match file.read(&mut buf[filled..]) {
            // No writer attached, or end of file. A partial frame is discarded.
            Ok(0) => {
                filled = 0;
                thread::sleep(POLL_INTERVAL);
            }
            Ok(n) => {
                filled += n;
                if filled < frame_len {
                    continue;
                }
                filled = 0;
                // When the consumer is behind, the newest frame is dropped.
                match tx.try_send(Ok(buf.clone())) {
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Disconnected(_)) => return,
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                let _ = tx.try_send(Err(e));
                return;
            }
        }
    }
}

/// Creates a FIFO at `path` for tests.
#[cfg(all(test, unix))]
pub(crate) fn make_fifo(path: &Path) {
    use std::os::unix::ffi::OsStrExt;
    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes()).unwrap();
    assert_eq!(unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) }, 0, "mkfifo failed");
}

/// 模拟帧源：按脚本返回读取/打开结果，脚本耗尽后使用默认值
pub struct MockFrameSource {
    width: u32,
    height: u32,
    open: bool,
    reads: VecDeque<bool>,
    opens: VecDeque<bool>,
    default_read: bool,
    open_calls: u32,
    close_calls: u32,
}

impl MockFrameSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            open: false,
            reads: VecDeque::new(),
            opens: VecDeque::new(),
            default_read: true,
            open_calls: 0,
            close_calls: 0,
        }
    }

    /// `true` yields a frame, `false` a read failure.
    pub fn with_reads(mut self, reads: impl IntoIterator<Item = bool>) -> Self {
        self.reads.extend(reads);
        self
    }

    pub fn with_opens(mut self, opens: impl IntoIterator<Item = bool>) -> Self {
        self.opens.extend(opens);
        self
    }

    pub fn with_default_read(mut self, ok: bool) -> Self {
        self.default_read = ok;
        self
    }

    pub fn open_calls(&self) -> u32 {
        self.open_calls
    }

    pub fn close_calls(&self) -> u32 {
        self.close_calls
    }
}

impl FrameSource for MockFrameSource {
    fn open(&mut self) -> Result<(), CameraError> {
        self.open_calls += 1;
        if self.opens.pop_front().unwrap_or(true) {
            self.open = true;
            Ok(())
        } else {
            Err(CameraError::Unavailable("mock device absent".into()))
        }
    }

    fn read(&mut self) -> Result<Frame, CameraError> {
        if !self.open {
            return Err(CameraError::NotOpen);
        }
        if self.reads.pop_front().unwrap_or(self.default_read) {
            Ok(Frame::filled(self.width, self.height, 128, Duration::ZERO, 0))
        } else {
            Err(CameraError::Unavailable("mock read failure".into()))
        }
    }

    fn close(&mut self) {
        self.close_calls += 1;
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn device(&self) -> String {
        "mock".to_string()
    }
}
