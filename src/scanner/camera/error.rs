use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("cannot open {}: {source}", device.display())]
    Open {
        device: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("frame read failed: {0}")]
    Read(#[from] std::io::Error),
    #[error("frame buffer does not match {width}x{height}")]
    InvalidFrame { width: u32, height: u32 },
    #[error("no frame within {0:?}")]
    Timeout(std::time::Duration),
    #[error("device not open")]
    NotOpen,
    #[error("device unavailable: {0}")]
    Unavailable(String),
}
