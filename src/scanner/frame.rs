use image::{imageops, GrayImage, Luma};
use std::time::Duration;

/// 帧数据结构（8 位灰度）
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: GrayImage,
    pub timestamp: Duration,
    pub frame_number: u64,
}

impl Frame {
    /// Wraps raw luma bytes. Returns `None` when `data` does not hold `width * height` bytes.
    pub fn new(
        width: u32,
        height: u32,
        data: Vec<u8>,
        timestamp: Duration,
        frame_number: u64,
    ) -> Option<Self> {
        let image = GrayImage::from_raw(width, height, data)?;
        Some(Self {
            image,
            timestamp,
            frame_number,
        })
    }

    pub fn filled(width: u32, height: u32, value: u8, timestamp: Duration, frame_number: u64) -> Self {
        Self {
            image: GrayImage::from_pixel(width, height, Luma([value])),
            timestamp,
            frame_number,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn pixel_count(&self) -> usize {
        (self.width() * self.height()) as usize
    }

    /// 裁剪出子区域，区域先被限制在帧内
    pub fn crop(&self, region: Region) -> Frame {
        let r = region.clip_to(self.width(), self.height());
        let cropped = imageops::crop_imm(&self.image, r.x, r.y, r.width, r.height).to_image();

        Frame {
            image: cropped,
            timestamp: self.timestamp,
            frame_number: self.frame_number,
        }
    }

    /// 直方图均衡化，提升低对比度画面中 QR 码的可读性
    pub fn equalized(&self) -> Frame {
        let mut hist = [0u32; 256];
        for p in self.image.pixels() {
            hist[p[0] as usize] += 1;
        }

        let total = self.pixel_count() as u64;
        let mut cdf = [0u64; 256];
        let mut acc = 0u64;
        for (i, &count) in hist.iter().enumerate() {
            acc += count as u64;
            cdf[i] = acc;
        }

        let cdf_min = cdf.iter().copied().find(|&c| c > 0).unwrap_or(0);
        if total == 0 || total == cdf_min {
            return self.clone();
        }

        let denom = (total - cdf_min) as f64;
        let mut lut = [0u8; 256];
        for (i, slot) in lut.iter_mut().enumerate() {
            let scaled = cdf[i].saturating_sub(cdf_min) as f64 * 255.0 / denom;
            *slot = scaled.round().clamp(0.0, 255.0) as u8;
        }

        let mut image = self.image.clone();
        for p in image.pixels_mut() {
            p[0] = lut[p[0] as usize];
        }

        Frame {
            image,
            timestamp: self.timestamp,
            frame_number: self.frame_number,
        }
    }
}

/// Axis-aligned rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn union(&self, other: &Region) -> Region {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Region::new(x, y, right - x, bottom - y)
    }

    pub fn translate(&self, dx: u32, dy: u32) -> Region {
        Region::new(
            self.x.saturating_add(dx),
            self.y.saturating_add(dy),
            self.width,
            self.height,
        )
    }

    /// 限制在 `frame_width x frame_height` 内，宽高至少为 1
    pub fn clip_to(&self, frame_width: u32, frame_height: u32) -> Region {
        let max_x = frame_width.saturating_sub(1);
        let max_y = frame_height.saturating_sub(1);
        let x = self.x.min(max_x);
        let y = self.y.min(max_y);
        let width = self.width.clamp(1, frame_width.saturating_sub(x).max(1));
        let height = self.height.clamp(1, frame_height.saturating_sub(y).max(1));
        Region::new(x, y, width, height)
    }

    /// Grows the box by `padding` on every side, then clips it to the frame.
    pub fn expand(&self, padding: u32, frame_width: u32, frame_height: u32) -> Region {
        let x = self.x.saturating_sub(padding);
        let y = self.y.saturating_sub(padding);
        let right = self.right().saturating_add(padding);
        let bottom = self.bottom().saturating_add(padding);
        Region::new(x, y, right - x, bottom - y).clip_to(frame_width, frame_height)
    }
}
