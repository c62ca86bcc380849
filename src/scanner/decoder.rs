use crate::scanner::frame::{Frame, Region};
use crate::scanner::token::TokenClass;
use log::debug;
use std::time::Duration;

/// One decoded symbol as returned by a decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSymbol {
    pub text: String,
    pub bbox: Region,
}

/// A classified decode result for the current frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub token: TokenClass,
    pub raw_text: String,
    pub bbox: Region,
    pub timestamp: Duration,
}

pub trait Decoder: Send {
    fn decode(&self, frame: &Frame) -> Vec<DecodedSymbol>;

    /// Decode only `region`; boxes come back in full-frame coordinates.
    fn decode_region(&self, frame: &Frame, region: Region) -> Vec<DecodedSymbol> {
        let clipped = region.clip_to(frame.width(), frame.height());
        let sub = frame.crop(clipped);
        self.decode(&sub)
            .into_iter()
            .map(|symbol| DecodedSymbol {
                text: symbol.text,
                bbox: symbol.bbox.translate(clipped.x, clipped.y),
            })
            .collect()
    }
}

/// 基于 rqrr 的解码器
pub struct RqrrDecoder {
    equalize: bool,
}

impl RqrrDecoder {
    pub fn new() -> Self {
        Self { equalize: true }
    }

    pub fn with_equalization(equalize: bool) -> Self {
        Self { equalize }
    }
}

impl Default for RqrrDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RqrrDecoder {
    fn decode(&self, frame: &Frame) -> Vec<DecodedSymbol> {
        let source = if self.equalize {
            frame.equalized()
        } else {
            frame.clone()
        };
        let image = &source.image;

        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
            image.width() as usize,
            image.height() as usize,
            |x, y| image.get_pixel(x as u32, y as u32)[0],
        );

        prepared
            .detect_grids()
            .into_iter()
            .filter_map(|grid| {
                let bbox = hull(&grid.bounds, image.width(), image.height());
                match grid.decode() {
                    Ok((_, text)) => Some(DecodedSymbol { text, bbox }),
                    Err(e) => {
                        debug!("grid at {:?} not decodable: {}", bbox, e);
                        None
                    }
                }
            })
            .collect()
    }
}

/// 四个角点的外接矩形
fn hull(corners: &[rqrr::Point; 4], width: u32, height: u32) -> Region {
    let min_x = corners.iter().map(|p| p.x).min().unwrap_or(0).max(0) as u32;
    let min_y = corners.iter().map(|p| p.y).min().unwrap_or(0).max(0) as u32;
    let max_x = corners.iter().map(|p| p.x).max().unwrap_or(0).max(0) as u32;
    let max_y = corners.iter().map(|p| p.y).max().unwrap_or(0).max(0) as u32;

    Region::new(
        min_x,
        min_y,
        max_x.saturating_sub(min_x),
        max_y.saturating_sub(min_y),
    )
    .clip_to(width, height)
}

type SymbolPattern = Box<dyn Fn(&Frame) -> Vec<DecodedSymbol> + Send + Sync>;

/// 模拟解码器：按帧号返回预设结果
pub struct MockDecoder {
    pattern: Option<SymbolPattern>,
}

impl MockDecoder {
    pub fn new() -> Self {
        Self { pattern: None }
    }

    pub fn with_pattern<F>(pattern: F) -> Self
    where
        F: Fn(&Frame) -> Vec<DecodedSymbol> + Send + Sync + 'static,
    {
        Self {
            pattern: Some(Box::new(pattern)),
        }
    }

    /// Reports `text` at `bbox` on the listed frame numbers, nothing elsewhere.
    pub fn with_fixed_frames(frames: Vec<u64>, text: &str, bbox: Region) -> Self {
        let text = text.to_string();
        Self::with_pattern(move |frame| {
            if frames.contains(&frame.frame_number) {
                vec![DecodedSymbol {
                    text: text.clone(),
                    bbox,
                }]
            } else {
                Vec::new()
            }
        })
    }
}

impl Default for MockDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MockDecoder {
    fn decode(&self, frame: &Frame) -> Vec<DecodedSymbol> {
        self.pattern
            .as_ref()
            .map(|p| p(frame))
            .unwrap_or_default()
    }
}
