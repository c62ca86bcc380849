//! ROI 跟踪：命中后只扫描上次所在区域，超时后回退到全帧扫描

use crate::scanner::decoder::Detection;
use crate::scanner::frame::Region;
use std::time::Duration;

pub struct RoiTracker {
    padding: u32,
    timeout: Duration,
    region: Option<Region>,
    last_hit_at: Option<Duration>,
}

impl RoiTracker {
    pub fn new(padding: u32, timeout: Duration) -> Self {
        Self {
            padding,
            timeout,
            region: None,
            last_hit_at: None,
        }
    }

    /// Records this cycle's detections. A non-empty set replaces the region with the padded
    /// union of all boxes; an empty set only applies expiry. Zero-area boxes are ignored.
    pub fn update(
        &mut self,
        detections: &[Detection],
        frame_size: (u32, u32),
        now: Duration,
    ) -> Option<Region> {
        let union = detections
            .iter()
            .map(|d| d.bbox)
            .filter(|bbox| !bbox.is_empty())
            .reduce(|acc, bbox| acc.union(&bbox));

        match union {
            Some(bbox) => {
                let (width, height) = frame_size;
                self.region = Some(bbox.expand(self.padding, width, height));
                self.last_hit_at = Some(now);
                self.region
            }
            None => self.active_region(now),
        }
    }

    pub fn active_region(&mut self, now: Duration) -> Option<Region> {
        if let Some(hit) = self.last_hit_at {
            if now.saturating_sub(hit) > self.timeout {
                self.region = None;
                self.last_hit_at = None;
            }
        }
        self.region
    }

    /// Drops the region immediately, e.g. when the camera may have been re-aimed.
    pub fn reset(&mut self) {
        self.region = None;
        self.last_hit_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::token::TokenClass;

    fn det(bbox: Region) -> Detection {
        Detection {
            token: TokenClass::Open,
            raw_text: "x".into(),
            bbox,
            timestamp: Duration::ZERO,
        }
    }

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn test_no_region_initially() {
        let mut roi = RoiTracker::new(40, secs(2.0));
        assert!(roi.active_region(secs(0.0)).is_none());
        assert!(roi.update(&[], (640, 480), secs(0.1)).is_none());
    }

    #[test]
    fn test_detection_sets_padded_region() {
        let mut roi = RoiTracker::new(40, secs(2.0));
        let region = roi.update(&[det(Region::new(100, 100, 50, 50))], (640, 480), secs(0.0));
        assert_eq!(region, Some(Region::new(60, 60, 130, 130)));
    }

    #[test]
    fn test_union_of_multiple_boxes() {
        let mut roi = RoiTracker::new(0, secs(2.0));
        let region = roi.update(
            &[det(Region::new(10, 10, 10, 10)), det(Region::new(100, 50, 20, 20))],
            (640, 480),
            secs(0.0),
        );
        assert_eq!(region, Some(Region::new(10, 10, 110, 60)));
    }

    #[test]
    fn test_region_held_until_timeout() {
        let mut roi = RoiTracker::new(40, secs(2.0));
        roi.update(&[det(Region::new(100, 100, 50, 50))], (640, 480), secs(1.0));

        assert!(roi.update(&[], (640, 480), secs(2.5)).is_some());
        assert!(roi.active_region(secs(3.0)).is_some());
        assert!(roi.active_region(secs(3.01)).is_none());
    }

    #[test]
    fn test_new_hit_extends_lifetime() {
        let mut roi = RoiTracker::new(40, secs(2.0));
        roi.update(&[det(Region::new(100, 100, 50, 50))], (640, 480), secs(0.0));
        roi.update(&[det(Region::new(120, 100, 50, 50))], (640, 480), secs(1.5));

        assert_eq!(roi.active_region(secs(3.4)), Some(Region::new(80, 60, 130, 130)));
        assert!(roi.active_region(secs(3.6)).is_none());
    }

    #[test]
    fn test_expired_region_stays_cleared() {
        let mut roi = RoiTracker::new(40, secs(2.0));
        roi.update(&[det(Region::new(0, 0, 10, 10))], (640, 480), secs(0.0));
        assert!(roi.active_region(secs(5.0)).is_none());
        assert!(roi.active_region(secs(5.1)).is_none());
    }

    #[test]
    fn test_zero_area_box_is_ignored() {
        let mut roi = RoiTracker::new(40, secs(2.0));
        assert!(roi.update(&[det(Region::new(50, 50, 0, 12))], (640, 480), secs(0.0)).is_none());

        let region = roi.update(
            &[det(Region::new(50, 50, 0, 12)), det(Region::new(100, 100, 10, 10))],
            (640, 480),
            secs(0.1),
        );
        assert_eq!(region, Some(Region::new(60, 60, 90, 90)));
    }

    #[test]
    fn test_reset_drops_region_before_timeout() {
        let mut roi = RoiTracker::new(40, secs(2.0));
        roi.update(&[det(Region::new(100, 100, 50, 50))], (640, 480), secs(0.0));
        roi.reset();
        assert!(roi.active_region(secs(0.5)).is_none());
    }
}
