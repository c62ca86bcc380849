use crate::scanner::decoder::Detection;
use crate::scanner::token::{preview, TokenClass, PREVIEW_LEN};
use log::debug;
use std::time::Duration;

/// 单个类别的布防状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmState {
    pub armed: bool,
    pub last_seen_at: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmAction {
    Idle,
    Fire,
    Suppress,
    Rearm,
}

impl ArmState {
    pub fn new() -> Self {
        Self {
            armed: true,
            last_seen_at: None,
        }
    }

    fn absent_for(&self, now: Duration) -> Option<Duration> {
        self.last_seen_at.map(|seen| now.saturating_sub(seen))
    }

    /// `seen` 表示本帧是否检测到该类别
    pub fn transition(&self, seen: bool, now: Duration, rearm_after: Duration) -> (ArmState, ArmAction) {
        let gap_elapsed = self
            .absent_for(now)
            .map_or(true, |absent| absent >= rearm_after);

        match (self.armed, seen) {
            (true, true) => (
                ArmState {
                    armed: false,
                    last_seen_at: Some(now),
                },
                ArmAction::Fire,
            ),
            (true, false) => (*self, ArmAction::Idle),
            (false, true) => {
                // A sighting after a long enough gap is a new presentation even if no
                // absent frame was evaluated in between (e.g. the camera was recovering).
                let action = if gap_elapsed {
                    ArmAction::Fire
                } else {
                    ArmAction::Suppress
                };
                (
                    ArmState {
                        armed: false,
                        last_seen_at: Some(now),
                    },
                    action,
                )
            }
            (false, false) => {
                if gap_elapsed {
                    (
                        ArmState {
                            armed: true,
                            last_seen_at: self.last_seen_at,
                        },
                        ArmAction::Rearm,
                    )
                } else {
                    (*self, ArmAction::Idle)
                }
            }
        }
    }
}

impl Default for ArmState {
    fn default() -> Self {
        Self::new()
    }
}

/// The only value handed to the notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FireEvent {
    pub token: TokenClass,
    pub raw_text_preview: String,
    pub timestamp: Duration,
}

/// One edge-triggered arming state machine per [`TokenClass`].
pub struct ArmingRegistry {
    states: [ArmState; TokenClass::COUNT],
    rearm_after: Duration,
}

impl ArmingRegistry {
    pub fn new(rearm_after: Duration) -> Self {
        Self {
            states: [ArmState::new(); TokenClass::COUNT],
            rearm_after,
        }
    }

    /// Evaluates every class once against this frame's detections.
    pub fn observe(&mut self, detections: &[Detection], now: Duration) -> Vec<FireEvent> {
        TokenClass::ALL
            .iter()
            .filter_map(|&class| {
                let text = detections
                    .iter()
                    .find(|d| d.token == class)
                    .map(|d| d.raw_text.as_str());
                self.step(class, text, now)
            })
            .collect()
    }

    pub fn step(&mut self, class: TokenClass, seen_text: Option<&str>, now: Duration) -> Option<FireEvent> {
        let slot = &mut self.states[class.index()];
        let (next, action) = slot.transition(seen_text.is_some(), now, self.rearm_after);
        *slot = next;

        match action {
            ArmAction::Fire => Some(FireEvent {
                token: class,
                raw_text_preview: preview(seen_text.unwrap_or_default(), PREVIEW_LEN),
                timestamp: now,
            }),
            ArmAction::Rearm => {
                debug!("🔁 REARM: {} rearmed", class);
                None
            }
            ArmAction::Suppress => {
                debug!("IGNORED: {} (not armed)", class);
                None
            }
            ArmAction::Idle => None,
        }
    }

    pub fn state(&self, class: TokenClass) -> ArmState {
        self.states[class.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::frame::Region;

    const REARM: Duration = Duration::from_millis(1000);

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn det(class: TokenClass) -> Detection {
        Detection {
            token: class,
            raw_text: format!("{}-token-secret", class.as_str().to_lowercase()),
            bbox: Region::new(0, 0, 10, 10),
            timestamp: Duration::ZERO,
        }
    }

    /// Feeds one sample per `step_ms` from 0 to `end_ms`, with `visible(t)` deciding presence.
    fn simulate<F>(registry: &mut ArmingRegistry, end_ms: u64, step_ms: u64, visible: F) -> Vec<FireEvent>
    where
        F: Fn(u64) -> bool,
    {
        let mut fired = Vec::new();
        let mut t = 0;
        while t <= end_ms {
            let dets = if visible(t) { vec![det(TokenClass::Open)] } else { vec![] };
            fired.extend(registry.observe(&dets, ms(t)));
            t += step_ms;
        }
        fired
    }

    #[test]
    fn test_initial_state_is_armed() {
        let registry = ArmingRegistry::new(REARM);
        for class in TokenClass::ALL {
            assert_eq!(registry.state(class), ArmState::new());
        }
    }

    #[test]
    fn test_continuous_presentation_fires_once() {
        let mut registry = ArmingRegistry::new(REARM);
        let first = registry.observe(&[det(TokenClass::Open)], ms(0));
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].token, TokenClass::Open);
        assert_eq!(first[0].timestamp, ms(0));

        assert!(registry.observe(&[det(TokenClass::Open)], ms(300)).is_empty());
        assert!(registry.observe(&[det(TokenClass::Open)], ms(600)).is_empty());
        assert_eq!(registry.state(TokenClass::Open).last_seen_at, Some(ms(600)));
    }

    #[test]
    fn test_short_gap_does_not_refire() {
        let mut registry = ArmingRegistry::new(REARM);
        let fired = simulate(&mut registry, 1200, 100, |t| t == 0 || t >= 800);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].timestamp, ms(0));
    }

    #[test]
    fn test_long_gap_refires() {
        let mut registry = ArmingRegistry::new(REARM);
        let fired = simulate(&mut registry, 1700, 100, |t| t == 0 || t >= 1500);
        assert_eq!(fired.len(), 2);
        assert_eq!(fired[1].timestamp, ms(1500));
    }

    #[test]
    fn test_rearm_is_silent() {
        let mut registry = ArmingRegistry::new(REARM);
        registry.observe(&[det(TokenClass::Open)], ms(0));

        assert!(registry.observe(&[], ms(1000)).is_empty());
        assert!(registry.state(TokenClass::Open).armed);
    }

    #[test]
    fn test_sighting_after_unobserved_gap_fires() {
        let mut registry = ArmingRegistry::new(REARM);
        registry.observe(&[det(TokenClass::Open)], ms(0));

        // No frames at all between the two sightings.
        let fired = registry.observe(&[det(TokenClass::Open)], ms(1500));
        assert_eq!(fired.len(), 1);
    }

    #[test]
    fn test_absence_before_threshold_is_idempotent() {
        let mut registry = ArmingRegistry::new(REARM);
        registry.observe(&[det(TokenClass::Open)], ms(100));
        let before = registry.state(TokenClass::Open);

        for t in (150..1100).step_by(50) {
            assert!(registry.observe(&[], ms(t)).is_empty());
            assert_eq!(registry.state(TokenClass::Open), before);
        }
    }

    #[test]
    fn test_classes_are_independent() {
        let mut registry = ArmingRegistry::new(REARM);

        let a = registry.observe(&[det(TokenClass::Open)], ms(0));
        let b = registry.observe(&[det(TokenClass::Close)], ms(100));
        let c = registry.observe(&[det(TokenClass::Open), det(TokenClass::Close)], ms(200));
        let d = registry.observe(&[det(TokenClass::Test)], ms(300));

        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].token, TokenClass::Close);
        assert!(c.is_empty());
        assert_eq!(d.len(), 1);
        assert_eq!(d[0].token, TokenClass::Test);
        assert!(!registry.state(TokenClass::Open).armed);
        assert!(!registry.state(TokenClass::Close).armed);
    }

    #[test]
    fn test_simultaneous_classes_fire_together() {
        let mut registry = ArmingRegistry::new(REARM);
        let fired = registry.observe(&[det(TokenClass::Close), det(TokenClass::Open)], ms(0));
        let tokens: Vec<_> = fired.iter().map(|e| e.token).collect();
        assert_eq!(tokens, vec![TokenClass::Open, TokenClass::Close]);
    }

    #[test]
    fn test_unknown_is_deduplicated_too() {
        let mut registry = ArmingRegistry::new(REARM);
        let fired = simulate(&mut registry, 3000, 100, |_| false);
        assert!(fired.is_empty());

        let a = registry.observe(&[det(TokenClass::Unknown)], ms(3100));
        let b = registry.observe(&[det(TokenClass::Unknown)], ms(3200));
        assert_eq!(a.len(), 1);
        assert!(b.is_empty());
    }

    #[test]
    fn test_fire_count_matches_separated_runs() {
        // runs: [0,500] [1200,1400] (gap 700 merges) [2600,2800] (gap 1200 splits) [4000]
        let visible = |t: u64| {
            t <= 500 || (1200..=1400).contains(&t) || (2600..=2800).contains(&t) || t == 4000
        };
        let mut registry = ArmingRegistry::new(REARM);
        let fired = simulate(&mut registry, 4500, 100, visible);

        let times: Vec<_> = fired.iter().map(|e| e.timestamp).collect();
        assert_eq!(times, vec![ms(0), ms(2600), ms(4000)]);
    }

    #[test]
    fn test_preview_is_truncated() {
        let mut registry = ArmingRegistry::new(REARM);
        let fired = registry.observe(&[det(TokenClass::Open)], ms(0));
        assert_eq!(fired[0].raw_text_preview, "open-token...");
    }
}
