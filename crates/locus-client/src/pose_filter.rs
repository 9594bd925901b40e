//! Outbound pose throttling.
//!
//! A pose sample goes on the wire only when the send interval has elapsed
//! AND the pose moved out of the dead zone relative to the last transmitted
//! sample. Both gates must open; a device sitting still sends nothing no
//! matter how fast tracking samples arrive.

use std::time::{Duration, Instant};

use locus_proto::Pose;

/// Dead-zone and interval thresholds for the outbound gate.
#[derive(Debug, Clone)]
pub struct PoseFilterConfig {
    /// Minimum spacing between transmitted samples.
    pub interval: Duration,
    /// Positional dead zone in meters.
    pub position_deadzone: f64,
    /// Rotational dead zone in degrees.
    pub rotation_deadzone_degrees: f64,
}

impl Default for PoseFilterConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(16),
            position_deadzone: 0.01,
            rotation_deadzone_degrees: 1.0,
        }
    }
}

/// Stateful outbound gate. Remembers the last pose it let through.
#[derive(Debug)]
pub struct PoseFilter {
    config: PoseFilterConfig,
    last_sent: Option<(Pose, Instant)>,
}

impl PoseFilter {
    /// Create a filter with the given thresholds.
    pub fn new(config: PoseFilterConfig) -> Self {
        Self { config, last_sent: None }
    }

    /// Adjust the send interval (adaptive rate control).
    pub fn set_interval(&mut self, interval: Duration) {
        self.config.interval = interval;
    }

    /// Current send interval.
    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    /// Offer a sample. Returns true when it should be transmitted, in which
    /// case the filter records it as the new reference.
    pub fn offer(&mut self, pose: &Pose, now: Instant) -> bool {
        let Some((last_pose, last_at)) = &self.last_sent else {
            // First sample always goes out.
            self.last_sent = Some((*pose, now));
            return true;
        };

        if now.saturating_duration_since(*last_at) < self.config.interval {
            return false;
        }

        let moved = pose.position.distance(&last_pose.position) > self.config.position_deadzone;
        let turned =
            pose.rotation.angle_to_degrees(&last_pose.rotation) > self.config.rotation_deadzone_degrees;
        if !moved && !turned {
            return false;
        }

        self.last_sent = Some((*pose, now));
        true
    }

    /// Forget the reference sample, e.g. after a reconnect.
    pub fn reset(&mut self) {
        self.last_sent = None;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use locus_proto::{Quat, TrackingState, Vec3};

    use super::*;

    fn pose(x: f64, rotation: Quat) -> Pose {
        Pose {
            position: Vec3::new(x, 0.0, 0.0),
            rotation,
            confidence: 1.0,
            tracking_state: TrackingState::Tracking,
            timestamp: 0.0,
        }
    }

    // ~2 degrees around Y.
    fn turned_quat() -> Quat {
        let half = (2.0_f64).to_radians() / 2.0;
        Quat { x: 0.0, y: half.sin(), z: 0.0, w: half.cos() }
    }

    #[test]
    fn first_sample_always_sends() {
        let mut f = PoseFilter::new(PoseFilterConfig::default());
        assert!(f.offer(&pose(0.0, Quat::IDENTITY), Instant::now()));
    }

    #[test]
    fn interval_gate_blocks_fast_samples() {
        let now = Instant::now();
        let mut f = PoseFilter::new(PoseFilterConfig::default());
        f.offer(&pose(0.0, Quat::IDENTITY), now);

        // Large movement, but only 5 ms later.
        assert!(!f.offer(&pose(1.0, Quat::IDENTITY), now + Duration::from_millis(5)));
    }

    #[test]
    fn deadzone_blocks_still_device() {
        let now = Instant::now();
        let mut f = PoseFilter::new(PoseFilterConfig::default());
        f.offer(&pose(0.0, Quat::IDENTITY), now);

        // 5 mm drift, interval long elapsed: still inside the dead zone.
        assert!(!f.offer(&pose(0.005, Quat::IDENTITY), now + Duration::from_secs(1)));
    }

    #[test]
    fn movement_beyond_deadzone_sends() {
        let now = Instant::now();
        let mut f = PoseFilter::new(PoseFilterConfig::default());
        f.offer(&pose(0.0, Quat::IDENTITY), now);

        assert!(f.offer(&pose(0.02, Quat::IDENTITY), now + Duration::from_millis(20)));
    }

    #[test]
    fn rotation_beyond_deadzone_sends() {
        let now = Instant::now();
        let mut f = PoseFilter::new(PoseFilterConfig::default());
        f.offer(&pose(0.0, Quat::IDENTITY), now);

        assert!(f.offer(&pose(0.0, turned_quat()), now + Duration::from_millis(20)));
    }

    #[test]
    fn reference_advances_on_send() {
        let now = Instant::now();
        let mut f = PoseFilter::new(PoseFilterConfig::default());
        f.offer(&pose(0.0, Quat::IDENTITY), now);
        f.offer(&pose(0.02, Quat::IDENTITY), now + Duration::from_millis(20));

        // 5 mm past the new reference: blocked again.
        assert!(!f.offer(&pose(0.025, Quat::IDENTITY), now + Duration::from_millis(40)));
    }

    #[test]
    fn reset_clears_reference() {
        let now = Instant::now();
        let mut f = PoseFilter::new(PoseFilterConfig::default());
        f.offer(&pose(0.0, Quat::IDENTITY), now);
        f.reset();

        // Identical pose sends again after reset.
        assert!(f.offer(&pose(0.0, Quat::IDENTITY), now + Duration::from_millis(1)));
    }
}
