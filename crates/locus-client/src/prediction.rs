//! Remote pose extrapolation.
//!
//! Keeps the last two samples per peer. While updates flow, the latest
//! sample is returned as-is. Once updates go stale beyond a window, the
//! position is linearly extrapolated from the last two samples, capped at a
//! maximum lookahead so a vanished peer does not drift to infinity.
//! Rotation is held at the last sample; slerp is not worth it at these
//! update rates.

use std::time::{Duration, Instant};

use locus_proto::{Pose, Vec3};

/// Staleness and lookahead bounds for extrapolation.
#[derive(Debug, Clone)]
pub struct PredictionConfig {
    /// Updates younger than this are returned verbatim.
    pub staleness_window: Duration,
    /// Extrapolation never looks further ahead than this past the last
    /// sample.
    pub max_lookahead: Duration,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            staleness_window: Duration::from_millis(100),
            max_lookahead: Duration::from_millis(500),
        }
    }
}

/// Two-sample pose history for one peer.
#[derive(Debug, Default)]
pub struct PoseHistory {
    previous: Option<(Pose, Instant)>,
    latest: Option<(Pose, Instant)>,
}

impl PoseHistory {
    /// Empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sample, shifting the previous latest down.
    pub fn push(&mut self, pose: Pose, at: Instant) {
        self.previous = self.latest.take();
        self.latest = Some((pose, at));
    }

    /// Latest raw sample, if any.
    pub fn latest(&self) -> Option<&Pose> {
        self.latest.as_ref().map(|(p, _)| p)
    }

    /// Best estimate of the peer's pose at `now`.
    ///
    /// Fresh data is returned unmodified. Stale data is extrapolated from
    /// the sample pair when one exists, otherwise held.
    pub fn sample(&self, now: Instant, config: &PredictionConfig) -> Option<Pose> {
        let (latest, latest_at) = self.latest.as_ref()?;
        let age = now.saturating_duration_since(*latest_at);
        if age <= config.staleness_window {
            return Some(*latest);
        }

        let Some((previous, previous_at)) = self.previous.as_ref() else {
            return Some(*latest);
        };
        let span = latest_at.saturating_duration_since(*previous_at).as_secs_f64();
        if span <= 0.0 {
            return Some(*latest);
        }

        let lookahead = age.min(config.max_lookahead).as_secs_f64();
        let velocity = Vec3::new(
            (latest.position.x - previous.position.x) / span,
            (latest.position.y - previous.position.y) / span,
            (latest.position.z - previous.position.z) / span,
        );
        let predicted = Vec3::new(
            latest.position.x + velocity.x * lookahead,
            latest.position.y + velocity.y * lookahead,
            latest.position.z + velocity.z * lookahead,
        );

        Some(Pose { position: predicted, ..*latest })
    }
}
