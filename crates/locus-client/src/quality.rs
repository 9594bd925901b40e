//! Link quality estimation and adaptive transmission.
//!
//! RTT samples feed an EWMA; the smoothed value maps to a quality tier; the
//! tier drives the pose transmission interval. Degradation is immediate,
//! recovery is deliberately slow: the interval is restored only after
//! quality holds at Good or better for a full hold-down period, so a flappy
//! link does not oscillate the send rate.

use std::time::{Duration, Instant};

/// Smoothing factor: `avg = avg * 0.9 + sample * 0.1`.
const EWMA_KEEP: f64 = 0.9;

/// Link quality tiers derived from smoothed RTT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LinkQuality {
    /// Under 50 ms.
    Excellent,
    /// Under 100 ms.
    Good,
    /// Under 200 ms.
    Fair,
    /// 200 ms and above.
    Poor,
}

impl LinkQuality {
    fn from_rtt_ms(rtt_ms: f64) -> Self {
        if rtt_ms < 50.0 {
            Self::Excellent
        } else if rtt_ms < 100.0 {
            Self::Good
        } else if rtt_ms < 200.0 {
            Self::Fair
        } else {
            Self::Poor
        }
    }
}

/// Exponentially weighted RTT tracker.
#[derive(Debug, Default)]
pub struct QualityMonitor {
    avg_rtt_ms: Option<f64>,
}

impl QualityMonitor {
    /// Create a monitor with no samples yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in one RTT sample. The first sample seeds the average directly.
    pub fn record_rtt(&mut self, sample_ms: f64) {
        if !sample_ms.is_finite() || sample_ms < 0.0 {
            return;
        }
        self.avg_rtt_ms = Some(match self.avg_rtt_ms {
            Some(avg) => avg * EWMA_KEEP + sample_ms * (1.0 - EWMA_KEEP),
            None => sample_ms,
        });
    }

    /// Smoothed RTT in milliseconds, once at least one sample arrived.
    pub fn rtt_ms(&self) -> Option<f64> {
        self.avg_rtt_ms
    }

    /// Current quality tier. Unknown links report `Good` so a fresh
    /// connection starts at the nominal rate.
    pub fn quality(&self) -> LinkQuality {
        self.avg_rtt_ms.map_or(LinkQuality::Good, LinkQuality::from_rtt_ms)
    }
}

/// Adaptive pose interval with hold-down recovery.
#[derive(Debug)]
pub struct AdaptiveRate {
    nominal: Duration,
    degraded: Duration,
    hold_down: Duration,
    is_degraded: bool,
    good_since: Option<Instant>,
}

impl AdaptiveRate {
    /// Degraded interval is this multiple of the nominal one.
    const DEGRADE_FACTOR: u32 = 4;

    /// Create a rate controller at the nominal interval.
    pub fn new(nominal: Duration, hold_down: Duration) -> Self {
        Self {
            nominal,
            degraded: nominal * Self::DEGRADE_FACTOR,
            hold_down,
            is_degraded: false,
            good_since: None,
        }
    }

    /// The interval the pose gate should currently use.
    pub fn interval(&self) -> Duration {
        if self.is_degraded { self.degraded } else { self.nominal }
    }

    /// Whether transmission is currently degraded.
    pub fn is_degraded(&self) -> bool {
        self.is_degraded
    }

    /// Observe a quality reading. Returns true if the interval changed.
    pub fn observe(&mut self, quality: LinkQuality, now: Instant) -> bool {
        match quality {
            LinkQuality::Poor => {
                self.good_since = None;
                if !self.is_degraded {
                    self.is_degraded = true;
                    return true;
                }
            },
            LinkQuality::Excellent | LinkQuality::Good => {
                if self.is_degraded {
                    let since = *self.good_since.get_or_insert(now);
                    if now.saturating_duration_since(since) >= self.hold_down {
                        self.is_degraded = false;
                        self.good_since = None;
                        return true;
                    }
                }
            },
            // Fair neither degrades further nor counts toward recovery.
            LinkQuality::Fair => {
                self.good_since = None;
            },
        }
        false
    }
}
