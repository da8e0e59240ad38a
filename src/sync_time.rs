//! Virtual playback clock
//!
//! Maps capture timestamps of a recording to wall-clock deadlines. The clock
//! is anchored lazily on the first packet after a reset, so pausing, seeking
//! or changing speed only needs a [`SyncTime::reset`].

use tokio::time::{Duration, Instant};

/// Playback clock with a speed multiplier.
#[derive(Debug, Clone)]
pub struct SyncTime {
    /// Wall-clock instant matching `origin_us`
    anchor: Instant,
    /// Stream time at the anchor, `None` until the next packet arrives
    origin_us: Option<i64>,
    speed: f64,
}

impl SyncTime {
    pub const MIN_SPEED: f64 = 0.1;
    pub const MAX_SPEED: f64 = 10.0;

    pub fn new(speed: f64) -> Self {
        Self { anchor: Instant::now(), origin_us: None, speed: clamp_speed(speed) }
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Change speed; the clock re-anchors on the next packet.
    pub fn set_speed(&mut self, speed: f64) {
        self.speed = clamp_speed(speed);
        self.reset();
    }

    /// Forget the anchor so the next packet plays immediately.
    pub fn reset(&mut self) {
        self.origin_us = None;
    }

    /// Anchor stream time `time_us` to now.
    pub fn start(&mut self, time_us: i64) {
        self.anchor = Instant::now();
        self.origin_us = Some(time_us);
    }

    /// Wall-clock instant at which the packet captured at `time_us` is due.
    ///
    /// Packets captured before the anchor are due immediately.
    pub fn deadline(&mut self, time_us: i64) -> Instant {
        let origin = match self.origin_us {
            Some(origin) => origin,
            None => {
                self.start(time_us);
                time_us
            }
        };

        let offset_us = time_us.saturating_sub(origin);
        if offset_us <= 0 {
            return self.anchor;
        }
        self.anchor + Duration::from_secs_f64(offset_us as f64 / 1_000_000.0 / self.speed)
    }

    /// Stream time corresponding to now, if anchored.
    pub fn stream_time_us(&self) -> Option<i64> {
        let elapsed = self.anchor.elapsed().as_secs_f64() * self.speed;
        self.origin_us.map(|origin| origin + (elapsed * 1_000_000.0) as i64)
    }
}

fn clamp_speed(speed: f64) -> f64 {
    if speed.is_nan() { 1.0 } else { speed.clamp(SyncTime::MIN_SPEED, SyncTime::MAX_SPEED) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadlines_follow_capture_times() {
        let mut clock = SyncTime::new(1.0);
        let first = clock.deadline(1_000_000);
        let later = clock.deadline(1_500_000);
        assert_eq!(later - first, Duration::from_millis(500));

        // Earlier than the anchor: due now
        assert_eq!(clock.deadline(0), first);
    }

    #[test]
    fn speed_scales_and_reanchors() {
        let mut clock = SyncTime::new(2.0);
        let first = clock.deadline(0);
        assert_eq!(clock.deadline(1_000_000) - first, Duration::from_millis(500));

        clock.set_speed(100.0);
        assert_eq!(clock.speed(), SyncTime::MAX_SPEED);
        assert!(clock.stream_time_us().is_none());

        let anchor = clock.deadline(5_000_000);
        assert_eq!(clock.deadline(6_000_000) - anchor, Duration::from_millis(100));
        assert!(clock.stream_time_us().unwrap() >= 5_000_000);

        clock.set_speed(f64::NAN);
        assert_eq!(clock.speed(), 1.0);
    }
}
