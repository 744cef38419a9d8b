//! Normalisation of fetcher progress into [`JobProgress`] snapshots.

use crate::fetcher::RawProgress;
use crate::job::JobProgress;

/// Turns successive [`RawProgress`] reports into job progress.
///
/// The percentage never goes down, even when a provider restarts a fragment
/// or switches from an estimated total to an exact one.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    last: JobProgress,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one report in. Returns the new snapshot if anything changed.
    pub fn update(&mut self, raw: &RawProgress) -> Option<JobProgress> {
        let next = self.normalise(raw);
        if next == self.last {
            return None;
        }
        self.last = next.clone();
        Some(next)
    }

    fn normalise(&self, raw: &RawProgress) -> JobProgress {
        let (total, total_is_estimate) = match (raw.total_bytes, raw.total_bytes_estimate) {
            (Some(total), _) if total > 0 => (Some(total), false),
            (_, Some(estimate)) if estimate > 0 => (Some(estimate), true),
            _ => (None, false),
        };
        let speed = raw.speed.filter(|s| s.is_finite() && *s > 0.0);

        let percent = match (raw.downloaded_bytes, total) {
            (Some(done), Some(total)) => {
                Some((done as f64 / total as f64 * 100.0).clamp(0.0, 100.0))
            }
            _ => None,
        };
        // Once known, a percentage is kept and only ever raised.
        let percent = match (percent, self.last.percent) {
            (Some(now), Some(before)) => Some(now.max(before)),
            (now, before) => now.or(before),
        };

        let eta = raw.eta.or_else(|| match (raw.downloaded_bytes, total, speed) {
            (Some(done), Some(total), Some(speed)) => {
                Some((total.saturating_sub(done) as f64 / speed).ceil() as u64)
            }
            _ => None,
        });

        JobProgress {
            downloaded_bytes: raw.downloaded_bytes,
            total_bytes: total,
            total_is_estimate,
            speed_bps: speed,
            eta_secs: eta,
            percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(done: u64, total: Option<u64>, estimate: Option<u64>) -> RawProgress {
        RawProgress {
            downloaded_bytes: Some(done),
            total_bytes: total,
            total_bytes_estimate: estimate,
            ..RawProgress::default()
        }
    }

    #[test]
    fn test_percent_from_total() {
        let mut tracker = ProgressTracker::new();
        let p = tracker.update(&raw(250, Some(1000), None)).unwrap();
        assert_eq!(p.percent, Some(25.0));
        assert_eq!(p.total_bytes, Some(1000));
        assert!(!p.total_is_estimate);
    }

    #[test]
    fn test_percent_from_estimate() {
        let mut tracker = ProgressTracker::new();
        let p = tracker.update(&raw(500, None, Some(2000))).unwrap();
        assert_eq!(p.percent, Some(25.0));
        assert!(p.total_is_estimate);
    }

    #[test]
    fn test_unknown_total_is_indeterminate() {
        let mut tracker = ProgressTracker::new();
        let p = tracker.update(&raw(500, None, None)).unwrap();
        assert_eq!(p.percent, None);
        assert_eq!(p.downloaded_bytes, Some(500));
    }

    #[test]
    fn test_percent_is_clamped() {
        let mut tracker = ProgressTracker::new();
        let p = tracker.update(&raw(1500, Some(1000), None)).unwrap();
        assert_eq!(p.percent, Some(100.0));
    }

    #[test]
    fn test_percent_never_decreases() {
        let mut tracker = ProgressTracker::new();
        let mut seen = Vec::new();
        for (done, estimate) in [(400, 1000), (300, 1000), (500, 2000), (1800, 2000)] {
            if let Some(p) = tracker.update(&raw(done, None, Some(estimate))) {
                seen.push(p.percent.unwrap());
            }
        }
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{:?}", seen);
        assert_eq!(seen.last().copied(), Some(90.0));
    }

    #[test]
    fn test_known_percent_survives_missing_total() {
        let mut tracker = ProgressTracker::new();
        tracker.update(&raw(600, Some(1000), None));
        let p = tracker.update(&raw(700, None, None)).unwrap();
        assert_eq!(p.percent, Some(60.0));
    }

    #[test]
    fn test_eta_computed_from_speed() {
        let mut tracker = ProgressTracker::new();
        let p = tracker
            .update(&RawProgress {
                downloaded_bytes: Some(200),
                total_bytes: Some(1000),
                speed: Some(100.0),
                ..RawProgress::default()
            })
            .unwrap();
        assert_eq!(p.eta_secs, Some(8));
        assert_eq!(p.speed_bps, Some(100.0));
    }

    #[test]
    fn test_provider_eta_wins() {
        let mut tracker = ProgressTracker::new();
        let p = tracker
            .update(&RawProgress {
                downloaded_bytes: Some(200),
                total_bytes: Some(1000),
                speed: Some(100.0),
                eta: Some(3),
                ..RawProgress::default()
            })
            .unwrap();
        assert_eq!(p.eta_secs, Some(3));
    }

    #[test]
    fn test_unchanged_report_is_dropped() {
        let mut tracker = ProgressTracker::new();
        let first = tracker.update(&raw(100, Some(1000), None)).unwrap();
        assert_eq!(first.percent, Some(10.0));
        assert!(tracker.update(&raw(100, Some(1000), None)).is_none());
    }
}
