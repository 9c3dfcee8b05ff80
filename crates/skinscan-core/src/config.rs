use std::time::Duration;

/// Scan and estimator tunables.
///
/// Defaults reproduce the reference experience; the daemon overrides a few
/// of them from its own configuration.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Length of the `scanning` phase.
    pub scan_duration: Duration,
    /// Delay between completion and "show result" on the camera path.
    pub result_delay: Duration,
    /// Delay between completion and "show result" on the fallback path.
    pub fallback_result_delay: Duration,
    /// Minimum wall-clock spacing between estimator samples.
    pub sample_interval: Duration,
    /// Side of the square the source frame is downscaled to before analysis.
    pub sample_size: u32,
    /// Exponential smoothing factor applied per sample.
    pub smoothing: f32,
    /// Per-sample probability of redrawing the today label.
    pub today_change_probability: f64,
    /// Score jitter bound; jitter is drawn uniformly from `-j..=j`.
    pub score_jitter: i32,
    /// Per-frame probability of a glitch flash while scanning.
    pub glitch_probability: f64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            scan_duration: Duration::from_millis(3000),
            result_delay: Duration::from_millis(800),
            fallback_result_delay: Duration::from_millis(300),
            sample_interval: Duration::from_millis(120),
            sample_size: 64,
            smoothing: 0.12,
            today_change_probability: 0.08,
            score_jitter: 10,
            glitch_probability: 0.1,
        }
    }
}
