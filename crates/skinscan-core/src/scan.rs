//! Scan state machine: `idle → detecting → scanning → done`.
//!
//! Driven either by per-frame detection presence (camera loop) or by elapsed
//! time alone (fallback loop). Completion fires a one-shot score computation
//! and schedules a delayed "show result".

use crate::config::ScanConfig;
use crate::estimator::clamp01;
use crate::types::{Detection, ScanState, SkinMetrics};
use rand::Rng;
use std::time::{Duration, Instant};

/// Observable effect of one machine step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// A subject appeared; the scan timer started.
    SubjectAcquired,
    /// The subject was lost mid-scan; back to detecting.
    SubjectLost,
    /// The scan reached full progress. `score` is set only on the first
    /// completion of a cycle.
    Completed { score: Option<u8> },
}

/// A score waiting for its display delay to elapse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingResult {
    pub score: u8,
    pub due_at: Instant,
}

/// Owns the scan phase, the scan timer and the per-cycle one-shot guard.
#[derive(Debug)]
pub struct ScanMachine {
    state: ScanState,
    scan_started_at: Option<Instant>,
    scan_duration: Duration,
    result_delay: Duration,
    fallback_result_delay: Duration,
    score_jitter: i32,
    /// Set once the result of this cycle has been computed.
    result_taken: bool,
    pending: Option<PendingResult>,
}

impl ScanMachine {
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            state: ScanState::Idle,
            scan_started_at: None,
            scan_duration: config.scan_duration,
            result_delay: config.result_delay,
            fallback_result_delay: config.fallback_result_delay,
            score_jitter: config.score_jitter.abs(),
            result_taken: false,
            pending: None,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Whether the current cycle already produced its score.
    pub fn result_taken(&self) -> bool {
        self.result_taken
    }

    pub fn scan_started_at(&self) -> Option<Instant> {
        self.scan_started_at
    }

    /// External "start": enter `detecting` from any state.
    ///
    /// Clears the one-shot guard and any pending result. The timer is armed
    /// but does not run until the first detection.
    pub fn start(&mut self) {
        tracing::debug!(from = %self.state, "scan start");
        self.state = ScanState::Detecting;
        self.scan_started_at = None;
        self.result_taken = false;
        self.pending = None;
    }

    /// Scan progress at `now`: elapsed fraction while scanning, 1 when done,
    /// 0 otherwise.
    pub fn progress(&self, now: Instant) -> f32 {
        match self.state {
            ScanState::Scanning => self.elapsed_fraction(now),
            ScanState::Done => 1.0,
            ScanState::Idle | ScanState::Detecting => 0.0,
        }
    }

    /// Camera-loop step for one frame.
    pub fn observe<R: Rng>(
        &mut self,
        detection: &Detection,
        metrics: &SkinMetrics,
        now: Instant,
        rng: &mut R,
    ) -> Option<Transition> {
        match self.state {
            ScanState::Detecting if detection.is_present() => {
                self.state = ScanState::Scanning;
                self.scan_started_at = Some(now);
                tracing::debug!("subject acquired; scanning");
                Some(Transition::SubjectAcquired)
            }
            ScanState::Scanning => {
                if self.elapsed_fraction(now) >= 1.0 {
                    Some(self.complete(metrics, now, self.result_delay, rng))
                } else if !detection.is_present() {
                    self.state = ScanState::Detecting;
                    self.scan_started_at = None;
                    tracing::debug!("subject lost; detecting");
                    Some(Transition::SubjectLost)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Enter `scanning` without a detection signal. The timer starts at `now`.
    pub fn begin_timed_scan(&mut self, now: Instant) {
        self.state = ScanState::Scanning;
        self.scan_started_at = Some(now);
    }

    /// Fallback-loop step: completes on elapsed time alone.
    pub fn tick_elapsed<R: Rng>(
        &mut self,
        metrics: &SkinMetrics,
        now: Instant,
        rng: &mut R,
    ) -> Option<Transition> {
        if self.state == ScanState::Scanning && self.elapsed_fraction(now) >= 1.0 {
            Some(self.complete(metrics, now, self.fallback_result_delay, rng))
        } else {
            None
        }
    }

    /// Yield the pending score once its display delay has elapsed.
    pub fn take_due_result(&mut self, now: Instant) -> Option<u8> {
        match self.pending {
            Some(pending) if now >= pending.due_at => {
                self.pending = None;
                Some(pending.score)
            }
            _ => None,
        }
    }

    pub fn pending(&self) -> Option<PendingResult> {
        self.pending
    }

    fn elapsed_fraction(&self, now: Instant) -> f32 {
        let Some(started) = self.scan_started_at else {
            return 0.0;
        };
        if self.scan_duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(started);
        clamp01(elapsed.as_secs_f32() / self.scan_duration.as_secs_f32())
    }

    fn complete<R: Rng>(
        &mut self,
        metrics: &SkinMetrics,
        now: Instant,
        delay: Duration,
        rng: &mut R,
    ) -> Transition {
        self.state = ScanState::Done;
        if self.result_taken {
            return Transition::Completed { score: None };
        }
        self.result_taken = true;
        let jitter = rng.gen_range(-self.score_jitter..=self.score_jitter);
        let score = derive_score(metrics.hydration, metrics.oil, jitter);
        self.pending = Some(PendingResult {
            score,
            due_at: now + delay,
        });
        tracing::info!(
            score,
            hydration = metrics.hydration,
            oil = metrics.oil,
            "scan complete"
        );
        Transition::Completed { score: Some(score) }
    }
}

/// `clamp(0, 100, round(h·40 + o·30 + 30) + jitter)`.
pub fn derive_score(hydration: f32, oil: f32, jitter: i32) -> u8 {
    let base = (hydration * 40.0 + oil * 30.0 + 30.0).round() as i32;
    let base = base.clamp(0, 100);
    (base + jitter).clamp(0, 100) as u8
}
