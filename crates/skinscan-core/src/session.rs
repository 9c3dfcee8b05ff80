//! Scan session context.
//!
//! One owned object holding everything the frame loop mutates: the state
//! machine, the estimator, the current metrics, the RNG and which loop
//! (camera or fallback) currently holds the running state.

use crate::config::ScanConfig;
use crate::estimator::MetricEstimator;
use crate::scan::{ScanMachine, Transition};
use crate::types::{Detection, ScanState, SkinMetrics};
use image::RgbImage;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Instant;

/// Which frame loop currently holds the running state.
///
/// The camera loop and the fallback loop are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    Idle,
    Camera,
    Fallback,
}

/// Per-frame summary handed to the renderer and the host loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReport {
    pub state: ScanState,
    pub progress: f32,
    pub transition: Option<Transition>,
}

impl FrameReport {
    /// Score computed on this frame, if this frame completed a scan cycle.
    pub fn completed_score(&self) -> Option<u8> {
        match self.transition {
            Some(Transition::Completed { score }) => score,
            _ => None,
        }
    }
}

pub struct ScanSession {
    config: ScanConfig,
    machine: ScanMachine,
    estimator: MetricEstimator,
    metrics: SkinMetrics,
    rng: StdRng,
    mode: LoopMode,
    /// Raised by the first start; the scan beam is hidden before that.
    beam_visible: bool,
}

impl ScanSession {
    pub fn new(config: ScanConfig, epoch: Instant) -> Self {
        Self::with_rng(config, epoch, StdRng::from_entropy())
    }

    /// Build a session with an explicit RNG, for reproducible runs.
    pub fn with_rng(config: ScanConfig, epoch: Instant, rng: StdRng) -> Self {
        let machine = ScanMachine::new(&config);
        let estimator = MetricEstimator::new(&config, epoch);
        Self {
            config,
            machine,
            estimator,
            metrics: SkinMetrics::default(),
            rng,
            mode: LoopMode::Idle,
            beam_visible: false,
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn state(&self) -> ScanState {
        self.machine.state()
    }

    pub fn progress(&self, now: Instant) -> f32 {
        self.machine.progress(now)
    }

    pub fn metrics(&self) -> &SkinMetrics {
        &self.metrics
    }

    pub fn mode(&self) -> LoopMode {
        self.mode
    }

    pub fn beam_visible(&self) -> bool {
        self.beam_visible
    }

    /// Mutable access to the session RNG for cosmetic draws (glitch).
    pub fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// User-initiated start.
    ///
    /// Without a running camera loop the fallback loop takes over and the
    /// scan runs on elapsed time alone, starting at `now`.
    pub fn start(&mut self, now: Instant) {
        self.beam_visible = true;
        self.machine.start();
        if self.mode != LoopMode::Camera {
            self.mode = LoopMode::Fallback;
            self.machine.begin_timed_scan(now);
            tracing::info!("no camera loop running; using timed fallback scan");
        } else {
            tracing::info!("scan started; waiting for a face");
        }
    }

    /// Give the camera loop the running state. Cancels an active fallback loop.
    pub fn attach_camera(&mut self) {
        if self.mode == LoopMode::Fallback {
            tracing::info!("camera attached; fallback loop cancelled");
        }
        self.mode = LoopMode::Camera;
    }

    /// Release the running state held by the camera loop.
    ///
    /// A scan in flight is handed to the fallback loop: a scan still waiting
    /// for a face starts its timer at `now`, a running scan keeps its timer.
    pub fn detach_camera(&mut self, now: Instant) {
        if self.mode != LoopMode::Camera {
            return;
        }
        match self.machine.state() {
            ScanState::Detecting => {
                self.mode = LoopMode::Fallback;
                self.machine.begin_timed_scan(now);
                tracing::info!("camera detached while detecting; continuing with timed fallback scan");
            }
            ScanState::Scanning => {
                self.mode = LoopMode::Fallback;
                tracing::info!("camera detached mid-scan; fallback loop finishes the scan");
            }
            ScanState::Idle | ScanState::Done => self.mode = LoopMode::Idle,
        }
    }

    /// One camera-loop frame.
    ///
    /// `frame` is the current video frame when one is available. Skin metrics
    /// are sampled at most once per frame, from the whole frame, and only
    /// while a subject is present.
    pub fn camera_frame(
        &mut self,
        detection: &Detection,
        frame: Option<&RgbImage>,
        now: Instant,
    ) -> FrameReport {
        if self.mode != LoopMode::Camera {
            return self.report(now, None);
        }

        let transition = self
            .machine
            .observe(detection, &self.metrics, now, &mut self.rng);

        if let (true, Some(frame)) = (detection.is_present(), frame) {
            self.metrics = self
                .estimator
                .update(&self.metrics, frame, now, &mut self.rng);
        }

        self.report(now, transition)
    }

    /// One fallback-loop frame. Releases the running state on completion.
    pub fn fallback_tick(&mut self, now: Instant) -> FrameReport {
        if self.mode != LoopMode::Fallback {
            return self.report(now, None);
        }
        let transition = self.machine.tick_elapsed(&self.metrics, now, &mut self.rng);
        if matches!(transition, Some(Transition::Completed { .. })) {
            self.mode = LoopMode::Idle;
        }
        self.report(now, transition)
    }

    /// Score whose display delay has elapsed, at most once per cycle.
    pub fn poll_result(&mut self, now: Instant) -> Option<u8> {
        self.machine.take_due_result(now)
    }

    fn report(&self, now: Instant, transition: Option<Transition>) -> FrameReport {
        FrameReport {
            state: self.machine.state(),
            progress: self.machine.progress(now),
            transition,
        }
    }
}
