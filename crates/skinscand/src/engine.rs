use crate::config::Config;
use crate::store::{ResultRecord, SessionStore, StoreError};
use chrono::Utc;
use image::{RgbImage, RgbaImage};
use serde::Serialize;
use skinscan_core::{
    Detection, FaceLandmarker, FrameReport, LandmarkDetector, LoopMode, OverlayFrame,
    OverlayRenderer, ScanSession, ScanState, SkinMetrics, Transition,
};
use skinscan_hw::{Camera, CameraError, FrameSource};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Overlay size used until the first camera frame arrives.
const DEFAULT_OVERLAY_SIZE: (u32, u32) = (640, 480);
const DETECTION_UNAVAILABLE: &str = "face detection unavailable";

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Snapshot of the engine reported over D-Bus.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub version: &'static str,
    pub state: ScanState,
    pub progress: f32,
    pub mode: &'static str,
    pub metrics: SkinMetrics,
    pub camera: Option<String>,
    pub detector_loaded: bool,
    pub message: Option<String>,
    pub scan_id: Option<Uuid>,
    pub last_score: Option<u8>,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Start {
        reply: oneshot::Sender<Uuid>,
    },
    StopCamera {
        reply: oneshot::Sender<bool>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
    Snapshot {
        reply: oneshot::Sender<Result<PathBuf, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    running: Arc<AtomicBool>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Begin a new scan cycle. Returns the id of the cycle.
    pub async fn start(&self) -> Result<Uuid, EngineError> {
        self.request(|reply| EngineRequest::Start { reply }).await
    }

    /// Stop the camera loop. Returns false if it was not running.
    pub async fn stop_camera(&self) -> Result<bool, EngineError> {
        self.request(|reply| EngineRequest::StopCamera { reply }).await
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }

    /// Write the current overlay to the session store.
    pub async fn snapshot(&self) -> Result<PathBuf, EngineError> {
        self.request(|reply| EngineRequest::Snapshot { reply }).await?
    }

    /// Ask the engine thread to exit after its current frame.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

struct EngineSettings {
    frame_interval: Duration,
    persist_capture: bool,
    glitch_probability: f64,
}

/// Spawn the engine on a dedicated OS thread.
///
/// Opens the camera and loads the face-mesh model up front. Neither is
/// required: without a camera or without a model every scan runs on the
/// timed fallback loop.
pub fn spawn_engine(
    config: &Config,
    store: SessionStore,
    results: mpsc::UnboundedSender<ResultRecord>,
) -> Result<(EngineHandle, std::thread::JoinHandle<()>), EngineError> {
    let mut message = None;
    let camera = if config.camera_enabled {
        match Camera::open(&config.camera_device) {
            Ok(camera) => {
                tracing::info!(
                    device = %config.camera_device,
                    width = camera.width,
                    height = camera.height,
                    "camera opened"
                );
                Some(camera)
            }
            Err(e) => {
                tracing::warn!(device = %config.camera_device, error = %e, "camera unavailable; scans will use the timed fallback");
                message = Some(camera_message(&e).to_string());
                None
            }
        }
    } else {
        tracing::info!("camera disabled via config");
        None
    };

    let detector: Option<Box<dyn LandmarkDetector + Send>> =
        if config.detector_enabled && camera.is_some() {
            let path = config.landmark_model_path();
            match FaceLandmarker::load(&path) {
                Ok(d) => {
                    tracing::info!(path = %path, "face-mesh model loaded");
                    Some(Box::new(d))
                }
                Err(e) => {
                    tracing::warn!(error = %e, "face detection disabled");
                    None
                }
            }
        } else {
            None
        };

    let scan_config = config.scan_config();
    let settings = EngineSettings {
        frame_interval: config.frame_interval(),
        persist_capture: config.persist_capture,
        glitch_probability: scan_config.glitch_probability,
    };

    let (tx, rx) = mpsc::channel::<EngineRequest>(8);
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);

    let join = std::thread::Builder::new()
        .name("skinscan-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            let session = ScanSession::new(scan_config, Instant::now());
            let mut engine = Engine::new(session, settings, store, results, detector);
            engine.message = message;
            if let Some(camera) = camera {
                engine.attach_camera(&camera);
            }
            engine.run(rx, &flag);
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok((EngineHandle { tx, running }, join))
}

fn camera_message(err: &CameraError) -> &'static str {
    match err {
        CameraError::PermissionDenied(_) => "camera permission denied",
        _ => "camera unavailable",
    }
}

/// Everything the frame loop owns.
struct Engine {
    session: ScanSession,
    renderer: OverlayRenderer,
    overlay: RgbaImage,
    stream: Option<Box<dyn FrameSource>>,
    detector: Option<Box<dyn LandmarkDetector + Send>>,
    store: SessionStore,
    results: mpsc::UnboundedSender<ResultRecord>,
    frame_interval: Duration,
    persist_capture: bool,
    epoch: Instant,
    camera_label: Option<String>,
    message: Option<String>,
    scan_id: Option<Uuid>,
    last_frame: Option<RgbImage>,
    last_score: Option<u8>,
}

impl Engine {
    fn new(
        session: ScanSession,
        settings: EngineSettings,
        store: SessionStore,
        results: mpsc::UnboundedSender<ResultRecord>,
        detector: Option<Box<dyn LandmarkDetector + Send>>,
    ) -> Self {
        let (w, h) = DEFAULT_OVERLAY_SIZE;
        Self {
            session,
            renderer: OverlayRenderer::new(settings.glitch_probability),
            overlay: RgbaImage::new(w, h),
            stream: None,
            detector,
            store,
            results,
            frame_interval: settings.frame_interval,
            persist_capture: settings.persist_capture,
            epoch: Instant::now(),
            camera_label: None,
            message: None,
            scan_id: None,
            last_frame: None,
            last_score: None,
        }
    }

    fn attach_camera(&mut self, camera: &Camera) {
        if !self.detection_ready() {
            return;
        }
        match camera.stream() {
            Ok(stream) => self.attach_source(
                Box::new(stream),
                camera.device_path.clone(),
                (camera.width, camera.height),
            ),
            Err(e) => {
                tracing::warn!(error = %e, "failed to start capture stream");
                self.message = Some(camera_message(&e).to_string());
            }
        }
    }

    /// Hand the running state to the camera loop fed by `source`.
    /// Without a detector the camera loop could never see a face, so scans
    /// stay on the timed fallback.
    fn attach_source(&mut self, source: Box<dyn FrameSource>, label: String, (w, h): (u32, u32)) {
        if !self.detection_ready() {
            return;
        }
        self.stream = Some(source);
        self.camera_label = Some(label);
        self.overlay = RgbaImage::new(w, h);
        self.session.attach_camera();
    }

    fn detection_ready(&mut self) -> bool {
        if self.detector.is_some() {
            return true;
        }
        tracing::warn!("no face-mesh model; camera loop not started, scans use the timed fallback");
        self.message = Some(DETECTION_UNAVAILABLE.to_string());
        false
    }

    fn stop_camera(&mut self, message: &str, now: Instant) -> bool {
        let was_running = self.stream.take().is_some();
        self.last_frame = None;
        self.session.detach_camera(now);
        if was_running {
            tracing::info!(reason = message, "camera loop stopped");
            self.message = Some(message.to_string());
        }
        was_running
    }

    fn run(&mut self, mut rx: mpsc::Receiver<EngineRequest>, running: &AtomicBool) {
        while running.load(Ordering::Relaxed) {
            if !self.drain_requests(&mut rx) {
                tracing::info!("all engine handles dropped");
                break;
            }
            let paced_by_camera = self.step(Instant::now());
            if !paced_by_camera {
                std::thread::sleep(self.frame_interval);
            }
        }
        self.stop_camera("daemon shutting down", Instant::now());
    }

    /// Handle queued requests. Returns false once every handle is gone.
    fn drain_requests(&mut self, rx: &mut mpsc::Receiver<EngineRequest>) -> bool {
        loop {
            match rx.try_recv() {
                Ok(req) => self.handle(req, Instant::now()),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn handle(&mut self, req: EngineRequest, now: Instant) {
        match req {
            EngineRequest::Start { reply } => {
                let id = Uuid::new_v4();
                self.scan_id = Some(id);
                self.session.start(now);
                tracing::info!(scan_id = %id, mode = mode_name(self.session.mode()), "scan started");
                let _ = reply.send(id);
            }
            EngineRequest::StopCamera { reply } => {
                let _ = reply.send(self.stop_camera("camera stopped", now));
            }
            EngineRequest::Status { reply } => {
                let _ = reply.send(self.status(now));
            }
            EngineRequest::Snapshot { reply } => {
                let result = self.store.write_overlay(&self.overlay).map_err(EngineError::from);
                let _ = reply.send(result);
            }
        }
    }

    fn status(&self, now: Instant) -> EngineStatus {
        EngineStatus {
            version: env!("CARGO_PKG_VERSION"),
            state: self.session.state(),
            progress: self.session.progress(now),
            mode: mode_name(self.session.mode()),
            metrics: self.session.metrics().clone(),
            camera: self.camera_label.clone(),
            detector_loaded: self.detector.is_some(),
            message: self.message.clone(),
            scan_id: self.scan_id,
            last_score: self.last_score,
        }
    }

    /// Run one frame of whichever loop holds the running state.
    /// Returns true when the frame was paced by a blocking camera dequeue.
    fn step(&mut self, now: Instant) -> bool {
        let frame_time = match self.session.mode() {
            LoopMode::Camera => self.camera_step(now),
            LoopMode::Fallback => {
                self.fallback_step(now);
                None
            }
            LoopMode::Idle => None,
        };
        let clock = frame_time.map_or(now, |t| t.max(now));
        if let Some(score) = self.session.poll_result(clock) {
            self.show_result(score);
        }
        frame_time.is_some()
    }

    /// One camera-loop frame, clocked by the frame's capture time.
    /// Returns that time, or `None` when the camera loop stopped instead.
    fn camera_step(&mut self, now: Instant) -> Option<Instant> {
        let Some(stream) = self.stream.as_mut() else {
            self.session.detach_camera(now);
            return None;
        };
        let frame = match stream.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "capture failed");
                self.stop_camera("camera unavailable", now);
                return None;
            }
        };
        let now = frame.timestamp;
        let image = frame.to_rgb_image();
        let dark = frame.is_dark();
        if dark {
            tracing::trace!(seq = frame.sequence, "dark frame; skin sample skipped");
        }

        let detection = match (self.detector.as_mut(), image.as_ref()) {
            (Some(detector), Some(image)) => detector.detect(image).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "face detection failed on frame");
                Detection::Absent
            }),
            _ => Detection::Absent,
        };

        let sample = if dark { None } else { image.as_ref() };
        let report = self.session.camera_frame(&detection, sample, now);
        log_transition(&report);

        if let Some(image) = &image {
            if self.overlay.dimensions() != image.dimensions() {
                self.overlay = RgbaImage::new(image.width(), image.height());
            }
        }
        let metrics = self.session.metrics().clone();
        let overlay_frame = OverlayFrame {
            state: report.state,
            progress: report.progress,
            metrics: &metrics,
            detection: &detection,
            beam_visible: self.session.beam_visible(),
            t_ms: self.t_ms(now),
        };
        self.renderer
            .render(&mut self.overlay, &overlay_frame, self.session.rng_mut());

        self.last_frame = image;
        Some(now)
    }

    fn fallback_step(&mut self, now: Instant) {
        let report = self.session.fallback_tick(now);
        log_transition(&report);
        let t_ms = self.t_ms(now);
        self.renderer.render_fallback(
            &mut self.overlay,
            report.state,
            report.progress,
            t_ms,
            self.session.rng_mut(),
        );
    }

    /// Publish a due result: capture, result record, signal.
    fn show_result(&mut self, score: u8) {
        let capture = if self.persist_capture {
            self.store
                .persist_capture(self.last_frame.as_ref())
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "failed to persist capture");
                    None
                })
        } else {
            self.store.clear_capture();
            None
        };

        let record = ResultRecord {
            scan_id: self.scan_id.unwrap_or_else(Uuid::new_v4),
            score,
            metrics: self.session.metrics().clone(),
            capture,
            completed_at: Utc::now(),
        };
        if let Err(e) = self.store.write_result(&record) {
            tracing::warn!(error = %e, "failed to write result");
        }

        tracing::info!(
            scan_id = %record.scan_id,
            score,
            skin_type = %record.metrics.skin_type,
            "showing result"
        );
        self.last_score = Some(score);
        let _ = self.results.send(record);
    }

    fn t_ms(&self, now: Instant) -> f32 {
        now.saturating_duration_since(self.epoch).as_secs_f32() * 1000.0
    }
}

fn log_transition(report: &FrameReport) {
    match report.transition {
        Some(Transition::SubjectAcquired) => tracing::debug!("face acquired; scanning"),
        Some(Transition::SubjectLost) => tracing::debug!("face lost; back to detecting"),
        Some(Transition::Completed { .. }) | None => {}
    }
}

fn mode_name(mode: LoopMode) -> &'static str {
    match mode {
        LoopMode::Idle => "idle",
        LoopMode::Camera => "camera",
        LoopMode::Fallback => "fallback",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use skinscan_core::{DetectorError, Landmark, ScanConfig, Subject};
    use skinscan_hw::Frame;

    const W: u32 = 32;
    const H: u32 = 24;
    const FRAME_MS: u64 = 33;

    /// Uniform frames stamped every 33 ms from `t0`, failing at `fail_at`.
    struct ScriptedSource {
        t0: Instant,
        seq: u32,
        level: u8,
        fail_at: Option<u32>,
    }

    impl ScriptedSource {
        fn new(t0: Instant, level: u8) -> Self {
            Self {
                t0,
                seq: 0,
                level,
                fail_at: None,
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<Frame, CameraError> {
            if self.fail_at == Some(self.seq) {
                return Err(CameraError::CaptureFailed("device unplugged".into()));
            }
            let seq = self.seq;
            self.seq += 1;
            Ok(Frame {
                data: vec![self.level; (W * H * 3) as usize],
                width: W,
                height: H,
                timestamp: self.t0 + Duration::from_millis(FRAME_MS * seq as u64),
                sequence: seq,
            })
        }
    }

    /// Sees a face on every call except the listed ones, which fail.
    struct ScriptedDetector {
        calls: usize,
        fail_on: Vec<usize>,
    }

    impl LandmarkDetector for ScriptedDetector {
        fn detect(&mut self, _frame: &RgbImage) -> Result<Detection, DetectorError> {
            let call = self.calls;
            self.calls += 1;
            if self.fail_on.contains(&call) {
                return Err(DetectorError::InferenceFailed("bad output shape".into()));
            }
            Ok(Detection::Present(vec![Subject {
                landmarks: vec![Landmark::new(0.3, 0.3), Landmark::new(0.7, 0.8)],
                presence: 0.9,
            }]))
        }
    }

    fn detector(fail_on: Vec<usize>) -> Option<Box<dyn LandmarkDetector + Send>> {
        Some(Box::new(ScriptedDetector { calls: 0, fail_on }))
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        engine: Engine,
        results: mpsc::UnboundedReceiver<ResultRecord>,
    }

    fn fixture(t0: Instant) -> Fixture {
        fixture_with(t0, None)
    }

    fn fixture_with(t0: Instant, detector: Option<Box<dyn LandmarkDetector + Send>>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let session = ScanSession::with_rng(ScanConfig::default(), t0, StdRng::seed_from_u64(3));
        let settings = EngineSettings {
            frame_interval: Duration::from_millis(33),
            persist_capture: true,
            glitch_probability: 0.1,
        };
        let mut engine = Engine::new(session, settings, store, tx, detector);
        engine.epoch = t0;
        Fixture {
            _dir: dir,
            engine,
            results: rx,
        }
    }

    fn attach(engine: &mut Engine, source: ScriptedSource) {
        engine.attach_source(Box::new(source), "/dev/video9".into(), (W, H));
    }

    fn start(engine: &mut Engine, now: Instant) -> Uuid {
        let (reply, mut rx) = oneshot::channel();
        engine.handle(EngineRequest::Start { reply }, now);
        rx.try_recv().unwrap()
    }

    #[test]
    fn test_fallback_scan_publishes_result() {
        let t0 = Instant::now();
        let mut fx = fixture(t0);
        let id = start(&mut fx.engine, t0);
        assert_eq!(fx.engine.session.mode(), LoopMode::Fallback);

        fx.engine.step(t0 + Duration::from_millis(1000));
        assert_eq!(fx.engine.session.state(), ScanState::Scanning);

        fx.engine.step(t0 + Duration::from_millis(3100));
        assert_eq!(fx.engine.session.state(), ScanState::Done);
        assert_eq!(fx.engine.session.mode(), LoopMode::Idle);

        fx.engine.step(t0 + Duration::from_millis(3500));
        let record = fx.results.try_recv().unwrap();
        assert_eq!(record.scan_id, id);
        assert!(record.capture.is_none());
        assert!(record.score <= 100);

        let stored = fx.engine.store.read_result().unwrap().unwrap();
        assert_eq!(stored.scan_id, id);
        assert_eq!(fx.engine.last_score, Some(record.score));
    }

    #[test]
    fn test_result_published_once_per_cycle() {
        let t0 = Instant::now();
        let mut fx = fixture(t0);
        start(&mut fx.engine, t0);
        fx.engine.step(t0 + Duration::from_millis(3100));
        fx.engine.step(t0 + Duration::from_millis(3500));
        fx.engine.step(t0 + Duration::from_millis(4000));
        assert!(fx.results.try_recv().is_ok());
        assert!(fx.results.try_recv().is_err());
    }

    #[test]
    fn test_restart_gives_new_scan_id() {
        let t0 = Instant::now();
        let mut fx = fixture(t0);
        let first = start(&mut fx.engine, t0);
        let second = start(&mut fx.engine, t0 + Duration::from_millis(500));
        assert_ne!(first, second);
        assert_eq!(fx.engine.status(t0).scan_id, Some(second));
    }

    #[test]
    fn test_status_without_camera() {
        let t0 = Instant::now();
        let mut fx = fixture(t0);
        fx.engine.message = Some("camera unavailable".into());
        let s = fx.engine.status(t0);
        assert_eq!(s.mode, "idle");
        assert_eq!(s.state, ScanState::Idle);
        assert!(!s.detector_loaded);
        assert!(s.camera.is_none());

        start(&mut fx.engine, t0);
        let s = fx.engine.status(t0);
        assert_eq!(s.mode, "fallback");
        assert_eq!(s.message.as_deref(), Some("camera unavailable"));
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["state"], "scanning");
    }

    #[test]
    fn test_stop_camera_when_not_running() {
        let t0 = Instant::now();
        let mut fx = fixture(t0);
        let (reply, mut rx) = oneshot::channel();
        fx.engine.handle(EngineRequest::StopCamera { reply }, t0);
        assert!(!rx.try_recv().unwrap());
    }

    #[test]
    fn test_snapshot_writes_overlay() {
        let t0 = Instant::now();
        let mut fx = fixture(t0);
        start(&mut fx.engine, t0);
        fx.engine.step(t0 + Duration::from_millis(500));
        let (reply, mut rx) = oneshot::channel();
        fx.engine.handle(EngineRequest::Snapshot { reply }, t0);
        let path = rx.try_recv().unwrap().unwrap();
        let (w, h) = DEFAULT_OVERLAY_SIZE;
        assert_eq!(image::open(path).unwrap().to_rgba8().dimensions(), (w, h));
    }

    #[test]
    fn test_camera_without_detector_uses_fallback() {
        let t0 = Instant::now();
        let mut fx = fixture(t0);
        attach(&mut fx.engine, ScriptedSource::new(t0, 180));
        assert!(fx.engine.stream.is_none());
        assert_eq!(fx.engine.session.mode(), LoopMode::Idle);
        assert_eq!(fx.engine.status(t0).message.as_deref(), Some(DETECTION_UNAVAILABLE));

        let id = start(&mut fx.engine, t0);
        assert_eq!(fx.engine.session.mode(), LoopMode::Fallback);
        assert_eq!(fx.engine.session.state(), ScanState::Scanning);
        fx.engine.step(t0 + Duration::from_millis(3100));
        fx.engine.step(t0 + Duration::from_millis(3500));
        assert_eq!(fx.results.try_recv().unwrap().scan_id, id);
    }

    #[test]
    fn test_camera_loop_recovers_from_detector_error() {
        let t0 = Instant::now();
        let mut fx = fixture_with(t0, detector(vec![10]));
        attach(&mut fx.engine, ScriptedSource::new(t0, 180));
        assert_eq!(fx.engine.session.mode(), LoopMode::Camera);
        let id = start(&mut fx.engine, t0);

        let mut states = Vec::new();
        let mut published_at = None;
        for i in 0..200 {
            assert!(fx.engine.step(t0));
            states.push(fx.engine.session.state());
            if let Ok(record) = fx.results.try_recv() {
                published_at = Some((i, record));
                break;
            }
        }

        assert_eq!(states[9], ScanState::Scanning);
        assert_eq!(states[10], ScanState::Detecting);
        assert_eq!(states[11], ScanState::Scanning);

        // rescan from frame 11 (363 ms) completes at frame 102 (3366 ms);
        // the 800 ms delay is due at frame 127 (4191 ms) on the frame clock
        let (frame, record) = published_at.unwrap();
        assert_eq!(frame, 127);
        assert_eq!(record.scan_id, id);
        assert!(fx.engine.last_frame.is_some());
        assert!(fx.engine.session.metrics().last_sample_at.is_some());
        assert!(record.capture.as_ref().unwrap().exists());
    }

    #[test]
    fn test_capture_failure_mid_scan_finishes_on_fallback() {
        let t0 = Instant::now();
        let mut fx = fixture_with(t0, detector(vec![]));
        let source = ScriptedSource {
            fail_at: Some(20),
            ..ScriptedSource::new(t0, 180)
        };
        attach(&mut fx.engine, source);
        let id = start(&mut fx.engine, t0);

        for _ in 0..20 {
            assert!(fx.engine.step(t0));
        }
        assert_eq!(fx.engine.session.state(), ScanState::Scanning);
        assert!(fx.engine.last_frame.is_some());

        assert!(!fx.engine.step(t0 + Duration::from_millis(700)));
        assert!(fx.engine.stream.is_none());
        assert!(fx.engine.last_frame.is_none());
        assert_eq!(fx.engine.session.mode(), LoopMode::Fallback);
        assert_eq!(fx.engine.status(t0).message.as_deref(), Some("camera unavailable"));

        // timer kept from the first face frame at t0
        fx.engine.step(t0 + Duration::from_millis(3100));
        assert_eq!(fx.engine.session.state(), ScanState::Done);
        fx.engine.step(t0 + Duration::from_millis(3500));
        let record = fx.results.try_recv().unwrap();
        assert_eq!(record.scan_id, id);
        assert!(record.capture.is_none());
    }

    #[test]
    fn test_stop_camera_drops_last_frame() {
        let t0 = Instant::now();
        let mut fx = fixture_with(t0, detector(vec![]));
        attach(&mut fx.engine, ScriptedSource::new(t0, 180));
        start(&mut fx.engine, t0);
        for _ in 0..5 {
            fx.engine.step(t0);
        }
        assert!(fx.engine.last_frame.is_some());

        let (reply, mut rx) = oneshot::channel();
        fx.engine.handle(EngineRequest::StopCamera { reply }, t0 + Duration::from_millis(200));
        assert!(rx.try_recv().unwrap());
        assert!(fx.engine.last_frame.is_none());

        fx.engine.step(t0 + Duration::from_millis(3100));
        fx.engine.step(t0 + Duration::from_millis(3500));
        let record = fx.results.try_recv().unwrap();
        assert!(record.capture.is_none());
        assert!(!fx.engine.store.dir().join("face_capture.jpg").exists());
    }

    #[test]
    fn test_dark_frames_skip_skin_sample() {
        let t0 = Instant::now();
        let mut fx = fixture_with(t0, detector(vec![]));
        attach(&mut fx.engine, ScriptedSource::new(t0, 5));
        start(&mut fx.engine, t0);
        for _ in 0..20 {
            fx.engine.step(t0);
        }
        // detection still runs on dark frames
        assert_eq!(fx.engine.session.state(), ScanState::Scanning);
        assert_eq!(fx.engine.session.metrics(), &SkinMetrics::default());
    }
}
