//! Offline scan run on a synthetic clock.
//!
//! Drives a [`ScanSession`] without a camera or daemon and writes the
//! rendered overlay to PNG files. With `face` set, a synthetic subject and
//! skin-toned frames stand in for the camera loop; otherwise the timed
//! fallback loop runs.

use anyhow::{Context, Result};
use image::{imageops, Rgb, RgbImage, Rgba, RgbaImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use skinscan_core::{
    Detection, Landmark, OverlayFrame, OverlayRenderer, ScanConfig, ScanSession, SkinMetrics,
    Subject,
};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const FRAME_STEP: Duration = Duration::from_millis(33);
/// Hard stop for a run that never yields a result.
const MAX_FRAMES: usize = 600;
/// Frame at which the synthetic face enters the view.
const FACE_ENTERS_AT: usize = 5;
const MESH_POINTS: usize = 468;

pub struct SimulateOptions {
    pub out: PathBuf,
    pub seed: u64,
    pub face: bool,
    /// Write every n-th frame. The final frame is always written.
    pub every: usize,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug)]
pub struct SimulationOutcome {
    pub score: Option<u8>,
    pub frames: usize,
    pub written: Vec<PathBuf>,
    pub metrics: SkinMetrics,
}

pub fn run(opts: &SimulateOptions) -> Result<SimulationOutcome> {
    std::fs::create_dir_all(&opts.out)
        .with_context(|| format!("failed to create {}", opts.out.display()))?;

    let t0 = Instant::now();
    let config = ScanConfig::default();
    let renderer = OverlayRenderer::new(config.glitch_probability);
    let mut session = ScanSession::with_rng(config, t0, StdRng::seed_from_u64(opts.seed));
    let mut texture_rng = StdRng::seed_from_u64(opts.seed.wrapping_add(1));

    if opts.face {
        session.attach_camera();
    }
    session.start(t0);

    let every = opts.every.max(1);
    let mut overlay = RgbaImage::new(opts.width, opts.height);
    let mut written = Vec::new();
    let mut score = None;
    let mut frames = 0;

    for i in 0..MAX_FRAMES {
        let now = t0 + FRAME_STEP * i as u32;
        let t_ms = (FRAME_STEP * i as u32).as_secs_f32() * 1000.0;
        frames = i + 1;

        let composite = if opts.face {
            let frame = skin_frame(opts.width, opts.height, &mut texture_rng);
            let detection = if i >= FACE_ENTERS_AT {
                Detection::from_subjects(vec![synthetic_subject(t_ms)])
            } else {
                Detection::Absent
            };
            let report = session.camera_frame(&detection, Some(&frame), now);
            let metrics = session.metrics().clone();
            let overlay_frame = OverlayFrame {
                state: report.state,
                progress: report.progress,
                metrics: &metrics,
                detection: &detection,
                beam_visible: session.beam_visible(),
                t_ms,
            };
            renderer.render(&mut overlay, &overlay_frame, session.rng_mut());
            compose(&frame, &overlay)
        } else {
            let report = session.fallback_tick(now);
            renderer.render_fallback(
                &mut overlay,
                report.state,
                report.progress,
                t_ms,
                session.rng_mut(),
            );
            compose(&RgbImage::from_pixel(opts.width, opts.height, Rgb([0, 0, 0])), &overlay)
        };

        score = session.poll_result(now);
        if i % every == 0 || score.is_some() {
            written.push(write_frame(&opts.out, i, &composite)?);
        }
        if score.is_some() {
            break;
        }
    }

    tracing::info!(frames, score = ?score, "simulation finished");
    Ok(SimulationOutcome {
        score,
        frames,
        written,
        metrics: session.metrics().clone(),
    })
}

fn write_frame(dir: &Path, index: usize, image: &RgbaImage) -> Result<PathBuf> {
    let path = dir.join(format!("frame_{index:04}.png"));
    image
        .save(&path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

/// Mirrored video under the overlay.
fn compose(frame: &RgbImage, overlay: &RgbaImage) -> RgbaImage {
    let mirrored = imageops::flip_horizontal(frame);
    let mut base = RgbaImage::from_fn(mirrored.width(), mirrored.height(), |x, y| {
        let [r, g, b] = mirrored.get_pixel(x, y).0;
        Rgba([r, g, b, 255])
    });
    imageops::overlay(&mut base, overlay, 0, 0);
    base
}

/// Skin-toned frame with mild per-pixel noise.
fn skin_frame(width: u32, height: u32, rng: &mut StdRng) -> RgbImage {
    RgbImage::from_fn(width, height, |_, y| {
        let shade = 200.0 - 40.0 * (y as f32 / height.max(1) as f32);
        let n: f32 = rng.gen_range(-12.0..12.0);
        let v = |base: f32| (base + n).clamp(0.0, 255.0) as u8;
        Rgb([v(shade), v(shade * 0.78), v(shade * 0.66)])
    })
}

/// Points on a slowly swaying disc in normalized coordinates.
fn synthetic_subject(t_ms: f32) -> Subject {
    let golden = std::f32::consts::PI * (3.0 - 5f32.sqrt());
    let cx = 0.5 + 0.02 * (t_ms / 700.0).sin();
    let cy = 0.45;
    let landmarks = (0..MESH_POINTS)
        .map(|i| {
            let r = (i as f32 / MESH_POINTS as f32).sqrt();
            let a = i as f32 * golden;
            Landmark::new(cx + 0.16 * r * a.cos(), cy + 0.22 * r * a.sin())
        })
        .collect();
    Subject {
        landmarks,
        presence: 0.95,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(dir: &Path, face: bool, seed: u64) -> SimulateOptions {
        SimulateOptions {
            out: dir.to_path_buf(),
            seed,
            face,
            every: 30,
            width: 160,
            height: 120,
        }
    }

    #[test]
    fn test_fallback_run_yields_score() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run(&options(dir.path(), false, 1)).unwrap();
        let score = outcome.score.unwrap();
        assert!(score <= 100);
        // 3000 ms scan plus 300 ms delay at 33 ms per frame
        assert!((95..=110).contains(&outcome.frames), "frames={}", outcome.frames);
        assert!(outcome.written.iter().all(|p| p.exists()));
    }

    #[test]
    fn test_face_run_yields_score_after_delay() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run(&options(dir.path(), true, 2)).unwrap();
        assert!(outcome.score.is_some());
        // face enters, 3000 ms scan, 800 ms delay
        assert!(outcome.frames > FACE_ENTERS_AT + 110, "frames={}", outcome.frames);
        assert!(outcome.frames < 140, "frames={}", outcome.frames);
    }

    #[test]
    fn test_same_seed_same_score() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let first = run(&options(a.path(), false, 42)).unwrap();
        let second = run(&options(b.path(), false, 42)).unwrap();
        assert_eq!(first.score, second.score);
    }

    #[test]
    fn test_last_frame_always_written() {
        let dir = tempfile::tempdir().unwrap();
        let opts = SimulateOptions {
            every: 1000,
            ..options(dir.path(), false, 5)
        };
        let outcome = run(&opts).unwrap();
        // frame 0 and the result frame
        assert_eq!(outcome.written.len(), 2);
        let last = image::open(outcome.written.last().unwrap()).unwrap();
        assert_eq!((last.width(), last.height()), (160, 120));
    }

    #[test]
    fn test_synthetic_subject_inside_frame() {
        let subject = synthetic_subject(1234.0);
        assert_eq!(subject.landmarks.len(), MESH_POINTS);
        assert!(subject
            .landmarks
            .iter()
            .all(|l| (0.0..=1.0).contains(&l.x) && (0.0..=1.0).contains(&l.y)));
    }
}
