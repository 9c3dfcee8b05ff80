//! Per-frame overlay renderer.
//!
//! Paints the cosmetic scan overlay (grid, face contours, landmark
//! crosshairs, bounding box, data panel, scan beam, glitch) with tiny-skia
//! and hands it back as an RGBA buffer the size of the video frame. The
//! overlay is a mirror view.

use crate::types::{mirror_x, Detection, FaceBox, Landmark, ScanState, SkinMetrics, SkinType, TodayLabel};
use image::{Rgba, RgbaImage};
use rand::Rng;
use tiny_skia::{
    Color, FillRule, GradientStop, LinearGradient, Paint, Path, PathBuilder, Pixmap, Point, Rect,
    SpreadMode, Stroke, StrokeDash, Transform,
};

/// Straight-alpha colour; `a` in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
struct Tint {
    r: u8,
    g: u8,
    b: u8,
    a: f32,
}

const fn tint(r: u8, g: u8, b: u8, a: f32) -> Tint {
    Tint { r, g, b, a }
}

impl Tint {
    fn fade(self, factor: f32) -> Self {
        Self {
            a: (self.a * factor).clamp(0.0, 1.0),
            ..self
        }
    }

    fn color(self) -> Color {
        Color::from_rgba8(self.r, self.g, self.b, (self.a.clamp(0.0, 1.0) * 255.0).round() as u8)
    }

    fn paint(self) -> Paint<'static> {
        let mut paint = Paint::default();
        paint.set_color(self.color());
        paint.anti_alias = true;
        paint
    }
}

const CYAN: Tint = tint(0, 207, 255, 0.95);
const CYAN_SOFT: Tint = tint(0, 207, 255, 0.22);
const BLUE: Tint = tint(77, 139, 255, 0.95);
const VIOLET: Tint = tint(162, 85, 248, 0.92);
const PINK: Tint = tint(233, 21, 171, 0.85);
const WHITE: Tint = tint(255, 255, 255, 1.0);

const GRID_SPACING: f32 = 40.0;
const GRID_DASH: [f32; 2] = [3.0, 8.0];
const BOX_PADDING: f32 = 40.0;
const CORNER_LEN: f32 = 20.0;
const BEAM_HALF_HEIGHT: f32 = 40.0;

const PANEL_PAD: f32 = 17.0;
const PANEL_W: f32 = 192.0;
const PANEL_H: f32 = 158.0;
/// Space kept clear at the bottom of the overlay for host controls.
const PANEL_BOTTOM_MARGIN: f32 = 80.0;

/// Face-mesh landmark indices highlighted with crosshairs: eyes, nose tip, lip.
pub const KEY_LANDMARKS: [usize; 4] = [33, 263, 1, 13];

/// Face-mesh right eye contour.
pub const RIGHT_EYE: &[(usize, usize)] = &[
    (33, 7), (7, 163), (163, 144), (144, 145), (145, 153), (153, 154), (154, 155), (155, 133),
    (33, 246), (246, 161), (161, 160), (160, 159), (159, 158), (158, 157), (157, 173), (173, 133),
];

/// Face-mesh left eye contour.
pub const LEFT_EYE: &[(usize, usize)] = &[
    (263, 249), (249, 390), (390, 373), (373, 374), (374, 380), (380, 381), (381, 382), (382, 362),
    (263, 466), (466, 388), (388, 387), (387, 386), (386, 385), (385, 384), (384, 398), (398, 362),
];

/// Face-mesh outer lip contour.
pub const LIPS: &[(usize, usize)] = &[
    (61, 146), (146, 91), (91, 181), (181, 84), (84, 17), (17, 314), (314, 405), (405, 321),
    (321, 375), (375, 291), (61, 185), (185, 40), (40, 39), (39, 37), (37, 0), (0, 267),
    (267, 269), (269, 270), (270, 409), (409, 291),
];

/// Face-mesh face oval, drawn as the faint outer mesh.
pub const FACE_OVAL: &[(usize, usize)] = &[
    (10, 338), (338, 297), (297, 332), (332, 284), (284, 251), (251, 389), (389, 356), (356, 454),
    (454, 323), (323, 361), (361, 288), (288, 397), (397, 365), (365, 379), (379, 378), (378, 400),
    (400, 377), (377, 152), (152, 148), (148, 176), (176, 149), (149, 150), (150, 136), (136, 172),
    (172, 58), (58, 132), (132, 93), (93, 234), (234, 127), (127, 162), (162, 21), (21, 54),
    (54, 103), (103, 67), (67, 109), (109, 10),
];

/// Everything the renderer reads for one frame.
pub struct OverlayFrame<'a> {
    pub state: ScanState,
    pub progress: f32,
    pub metrics: &'a SkinMetrics,
    pub detection: &'a Detection,
    /// The scan beam is only drawn after the first start.
    pub beam_visible: bool,
    /// Animation clock in milliseconds.
    pub t_ms: f32,
}

/// Stateless overlay painter.
#[derive(Debug, Clone)]
pub struct OverlayRenderer {
    glitch_probability: f64,
}

impl OverlayRenderer {
    pub fn new(glitch_probability: f64) -> Self {
        Self {
            glitch_probability: glitch_probability.clamp(0.0, 1.0),
        }
    }

    /// Replace `target` with the full composite for `frame`.
    pub fn render<R: Rng>(&self, target: &mut RgbaImage, frame: &OverlayFrame<'_>, rng: &mut R) {
        let Some(mut pm) = Pixmap::new(target.width(), target.height()) else {
            return;
        };
        let t = frame.t_ms;

        draw_grid(&mut pm, t);

        match frame.detection {
            Detection::Present(subjects) => {
                for subject in subjects {
                    draw_contours(&mut pm, &subject.landmarks);
                    draw_key_landmarks(&mut pm, &subject.landmarks);
                    let (w, h) = size(&pm);
                    let Some(face) = FaceBox::from_landmarks(&subject.landmarks, w, h) else {
                        continue;
                    };
                    let padded = face.padded(BOX_PADDING);
                    draw_bounding_box(&mut pm, &padded, t);
                    if frame.beam_visible {
                        draw_scan_beam(&mut pm, Some(&padded), t, frame.progress);
                    }
                    draw_data_panel(&mut pm, &face, frame);
                }
            }
            Detection::Absent => {
                draw_face_hint(&mut pm);
                if frame.beam_visible {
                    draw_scan_beam(&mut pm, None, t, 0.0);
                }
            }
        }

        if frame.state == ScanState::Scanning {
            self.draw_glitch(&mut pm, rng);
        }
        copy_into(&pm, target);
    }

    /// Frame used when no camera is available: grid, beam and glitch only.
    pub fn render_fallback<R: Rng>(
        &self,
        target: &mut RgbaImage,
        state: ScanState,
        progress: f32,
        t_ms: f32,
        rng: &mut R,
    ) {
        let Some(mut pm) = Pixmap::new(target.width(), target.height()) else {
            return;
        };
        draw_grid(&mut pm, t_ms);
        draw_scan_beam(&mut pm, None, t_ms, progress);
        if state == ScanState::Scanning {
            self.draw_glitch(&mut pm, rng);
        }
        copy_into(&pm, target);
    }

    fn draw_glitch<R: Rng>(&self, pm: &mut Pixmap, rng: &mut R) {
        if !rng.gen_bool(self.glitch_probability) {
            return;
        }
        let (w, h) = size(pm);
        let y = rng.gen::<f32>() * h;
        let height = rng.gen::<f32>() * 20.0;
        let color = if rng.gen_bool(0.5) {
            CYAN_SOFT
        } else {
            tint(162, 85, 248, 0.2)
        };
        fill_rect(pm, 0.0, y, w, height, color);
    }
}

impl Default for OverlayRenderer {
    fn default() -> Self {
        Self::new(0.1)
    }
}

/// Un-premultiply the pixmap into `target`.
fn copy_into(pm: &Pixmap, target: &mut RgbaImage) {
    for (dst, src) in target.pixels_mut().zip(pm.pixels()) {
        let c = src.demultiply();
        *dst = Rgba([c.red(), c.green(), c.blue(), c.alpha()]);
    }
}

fn size(pm: &Pixmap) -> (f32, f32) {
    (pm.width() as f32, pm.height() as f32)
}

fn fill_rect(pm: &mut Pixmap, x: f32, y: f32, w: f32, h: f32, color: Tint) {
    if let Some(rect) = Rect::from_xywh(x, y, w, h) {
        pm.fill_rect(rect, &color.paint(), Transform::identity(), None);
    }
}

fn fill_path(pm: &mut Pixmap, path: Option<Path>, color: Tint) {
    if let Some(path) = path {
        pm.fill_path(&path, &color.paint(), FillRule::Winding, Transform::identity(), None);
    }
}

fn stroke_path(pm: &mut Pixmap, path: Option<Path>, stroke: &Stroke, color: Tint) {
    if let Some(path) = path {
        pm.stroke_path(&path, &color.paint(), stroke, Transform::identity(), None);
    }
}

fn solid(width: f32) -> Stroke {
    Stroke {
        width,
        ..Stroke::default()
    }
}

/// One path of disjoint segments `(x0, y0, x1, y1)`.
fn segments(segs: impl IntoIterator<Item = (f32, f32, f32, f32)>) -> Option<Path> {
    let mut pb = PathBuilder::new();
    for (x0, y0, x1, y1) in segs {
        pb.move_to(x0, y0);
        pb.line_to(x1, y1);
    }
    pb.finish()
}

fn round_rect(x: f32, y: f32, w: f32, h: f32, r: f32) -> Option<Path> {
    let r = r.min(w * 0.5).min(h * 0.5).max(0.0);
    let (x1, y1) = (x + w, y + h);
    let mut pb = PathBuilder::new();
    pb.move_to(x + r, y);
    pb.line_to(x1 - r, y);
    pb.quad_to(x1, y, x1, y + r);
    pb.line_to(x1, y1 - r);
    pb.quad_to(x1, y1, x1 - r, y1);
    pb.line_to(x + r, y1);
    pb.quad_to(x, y1, x, y1 - r);
    pb.line_to(x, y + r);
    pb.quad_to(x, y, x + r, y);
    pb.close();
    pb.finish()
}

/// Horizontal band fading from transparent to `peak` at `center` and back.
fn glow_band(pm: &mut Pixmap, center: f32, half_height: f32, peak: Tint) {
    let edge = tint(peak.r, peak.g, peak.b, 0.0).color();
    let Some(shader) = LinearGradient::new(
        Point::from_xy(0.0, center - half_height),
        Point::from_xy(0.0, center + half_height),
        vec![
            GradientStop::new(0.0, edge),
            GradientStop::new(0.5, peak.color()),
            GradientStop::new(1.0, edge),
        ],
        SpreadMode::Pad,
        Transform::identity(),
    ) else {
        return;
    };
    let mut paint = Paint::default();
    paint.shader = shader;
    if let Some(rect) = Rect::from_xywh(0.0, center - half_height, pm.width() as f32, half_height * 2.0) {
        pm.fill_rect(rect, &paint, Transform::identity(), None);
    }
}

fn to_canvas(p: &Landmark, w: f32, h: f32) -> (f32, f32) {
    (mirror_x(p.x) * w, p.y * h)
}

/// Slowly drifting dashed grid.
fn draw_grid(pm: &mut Pixmap, t: f32) {
    let (w, h) = size(pm);
    let drift_x = (t * 0.0006).sin() * 6.0;
    let drift_y = (t * 0.00055).cos() * 6.0;

    let mut lines = Vec::new();
    let mut x = -GRID_SPACING;
    while x <= w + GRID_SPACING {
        lines.push((x + drift_x, 0.0, x + drift_x, h));
        x += GRID_SPACING;
    }
    let mut y = -GRID_SPACING;
    while y <= h + GRID_SPACING {
        lines.push((0.0, y + drift_y, w, y + drift_y));
        y += GRID_SPACING;
    }

    let stroke = Stroke {
        width: 1.0,
        dash: StrokeDash::new(GRID_DASH.to_vec(), 0.0),
        ..Stroke::default()
    };
    stroke_path(pm, segments(lines), &stroke, tint(0, 207, 255, 0.38).fade(0.1));
}

fn draw_edges(pm: &mut Pixmap, landmarks: &[Landmark], edges: &[(usize, usize)], width: f32, color: Tint) {
    let (w, h) = size(pm);
    let segs = edges.iter().filter_map(|&(a, b)| {
        let (p1, p2) = (landmarks.get(a)?, landmarks.get(b)?);
        let (x1, y1) = to_canvas(p1, w, h);
        let (x2, y2) = to_canvas(p2, w, h);
        Some((x1, y1, x2, y2))
    });
    stroke_path(pm, segments(segs), &solid(width), color);
}

/// Faint face oval plus bright eye and lip contours.
fn draw_contours(pm: &mut Pixmap, landmarks: &[Landmark]) {
    draw_edges(pm, landmarks, FACE_OVAL, 1.0, WHITE.fade(0.4));
    for contour in [RIGHT_EYE, LEFT_EYE, LIPS] {
        draw_edges(pm, landmarks, contour, 2.0, WHITE.fade(0.85));
    }
}

/// Dot plus crosshair on each key landmark.
fn draw_key_landmarks(pm: &mut Pixmap, landmarks: &[Landmark]) {
    let (w, h) = size(pm);
    for idx in KEY_LANDMARKS {
        let Some(p) = landmarks.get(idx) else {
            continue;
        };
        let (px, py) = to_canvas(p, w, h);
        fill_path(pm, PathBuilder::from_circle(px, py, 3.0), CYAN);
        let cross = segments([(px - 6.0, py, px + 6.0, py), (px, py - 6.0, px, py + 6.0)]);
        stroke_path(pm, cross, &solid(1.0), VIOLET);
    }
}

/// Eight corner segments of `b`, each `len` long.
fn corner_brackets(b: &FaceBox, len: f32) -> Option<Path> {
    let (x0, y0, x1, y1) = (b.x, b.y, b.x + b.width, b.y + b.height);
    segments([
        (x0, y0 + len, x0, y0),
        (x0, y0, x0 + len, y0),
        (x1 - len, y0, x1, y0),
        (x1, y0, x1, y0 + len),
        (x1, y1 - len, x1, y1),
        (x1, y1, x1 - len, y1),
        (x0 + len, y1, x0, y1),
        (x0, y1, x0, y1 - len),
    ])
}

/// Pulsing box with blue corner brackets.
fn draw_bounding_box(pm: &mut Pixmap, b: &FaceBox, t: f32) {
    let pulse = 0.65 + 0.35 * (t * 0.006).sin();
    let outline = Rect::from_xywh(b.x, b.y, b.width, b.height).map(PathBuilder::from_rect);
    stroke_path(pm, outline, &solid(1.5), CYAN.fade(0.85 * (0.8 + 0.2 * pulse)));
    stroke_path(pm, corner_brackets(b, CORNER_LEN), &solid(2.0), BLUE.fade(0.85));
}

/// Full-width sweeping beam, plus a local beam inside `face` when given.
fn draw_scan_beam(pm: &mut Pixmap, face: Option<&FaceBox>, t: f32, progress: f32) {
    let (_, h) = size(pm);
    let base_y = (t * 0.3) % h;
    glow_band(pm, base_y, BEAM_HALF_HEIGHT, tint(0, 207, 255, 0.4));

    if let Some(b) = face {
        if b.height > 0.0 {
            let beam_y = b.y + (t * 0.4) % b.height;
            let alpha = 0.3 + 0.3 * progress;
            fill_rect(pm, b.x, beam_y - 5.0, b.width, 10.0, tint(162, 85, 248, 0.2).fade(alpha));
        }
    }
}

/// Panel origin: centred under the face, flipped above it when it would
/// overflow the bottom margin, pinned to the bottom when both fail.
fn panel_origin(face: &FaceBox, w: f32, h: f32) -> (f32, f32) {
    let px = (face.x + face.width * 0.5 - PANEL_W * 0.5)
        .min(w - PANEL_W - PANEL_PAD)
        .max(PANEL_PAD);
    let mut py = face.y + face.height + 12.0;
    if py + PANEL_H > h - PANEL_BOTTOM_MARGIN {
        py = face.y - PANEL_H - 12.0;
    }
    if py < PANEL_PAD {
        py = h - PANEL_H - PANEL_BOTTOM_MARGIN;
    }
    (px, py)
}

fn draw_bar(pm: &mut Pixmap, x: f32, y: f32, width: f32, value: f32, fill: Tint) {
    let v = value.clamp(0.0, 1.0);
    fill_rect(pm, x, y, width, 7.0, WHITE.fade(0.15));
    fill_rect(pm, x, y, width * v, 7.0, fill);
}

fn skin_type_color(t: SkinType) -> Tint {
    match t {
        SkinType::Dry => tint(255, 196, 120, 0.95),
        SkinType::Oily => VIOLET,
        SkinType::Combination => BLUE,
        SkinType::Neutral => CYAN,
    }
}

fn today_color(label: TodayLabel) -> Tint {
    match label {
        TodayLabel::Good => tint(80, 230, 160, 0.95),
        TodayLabel::Normal => WHITE.fade(0.8),
        TodayLabel::Dry => tint(255, 196, 120, 0.95),
        TodayLabel::Shiny => PINK,
        TodayLabel::Moist => CYAN,
    }
}

/// Live readout: hydration and oil bars, type and today swatches, and
/// animated dots while scanning.
fn draw_data_panel(pm: &mut Pixmap, face: &FaceBox, frame: &OverlayFrame<'_>) {
    let (w, h) = size(pm);
    let (px, py) = panel_origin(face, w, h);

    fill_path(pm, round_rect(px, py, PANEL_W, PANEL_H, 14.0), tint(0, 0, 0, 0.65));
    stroke_path(pm, round_rect(px, py, PANEL_W, PANEL_H, 14.0), &solid(1.0), WHITE.fade(0.25));

    let bar_x = px + PANEL_PAD + 44.0;
    let bar_w = PANEL_W - PANEL_PAD * 2.0 - 52.0;
    let right_x = px + PANEL_W - PANEL_PAD;
    let mut ly = py + 32.0;

    draw_bar(pm, bar_x, ly + 4.0, bar_w, frame.metrics.hydration, tint(0, 207, 255, 0.8));
    ly += 24.0;
    draw_bar(pm, bar_x, ly + 4.0, bar_w, frame.metrics.oil, tint(162, 85, 248, 0.75));
    ly += 24.0;

    let type_swatch = round_rect(right_x - 14.0, ly + 2.0, 14.0, 14.0, 3.0);
    fill_path(pm, type_swatch, skin_type_color(frame.metrics.skin_type));
    ly += 22.0;
    let today_swatch = round_rect(right_x - 14.0, ly + 2.0, 14.0, 14.0, 3.0);
    fill_path(pm, today_swatch, today_color(frame.metrics.today));

    if frame.state == ScanState::Scanning {
        let dots = ((frame.t_ms / 400.0).floor() as i64).rem_euclid(4) + 1;
        for i in 0..dots {
            let dot = PathBuilder::from_circle(right_x - 3.0 - i as f32 * 8.0, py + 20.0, 2.5);
            fill_path(pm, dot, tint(0, 207, 255, 0.9));
        }
    }
}

/// Centred framing brackets asking the user to bring a face into view.
fn draw_face_hint(pm: &mut Pixmap) {
    let (w, h) = size(pm);
    let bw = w * 0.5;
    let bh = h * 0.45;
    let hint = FaceBox {
        x: (w - bw) / 2.0,
        y: (h - bh) / 2.0,
        width: bw,
        height: bh,
    };
    stroke_path(pm, corner_brackets(&hint, CORNER_LEN * 1.5), &solid(2.0), WHITE.fade(0.8));
}
