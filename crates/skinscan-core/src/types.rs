use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// A normalized facial landmark. `x` and `y` are in [0, 1] of the source frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    /// Relative depth as reported by the model; unused for drawing.
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, z: 0.0 }
    }
}

/// One detected face.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub landmarks: Vec<Landmark>,
    /// Face presence confidence in [0, 1].
    pub presence: f32,
}

/// Per-frame detector output.
#[derive(Debug, Clone, Default)]
pub enum Detection {
    Present(Vec<Subject>),
    #[default]
    Absent,
}

impl Detection {
    /// Build a detection from a possibly empty subject list.
    pub fn from_subjects(subjects: Vec<Subject>) -> Self {
        if subjects.is_empty() {
            Detection::Absent
        } else {
            Detection::Present(subjects)
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Detection::Present(_))
    }

    pub fn subjects(&self) -> &[Subject] {
        match self {
            Detection::Present(subjects) => subjects,
            Detection::Absent => &[],
        }
    }
}

/// Axis-aligned face box in overlay pixel space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl FaceBox {
    /// Bounding box of `landmarks` scaled to a `w`×`h` overlay.
    ///
    /// The overlay is a mirror view, so landmark x is flipped (`1 - x`).
    /// Returns `None` for an empty landmark set.
    pub fn from_landmarks(landmarks: &[Landmark], w: f32, h: f32) -> Option<Self> {
        if landmarks.is_empty() {
            return None;
        }
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (1.0f32, 1.0f32, 0.0f32, 0.0f32);
        for p in landmarks {
            let fx = mirror_x(p.x);
            min_x = min_x.min(fx);
            max_x = max_x.max(fx);
            min_y = min_y.min(p.y);
            max_y = max_y.max(p.y);
        }
        Some(Self {
            x: min_x * w,
            y: min_y * h,
            width: (max_x - min_x).max(0.0) * w,
            height: (max_y - min_y).max(0.0) * h,
        })
    }

    /// Grow the box by `pad` pixels on every side.
    pub fn padded(&self, pad: f32) -> Self {
        Self {
            x: self.x - pad,
            y: self.y - pad,
            width: self.width + pad * 2.0,
            height: self.height + pad * 2.0,
        }
    }
}

/// Mirror a normalized x coordinate for the selfie view.
pub fn mirror_x(x: f32) -> f32 {
    1.0 - x
}

/// Coarse skin type derived from the smoothed oil/hydration pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkinType {
    Dry,
    Oily,
    Combination,
    Neutral,
}

impl SkinType {
    /// Classify by fixed bands, checked in order; `Neutral` when none match.
    pub fn classify(oil: f32, hydration: f32) -> Self {
        if oil > 0.45 && hydration < 0.55 {
            SkinType::Oily
        } else if oil < 0.25 && hydration < 0.6 {
            SkinType::Dry
        } else if oil > 0.38 && hydration > 0.55 {
            SkinType::Combination
        } else {
            SkinType::Neutral
        }
    }
}

impl fmt::Display for SkinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkinType::Dry => "dry",
            SkinType::Oily => "oily",
            SkinType::Combination => "combination",
            SkinType::Neutral => "neutral",
        })
    }
}

/// "How is my skin today" label. Drifts stochastically, see [`crate::estimator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TodayLabel {
    Good,
    Normal,
    Dry,
    Shiny,
    Moist,
}

impl TodayLabel {
    pub const ALL: [TodayLabel; 5] = [
        TodayLabel::Good,
        TodayLabel::Normal,
        TodayLabel::Dry,
        TodayLabel::Shiny,
        TodayLabel::Moist,
    ];

    /// Draw weights for [`Self::ALL`], in the same order.
    pub fn weights(hydration: f32, oil: f32) -> [f64; 5] {
        [
            if hydration > 0.65 { 2.0 } else { 0.5 },
            1.0,
            if hydration < 0.5 { 1.5 } else { 0.3 },
            if oil > 0.45 { 1.5 } else { 0.3 },
            if hydration > 0.7 { 1.2 } else { 0.2 },
        ]
    }
}

impl fmt::Display for TodayLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TodayLabel::Good => "good",
            TodayLabel::Normal => "normal",
            TodayLabel::Dry => "dry",
            TodayLabel::Shiny => "shiny",
            TodayLabel::Moist => "moist",
        })
    }
}

/// Simulated skin readout for the current session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkinMetrics {
    /// Smoothed hydration in [0, 1].
    pub hydration: f32,
    /// Smoothed oil in [0, 1].
    pub oil: f32,
    #[serde(rename = "type")]
    pub skin_type: SkinType,
    pub today: TodayLabel,
    /// Wall-clock time of the last accepted sample; `None` before the first.
    #[serde(skip)]
    pub last_sample_at: Option<Instant>,
}

impl Default for SkinMetrics {
    fn default() -> Self {
        Self {
            hydration: 0.65,
            oil: 0.28,
            skin_type: SkinType::Neutral,
            today: TodayLabel::Normal,
            last_sample_at: None,
        }
    }
}

/// Scan phase. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    #[default]
    Idle,
    Detecting,
    Scanning,
    Done,
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScanState::Idle => "idle",
            ScanState::Detecting => "detecting",
            ScanState::Scanning => "scanning",
            ScanState::Done => "done",
        })
    }
}
