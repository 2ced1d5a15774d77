//! # track
//!
//! Track geometry: boundary polygons, the generated oval, and the
//! start/finish line. All coordinates are planar centimetres in the anchor
//! frame (anchor 0 at the origin).

use serde::Serialize;

// ── Track boundaries ──────────────────────────────────────────────────────────

/// A closed outer boundary polygon with an optional closed inner boundary
/// (tracks with visible width). Immutable after load.
#[derive(Debug, Clone)]
pub struct Track {
    pub name: String,
    pub outer_points: Vec<(f64, f64)>,
    pub inner_points: Vec<(f64, f64)>,
}

impl Track {
    pub fn new(name: &str, outer_points: Vec<(f64, f64)>, inner_points: Vec<(f64, f64)>) -> Self {
        Self {
            name: name.to_string(),
            outer_points,
            inner_points,
        }
    }

    pub fn has_width(&self) -> bool {
        !self.inner_points.is_empty()
    }
}

/// Generate a closed oval with a parallel inner boundary offset toward the
/// centre by `track_width`.
pub fn create_oval_track(
    cx: f64,
    cy: f64,
    outer_w: f64,
    outer_h: f64,
    track_width: f64,
    num_points: usize,
) -> Track {
    let mut outer = Vec::with_capacity(num_points);
    let mut inner = Vec::with_capacity(num_points);
    for i in 0..num_points {
        let angle = 2.0 * std::f64::consts::PI * i as f64 / num_points as f64;
        outer.push((cx + outer_w * angle.cos(), cy + outer_h * angle.sin()));
        inner.push((
            cx + (outer_w - track_width) * angle.cos(),
            cy + (outer_h - track_width) * angle.sin(),
        ));
    }
    Track::new("Oval Track", outer, inner)
}

/// Minimum perpendicular distance from a point to a closed polyline.
/// The foot of the perpendicular is clamped to each segment; fewer than two
/// vertices yields +inf (no boundary to hit).
pub fn dist_to_boundary(px: f64, py: f64, pts: &[(f64, f64)]) -> f64 {
    if pts.len() < 2 {
        return f64::INFINITY;
    }
    let mut best = f64::INFINITY;
    let n = pts.len();
    for i in 0..n {
        let (x1, y1) = pts[i];
        let (x2, y2) = pts[(i + 1) % n];
        let (dx, dy) = (x2 - x1, y2 - y1);
        let denom = dx * dx + dy * dy;
        let d = if denom == 0.0 {
            ((px - x1).powi(2) + (py - y1).powi(2)).sqrt()
        } else {
            let t = (((px - x1) * dx + (py - y1) * dy) / denom).clamp(0.0, 1.0);
            ((px - x1 - t * dx).powi(2) + (py - y1 - t * dy).powi(2)).sqrt()
        };
        best = best.min(d);
    }
    best
}

// ── Start/finish line ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineOrientation {
    Vertical,
    Horizontal,
}

/// Resolved start/finish line geometry. For a vertical line the crossing
/// band is the y-range [y1, y2]; for a horizontal line the band is
/// x ∈ [x − threshold, x + threshold] around the line at y1.
#[derive(Debug, Clone, Copy)]
pub struct StartLine {
    pub orientation: LineOrientation,
    pub x: f64,
    pub y1: f64,
    pub y2: f64,
    pub crossing_threshold: f64,
}

/// Half-width of the pit-speed zone either side of the line, cm.
pub const PIT_ZONE_HALF_WIDTH_CM: f64 = 50.0;

impl StartLine {
    /// Which side of the line a position is on.
    pub fn side(&self, x: f64, y: f64) -> bool {
        match self.orientation {
            LineOrientation::Vertical => x < self.x,
            LineOrientation::Horizontal => y < self.y1,
        }
    }

    /// Whether a position lies within the line's crossing band.
    pub fn within_band(&self, x: f64, y: f64) -> bool {
        match self.orientation {
            LineOrientation::Vertical => self.y1 <= y && y <= self.y2,
            LineOrientation::Horizontal => {
                self.x - self.crossing_threshold <= x && x <= self.x + self.crossing_threshold
            }
        }
    }

    /// Within the pit-speed zone: inside the crossing band and less than
    /// [`PIT_ZONE_HALF_WIDTH_CM`] from the line along the crossing axis.
    pub fn in_pit_zone(&self, x: f64, y: f64) -> bool {
        if !self.within_band(x, y) {
            return false;
        }
        let along = match self.orientation {
            LineOrientation::Vertical => (x - self.x).abs(),
            LineOrientation::Horizontal => (y - self.y1).abs(),
        };
        along < PIT_ZONE_HALF_WIDTH_CM
    }
}
