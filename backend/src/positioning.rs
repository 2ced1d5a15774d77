//! # positioning
//!
//! RSSI-weighted multilateration over per-anchor range measurements.
//!
//! Mode selection on the number of valid anchors (range > 0, known id):
//! - 4+ : analytical trilateration over every 3-combination, averaged with
//!   the mean RSSI weight of each combination — quality `excellent`
//! - 3  : trilateration with the three best-weighted anchors — `good`
//! - 2  : linear blend on the segment between the anchors — `fair`
//! - <2 : underdetermined, no fix — `poor`
//!
//! A near-collinear 3-anchor set (|denom| < 1e-3) degrades to the two-anchor
//! blend over the first pair.

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;

use crate::config::RssiConfig;

/// Determinant magnitude below which the 3-circle system is treated as
/// collinear.
const DEGENERATE_DENOM: f64 = 1e-3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SolveError {
    #[error("underdetermined fix: {valid} valid anchors")]
    Underdetermined { valid: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Excellent => "excellent",
            Quality::Good => "good",
            Quality::Fair => "fair",
            Quality::Poor => "poor",
        }
    }
}

/// One solved position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    pub x: f64,
    pub y: f64,
    pub quality: Quality,
    pub anchor_count: usize,
}

#[derive(Debug, Clone, Copy)]
struct ValidAnchor {
    range: f64,
    weight: f64,
    x: f64,
    y: f64,
}

/// Stateless solver bound to the fixed anchor frame.
#[derive(Debug, Clone)]
pub struct Solver {
    anchors: HashMap<usize, (f64, f64)>,
    rssi: RssiConfig,
}

impl Solver {
    pub fn new(anchors: HashMap<usize, (f64, f64)>, rssi: RssiConfig) -> Self {
        Self { anchors, rssi }
    }

    /// RSSI → weight in [min_weight, 1]. Zero or positive RSSI means the
    /// radio did not report one; those measurements get full weight.
    pub fn rssi_weight(&self, rssi: f64) -> f64 {
        if rssi >= 0.0 {
            return 1.0;
        }
        let normalized = (rssi + (self.rssi.excellent + self.rssi.poor) / 2.0) / self.rssi.normalization;
        (1.0 + normalized).max(self.rssi.min_weight)
    }

    fn valid_anchors(&self, ranges: &[f64], rssi: &[f64]) -> Vec<ValidAnchor> {
        let mut valid = Vec::new();
        for (i, &r) in ranges.iter().enumerate() {
            if r <= 0.0 {
                continue;
            }
            let Some(&(ax, ay)) = self.anchors.get(&i) else {
                continue;
            };
            let weight = self.rssi_weight(rssi.get(i).copied().unwrap_or(0.0));
            valid.push(ValidAnchor { range: r, weight, x: ax, y: ay });
        }
        valid
    }

    /// Solve one fix from a frame of ranges and RSSI readings.
    pub fn solve(&self, ranges: &[f64], rssi: &[f64]) -> Result<Fix, SolveError> {
        let mut valid = self.valid_anchors(ranges, rssi);
        let count = valid.len();

        let (x, y, quality) = match count {
            0 | 1 => return Err(SolveError::Underdetermined { valid: count }),
            2 => {
                let (x, y) = blend(&valid[0], &valid[1]);
                (x, y, Quality::Fair)
            }
            3 => {
                valid.sort_by(|a, b| b.weight.total_cmp(&a.weight));
                let (x, y) = trilaterate(&valid[0], &valid[1], &valid[2]);
                (x, y, Quality::Good)
            }
            _ => {
                let (x, y) = weighted_multilateration(&valid);
                (x, y, Quality::Excellent)
            }
        };

        Ok(Fix { x, y, quality, anchor_count: count })
    }
}

/// Linear blend on the segment between two anchors at ratio r1/(r1+r2).
/// Coincident anchors collapse to the first anchor's position.
fn blend(a1: &ValidAnchor, a2: &ValidAnchor) -> (f64, f64) {
    let d = (a2.x - a1.x).hypot(a2.y - a1.y);
    if d == 0.0 {
        return (a1.x, a1.y);
    }
    let sum = a1.range + a2.range;
    let ratio = if sum > 0.0 { a1.range / sum } else { 0.5 };
    (a1.x + (a2.x - a1.x) * ratio, a1.y + (a2.y - a1.y) * ratio)
}

/// Analytical 3-circle trilateration via the linearized pairwise system.
fn trilaterate(a1: &ValidAnchor, a2: &ValidAnchor, a3: &ValidAnchor) -> (f64, f64) {
    let (x1, y1, r1) = (a1.x, a1.y, a1.range);
    let (x2, y2, r2) = (a2.x, a2.y, a2.range);
    let (x3, y3, r3) = (a3.x, a3.y, a3.range);

    let a = 2.0 * (x2 - x1);
    let b = 2.0 * (y2 - y1);
    let c = r1 * r1 - r2 * r2 - x1 * x1 + x2 * x2 - y1 * y1 + y2 * y2;
    let d = 2.0 * (x3 - x2);
    let e = 2.0 * (y3 - y2);
    let f = r2 * r2 - r3 * r3 - x2 * x2 + x3 * x3 - y2 * y2 + y3 * y3;

    let denom = a * e - b * d;
    if denom.abs() < DEGENERATE_DENOM {
        // Collinear anchors — fall back to the two-circle blend
        return blend(a1, a2);
    }

    ((c * e - f * b) / denom, (a * f - c * d) / denom)
}

/// Average the trilateration result of every 3-combination, weighted by the
/// combination's mean RSSI weight.
fn weighted_multilateration(valid: &[ValidAnchor]) -> (f64, f64) {
    let n = valid.len();
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut total_w = 0.0;
    for i in 0..n {
        for j in (i + 1)..n {
            for k in (j + 1)..n {
                let (px, py) = trilaterate(&valid[i], &valid[j], &valid[k]);
                let w = (valid[i].weight + valid[j].weight + valid[k].weight) / 3.0;
                sum_x += px * w;
                sum_y += py * w;
                total_w += w;
            }
        }
    }
    if total_w > 0.0 {
        (sum_x / total_w, sum_y / total_w)
    } else {
        (0.0, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn solver() -> Solver {
        let cfg = Config::default();
        Solver::new(cfg.anchor_positions.clone(), cfg.rssi)
    }

    fn square_solver() -> Solver {
        let cfg = Config::default();
        let anchors = HashMap::from([
            (0, (0.0, 0.0)),
            (1, (200.0, 0.0)),
            (2, (200.0, 200.0)),
            (3, (0.0, 200.0)),
        ]);
        Solver::new(anchors, cfg.rssi)
    }

    fn dist(a: (f64, f64), b: (f64, f64)) -> f64 {
        (a.0 - b.0).hypot(a.1 - b.1)
    }

    #[test]
    fn rssi_weight_curve() {
        let s = solver();
        // Zero or positive means "unknown": full weight
        assert_eq!(s.rssi_weight(0.0), 1.0);
        assert_eq!(s.rssi_weight(10.0), 1.0);
        // With the configured constants every realistic dBm reading clamps
        // at the floor
        assert_eq!(s.rssi_weight(-60.0), 0.1);
        assert_eq!(s.rssi_weight(-90.0), 0.1);
        assert_eq!(s.rssi_weight(-120.0), 0.1);
    }

    #[test]
    fn four_anchors_recover_exact_position() {
        let s = square_solver();
        let p = (80.0, 50.0);
        let ranges: Vec<f64> = [(0.0, 0.0), (200.0, 0.0), (200.0, 200.0), (0.0, 200.0)]
            .iter()
            .map(|&a| dist(p, a))
            .collect();
        let fix = s.solve(&ranges, &[]).unwrap();
        assert_eq!(fix.quality, Quality::Excellent);
        assert_eq!(fix.anchor_count, 4);
        assert!((fix.x - p.0).abs() < 1e-6);
        assert!((fix.y - p.1).abs() < 1e-6);
    }

    #[test]
    fn three_anchors_solve_good_quality() {
        let s = square_solver();
        let p = (120.0, 90.0);
        let ranges = vec![
            dist(p, (0.0, 0.0)),
            dist(p, (200.0, 0.0)),
            dist(p, (200.0, 200.0)),
            0.0, // no reading
        ];
        let fix = s.solve(&ranges, &[]).unwrap();
        assert_eq!(fix.quality, Quality::Good);
        assert_eq!(fix.anchor_count, 3);
        assert!((fix.x - p.0).abs() < 1e-6);
        assert!((fix.y - p.1).abs() < 1e-6);
    }

    #[test]
    fn two_anchors_blend_at_range_ratio() {
        let s = square_solver();
        // r1 + r2 equals the anchor separation: point on the segment
        let ranges = vec![50.0, 150.0, 0.0, -1.0];
        let fix = s.solve(&ranges, &[]).unwrap();
        assert_eq!(fix.quality, Quality::Fair);
        assert!((fix.x - 50.0).abs() < 1e-9);
        assert!(fix.y.abs() < 1e-9);
    }

    #[test]
    fn two_anchors_blend_is_ratio_even_when_overlapping() {
        let s = square_solver();
        // Overlapping circles still blend linearly at r1/(r1+r2)
        let ranges = vec![100.0, 300.0, 0.0, 0.0];
        let fix = s.solve(&ranges, &[]).unwrap();
        assert!((fix.x - 50.0).abs() < 1e-9);
    }

    #[test]
    fn fewer_than_two_anchors_is_underdetermined() {
        let s = square_solver();
        assert_eq!(
            s.solve(&[120.0, 0.0, 0.0, 0.0], &[]),
            Err(SolveError::Underdetermined { valid: 1 })
        );
        assert_eq!(
            s.solve(&[0.0, 0.0, -5.0, 0.0], &[]),
            Err(SolveError::Underdetermined { valid: 0 })
        );
    }

    #[test]
    fn collinear_triple_falls_back_to_blend() {
        let cfg = Config::default();
        let anchors = HashMap::from([
            (0, (0.0, 0.0)),
            (1, (100.0, 0.0)),
            (2, (200.0, 0.0)),
        ]);
        let s = Solver::new(anchors, cfg.rssi);
        let fix = s.solve(&[40.0, 60.0, 160.0], &[]).unwrap();
        assert_eq!(fix.quality, Quality::Good);
        // Blend over anchors 0 and 1 at ratio 40/100
        assert!((fix.x - 40.0).abs() < 1e-9);
        assert!(fix.y.abs() < 1e-9);
    }

    #[test]
    fn denominator_threshold_is_strict() {
        // denom = 2(x2-x1)·2(y3-y2); ranges differ so the blend fallback and
        // the analytical solution land at different points.
        let a1 = ValidAnchor { range: 1.0, weight: 1.0, x: 0.0, y: 0.0 };
        let a3 = ValidAnchor { range: 1.0, weight: 1.0, x: 0.5e-3, y: 0.5 };

        // denom exactly 1e-3 → analytical path (strict <)
        let a2 = ValidAnchor { range: 2.0, weight: 1.0, x: 0.5e-3, y: 0.0 };
        let blended = blend(&a1, &a2);
        let solved = trilaterate(&a1, &a2, &a3);
        assert!((solved.0 - blended.0).abs() > 1.0);

        // denom just below 1e-3 → degenerate, equals the blend
        let a2_close = ValidAnchor { range: 2.0, weight: 1.0, x: 0.49e-3, y: 0.0 };
        let blended = blend(&a1, &a2_close);
        let solved = trilaterate(&a1, &a2_close, &a3);
        assert!((solved.0 - blended.0).abs() < 1e-12);
        assert!((solved.1 - blended.1).abs() < 1e-12);
    }

    #[test]
    fn weight_ordering_picks_best_three() {
        let s = square_solver();
        let p = (100.0, 100.0);
        // Anchor 3 carries a very poor RSSI; exact ranges keep the answer
        // identical regardless, so just verify a fix comes back good.
        let ranges = vec![
            dist(p, (0.0, 0.0)),
            dist(p, (200.0, 0.0)),
            dist(p, (200.0, 200.0)),
            0.0,
        ];
        let rssi = vec![-60.0, -65.0, -70.0, -120.0];
        let fix = s.solve(&ranges, &rssi).unwrap();
        assert_eq!(fix.quality, Quality::Good);
        assert!((fix.x - 100.0).abs() < 1e-6);
    }
}
