//! car_sim.rs — kinematics for simulated cars
//!
//! Each car follows the oval's centerline at a commanded speed with a little
//! lateral wander, enough to exercise the backend's smoothing, lap and
//! collision paths without hardware on the bench.

use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Default anchor frame, matching the backend configuration (cm).
pub const ANCHORS: [(f64, f64); 4] = [(0.0, 0.0), (430.0, 0.0), (430.0, 470.0), (0.0, 470.0)];

/// Oval centerline parameters, matching the backend's generated track.
const CENTER: (f64, f64) = (215.0, 235.0);
const RADIUS: (f64, f64) = (145.0, 165.0);

#[derive(Debug)]
pub struct Car {
    pub id: i64,
    /// Parametric angle along the centerline.
    theta: f64,
    /// Lateral offset from the centerline, cm.
    offset: f64,
}

#[derive(Debug)]
pub struct CarSim {
    cars: Vec<Car>,
    /// Commanded speed along the track, cm/s.
    speed_cms: f64,
}

impl CarSim {
    pub fn new(car_count: usize, speed_cms: f64) -> Self {
        let cars = (0..car_count)
            .map(|i| Car {
                id: i as i64,
                // Spread the field around the track
                theta: 2.0 * std::f64::consts::PI * i as f64 / car_count.max(1) as f64,
                offset: 0.0,
            })
            .collect();
        Self { cars, speed_cms }
    }

    /// Advance every car by `dt` seconds.
    pub fn step(&mut self, dt: f64, rng: &mut StdRng) {
        let mean_radius = (RADIUS.0 + RADIUS.1) / 2.0;
        let omega = self.speed_cms / mean_radius;
        for car in &mut self.cars {
            car.theta = (car.theta + omega * dt) % (2.0 * std::f64::consts::PI);
            // Lateral wander, kept within the lane
            car.offset = (car.offset + rng.gen_range(-1.0..1.0)).clamp(-10.0, 10.0);
        }
    }

    /// True position of one car, cm.
    pub fn position(&self, car: &Car) -> (f64, f64) {
        let x = CENTER.0 + (RADIUS.0 + car.offset) * car.theta.cos();
        let y = CENTER.1 + (RADIUS.1 + car.offset) * car.theta.sin();
        (x, y)
    }

    pub fn cars(&self) -> &[Car] {
        &self.cars
    }

    /// Noisy ranges and synthesized RSSI to every anchor. A dropped reading
    /// is emitted as 0 (the backend treats non-positive as "no reading").
    pub fn measure(
        &self,
        car: &Car,
        noise_cm: f64,
        drop_probability: f64,
        rng: &mut StdRng,
    ) -> (Vec<f64>, Vec<f64>) {
        let (x, y) = self.position(car);
        let noise = Normal::new(0.0, noise_cm.max(1e-9)).ok();
        let mut ranges = Vec::with_capacity(ANCHORS.len());
        let mut rssi = Vec::with_capacity(ANCHORS.len());
        for &(ax, ay) in ANCHORS.iter() {
            let true_range = (x - ax).hypot(y - ay);
            if rng.gen_bool(drop_probability.clamp(0.0, 1.0)) {
                ranges.push(0.0);
                rssi.push(0.0);
                continue;
            }
            let jitter = noise.map(|n| n.sample(rng)).unwrap_or(0.0);
            ranges.push((true_range + jitter).max(1.0).round());
            // Signal fades roughly with distance: -60 dBm close, -90 far
            let fade = (true_range / 650.0).clamp(0.0, 1.0);
            rssi.push((-60.0 - 30.0 * fade + rng.gen_range(-2.0..2.0)).round());
        }
        (ranges, rssi)
    }
}
