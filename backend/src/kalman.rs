//! # kalman
//!
//! Per-tag constant-velocity 2-D smoother with a scalar gain. The velocity
//! estimate is derived from the corrected-to-corrected position delta, so
//! the reported speed follows the filtered track rather than raw jitter.

/// Simple 2-D Kalman filter for position smoothing.
#[derive(Debug, Clone)]
pub struct KalmanFilter {
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    initialized: bool,
    /// Process noise — how much the model is trusted.
    q: f64,
    /// Measurement noise — how much measurements are trusted.
    r: f64,
}

impl KalmanFilter {
    pub fn new(process_noise: f64, measurement_noise: f64) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            vx: 0.0,
            vy: 0.0,
            initialized: false,
            q: process_noise,
            r: measurement_noise,
        }
    }

    /// Feed one measurement; returns the filtered position.
    /// `dt` must already be clamped by the caller.
    pub fn update(&mut self, mx: f64, my: f64, dt: f64) -> (f64, f64) {
        if !self.initialized {
            self.x = mx;
            self.y = my;
            self.initialized = true;
            return (mx, my);
        }

        let (prev_x, prev_y) = (self.x, self.y);

        // Predict
        self.x += self.vx * dt;
        self.y += self.vy * dt;

        // Correct
        let k = self.r / (self.r + self.q);
        self.x += k * (mx - self.x);
        self.y += k * (my - self.y);

        if dt > 0.0 {
            self.vx = (self.x - prev_x) / dt;
            self.vy = (self.y - prev_y) / dt;
        }

        (self.x, self.y)
    }

    /// Speed magnitude, cm/s.
    pub fn speed(&self) -> f64 {
        self.vx.hypot(self.vy)
    }

    pub fn reset(&mut self) {
        self.x = 0.0;
        self.y = 0.0;
        self.vx = 0.0;
        self.vy = 0.0;
        self.initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_update_passes_measurement_through() {
        let mut kf = KalmanFilter::new(0.1, 5.0);
        let (x, y) = kf.update(40.0, 60.0, 0.033);
        assert_eq!((x, y), (40.0, 60.0));
        assert_eq!(kf.speed(), 0.0);
    }

    #[test]
    fn converges_to_stationary_measurement() {
        let mut kf = KalmanFilter::new(0.1, 5.0);
        kf.update(0.0, 0.0, 0.033);
        for _ in 0..50 {
            kf.update(100.0, 0.0, 0.1);
        }
        assert!((kf.x - 100.0).abs() < 1.0);
        // Velocity decays once the measurement stops moving
        assert!(kf.speed() < 5.0);
    }

    #[test]
    fn velocity_follows_filtered_delta() {
        let mut kf = KalmanFilter::new(0.1, 5.0);
        kf.update(0.0, 0.0, 0.033);
        let before = (kf.x, kf.y);
        let (x, y) = kf.update(10.0, 0.0, 0.5);
        let expect_vx = (x - before.0) / 0.5;
        let expect_vy = (y - before.1) / 0.5;
        assert!((kf.vx - expect_vx).abs() < 1e-9);
        assert!((kf.vy - expect_vy).abs() < 1e-9);
    }

    #[test]
    fn reset_returns_to_uninitialized() {
        let mut kf = KalmanFilter::new(0.1, 5.0);
        kf.update(10.0, 10.0, 0.033);
        kf.update(20.0, 10.0, 0.1);
        kf.reset();
        let (x, y) = kf.update(5.0, 5.0, 0.033);
        assert_eq!((x, y), (5.0, 5.0));
    }
}
