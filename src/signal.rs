// Derived signal values consumed by the training exercises
//
// The exercises only read these; their game rules live elsewhere.

use crate::config::clamp_or_default;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SCALE_BASE: f64 = 400.0;
pub const DEFAULT_SCALE_MAX: f64 = 800.0;
pub const DEFAULT_EMA_ALPHA: f64 = 0.15;
pub const DEFAULT_GRIP_THRESHOLD: f64 = 600.0;

/// Linear mapping from raw sensor units onto a 0..=100 level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SignalScale {
    pub base: f64,
    pub max: f64,
}

impl Default for SignalScale {
    fn default() -> Self {
        Self {
            base: DEFAULT_SCALE_BASE,
            max: DEFAULT_SCALE_MAX,
        }
    }
}

impl SignalScale {
    pub fn new(base: f64, max: f64) -> Self {
        Self { base, max }
    }

    pub fn rescale(&self, value: f64) -> f64 {
        let range = self.max - self.base;
        if range <= 0.0 {
            return if value >= self.max { 100.0 } else { 0.0 };
        }
        (((value - self.base) / range) * 100.0).clamp(0.0, 100.0)
    }
}

/// Exponential moving average of the rescaled level:
/// `level = level * (1 - alpha) + raw * alpha`.
///
/// Carried as state; it cannot be rebuilt from the rolling window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmaLevel {
    alpha: f64,
    level: f64,
}

impl EmaLevel {
    /// `alpha` is clamped to `[0.01, 1.0]`
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: clamp_or_default("ema alpha", alpha, 0.01, 1.0, DEFAULT_EMA_ALPHA),
            level: 0.0,
        }
    }

    pub fn update(&mut self, raw: f64) -> f64 {
        self.level = self.level * (1.0 - self.alpha) + raw * self.alpha;
        self.level
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}

impl Default for EmaLevel {
    fn default() -> Self {
        Self::new(DEFAULT_EMA_ALPHA)
    }
}

/// Grip detection against a raw-value threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GripDetector {
    pub threshold: f64,
}

impl GripDetector {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn is_gripping(&self, value: f64) -> bool {
        value > self.threshold
    }
}

impl Default for GripDetector {
    fn default() -> Self {
        Self::new(DEFAULT_GRIP_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rescale_clamps() {
        let scale = SignalScale::default();
        assert_eq!(scale.rescale(300.0), 0.0);
        assert_eq!(scale.rescale(400.0), 0.0);
        assert_eq!(scale.rescale(600.0), 50.0);
        assert_eq!(scale.rescale(800.0), 100.0);
        assert_eq!(scale.rescale(1200.0), 100.0);
    }

    #[test]
    fn test_degenerate_scale() {
        let scale = SignalScale::new(500.0, 500.0);
        assert_eq!(scale.rescale(499.0), 0.0);
        assert_eq!(scale.rescale(500.0), 100.0);
    }

    #[test]
    fn test_ema_converges() {
        let mut ema = EmaLevel::new(0.15);
        assert_relative_eq!(ema.update(100.0), 15.0, epsilon = 1e-9);
        assert_relative_eq!(ema.update(100.0), 27.75, epsilon = 1e-9);
        for _ in 0..200 {
            ema.update(100.0);
        }
        assert_relative_eq!(ema.level(), 100.0, epsilon = 1e-6);
    }

    #[test]
    fn test_ema_alpha_clamped() {
        assert_eq!(EmaLevel::new(0.0).alpha(), 0.01);
        assert_eq!(EmaLevel::new(3.0).alpha(), 1.0);

        let mut ema = EmaLevel::new(f64::NAN);
        assert_eq!(ema.alpha(), DEFAULT_EMA_ALPHA);
        assert!(ema.update(50.0).is_finite());
    }

    #[test]
    fn test_grip_threshold() {
        let grip = GripDetector::default();
        assert!(!grip.is_gripping(600.0));
        assert!(grip.is_gripping(600.5));
    }
}
