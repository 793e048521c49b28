//! Incremental mean/variance models.
//!
//! Both models update in O(1) time and space per sample; nothing here ever
//! revisits past observations.

/// A running estimate of a metric's mean and variance.
pub trait Estimator: Send + Sync + std::fmt::Debug {
    fn update(&mut self, value: f64);
    fn mean(&self) -> f64;
    fn variance(&self) -> f64;
    fn count(&self) -> u64;
    fn reset(&mut self);

    fn is_finite(&self) -> bool {
        self.mean().is_finite() && self.variance().is_finite()
    }
}

/// Welford's online algorithm. Reports the population variance.
#[derive(Debug, Clone, Default)]
pub struct Welford {
    count: u64,
    mean: f64,
    m2: f64,
}

impl Welford {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Estimator for Welford {
    fn update(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    fn mean(&self) -> f64 {
        self.mean
    }

    fn variance(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        // Rounding can leave m2 a hair below zero on constant input.
        (self.m2 / self.count as f64).max(0.0)
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Exponentially weighted moving mean and variance with decay `alpha`.
#[derive(Debug, Clone)]
pub struct Ewma {
    alpha: f64,
    count: u64,
    mean: f64,
    variance: f64,
}

impl Ewma {
    /// `alpha` must lie in (0, 1]; configuration validation enforces this.
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            count: 0,
            mean: 0.0,
            variance: 0.0,
        }
    }
}

impl Estimator for Ewma {
    fn update(&mut self, value: f64) {
        self.count += 1;
        if self.count == 1 {
            self.mean = value;
            self.variance = 0.0;
            return;
        }
        let diff = value - self.mean;
        let incr = self.alpha * diff;
        self.mean += incr;
        self.variance = (1.0 - self.alpha) * (self.variance + diff * incr);
    }

    fn mean(&self) -> f64 {
        self.mean
    }

    fn variance(&self) -> f64 {
        self.variance
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn reset(&mut self) {
        self.count = 0;
        self.mean = 0.0;
        self.variance = 0.0;
    }
}
