//! Randomness seam for field fluctuation

use rand::Rng;

/// Source of noise samples in [-1, 1].
pub trait NoiseSource: Send + Sync {
    fn sample(&self) -> f64;
}

/// Uniform noise from the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomNoise;

impl NoiseSource for RandomNoise {
    fn sample(&self) -> f64 {
        rand::thread_rng().gen_range(-1.0..=1.0)
    }
}

/// Always zero. Makes fluctuation a pure function of time.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoNoise;

impl NoiseSource for NoNoise {
    fn sample(&self) -> f64 {
        0.0
    }
}
