//! Work functions evaluated once per fold.
//!
//! Anything that maps a config to a scalar score can stand in for a training
//! job. It must not open or close tracking sessions itself.

use crate::config::GeneratorConfig;
use crate::tracking::ConfigMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;

/// A black-box `(config) -> score` evaluation.
pub trait WorkFunction {
    fn evaluate(&mut self, config: &ConfigMap) -> anyhow::Result<f64>;
}

impl<F> WorkFunction for F
where
    F: FnMut(&ConfigMap) -> anyhow::Result<f64>,
{
    fn evaluate(&mut self, config: &ConfigMap) -> anyhow::Result<f64> {
        self(config)
    }
}

/// Stand-in result source: draws from `Normal(mu, sigma)`.
#[derive(Debug, Clone)]
pub struct NormalResultGenerator {
    mu: f64,
    sigma: f64,
    rng: StdRng,
}

impl NormalResultGenerator {
    pub fn new(mu: f64, sigma: f64, seed: u64) -> Self {
        Self {
            mu,
            sigma,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_config(config: &GeneratorConfig) -> Self {
        Self::new(config.mu, config.sigma, config.seed)
    }

    pub fn mu(&self) -> f64 {
        self.mu
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Box-Muller transform over two uniform draws.
    pub fn sample(&mut self) -> f64 {
        let u1: f64 = self.rng.r#gen::<f64>().max(f64::MIN_POSITIVE); // avoid ln(0)
        let u2: f64 = self.rng.r#gen();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        self.mu + self.sigma * z
    }
}

impl fmt::Display for NormalResultGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Normal(mu={}, sigma={})", self.mu, self.sigma)
    }
}

impl WorkFunction for NormalResultGenerator {
    fn evaluate(&mut self, _config: &ConfigMap) -> anyhow::Result<f64> {
        Ok(self.sample())
    }
}
