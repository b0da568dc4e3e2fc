//! Synthetic transient-absorption matrices.
//!
//! Each component contributes a Gaussian band in wavelength that decays
//! exponentially in time: `A(λ, t) = Σ_c a_c · g_c(λ) · exp(-t / τ_c) + noise`.
//! The time axis starts at zero and is log-spaced after that.

use nalgebra::DMatrix;
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::DataMatrix;
use crate::error::{Result, SvdgfError};
use crate::math::{linspace, log_space};

/// One decaying spectral band.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticComponent {
    pub tau: f64,
    pub center: f64,
    pub width: f64,
    pub amplitude: f64,
}

#[derive(Debug, Clone)]
pub struct SyntheticSpec {
    pub wavelength_min: f64,
    pub wavelength_max: f64,
    pub n_wavelengths: usize,
    /// First non-zero time delay.
    pub t_first: f64,
    pub t_max: f64,
    pub n_time_delays: usize,
    pub components: Vec<SyntheticComponent>,
    /// Standard deviation of additive Gaussian noise (0 = noiseless).
    pub noise: f64,
    pub seed: u64,
}

impl Default for SyntheticSpec {
    fn default() -> Self {
        Self {
            wavelength_min: 450.0,
            wavelength_max: 700.0,
            n_wavelengths: 51,
            t_first: 0.1,
            t_max: 500.0,
            n_time_delays: 60,
            components: SyntheticSpec::bands_for(&[2.0, 40.0], 450.0, 700.0),
            noise: 0.0,
            seed: 42,
        }
    }
}

impl SyntheticSpec {
    /// Evenly spread bands across `[wl_min, wl_max]`, one per decay constant,
    /// with alternating sign and shrinking amplitude.
    pub fn bands_for(taus: &[f64], wl_min: f64, wl_max: f64) -> Vec<SyntheticComponent> {
        let n = taus.len().max(1) as f64;
        let span = wl_max - wl_min;
        taus.iter()
            .enumerate()
            .map(|(j, &tau)| SyntheticComponent {
                tau,
                center: wl_min + span * (j as f64 + 0.5) / n,
                width: span / (2.0 * n),
                amplitude: (if j % 2 == 0 { 1.0 } else { -1.0 }) / (j as f64 + 1.0),
            })
            .collect()
    }

    fn validate(&self) -> Result<()> {
        if self.components.is_empty() {
            return Err(SvdgfError::Data("synthetic data needs at least one component".to_string()));
        }
        if let Some(c) = self
            .components
            .iter()
            .find(|c| !(c.tau.is_finite() && c.tau > 0.0 && c.width.is_finite() && c.width > 0.0))
        {
            return Err(SvdgfError::Data(format!(
                "invalid synthetic component: tau={} width={} (both must be > 0)",
                c.tau, c.width
            )));
        }
        if self.n_wavelengths < 2 || self.n_time_delays < 3 {
            return Err(SvdgfError::Data(
                "synthetic data needs at least 2 wavelengths and 3 time delays".to_string(),
            ));
        }
        if !(self.wavelength_max > self.wavelength_min) {
            return Err(SvdgfError::Data("wavelength range must be increasing".to_string()));
        }
        if !(self.noise.is_finite() && self.noise >= 0.0) {
            return Err(SvdgfError::Data(format!("noise must be >= 0, got {}", self.noise)));
        }
        Ok(())
    }
}

/// Generate the matrix described by `spec`.
pub fn generate(spec: &SyntheticSpec) -> Result<DataMatrix> {
    spec.validate()?;

    let wavelengths = linspace(spec.wavelength_min, spec.wavelength_max, spec.n_wavelengths);
    let mut time_delays = vec![0.0];
    time_delays.extend(log_space(spec.t_first, spec.t_max, spec.n_time_delays - 1)?);

    let mut values = DMatrix::from_fn(wavelengths.len(), time_delays.len(), |r, c| {
        spec.components
            .iter()
            .map(|comp| {
                let z = (wavelengths[r] - comp.center) / comp.width;
                comp.amplitude * (-0.5 * z * z).exp() * (-time_delays[c] / comp.tau).exp()
            })
            .sum()
    });

    if spec.noise > 0.0 {
        let mut rng = StdRng::seed_from_u64(spec.seed);
        let normal = Normal::new(0.0, spec.noise)
            .map_err(|e| SvdgfError::Data(format!("noise distribution error: {e}")))?;
        for v in values.iter_mut() {
            *v += normal.sample(&mut rng);
        }
    }

    log::debug!(
        "generated {}x{} synthetic matrix with {} components (noise {})",
        wavelengths.len(),
        time_delays.len(),
        spec.components.len(),
        spec.noise
    );
    DataMatrix::new(values, wavelengths, time_delays)
}
