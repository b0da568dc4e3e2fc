//! Exponential decay basis used by the generic kinetic model.
//!
//! `decay(t, τ) = exp(-t/τ)`
//!
//! Numerical notes:
//! - A decay constant of exactly zero would give `0/0` at `t = 0`, so `τ` is
//!   clamped to a tiny positive value. The limit is then a step at `t = 0`.
//! - Negative delays (pre-time-zero points) are allowed and grow beyond 1.

/// Smallest decay constant used in evaluation.
const TAU_EPS: f64 = 1e-12;

/// Compute `exp(-t/τ)`.
pub fn decay(t: f64, tau: f64) -> f64 {
    let tau = if tau.abs() < TAU_EPS { TAU_EPS.copysign(tau) } else { tau };
    (-t / tau).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decay_is_one_at_time_zero() {
        for &tau in &[0.1, 1.0, 50.0] {
            assert!((decay(0.0, tau) - 1.0).abs() < 1e-15);
        }
        assert_eq!(decay(0.0, 0.0), 1.0);
    }

    #[test]
    fn decay_reaches_one_over_e_at_tau() {
        let v = decay(10.0, 10.0);
        assert!((v - (-1.0f64).exp()).abs() < 1e-12, "got {v}");
    }
}
