//! Evenly spaced axes.

use crate::error::{Result, SvdgfError};

/// Generate `steps` log-spaced points between `min` and `max` (inclusive).
pub fn log_space(min: f64, max: f64, steps: usize) -> Result<Vec<f64>> {
    if !(min.is_finite() && max.is_finite() && min > 0.0 && max > 0.0 && max > min) {
        return Err(SvdgfError::Data(format!(
            "invalid log range: min={min}, max={max} (must be finite, >0, and max>min)"
        )));
    }
    if steps < 2 {
        return Err(SvdgfError::Data("log range needs at least 2 steps".to_string()));
    }

    let ln_min = min.ln();
    let ln_max = max.ln();
    let step = (ln_max - ln_min) / (steps as f64 - 1.0);

    Ok((0..steps).map(|i| (ln_min + step * i as f64).exp()).collect())
}

/// Generate `steps` linearly spaced points between `min` and `max` (inclusive).
pub fn linspace(min: f64, max: f64, steps: usize) -> Vec<f64> {
    match steps {
        0 => Vec::new(),
        1 => vec![min],
        _ => {
            let step = (max - min) / (steps as f64 - 1.0);
            (0..steps).map(|i| min + step * i as f64).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_space_includes_endpoints() {
        let v = log_space(0.1, 10.0, 5).unwrap();
        assert!((v[0] - 0.1).abs() < 1e-12);
        assert!((v[v.len() - 1] - 10.0).abs() < 1e-12);
    }

    #[test]
    fn log_space_rejects_non_positive_range() {
        assert!(log_space(0.0, 10.0, 5).is_err());
        assert!(log_space(1.0, 10.0, 1).is_err());
    }

    #[test]
    fn linspace_is_inclusive() {
        assert_eq!(linspace(0.0, 1.0, 3), vec![0.0, 0.5, 1.0]);
    }
}
