//! Standard errors and correlations from the residual Jacobian.
//!
//! `cov = (JᵀJ)⁻¹ · χ²_red`, with `J` taken in external (bounded) parameter
//! space at the solution. Only the least-squares methods report it; the
//! others mark every standard error as unsupported.

use nalgebra::DVector;

use crate::domain::{Correlation, FitMethod, StdErr};
use crate::fit::problem::FitProblem;
use crate::math::{pseudo_inverse, rank};

/// Correlations with a smaller magnitude are not listed.
pub const MIN_CORRELATION: f64 = 0.1;

const RCOND: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct CovarianceEstimate {
    pub stderrs: Vec<StdErr>,
    pub correlations: Vec<Correlation>,
}

impl CovarianceEstimate {
    fn uniform(n: usize, stderr: StdErr) -> Self {
        Self {
            stderrs: vec![stderr; n],
            correlations: Vec::new(),
        }
    }
}

pub fn estimate(
    problem: &FitProblem<'_>,
    method: FitMethod,
    ext: &DVector<f64>,
    reduced_chi_square: f64,
) -> CovarianceEstimate {
    let n = ext.len();
    if !method.estimates_covariance() {
        return CovarianceEstimate::uniform(n, StdErr::Unsupported);
    }
    if problem.n_data() <= n {
        return CovarianceEstimate::uniform(n, StdErr::Failed("no degrees of freedom left".to_string()));
    }

    let jac = problem.jacobian_external(ext);
    if jac.iter().any(|v| !v.is_finite()) {
        return CovarianceEstimate::uniform(n, StdErr::Failed("Jacobian is not finite".to_string()));
    }
    let jtj = jac.transpose() * &jac;
    let r = rank(&jtj, RCOND);
    if r < n {
        log::warn!("covariance not computed: JᵀJ has rank {r} < {n}");
        return CovarianceEstimate::uniform(n, StdErr::Failed(format!("singular Jacobian (rank {r} of {n})")));
    }
    let Some(inverse) = pseudo_inverse(&jtj, RCOND) else {
        return CovarianceEstimate::uniform(n, StdErr::Failed("JᵀJ could not be inverted".to_string()));
    };
    let cov = inverse * reduced_chi_square;

    let stderrs: Vec<StdErr> = (0..n)
        .map(|k| {
            let var = cov[(k, k)];
            if var.is_finite() && var >= 0.0 {
                StdErr::Estimated(var.sqrt())
            } else {
                StdErr::Failed(format!("negative variance {var:e}"))
            }
        })
        .collect();

    let names: Vec<&str> = problem.layout().specs().iter().map(|s| s.name.as_str()).collect();
    let mut correlations = Vec::new();
    for a in 0..n {
        for b in (a + 1)..n {
            let (Some(sa), Some(sb)) = (stderrs[a].value(), stderrs[b].value()) else {
                continue;
            };
            if sa == 0.0 || sb == 0.0 {
                continue;
            }
            let value = cov[(a, b)] / (sa * sb);
            if value.abs() > MIN_CORRELATION {
                correlations.push(Correlation {
                    first: names[a].to_string(),
                    second: names[b].to_string(),
                    value,
                });
            }
        }
    }
    correlations.sort_by(|x, y| y.value.abs().total_cmp(&x.value.abs()));

    CovarianceEstimate {
        stderrs,
        correlations,
    }
}
