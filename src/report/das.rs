//! Decay-associated spectra and the reconstructions built from them.

use nalgebra::DMatrix;

use crate::domain::{DataMatrix, Das, FitResult, StdErr};
use crate::error::{Result, SvdgfError};
use crate::math::RetainedComponents;

/// Combine fitted amplitudes with the retained left singular vectors.
///
/// The fit targets already carry `σ_i`, so `DAS = U_retained · A`. Column `j`
/// belongs to component `retained.selection.indices()[j]`.
pub fn build_das(result: &FitResult, retained: &RetainedComponents, wavelengths: &[f64]) -> Result<Das> {
    if result.components != retained.selection {
        return Err(SvdgfError::InvalidSelection(format!(
            "fit used components {} but the decomposition retained {}",
            result.components, retained.selection
        )));
    }
    let n = retained.selection.len();
    if retained.left.nrows() != wavelengths.len() {
        return Err(SvdgfError::Data(format!(
            "left singular vectors have {} rows but there are {} wavelengths",
            retained.left.nrows(),
            wavelengths.len()
        )));
    }
    if result.amplitudes.shape() != (n, n) || retained.singular_values.len() != n {
        return Err(SvdgfError::Data(format!(
            "amplitude matrix is {}x{} for {n} retained components",
            result.amplitudes.nrows(),
            result.amplitudes.ncols()
        )));
    }

    let spectra = &retained.left * &result.amplitudes;
    let stderrs = retained
        .selection
        .iter()
        .map(|c| {
            result
                .params
                .tau(c)
                .map(|p| p.stderr.clone())
                .unwrap_or(StdErr::Unsupported)
        })
        .collect();

    Ok(Das {
        wavelengths: wavelengths.to_vec(),
        components: retained.selection.indices().to_vec(),
        spectra,
        decay_constants: result.decay_constants.clone(),
        stderrs,
    })
}

/// Data, both reconstructions and their differences (rows = wavelengths).
#[derive(Debug, Clone)]
pub struct Reconstructions {
    /// Rank-reduced SVD reconstruction over the retained components.
    pub svd: DMatrix<f64>,
    /// `DAS · basisᵀ`.
    pub svdgf: DMatrix<f64>,
    pub svd_difference: DMatrix<f64>,
    pub svdgf_difference: DMatrix<f64>,
}

impl Reconstructions {
    pub fn build(data: &DataMatrix, retained: &RetainedComponents, das: &Das, result: &FitResult) -> Result<Self> {
        let svd = retained.reconstruct();
        let svdgf = &das.spectra * result.basis.transpose();
        if svd.shape() != data.values().shape() || svdgf.shape() != data.values().shape() {
            return Err(SvdgfError::Data(format!(
                "reconstruction is {}x{} but the data matrix is {}x{}",
                svdgf.nrows(),
                svdgf.ncols(),
                data.n_wavelengths(),
                data.n_time_delays()
            )));
        }
        Ok(Self {
            svd_difference: data.values() - &svd,
            svdgf_difference: data.values() - &svdgf,
            svd,
            svdgf,
        })
    }

    /// Root-mean-square of a difference matrix.
    pub fn rms(diff: &DMatrix<f64>) -> f64 {
        if diff.is_empty() {
            return 0.0;
        }
        (diff.norm_squared() / diff.len() as f64).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InitialFitParameters;
    use crate::domain::{ComponentSelection, FitMethod};
    use crate::fit::GlobalFitEngine;
    use crate::math::decompose;
    use std::collections::BTreeMap;

    fn two_component_data() -> DataMatrix {
        let t: Vec<f64> = (0..30).map(|i| i as f64 * 1.5).collect();
        let w: Vec<f64> = (0..8).map(|i| 500.0 + 10.0 * i as f64).collect();
        let values = DMatrix::from_fn(w.len(), t.len(), |r, c| {
            let x = r as f64 / 7.0;
            (1.0 - x) * (-t[c] / 4.0).exp() + 0.5 * x * (-t[c] / 25.0).exp()
        });
        DataMatrix::new(values, w, t).unwrap()
    }

    #[test]
    fn das_reproduces_the_data_of_a_two_component_fit() {
        let data = two_component_data();
        let sel = ComponentSelection::new([0, 1]).unwrap();
        let retained = decompose(&data).unwrap().select(&sel).unwrap();
        let initial = InitialFitParameters::from_lists(BTreeMap::from([
            ("time_constants".to_string(), vec![5.0, 20.0]),
            ("amps_rSV0".to_string(), vec![0.5, 0.5]),
            ("amps_rSV1".to_string(), vec![0.1, -0.1]),
        ]))
        .unwrap();
        let result = GlobalFitEngine::default()
            .fit(&retained, data.time_delays(), &initial, FitMethod::Leastsq, None)
            .unwrap();

        let das = build_das(&result, &retained, data.wavelengths()).unwrap();
        assert_eq!(das.spectra.shape(), (8, 2));
        assert_eq!(das.components, vec![0, 1]);

        let rec = Reconstructions::build(&data, &retained, &das, &result).unwrap();
        assert!(Reconstructions::rms(&rec.svd_difference) < 1e-10);
        assert!(Reconstructions::rms(&rec.svdgf_difference) < 1e-4);
    }

    #[test]
    fn das_rejects_a_different_selection() {
        let data = two_component_data();
        let svd = decompose(&data).unwrap();
        let one = svd.select(&ComponentSelection::new([0]).unwrap()).unwrap();
        let result = GlobalFitEngine::default()
            .fit(&one, data.time_delays(), &InitialFitParameters::default(), FitMethod::Leastsq, None)
            .unwrap();
        let other = svd.select(&ComponentSelection::new([1]).unwrap()).unwrap();
        assert!(matches!(
            build_das(&result, &other, data.wavelengths()),
            Err(SvdgfError::InvalidSelection(_))
        ));
    }
}
