//! Background fits.
//!
//! A `FitJob` owns a snapshot of everything the fit reads, runs on the rayon
//! pool and sends exactly one result back over a channel. The caller polls
//! the `FitHandle` (or blocks on it) and only then touches the result.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use crate::config::InitialFitParameters;
use crate::domain::{FitMethod, FitOptions, FitResult};
use crate::error::{Result, SvdgfError};
use crate::fit::engine::GlobalFitEngine;
use crate::math::RetainedComponents;
use crate::models::TargetModel;

/// Inputs of one fit, copied at submission time.
#[derive(Debug, Clone)]
pub struct FitJob {
    pub retained: RetainedComponents,
    pub time_delays: Vec<f64>,
    pub initial: InitialFitParameters,
    pub method: FitMethod,
    pub target: Option<TargetModel>,
    pub options: FitOptions,
}

impl FitJob {
    pub fn run(&self) -> Result<FitResult> {
        GlobalFitEngine::new(self.options.clone()).fit(
            &self.retained,
            &self.time_delays,
            &self.initial,
            self.method,
            self.target.as_ref(),
        )
    }

    /// Start the fit on the rayon pool.
    pub fn spawn(self) -> FitHandle {
        let (tx, rx) = mpsc::channel();
        let method = self.method;
        let n_params = self.retained.selection.len() * (self.retained.selection.len() + 1);
        rayon::spawn(move || {
            // The receiver may be gone if the caller gave up; nothing to do then.
            let _ = tx.send(self.run());
        });
        FitHandle {
            rx,
            started: Instant::now(),
            method,
            n_params,
        }
    }
}

/// State of a submitted fit.
#[derive(Debug)]
pub enum FitStatus {
    Running,
    Finished(Result<FitResult>),
}

/// Receiving end of a submitted fit.
pub struct FitHandle {
    rx: Receiver<Result<FitResult>>,
    started: Instant,
    method: FitMethod,
    n_params: usize,
}

impl FitHandle {
    /// Wait up to `timeout` for the result.
    pub fn wait_timeout(&self, timeout: Duration) -> FitStatus {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => FitStatus::Finished(result),
            Err(RecvTimeoutError::Timeout) => FitStatus::Running,
            Err(RecvTimeoutError::Disconnected) => FitStatus::Finished(Err(self.worker_lost())),
        }
    }

    /// Block until the fit finishes.
    pub fn wait(self) -> Result<FitResult> {
        self.rx.recv().unwrap_or_else(|_| Err(self.worker_lost()))
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn worker_lost(&self) -> SvdgfError {
        SvdgfError::fit(self.method, self.n_params, "fit worker stopped without reporting a result")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ComponentSelection, DataMatrix};
    use crate::math::decompose;
    use nalgebra::DMatrix;

    fn job(tau: f64) -> FitJob {
        let t: Vec<f64> = (0..10).map(|i| i as f64 * 3.0).collect();
        let values = DMatrix::from_fn(4, t.len(), |r, c| (r as f64 + 1.0) * (-t[c] / tau).exp());
        let m = DataMatrix::new(values, vec![1.0, 2.0, 3.0, 4.0], t.clone()).unwrap();
        let retained = decompose(&m)
            .unwrap()
            .select(&ComponentSelection::new([0]).unwrap())
            .unwrap();
        FitJob {
            retained,
            time_delays: t,
            initial: InitialFitParameters::default(),
            method: FitMethod::Leastsq,
            target: None,
            options: FitOptions::default(),
        }
    }

    #[test]
    fn fit_reports_progress_until_it_finishes() {
        let handle = job(12.0).spawn();
        let result = loop {
            match handle.wait_timeout(Duration::from_millis(20)) {
                FitStatus::Running => continue,
                FitStatus::Finished(r) => break r,
            }
        };
        let fit = result.unwrap();
        assert!((fit.decay_constants[0] - 12.0).abs() < 1e-4);
    }

    #[test]
    fn independent_jobs_do_not_interfere() {
        let a = job(5.0).spawn();
        let b = job(20.0).spawn();
        let (ra, rb) = (a.wait().unwrap(), b.wait().unwrap());
        assert!((ra.decay_constants[0] - 5.0).abs() < 1e-4);
        assert!((rb.decay_constants[0] - 20.0).abs() < 1e-4);
    }
}
