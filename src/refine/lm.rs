//! Levenberg-Marquardt least-squares solver for PSF models.
//!
//! The solver is generic over the parameter count so the 6-parameter
//! elliptical fit and the 5-parameter symmetric and axial fits share one
//! implementation. All arithmetic is `f64`.

use crate::refine::linalg::{invert, solve};
use crate::util::{SmolPhotError, SmolPhotResult};

/// Configuration for Levenberg-Marquardt optimization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LmConfig {
    /// Maximum number of solver iterations.
    pub max_iterations: usize,
    /// Convergence threshold on the largest parameter step.
    pub convergence_threshold: f64,
    /// Initial damping parameter.
    pub initial_lambda: f64,
    /// Factor applied to lambda after a rejected step.
    pub lambda_up: f64,
    /// Factor applied to lambda after an accepted step.
    pub lambda_down: f64,
    /// Damping above which the solver gives up.
    pub max_lambda: f64,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            convergence_threshold: 1e-8,
            initial_lambda: 1e-3,
            lambda_up: 10.0,
            lambda_down: 0.1,
            max_lambda: 1e10,
        }
    }
}

impl LmConfig {
    /// Validates the configuration values.
    pub fn validate(&self) -> SmolPhotResult<()> {
        if self.max_iterations == 0 {
            return Err(SmolPhotError::InvalidConfig {
                reason: "solver max_iterations must be at least 1",
            });
        }
        if !(self.convergence_threshold > 0.0) {
            return Err(SmolPhotError::InvalidConfig {
                reason: "solver convergence_threshold must be positive",
            });
        }
        if !(self.initial_lambda > 0.0) {
            return Err(SmolPhotError::InvalidConfig {
                reason: "solver initial_lambda must be positive",
            });
        }
        if !(self.lambda_up > 1.0) || !(self.lambda_down > 0.0 && self.lambda_down < 1.0) {
            return Err(SmolPhotError::InvalidConfig {
                reason: "solver lambda factors must satisfy lambda_up > 1 and 0 < lambda_down < 1",
            });
        }
        if !(self.max_lambda > self.initial_lambda) {
            return Err(SmolPhotError::InvalidConfig {
                reason: "solver max_lambda must exceed initial_lambda",
            });
        }
        Ok(())
    }
}

/// Result of an optimization run.
#[derive(Debug, Clone, Copy)]
pub struct LmResult<const N: usize> {
    pub params: [f64; N],
    pub chi2: f64,
    pub converged: bool,
    pub iterations: usize,
}

/// A model that can be fit with Levenberg-Marquardt.
pub trait LmModel<const N: usize> {
    /// Evaluates the model at a sample position.
    fn evaluate(&self, x: f64, y: f64, params: &[f64; N]) -> f64;

    /// Partial derivatives of the model with respect to each parameter.
    fn jacobian_row(&self, x: f64, y: f64, params: &[f64; N]) -> [f64; N];

    /// Applies parameter constraints after an update.
    fn constrain(&self, _params: &mut [f64; N]) {}
}

/// Samples the model is fit against.
#[derive(Clone, Copy)]
pub struct Samples<'a> {
    pub xs: &'a [f64],
    pub ys: &'a [f64],
    pub values: &'a [f64],
}

impl Samples<'_> {
    fn iter(&self) -> impl Iterator<Item = (f64, f64, f64)> + '_ {
        self.xs
            .iter()
            .zip(self.ys.iter())
            .zip(self.values.iter())
            .map(|((&x, &y), &v)| (x, y, v))
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if there are no samples.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Runs Levenberg-Marquardt from `initial_params`.
pub fn optimize<const N: usize, M: LmModel<N>>(
    model: &M,
    samples: Samples<'_>,
    initial_params: [f64; N],
    config: &LmConfig,
) -> LmResult<N> {
    let mut params = initial_params;
    model.constrain(&mut params);
    let mut lambda = config.initial_lambda;
    let mut prev_chi2 = chi2(model, samples, &params);
    let mut converged = false;
    let mut iterations = 0;

    let mut jacobian = Vec::with_capacity(samples.len());
    let mut residuals = Vec::with_capacity(samples.len());

    for iter in 0..config.max_iterations {
        iterations = iter + 1;

        fill_jacobian_residuals(model, samples, &params, &mut jacobian, &mut residuals);
        let (hessian, gradient) = hessian_gradient(&jacobian, &residuals);

        // Inner loop: raise damping until a step lowers chi2.
        let mut accepted = false;
        while lambda <= config.max_lambda {
            let mut damped = hessian;
            for (i, row) in damped.iter_mut().enumerate() {
                row[i] *= 1.0 + lambda;
            }
            let Some(delta) = solve(&damped, &gradient) else {
                lambda *= config.lambda_up;
                continue;
            };

            let mut new_params = params;
            for (p, d) in new_params.iter_mut().zip(delta.iter()) {
                *p += d;
            }
            model.constrain(&mut new_params);
            let new_chi2 = chi2(model, samples, &new_params);

            if new_chi2.is_finite() && new_chi2 < prev_chi2 {
                let max_delta = delta.iter().fold(0.0f64, |a, d| a.max(d.abs()));
                params = new_params;
                prev_chi2 = new_chi2;
                lambda *= config.lambda_down;
                accepted = true;
                if max_delta < config.convergence_threshold {
                    converged = true;
                }
                break;
            }
            lambda *= config.lambda_up;
        }

        if !accepted {
            // No descent direction left: the current point is a minimum to
            // within numerical precision.
            converged = true;
            break;
        }
        if converged {
            break;
        }
    }

    LmResult {
        params,
        chi2: prev_chi2,
        converged,
        iterations,
    }
}

/// Unscaled covariance `(J^T J)^-1` at `params`.
pub fn covariance<const N: usize, M: LmModel<N>>(
    model: &M,
    samples: Samples<'_>,
    params: &[f64; N],
) -> Option<[[f64; N]; N]> {
    let mut hessian = [[0.0f64; N]; N];
    for (x, y, _) in samples.iter() {
        let row = model.jacobian_row(x, y, params);
        accumulate_upper(&mut hessian, &row);
    }
    mirror_upper(&mut hessian);
    invert(&hessian)
}

/// Residual vector `data - model` at `params`.
pub fn residuals<const N: usize, M: LmModel<N>>(
    model: &M,
    samples: Samples<'_>,
    params: &[f64; N],
) -> Vec<f64> {
    samples
        .iter()
        .map(|(x, y, v)| v - model.evaluate(x, y, params))
        .collect()
}

fn chi2<const N: usize, M: LmModel<N>>(model: &M, samples: Samples<'_>, params: &[f64; N]) -> f64 {
    samples
        .iter()
        .map(|(x, y, v)| {
            let r = v - model.evaluate(x, y, params);
            r * r
        })
        .sum()
}

fn fill_jacobian_residuals<const N: usize, M: LmModel<N>>(
    model: &M,
    samples: Samples<'_>,
    params: &[f64; N],
    jacobian: &mut Vec<[f64; N]>,
    residuals: &mut Vec<f64>,
) {
    jacobian.clear();
    residuals.clear();
    for (x, y, v) in samples.iter() {
        jacobian.push(model.jacobian_row(x, y, params));
        residuals.push(v - model.evaluate(x, y, params));
    }
}

#[allow(clippy::needless_range_loop)]
fn accumulate_upper<const N: usize>(hessian: &mut [[f64; N]; N], row: &[f64; N]) {
    for i in 0..N {
        for j in i..N {
            hessian[i][j] += row[i] * row[j];
        }
    }
}

#[allow(clippy::needless_range_loop)]
fn mirror_upper<const N: usize>(hessian: &mut [[f64; N]; N]) {
    for i in 1..N {
        for j in 0..i {
            hessian[i][j] = hessian[j][i];
        }
    }
}

/// Computes `J^T J` and `J^T r`.
#[allow(clippy::needless_range_loop)]
fn hessian_gradient<const N: usize>(jacobian: &[[f64; N]], residuals: &[f64]) -> ([[f64; N]; N], [f64; N]) {
    let mut hessian = [[0.0f64; N]; N];
    let mut gradient = [0.0f64; N];
    for (row, &r) in jacobian.iter().zip(residuals.iter()) {
        for i in 0..N {
            gradient[i] += row[i] * r;
        }
        accumulate_upper(&mut hessian, row);
    }
    mirror_upper(&mut hessian);
    (hessian, gradient)
}
