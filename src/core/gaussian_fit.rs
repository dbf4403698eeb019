//! Least-squares fit of a 1D Gaussian to histogram densities.
//!
//! Levenberg-Marquardt on the model `f(x) = A * exp(-(x - mu)^2 / (2 sigma^2))`
//! with amplitude, mean and sigma free.

use serde::Serialize;

/// Configuration for the Levenberg-Marquardt optimizer
#[derive(Debug, Clone)]
pub struct GaussianFitConfig {
    /// Maximum number of iterations
    pub max_iterations: usize,
    /// Relative reduction of the squared residual sum considered converged
    pub ftol: f64,
    /// Relative parameter change considered converged
    pub xtol: f64,
    /// Initial damping
    pub initial_lambda: f64,
    /// Damping factor applied after a rejected step
    pub lambda_up: f64,
    /// Damping factor applied after an accepted step
    pub lambda_down: f64,
    /// Damping beyond which no descent direction is left
    pub max_lambda: f64,
}

impl Default for GaussianFitConfig {
    fn default() -> Self {
        Self {
            max_iterations: 800,
            ftol: 1.49012e-8,
            xtol: 1.49012e-8,
            initial_lambda: 1e-3,
            lambda_up: 10.0,
            lambda_down: 0.1,
            max_lambda: 1e16,
        }
    }
}

/// Gaussian model parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GaussianParams {
    pub amplitude: f64,
    pub mean: f64,
    pub sigma: f64,
}

impl GaussianParams {
    pub fn evaluate(&self, x: f64) -> f64 {
        let d = x - self.mean;
        self.amplitude * (-(d * d) / (2.0 * self.sigma * self.sigma)).exp()
    }

    fn as_array(&self) -> [f64; 3] {
        [self.amplitude, self.mean, self.sigma]
    }

    fn from_array(p: [f64; 3]) -> Self {
        Self {
            amplitude: p[0],
            mean: p[1],
            sigma: p[2],
        }
    }
}

/// Converged fit
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GaussianFit {
    pub params: GaussianParams,
    /// RMS of the residuals at the solution
    pub rms_residual: f64,
    pub iterations: usize,
}

/// Why a fit could not be produced
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FitFailure {
    #[error("{points} data point(s) cannot constrain 3 parameters")]
    TooFewPoints { points: usize },

    #[error("abscissa and ordinate lengths differ ({x} vs {y})")]
    LengthMismatch { x: usize, y: usize },

    #[error("non-finite data or initial guess")]
    NonFinite,

    #[error("initial sigma must be non-zero")]
    DegenerateWidth,

    #[error("normal equations are singular")]
    Singular,

    #[error("no convergence after {0} iterations")]
    MaxIterations(usize),
}

fn sum_of_squares(x: &[f64], y: &[f64], p: &GaussianParams) -> f64 {
    x.iter()
        .zip(y)
        .map(|(&xi, &yi)| {
            let r = yi - p.evaluate(xi);
            r * r
        })
        .sum()
}

/// Normal equations `J^T J` and `J^T r`
fn normal_equations(x: &[f64], y: &[f64], p: &GaussianParams) -> ([[f64; 3]; 3], [f64; 3]) {
    let mut jtj = [[0.0; 3]; 3];
    let mut jtr = [0.0; 3];
    let s2 = p.sigma * p.sigma;
    for (&xi, &yi) in x.iter().zip(y) {
        let d = xi - p.mean;
        let e = (-(d * d) / (2.0 * s2)).exp();
        let model = p.amplitude * e;
        let jac = [e, model * d / s2, model * d * d / (s2 * p.sigma)];
        let r = yi - model;
        for i in 0..3 {
            jtr[i] += jac[i] * r;
            for j in 0..3 {
                jtj[i][j] += jac[i] * jac[j];
            }
        }
    }
    (jtj, jtr)
}

/// Solve a 3x3 system with partial pivoting
fn solve_3x3(a: &[[f64; 3]; 3], b: &[f64; 3]) -> Option<[f64; 3]> {
    let mut m = [[0.0; 4]; 3];
    for i in 0..3 {
        m[i][..3].copy_from_slice(&a[i]);
        m[i][3] = b[i];
    }

    for col in 0..3 {
        let pivot = (col..3).max_by(|&r1, &r2| m[r1][col].abs().total_cmp(&m[r2][col].abs()))?;
        if !m[pivot][col].is_finite() || m[pivot][col].abs() < 1e-300 {
            return None;
        }
        m.swap(col, pivot);
        for row in col + 1..3 {
            let factor = m[row][col] / m[col][col];
            for k in col..4 {
                m[row][k] -= factor * m[col][k];
            }
        }
    }

    let mut out = [0.0; 3];
    for row in (0..3).rev() {
        let tail: f64 = (row + 1..3).map(|k| m[row][k] * out[k]).sum();
        out[row] = (m[row][3] - tail) / m[row][row];
    }
    out.iter().all(|v| v.is_finite()).then_some(out)
}

/// Fit a Gaussian to `(x, y)` samples starting from `initial`.
pub fn fit_gaussian(
    x: &[f64],
    y: &[f64],
    initial: GaussianParams,
    config: &GaussianFitConfig,
) -> Result<GaussianFit, FitFailure> {
    if x.len() != y.len() {
        return Err(FitFailure::LengthMismatch {
            x: x.len(),
            y: y.len(),
        });
    }
    if x.len() < 3 {
        return Err(FitFailure::TooFewPoints { points: x.len() });
    }
    if !initial.as_array().iter().chain(x).chain(y).all(|v| v.is_finite()) {
        return Err(FitFailure::NonFinite);
    }
    if initial.sigma == 0.0 {
        return Err(FitFailure::DegenerateWidth);
    }

    let mut params = initial;
    let mut chi2 = sum_of_squares(x, y, &params);
    let mut lambda = config.initial_lambda;

    for iteration in 1..=config.max_iterations {
        let (jtj, jtr) = normal_equations(x, y, &params);

        let mut damped = jtj;
        for (i, row) in damped.iter_mut().enumerate() {
            row[i] += lambda * jtj[i][i].max(f64::MIN_POSITIVE);
        }

        let Some(delta) = solve_3x3(&damped, &jtr) else {
            lambda *= config.lambda_up;
            if lambda > config.max_lambda {
                return Err(FitFailure::Singular);
            }
            continue;
        };

        let current = params.as_array();
        let mut candidate = current;
        for (c, d) in candidate.iter_mut().zip(delta) {
            *c += d;
        }
        let candidate = GaussianParams::from_array(candidate);
        let new_chi2 = sum_of_squares(x, y, &candidate);

        if new_chi2.is_finite() && new_chi2 <= chi2 {
            let reduction = if chi2 > 0.0 { (chi2 - new_chi2) / chi2 } else { 0.0 };
            let small_step = delta
                .iter()
                .zip(current)
                .all(|(d, p)| d.abs() <= config.xtol * (p.abs() + config.xtol));

            params = candidate;
            chi2 = new_chi2;
            lambda = (lambda * config.lambda_down).max(1e-12);

            if chi2 == 0.0 || reduction <= config.ftol || small_step {
                return Ok(finish(x, params, chi2, iteration));
            }
        } else {
            lambda *= config.lambda_up;
            if lambda > config.max_lambda {
                // no damped step improves the residual: stationary point
                return Ok(finish(x, params, chi2, iteration));
            }
        }
    }

    Err(FitFailure::MaxIterations(config.max_iterations))
}

fn finish(x: &[f64], mut params: GaussianParams, chi2: f64, iterations: usize) -> GaussianFit {
    params.sigma = params.sigma.abs();
    log::debug!(
        "Gaussian fit converged in {} iterations: A={:.6}, mu={:.6}, sigma={:.6}",
        iterations,
        params.amplitude,
        params.mean,
        params.sigma
    );
    GaussianFit {
        params,
        rms_residual: (chi2 / x.len() as f64).sqrt(),
        iterations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn samples(truth: GaussianParams) -> (Vec<f64>, Vec<f64>) {
        let x: Vec<f64> = (0..61).map(|i| -3.0 + 0.1 * f64::from(i)).collect();
        let y = x.iter().map(|&xi| truth.evaluate(xi)).collect();
        (x, y)
    }

    #[test]
    fn test_recovers_exact_gaussian() {
        let truth = GaussianParams {
            amplitude: 0.8,
            mean: 0.4,
            sigma: 0.5,
        };
        let (x, y) = samples(truth);
        let initial = GaussianParams {
            amplitude: 1.0,
            mean: 0.2,
            sigma: 0.7,
        };

        let fit = fit_gaussian(&x, &y, initial, &GaussianFitConfig::default()).unwrap();
        assert_abs_diff_eq!(fit.params.amplitude, 0.8, epsilon = 1e-6);
        assert_abs_diff_eq!(fit.params.mean, 0.4, epsilon = 1e-6);
        assert_abs_diff_eq!(fit.params.sigma, 0.5, epsilon = 1e-6);
        assert!(fit.rms_residual < 1e-6);
    }

    #[test]
    fn test_negative_initial_sigma_reported_positive() {
        let truth = GaussianParams {
            amplitude: 2.0,
            mean: -0.5,
            sigma: 0.8,
        };
        let (x, y) = samples(truth);
        let initial = GaussianParams {
            amplitude: 1.0,
            mean: -0.4,
            sigma: -0.9,
        };
        let fit = fit_gaussian(&x, &y, initial, &GaussianFitConfig::default()).unwrap();
        assert_abs_diff_eq!(fit.params.sigma, 0.8, epsilon = 1e-6);
    }

    #[test]
    fn test_input_validation() {
        let initial = GaussianParams {
            amplitude: 1.0,
            mean: 0.0,
            sigma: 1.0,
        };
        let config = GaussianFitConfig::default();
        assert_eq!(
            fit_gaussian(&[0.0, 1.0], &[1.0, 0.5], initial, &config),
            Err(FitFailure::TooFewPoints { points: 2 })
        );
        assert_eq!(
            fit_gaussian(&[0.0, 1.0, 2.0], &[1.0, 0.5], initial, &config),
            Err(FitFailure::LengthMismatch { x: 3, y: 2 })
        );
        assert_eq!(
            fit_gaussian(&[0.0, 1.0, 2.0], &[1.0, f64::NAN, 0.1], initial, &config),
            Err(FitFailure::NonFinite)
        );
        let flat = GaussianParams { sigma: 0.0, ..initial };
        assert_eq!(
            fit_gaussian(&[0.0, 1.0, 2.0], &[1.0, 0.5, 0.1], flat, &config),
            Err(FitFailure::DegenerateWidth)
        );
    }

    #[test]
    fn test_iteration_budget_exhaustion() {
        let truth = GaussianParams {
            amplitude: 0.8,
            mean: 0.4,
            sigma: 0.5,
        };
        let (x, y) = samples(truth);
        let initial = GaussianParams {
            amplitude: 1.0,
            mean: 0.0,
            sigma: 1.0,
        };
        let config = GaussianFitConfig {
            max_iterations: 1,
            ..GaussianFitConfig::default()
        };
        assert_eq!(
            fit_gaussian(&x, &y, initial, &config),
            Err(FitFailure::MaxIterations(1))
        );
    }

    #[test]
    fn test_solve_3x3() {
        let a = [[2.0, 1.0, 0.0], [1.0, 3.0, 1.0], [0.0, 1.0, 4.0]];
        let b = [3.0, 5.0, 5.0];
        let x = solve_3x3(&a, &b).unwrap();
        for (xi, expected) in x.iter().zip([1.0, 1.0, 1.0]) {
            assert_abs_diff_eq!(*xi, expected, epsilon = 1e-12);
        }
        assert!(solve_3x3(&[[0.0; 3]; 3], &b).is_none());
    }
}
