//! Weighted least squares
//!
//! [levenberg_marquardt] minimizes `sum(((y - f(x; p)) / sigma)^2)` for any
//! [Model], [linear_least_squares] solves the linear case in one QR
//! factorization. Both return the parameter covariance `(J'J)^-1` of the
//! weighted Jacobian `J`, scaled by the reduced chi-square when the
//! uncertainties are [Sigma::Relative].

use crate::Measurement;
use nalgebra::{DMatrix, DVector};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("{points} data points cannot constrain {parameters} parameters")]
    Underdetermined { points: usize, parameters: usize },
    #[error("{x} values for {y} data points and {sigma} uncertainties")]
    Length { x: usize, y: usize, sigma: usize },
    #[error("initial guess has {found} parameters, the model has {expected}")]
    Parameters { expected: usize, found: usize },
    #[error("uncertainty at x={x} must be positive and finite, found {sigma}")]
    InvalidUncertainty { x: f64, sigma: f64 },
    #[error("the model is not finite for the initial parameters")]
    NonFinite,
    #[error("no convergence after {0} iterations")]
    NotConverged(usize),
    #[error("singular normal matrix, the covariance cannot be estimated")]
    Singular,
}
type Result<T> = std::result::Result<T, FitError>;

/// A model `f(x; p)` fitted to `(x, y)` data
pub trait Model {
    /// Number of parameters `p`
    fn n_parameter(&self) -> usize;
    fn value(&self, x: f64, p: &[f64]) -> f64;
    /// Partial derivatives `df/dp` at `x`
    fn gradient(&self, x: f64, p: &[f64]) -> Vec<f64>;
}

/// Interpretation of the data uncertainties
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Sigma {
    /// Only the relative weights matter, the covariance is scaled by `chi2/dof`
    #[default]
    Relative,
    /// The uncertainties are absolute 1-sigma errors
    Absolute,
}

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub max_iterations: usize,
    /// Convergence threshold on the relative chi-square reduction
    pub ftol: f64,
    /// Convergence threshold on the relative parameter step
    pub xtol: f64,
    pub sigma: Sigma,
}
impl Default for Options {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            ftol: 1e-10,
            xtol: 1e-10,
            sigma: Sigma::Relative,
        }
    }
}
impl Options {
    pub fn sigma(self, sigma: Sigma) -> Self {
        Self { sigma, ..self }
    }
    pub fn max_iterations(self, max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..self
        }
    }
}

/// Best fit parameters and their covariance
#[derive(Debug, Clone)]
pub struct Solution {
    pub parameters: Vec<f64>,
    pub covariance: DMatrix<f64>,
    pub chi_squared: f64,
    /// Degrees of freedom: # of data points minus # of parameters
    pub dof: usize,
    pub iterations: usize,
}
impl Solution {
    /// 1-sigma uncertainties, the square root of the covariance diagonal
    pub fn uncertainties(&self) -> Vec<f64> {
        self.covariance.diagonal().iter().map(|v| v.sqrt()).collect()
    }
    pub fn measurements(&self) -> Vec<Measurement> {
        self.parameters
            .iter()
            .zip(self.uncertainties())
            .map(|(&value, error)| Measurement::new(value, error))
            .collect()
    }
    pub fn reduced_chi_squared(&self) -> f64 {
        self.chi_squared / self.dof as f64
    }
}

fn check_data(
    x: &[f64],
    y: &[f64],
    sigma: &[f64],
    n_parameter: usize,
    mode: Sigma,
) -> Result<()> {
    if x.len() != y.len() || x.len() != sigma.len() {
        return Err(FitError::Length {
            x: x.len(),
            y: y.len(),
            sigma: sigma.len(),
        });
    }
    let enough = match mode {
        Sigma::Relative => x.len() > n_parameter,
        Sigma::Absolute => x.len() >= n_parameter,
    };
    if !enough {
        return Err(FitError::Underdetermined {
            points: x.len(),
            parameters: n_parameter,
        });
    }
    if let Some((&x, &sigma)) = x
        .iter()
        .zip(sigma)
        .find(|(_, s)| !(s.is_finite() && **s > 0f64))
    {
        return Err(FitError::InvalidUncertainty { x, sigma });
    }
    Ok(())
}

/// Relative size of the smallest `R` diagonal element below which the
/// columns are deemed linearly dependent
const RANK_TOLERANCE: f64 = 1e-12;

/// QR factorization of the column-equilibrated matrix `A D^-1`
struct ScaledQr {
    q: DMatrix<f64>,
    r: DMatrix<f64>,
    d: DVector<f64>,
}
impl ScaledQr {
    fn new(a: &DMatrix<f64>) -> Self {
        let d = column_norms(a);
        let mut a_eq = a.clone();
        for (mut column, &norm) in a_eq.column_iter_mut().zip(d.iter()) {
            column /= norm;
        }
        let qr = a_eq.qr();
        Self {
            q: qr.q(),
            r: qr.r(),
            d,
        }
    }
    /// Least-squares solution of `A x = b`
    fn solve(&self, b: &DVector<f64>) -> Option<DVector<f64>> {
        self.r
            .solve_upper_triangular(&(self.q.transpose() * b))
            .map(|x| x.component_div(&self.d))
    }
    /// `(A'A)^-1`
    fn inverse_normal(&self) -> Result<DMatrix<f64>> {
        let n = self.r.ncols();
        if self
            .r
            .diagonal()
            .iter()
            .any(|v| !(v.abs() > RANK_TOLERANCE))
        {
            return Err(FitError::Singular);
        }
        let r_inv = self
            .r
            .solve_upper_triangular(&DMatrix::identity(n, n))
            .ok_or(FitError::Singular)?;
        let c = &r_inv * r_inv.transpose();
        Ok(DMatrix::from_fn(n, n, |i, j| c[(i, j)] / (self.d[i] * self.d[j])))
    }
}

/// Covariance from the weighted Jacobian at the solution
fn covariance(
    jacobian: &DMatrix<f64>,
    chi_squared: f64,
    dof: usize,
    mode: Sigma,
) -> Result<DMatrix<f64>> {
    let covariance = ScaledQr::new(jacobian).inverse_normal()?;
    Ok(match mode {
        Sigma::Absolute => covariance,
        Sigma::Relative => covariance * (chi_squared / dof as f64),
    })
}

/// Weighted residuals `(y-f)/sigma`, `None` if the model is not finite
fn residuals<M: Model>(
    model: &M,
    x: &[f64],
    y: &[f64],
    sigma: &[f64],
    p: &[f64],
) -> Option<DVector<f64>> {
    let r = DVector::from_iterator(
        x.len(),
        x.iter()
            .zip(y)
            .zip(sigma)
            .map(|((&x, &y), &s)| (y - model.value(x, p)) / s),
    );
    if r.iter().all(|v| v.is_finite()) {
        Some(r)
    } else {
        None
    }
}

/// Weighted Jacobian `df/dp / sigma`
fn jacobian<M: Model>(model: &M, x: &[f64], sigma: &[f64], p: &[f64]) -> Option<DMatrix<f64>> {
    let n = model.n_parameter();
    let mut jac = DMatrix::<f64>::zeros(x.len(), n);
    for (i, (&x, &s)) in x.iter().zip(sigma).enumerate() {
        for (j, g) in model.gradient(x, p).into_iter().enumerate().take(n) {
            jac[(i, j)] = g / s;
        }
    }
    if jac.iter().all(|v| v.is_finite()) {
        Some(jac)
    } else {
        None
    }
}

/// Solves `[J; sqrt(lambda) D] delta = [r; 0]` in the least-squares sense
fn damped_step(
    jac: &DMatrix<f64>,
    r: &DVector<f64>,
    scale: &DVector<f64>,
    lambda: f64,
) -> Option<DVector<f64>> {
    let (m, n) = jac.shape();
    let mut a = DMatrix::<f64>::zeros(m + n, n);
    a.view_mut((0, 0), (m, n)).copy_from(jac);
    for j in 0..n {
        a[(m + j, j)] = lambda.sqrt() * scale[j];
    }
    let mut b = DVector::<f64>::zeros(m + n);
    b.rows_mut(0, m).copy_from(r);
    let qr = a.qr();
    let qtb = qr.q().transpose() * b;
    qr.r().solve_upper_triangular(&qtb)
}

fn column_norms(jac: &DMatrix<f64>) -> DVector<f64> {
    DVector::from_iterator(
        jac.ncols(),
        jac.column_iter()
            .map(|c| c.norm())
            .map(|d| if d > 0f64 { d } else { 1f64 }),
    )
}

/// Levenberg-Marquardt weighted nonlinear least squares
///
/// The result depends on the initial guess `p0`: different guesses may
/// land in different local minima.
pub fn levenberg_marquardt<M: Model>(
    model: &M,
    x: &[f64],
    y: &[f64],
    sigma: &[f64],
    p0: &[f64],
    options: Options,
) -> Result<Solution> {
    let n = model.n_parameter();
    if p0.len() != n {
        return Err(FitError::Parameters {
            expected: n,
            found: p0.len(),
        });
    }
    check_data(x, y, sigma, n, options.sigma)?;
    let dof = x.len() - n;

    let mut p = DVector::from_column_slice(p0);
    let mut r = residuals(model, x, y, sigma, p.as_slice()).ok_or(FitError::NonFinite)?;
    let mut jac = jacobian(model, x, sigma, p.as_slice()).ok_or(FitError::NonFinite)?;
    let mut chi_squared = r.norm_squared();
    let mut scale = column_norms(&jac);
    let mut lambda = 1e-3;

    let finish = |p: DVector<f64>,
                  jac: DMatrix<f64>,
                  chi_squared: f64,
                  iterations: usize|
     -> Result<Solution> {
        log::debug!("LM: chi2={:.6e} after {} iterations", chi_squared, iterations);
        Ok(Solution {
            parameters: p.as_slice().to_vec(),
            covariance: covariance(&jac, chi_squared, dof, options.sigma)?,
            chi_squared,
            dof,
            iterations,
        })
    };

    for iteration in 1..=options.max_iterations {
        if chi_squared == 0f64 {
            return finish(p, jac, chi_squared, iteration - 1);
        }
        loop {
            let trial = damped_step(&jac, &r, &scale, lambda)
                .map(|delta| (&p + &delta, delta))
                .and_then(|(p_trial, delta)| {
                    residuals(model, x, y, sigma, p_trial.as_slice())
                        .map(|r_trial| (p_trial, delta, r_trial))
                });
            if let Some((p_trial, delta, r_trial)) = trial {
                let chi_squared_trial = r_trial.norm_squared();
                if chi_squared_trial < chi_squared {
                    let reduction = (chi_squared - chi_squared_trial) / chi_squared;
                    let small_step = delta
                        .iter()
                        .zip(p_trial.iter())
                        .all(|(d, p)| d.abs() <= options.xtol * (p.abs() + options.xtol));
                    jac = jacobian(model, x, sigma, p_trial.as_slice())
                        .ok_or(FitError::NonFinite)?;
                    p = p_trial;
                    r = r_trial;
                    chi_squared = chi_squared_trial;
                    scale = scale.zip_map(&column_norms(&jac), f64::max);
                    lambda = (lambda * 0.1).max(1e-12);
                    if reduction <= options.ftol || small_step {
                        return finish(p, jac, chi_squared, iteration);
                    }
                    break;
                }
            }
            lambda *= 10f64;
            if lambda > 1e16 {
                // no step reduces chi2 any further
                return finish(p, jac, chi_squared, iteration);
            }
        }
    }
    Err(FitError::NotConverged(options.max_iterations))
}

/// Weighted linear least squares `y = design * p`
pub fn linear_least_squares(
    design: &DMatrix<f64>,
    y: &[f64],
    sigma: &[f64],
    mode: Sigma,
) -> Result<Solution> {
    let (m, n) = design.shape();
    let x: Vec<f64> = (0..m).map(|i| i as f64).collect();
    check_data(&x, y, sigma, n, mode)?;
    let mut weighted = design.clone();
    for (mut row, &s) in weighted.row_iter_mut().zip(sigma) {
        row /= s;
    }
    let y_weighted = DVector::from_iterator(m, y.iter().zip(sigma).map(|(y, s)| y / s));
    let qr = ScaledQr::new(&weighted);
    let p = qr.solve(&y_weighted).ok_or(FitError::Singular)?;
    let chi_squared = (&weighted * &p - y_weighted).norm_squared();
    let dof = m - n;
    let covariance = match mode {
        Sigma::Absolute => qr.inverse_normal()?,
        Sigma::Relative => qr.inverse_normal()? * (chi_squared / dof as f64),
    };
    Ok(Solution {
        parameters: p.as_slice().to_vec(),
        covariance,
        chi_squared,
        dof,
        iterations: 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// y = a * exp(-k x)
    struct Decay;
    impl Model for Decay {
        fn n_parameter(&self) -> usize {
            2
        }
        fn value(&self, x: f64, p: &[f64]) -> f64 {
            p[0] * (-p[1] * x).exp()
        }
        fn gradient(&self, x: f64, p: &[f64]) -> Vec<f64> {
            let e = (-p[1] * x).exp();
            vec![e, -p[0] * x * e]
        }
    }

    #[test]
    fn exponential_decay() {
        let x: Vec<f64> = (0..40).map(|i| i as f64 * 0.5).collect();
        let y: Vec<f64> = x.iter().map(|x| Decay.value(*x, &[250., 0.116569])).collect();
        let sigma = vec![1f64; x.len()];
        let solution =
            levenberg_marquardt(&Decay, &x, &y, &sigma, &[100., 0.3], Options::default()).unwrap();
        assert!((solution.parameters[0] - 250.).abs() < 1e-6);
        assert!((solution.parameters[1] - 0.116569).abs() < 1e-9);
        assert_eq!(solution.dof, 38);
    }

    #[test]
    fn absolute_and_relative_covariance() {
        let design = DMatrix::from_row_slice(4, 2, &[1., 0., 1., 1., 1., 2., 1., 3.]);
        let y = [0.1, 0.9, 2.1, 2.9];
        let sigma = [0.5; 4];
        let absolute = linear_least_squares(&design, &y, &sigma, Sigma::Absolute).unwrap();
        let relative = linear_least_squares(&design, &y, &sigma, Sigma::Relative).unwrap();
        assert_eq!(absolute.parameters.len(), 2);
        let ratio = relative.covariance[(1, 1)] / absolute.covariance[(1, 1)];
        assert!((ratio - relative.reduced_chi_squared()).abs() < 1e-12);
        // slope variance of an unweighted line: sigma^2 / sum((x - mean)^2)
        assert!((absolute.covariance[(1, 1)] - 0.25 / 5.).abs() < 1e-12);
    }

    #[test]
    fn underdetermined() {
        let x = [0., 1.];
        assert_eq!(
            levenberg_marquardt(&Decay, &x, &x, &[1., 1.], &[1., 1.], Options::default())
                .unwrap_err(),
            FitError::Underdetermined {
                points: 2,
                parameters: 2
            }
        );
    }

    #[test]
    fn zero_uncertainty() {
        let x = [0., 1., 2.];
        let err = levenberg_marquardt(&Decay, &x, &x, &[1., 0., 1.], &[1., 1.], Options::default())
            .unwrap_err();
        assert_eq!(err, FitError::InvalidUncertainty { x: 1., sigma: 0. });
    }

    #[test]
    fn singular_design() {
        let design = DMatrix::from_row_slice(3, 2, &[1., 2., 1., 2., 1., 2.]);
        assert_eq!(
            linear_least_squares(&design, &[1., 2., 3.], &[1.; 3], Sigma::Absolute).unwrap_err(),
            FitError::Singular
        );
    }

    #[test]
    fn iteration_budget() {
        let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|x| Decay.value(*x, &[10., 0.2])).collect();
        let options = Options::default().max_iterations(1);
        assert_eq!(
            levenberg_marquardt(&Decay, &x, &y, &[1.; 20], &[1., 1.5], options).unwrap_err(),
            FitError::NotConverged(1)
        );
    }
}
