//! Tear-stream convergence for systems with recycle loops.
//!
//! A recycle loop is cut at one or more tear streams. Their component mass
//! flows form the vector `x`; one pass through the loop maps a guess `x` to the
//! recomputed values `g(x)`. The steady state is the fixed point `x = g(x)`.
//!
//! # Methods
//!
//! - **Wegstein** (default): per-flow secant acceleration, bounded to
//!   `q in [-5, 0]`
//! - **Substitution**: plain `x <- g(x)`
//! - **Newton**: forward-difference Jacobian of `g(x) - x` and an LU solve,
//!   requires the `solvers` feature
//!
//! A guess is accepted when `||g(x) - x|| <= tolerance * (1 + ||x||)`, so one
//! tolerance serves loops carrying grams and tonnes per hour alike.
//!
//! # Example
//!
//! ```
//! use sanitrain::solvers::recycle::RecycleSolver;
//!
//! // 1 g/h of fresh feed, 90 % of the loop returned: x = 0.9 * x + 1
//! let mut solver = RecycleSolver::new(100, 1e-10);
//! let solution = solver.solve(vec![0.0], |x| vec![0.9 * x[0] + 1.0]).unwrap();
//!
//! assert!(solution.converged);
//! assert!((solution.tear_values[0] - 10.0).abs() < 1e-6);
//! ```
//!
//! Passes that can fail go through [`RecycleSolver::try_solve`]; the caller's
//! error type absorbs [`RecycleError`] through `From`.

#[cfg(feature = "solvers")]
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Relative perturbation of the finite-difference Jacobian.
#[cfg(feature = "solvers")]
const FD_STEP: f64 = 1e-8;

/// Wegstein acceleration of a fixed-point iteration.
///
/// For each flow the secant slope `s = (g_k - g_{k-1}) / (x_k - x_{k-1})`
/// gives `q = s / (s - 1)`, clamped to the configured bounds, and the next
/// guess is `q * x_k + (1 - q) * g_k`. Without a previous point the step is a
/// direct substitution.
#[derive(Debug, Clone)]
pub struct WegsteinAccelerator {
    /// Last guess and its recomputed value
    previous: Option<(Vec<f64>, Vec<f64>)>,
    q_min: f64,
    q_max: f64,
}

impl Default for WegsteinAccelerator {
    fn default() -> Self {
        Self::new(-5.0, 0.0)
    }
}

impl WegsteinAccelerator {
    /// Creates an accelerator with bounds on `q`.
    ///
    /// `q_max = 0` never damps below direct substitution; a negative `q_min`
    /// limits how far a step may extrapolate.
    pub fn new(q_min: f64, q_max: f64) -> Self {
        WegsteinAccelerator { previous: None, q_min, q_max }
    }

    /// Next guess from the current guess `x` and its recomputed value `gx`.
    pub fn step(&mut self, x: &[f64], gx: &[f64]) -> Vec<f64> {
        let next = match &self.previous {
            Some((x_prev, gx_prev)) if x_prev.len() == x.len() => x
                .iter()
                .zip(gx)
                .zip(x_prev.iter().zip(gx_prev))
                .map(|((&xk, &gk), (&xp, &gp))| {
                    let q = self.bounded_q(xk - xp, gk - gp);
                    q * xk + (1.0 - q) * gk
                })
                .collect(),
            _ => gx.to_vec(),
        };
        self.previous = Some((x.to_vec(), gx.to_vec()));
        next
    }

    fn bounded_q(&self, dx: f64, dg: f64) -> f64 {
        if dx.abs() <= 1e-14 {
            return 0.0;
        }
        let slope = dg / dx;
        // A unit slope has no fixed point along this flow
        let q = if (slope - 1.0).abs() > 1e-14 { slope / (slope - 1.0) } else { 0.0 };
        q.clamp(self.q_min, self.q_max)
    }

    /// Forgets the previous point.
    pub fn reset(&mut self) {
        self.previous = None;
    }
}

/// Convergence method for tear streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverMethod {
    /// Wegstein acceleration
    #[default]
    Wegstein,
    /// Direct substitution
    Substitution,
    /// Newton-Raphson on `g(x) - x`
    Newton,
}

fn magnitude(x: &[f64]) -> f64 {
    x.iter().map(|v| v * v).sum::<f64>().sqrt()
}

fn distance(x: &[f64], y: &[f64]) -> f64 {
    x.iter().zip(y).map(|(a, b)| (b - a) * (b - a)).sum::<f64>().sqrt()
}

/// Runs one pass and checks that it returns one value per tear flow.
fn evaluate<F, E>(compute: &mut F, x: &[f64]) -> Result<Vec<f64>, E>
where
    F: FnMut(&[f64]) -> Result<Vec<f64>, E>,
    E: From<RecycleError>,
{
    let gx = compute(x)?;
    if gx.len() != x.len() {
        return Err(RecycleError::InvalidTearStream(format!(
            "a pass returned {} tear values for {} guessed",
            gx.len(),
            x.len()
        ))
        .into());
    }
    Ok(gx)
}

/// Newton step `x - J^-1 (g(x) - x)` with `J = dg/dx - I`.
///
/// Costs one extra pass per tear flow.
#[cfg(feature = "solvers")]
fn newton_step<F, E>(compute: &mut F, x: &[f64], gx: &[f64]) -> Result<Vec<f64>, E>
where
    F: FnMut(&[f64]) -> Result<Vec<f64>, E>,
    E: From<RecycleError>,
{
    let n = x.len();
    let mut jacobian = DMatrix::<f64>::zeros(n, n);
    for j in 0..n {
        let h = FD_STEP * (1.0 + x[j].abs());
        let mut shifted = x.to_vec();
        shifted[j] += h;
        let g_shifted = evaluate(compute, &shifted)?;
        for i in 0..n {
            let identity = if i == j { 1.0 } else { 0.0 };
            jacobian[(i, j)] = (g_shifted[i] - gx[i]) / h - identity;
        }
    }

    let rhs = DVector::from_iterator(n, x.iter().zip(gx).map(|(xi, gi)| xi - gi));
    let dx = jacobian.lu().solve(&rhs).ok_or(RecycleError::SingularJacobian)?;
    Ok(x.iter().zip(dx.iter()).map(|(xi, di)| xi + di).collect())
}

#[cfg(not(feature = "solvers"))]
fn newton_step<F, E>(_compute: &mut F, _x: &[f64], _gx: &[f64]) -> Result<Vec<f64>, E>
where
    F: FnMut(&[f64]) -> Result<Vec<f64>, E>,
    E: From<RecycleError>,
{
    Err(RecycleError::FeatureNotEnabled.into())
}

/// Fixed-point solver for tear streams.
#[derive(Debug, Clone)]
pub struct RecycleSolver {
    method: SolverMethod,
    max_iterations: usize,
    /// Relative tolerance on the tear residual
    tolerance: f64,
    wegstein: WegsteinAccelerator,
}

impl RecycleSolver {
    /// Creates a Wegstein solver.
    pub fn new(max_iterations: usize, tolerance: f64) -> Self {
        RecycleSolver {
            method: SolverMethod::Wegstein,
            max_iterations,
            tolerance,
            wegstein: WegsteinAccelerator::default(),
        }
    }

    /// Selects the convergence method.
    pub fn with_method(mut self, method: SolverMethod) -> Self {
        self.method = method;
        self
    }

    /// Replaces the Wegstein bounds on `q`.
    pub fn with_wegstein_bounds(mut self, q_min: f64, q_max: f64) -> Self {
        self.wegstein = WegsteinAccelerator::new(q_min, q_max);
        self
    }

    /// Selected method.
    pub fn method(&self) -> SolverMethod {
        self.method
    }

    /// Solves `x = g(x)` for a pass that cannot fail.
    pub fn solve<F>(
        &mut self,
        guess: Vec<f64>,
        mut compute: F,
    ) -> Result<RecycleSolution, RecycleError>
    where
        F: FnMut(&[f64]) -> Vec<f64>,
    {
        self.try_solve(guess, |x| Ok::<_, RecycleError>(compute(x)))
    }

    /// Solves `x = g(x)` for a pass that can fail.
    ///
    /// A failing pass aborts the solve and its error is returned unchanged.
    ///
    /// # Arguments
    ///
    /// * `guess` - Initial tear flows
    /// * `compute` - Runs the loop once for a guess and returns the
    ///   recomputed tear flows
    pub fn try_solve<F, E>(&mut self, guess: Vec<f64>, mut compute: F) -> Result<RecycleSolution, E>
    where
        F: FnMut(&[f64]) -> Result<Vec<f64>, E>,
        E: From<RecycleError>,
    {
        if self.max_iterations == 0 {
            let reason = "at least one iteration is required".to_string();
            return Err(RecycleError::InvalidTearStream(reason).into());
        }
        self.wegstein.reset();

        let mut x = guess;
        let mut history = Vec::new();
        for iteration in 0..self.max_iterations {
            let gx = evaluate(&mut compute, &x)?;
            let residual = distance(&x, &gx);
            tracing::trace!(method = ?self.method, iteration, residual, "tear iteration");
            history.push(TearIterate { iteration, residual, tear_values: x.clone() });

            if residual <= self.tolerance * (1.0 + magnitude(&x)) {
                tracing::debug!(
                    method = ?self.method,
                    iterations = iteration + 1,
                    residual,
                    "tear streams converged"
                );
                return Ok(RecycleSolution {
                    converged: true,
                    iterations: iteration + 1,
                    residual,
                    tear_values: x,
                    history,
                });
            }

            x = match self.method {
                SolverMethod::Substitution => gx,
                SolverMethod::Wegstein => self.wegstein.step(&x, &gx),
                SolverMethod::Newton => newton_step(&mut compute, &x, &gx)?,
            };
        }

        let residual = history.last().map_or(f64::INFINITY, |it| it.residual);
        tracing::warn!(
            method = ?self.method,
            iterations = self.max_iterations,
            residual,
            "tear streams did not converge"
        );
        Err(RecycleError::ConvergenceFailure {
            iterations: self.max_iterations,
            final_residual: residual,
        }
        .into())
    }
}

/// Converged tear streams.
#[derive(Debug, Clone)]
pub struct RecycleSolution {
    /// Always `true` for a returned solution
    pub converged: bool,
    /// Passes evaluated, Jacobian passes excluded
    pub iterations: usize,
    /// Residual of the accepted guess
    pub residual: f64,
    /// Accepted tear flows
    pub tear_values: Vec<f64>,
    /// Every guess and its residual
    pub history: Vec<TearIterate>,
}

/// One guess of the tear flows.
#[derive(Debug, Clone)]
pub struct TearIterate {
    pub iteration: usize,
    pub residual: f64,
    pub tear_values: Vec<f64>,
}

/// Tear-stream convergence errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecycleError {
    /// The iteration limit was reached
    #[error("Tear streams did not converge in {iterations} iterations (residual {final_residual:.6e})")]
    ConvergenceFailure { iterations: usize, final_residual: f64 },
    /// Tear values of inconsistent size, or an unusable solver setup
    #[error("Invalid tear stream: {0}")]
    InvalidTearStream(String),
    /// The Newton system has no unique solution
    #[error("Singular Jacobian matrix")]
    SingularJacobian,
    /// Newton was selected without the `solvers` feature
    #[error("Newton method requires the 'solvers' feature to be enabled")]
    FeatureNotEnabled,
}
