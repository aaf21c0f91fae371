//! Numerical solvers for systems with recycle streams.
//!
//! Systems are solved sequential-modular: unit by unit in a fixed sequence,
//! exactly like how an engineer would calculate it by hand:
//!
//! 1. Each unit takes its inlet streams
//! 2. Computes its outlets independently
//! 3. Passes results downstream
//!
//! For systems with recycle streams, the component mass flows of the tear
//! streams are iterated until they stop changing. See [`recycle`].
//!
//! # Usage Pattern
//!
//! Convergence settings are usually read from configuration and turned into a
//! solver with [`RecycleSettings::solver`]:
//!
//! ```
//! use sanitrain::solvers::{RecycleSettings, SolverMethod};
//!
//! let settings: RecycleSettings = toml::from_str("method = \"substitution\"").unwrap();
//! assert_eq!(settings.method, SolverMethod::Substitution);
//! assert_eq!(settings.max_iterations, 200);
//!
//! let mut solver = settings.solver();
//! let solution = solver.solve(vec![0.0], |x| vec![0.5 * x[0] + 1.0]).unwrap();
//! assert!((solution.tear_values[0] - 2.0).abs() < 1e-6);
//! ```

pub mod recycle;

pub use recycle::{
    RecycleError, RecycleSolution, RecycleSolver, SolverMethod, TearIterate, WegsteinAccelerator,
};

use serde::{Deserialize, Serialize};

/// Recycle convergence settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecycleSettings {
    /// Convergence method
    pub method: SolverMethod,
    /// Iteration limit
    pub max_iterations: usize,
    /// Relative tolerance on the tear stream residual
    pub tolerance: f64,
}

impl Default for RecycleSettings {
    fn default() -> Self {
        RecycleSettings { method: SolverMethod::Wegstein, max_iterations: 200, tolerance: 1e-9 }
    }
}

impl RecycleSettings {
    /// Builds a solver with these settings.
    pub fn solver(&self) -> RecycleSolver {
        RecycleSolver::new(self.max_iterations, self.tolerance).with_method(self.method)
    }
}
