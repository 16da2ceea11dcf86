//! Convex-subproblem backend interface.
//!
//! The trust-region loop talks to the convex solver only through [`Model`]:
//! an in-memory convex program (variables with bounds, linear constraints,
//! one quadratic objective) that can be solved repeatedly as the trust box
//! moves. Any QP/LP solver meeting these semantics can sit behind the trait.

use std::fmt;
use std::io;
use std::path::Path;

use crate::exprs::{AffExpr, QuadExpr, Var};

/// Outcome of a convex solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CvxStatus {
    /// A minimizer was found; `var_values` is valid.
    Solved,

    /// The solver gave up (numerical trouble, iteration cap).
    Failed,

    /// The linear constraints admit no feasible point.
    Infeasible,

    /// The objective is unbounded below on the feasible set.
    Unbounded,
}

impl fmt::Display for CvxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CvxStatus::Solved => write!(f, "Solved"),
            CvxStatus::Failed => write!(f, "Failed"),
            CvxStatus::Infeasible => write!(f, "Infeasible"),
            CvxStatus::Unbounded => write!(f, "Unbounded"),
        }
    }
}

/// Handle to a linear constraint in the model. The unit of removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cnt(usize);

impl Cnt {
    pub fn new(id: usize) -> Self {
        Cnt(id)
    }

    pub fn id(&self) -> usize {
        self.0
    }
}

/// In-memory convex program plus a solver for it.
///
/// Structural mutations (adding/removing variables and constraints) may be
/// buffered; callers must invoke [`Model::update`] before solving. Variable
/// removal is only valid for the most recently created (auxiliary) variables
/// so that surviving columns keep their indices.
pub trait Model {
    /// Append named variables, unbounded by default. Returns them in column
    /// order.
    fn add_vars(&mut self, names: &[&str]) -> Vec<Var>;

    /// Append nonnegative auxiliary variables for penalty/slack encodings.
    fn add_aux_vars(&mut self, count: usize, prefix: &str) -> Vec<Var>;

    /// Mark variables for removal; committed by [`Model::update`].
    fn remove_vars(&mut self, vars: &[Var]);

    fn set_var_bounds(&mut self, vars: &[Var], lb: &[f64], ub: &[f64]);

    /// Add the linear constraint `aff == 0`.
    fn add_eq_cnt(&mut self, aff: AffExpr, name: &str) -> Cnt;

    /// Add the linear constraint `aff <= 0`.
    fn add_ineq_cnt(&mut self, aff: AffExpr, name: &str) -> Cnt;

    fn remove_cnts(&mut self, cnts: &[Cnt]);

    /// Replace the objective with `minimize objective`.
    fn set_objective(&mut self, objective: QuadExpr);

    /// Commit pending structural changes.
    fn update(&mut self);

    /// Minimize the objective subject to the current constraints and bounds.
    fn optimize(&mut self) -> CvxStatus;

    /// Live variables in column order.
    fn vars(&self) -> Vec<Var>;

    fn num_vars(&self) -> usize;

    /// Values of `vars` at the last solution. Valid after a `Solved` status.
    fn var_values(&self, vars: &[Var]) -> Vec<f64>;

    /// Diagnostic dump of the current model in a readable text form.
    fn write_to_file(&self, path: &Path) -> io::Result<()>;
}
