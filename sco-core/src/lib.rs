//! Sequential convex optimization core.
//!
//! A trust-region SQP solver with an L1 merit penalty for non-convex,
//! non-linearly constrained problems, of the kind that arise in robot
//! trajectory optimization. The solver repeatedly:
//!
//! - asks every cost and constraint term for a local convex model at the
//!   current iterate,
//! - folds the linearized constraints into absolute-value / hinge penalty
//!   objectives weighted by a merit coefficient,
//! - solves the resulting convex subproblem inside a trust box, and
//! - accepts the step, or shrinks the box, based on the agreement between
//!   the predicted and the realized merit improvement.
//!
//! An outer loop raises the merit coefficient until the constraints are
//! satisfied.
//!
//! The convex subproblem solver is abstract: anything implementing
//! [`Model`] works (the companion `sco-qp` crate provides a dense QP
//! backend). Cost and constraint terms are equally open via the [`Cost`]
//! and [`Constraint`] traits; [`terms`] has adapters that build them from
//! closures with analytic or finite-difference derivatives.
//!
//! # Example
//!
//! ```ignore
//! use sco_core::{BasicTrustRegionSqp, CostFromFunc, OptProblem, OptStatus};
//!
//! let mut prob = OptProblem::new(backend);
//! let vars = prob.create_vars(&["x", "y"], &lb, &ub);
//! prob.add_cost(Box::new(
//!     CostFromFunc::new("dist", vars, |x| (x[0] - 3.0).powi(2) + x[1].powi(2)),
//! ));
//!
//! let mut opt = BasicTrustRegionSqp::new(prob);
//! opt.initialize(&[0.0, 0.0])?;
//! assert_eq!(opt.optimize(), OptStatus::Converged);
//! ```

pub mod convex;
pub mod error;
pub mod exprs;
pub mod model;
pub mod optimizer;
pub mod problem;
pub mod report;
pub mod terms;
pub mod util;

#[cfg(test)]
mod test_util;

pub use convex::{ConvexConstraints, ConvexObjective};
pub use error::SqpError;
pub use exprs::{AffExpr, QuadExpr, Var};
pub use model::{Cnt, CvxStatus, Model};
pub use optimizer::{
    cnts_to_costs, BasicTrustRegionSqp, BasicTrustRegionSqpParams, Callback, OptResults, OptStatus,
};
pub use problem::{CntKind, Constraint, Cost, OptProblem};
pub use report::IterationResults;
pub use terms::{CntFromFunc, CostFromFunc};
