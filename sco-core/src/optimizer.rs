//! Trust-region SQP driver with an L1 merit penalty.
//!
//! Each SQP iteration convexifies every cost and constraint at the current
//! iterate, folds the linearized constraints into L1 penalty objectives, and
//! solves the resulting convex subproblem inside a trust box. The step is
//! accepted, or the box shrunk, based on how well the predicted merit
//! improvement matches the realized one. An outer loop raises the penalty
//! coefficient until the constraints are satisfied.

use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

use log::{debug, error, info, warn};

use crate::convex::{ConvexConstraints, ConvexObjective};
use crate::error::SqpError;
use crate::exprs::{QuadExpr, Var};
use crate::model::{CvxStatus, Model};
use crate::problem::{Constraint, Cost, OptProblem};
use crate::report::{IterationResults, LogStreams};
use crate::util::numerics::{vec_max, vec_sum};

/// Merit quantities below this are treated as exactly zero.
const MERIT_EPSILON: f64 = 1e-8;

/// Terminal status of an optimization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptStatus {
    /// The trust region collapsed or the predicted improvement fell below
    /// threshold, with constraints satisfied (or absent).
    Converged,

    /// Per-penalty-stage iteration cap or time budget reached.
    IterationLimit,

    /// Constraints still violated after the last penalty increase.
    PenaltyIterationLimit,

    /// The convex subproblem solver failed.
    Failed,

    /// Placeholder before a run finishes. Never returned.
    Invalid,
}

impl fmt::Display for OptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptStatus::Converged => write!(f, "Converged"),
            OptStatus::IterationLimit => write!(f, "IterationLimit"),
            OptStatus::PenaltyIterationLimit => write!(f, "PenaltyIterationLimit"),
            OptStatus::Failed => write!(f, "Failed"),
            OptStatus::Invalid => write!(f, "Invalid"),
        }
    }
}

/// Snapshot of an optimization run: the iterate, exact values at it, and
/// work counters.
#[derive(Debug, Clone)]
pub struct OptResults {
    pub status: OptStatus,
    pub x: Vec<f64>,
    pub cost_vals: Vec<f64>,
    pub cnt_viols: Vec<f64>,
    pub total_cost: f64,
    pub n_func_evals: usize,
    pub n_qp_solves: usize,
}

impl Default for OptResults {
    fn default() -> Self {
        OptResults {
            status: OptStatus::Invalid,
            x: Vec::new(),
            cost_vals: Vec::new(),
            cnt_viols: Vec::new(),
            total_cost: 0.0,
            n_func_evals: 0,
            n_qp_solves: 0,
        }
    }
}

impl OptResults {
    pub fn clear(&mut self) {
        *self = OptResults::default();
    }
}

impl fmt::Display for OptResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Optimization results:")?;
        writeln!(f, "status: {}", self.status)?;
        writeln!(f, "cost values: {:?}", self.cost_vals)?;
        writeln!(f, "constraint violations: {:?}", self.cnt_viols)?;
        writeln!(f, "n func evals: {}", self.n_func_evals)?;
        writeln!(f, "n qp solves: {}", self.n_qp_solves)
    }
}

/// Observer invoked at the start of every SQP iteration and once at
/// termination. Callbacks must not mutate the problem.
pub type Callback = Box<dyn FnMut(&OptProblem, &OptResults)>;

/// Tuning parameters for [`BasicTrustRegionSqp`].
#[derive(Debug, Clone)]
pub struct BasicTrustRegionSqpParams {
    /// Merit improvement ratio below which the trust region shrinks.
    pub improve_ratio_threshold: f64,

    /// Trust box size at which the stage is declared converged.
    pub min_trust_box_size: f64,

    /// Converged when the predicted merit improvement falls below this.
    pub min_approx_improve: f64,

    /// Converged when the predicted fractional improvement falls below this.
    pub min_approx_improve_frac: f64,

    /// SQP iteration cap per penalty stage.
    pub max_iter: usize,

    pub trust_shrink_ratio: f64,
    pub trust_expand_ratio: f64,

    /// Maximum per-constraint violation considered feasible.
    pub cnt_tolerance: f64,

    /// Outer-loop cap on penalty increases.
    pub max_merit_coeff_increases: usize,

    pub merit_coeff_increase_ratio: f64,

    /// Advisory wall-time budget in seconds, checked at iteration
    /// boundaries.
    pub max_time: f64,

    /// Initial penalty coefficient.
    pub merit_error_coeff: f64,

    /// Initial trust box size.
    pub trust_box_size: f64,

    /// Write the CSV result streams under `log_dir`.
    pub log_results: bool,
    pub log_dir: PathBuf,

    /// Directory for the model dump written on a subproblem solve failure.
    pub fail_dump_dir: PathBuf,
}

impl Default for BasicTrustRegionSqpParams {
    fn default() -> Self {
        BasicTrustRegionSqpParams {
            improve_ratio_threshold: 0.25,
            min_trust_box_size: 1e-4,
            min_approx_improve: 1e-4,
            min_approx_improve_frac: f64::NEG_INFINITY,
            max_iter: 50,
            trust_shrink_ratio: 0.1,
            trust_expand_ratio: 1.5,
            cnt_tolerance: 1e-4,
            max_merit_coeff_increases: 5,
            merit_coeff_increase_ratio: 10.0,
            max_time: f64::INFINITY,
            merit_error_coeff: 10.0,
            trust_box_size: 1e-1,
            log_results: false,
            log_dir: PathBuf::from("/tmp"),
            fail_dump_dir: PathBuf::from("/tmp"),
        }
    }
}

impl BasicTrustRegionSqpParams {
    /// Set the wall-time budget in seconds.
    pub fn with_max_time(mut self, seconds: f64) -> Self {
        self.max_time = seconds;
        self
    }

    /// Enable the CSV result streams in `dir`.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self.log_results = true;
        self
    }
}

pub(crate) fn evaluate_costs(costs: &[Box<dyn Cost>], x: &[f64]) -> Vec<f64> {
    costs.iter().map(|c| c.value(x)).collect()
}

pub(crate) fn evaluate_cnt_viols(cnts: &[Box<dyn Constraint>], x: &[f64]) -> Vec<f64> {
    cnts.iter().map(|c| c.violation(x)).collect()
}

fn convexify_costs(
    costs: &[Box<dyn Cost>],
    x: &[f64],
    model: &mut dyn Model,
) -> Vec<ConvexObjective> {
    costs.iter().map(|c| c.convex(x, model)).collect()
}

fn convexify_cnts(
    cnts: &[Box<dyn Constraint>],
    x: &[f64],
    model: &mut dyn Model,
) -> Vec<ConvexConstraints> {
    cnts.iter().map(|c| c.convex(x, model)).collect()
}

pub(crate) fn evaluate_model_costs(models: &[ConvexObjective], x: &[f64]) -> Vec<f64> {
    models.iter().map(|m| m.value(x)).collect()
}

pub(crate) fn evaluate_model_cnt_viols(models: &[ConvexConstraints], x: &[f64]) -> Vec<f64> {
    models.iter().map(|m| m.violation(x)).collect()
}

/// Convert linearized constraints into L1 penalty objectives: every
/// equality becomes `err_coeff · |aff|`, every inequality
/// `err_coeff · max(0, aff)`. One objective per constraint, no quadratic
/// part.
// TODO: per-constraint penalty coefficients
pub fn cnts_to_costs(cnt_models: &[ConvexConstraints], err_coeff: f64) -> Vec<ConvexObjective> {
    cnt_models
        .iter()
        .map(|cnt| {
            let mut obj = ConvexObjective::new();
            for aff in &cnt.eqs {
                obj.add_abs(aff.clone(), err_coeff);
            }
            for aff in &cnt.ineqs {
                obj.add_hinge(aff.clone(), err_coeff);
            }
            obj
        })
        .collect()
}

/// Intersect the variable box with `[x - size, x + size]`.
fn set_trust_box_constraints(
    model: &mut dyn Model,
    vars: &[Var],
    x: &[f64],
    lb: &[f64],
    ub: &[f64],
    size: f64,
) {
    debug_assert_eq!(vars.len(), x.len());
    let lb_trust: Vec<f64> = x.iter().zip(lb).map(|(&xi, &l)| (xi - size).max(l)).collect();
    let ub_trust: Vec<f64> = x.iter().zip(ub).map(|(&xi, &u)| (xi + size).min(u)).collect();
    model.set_var_bounds(vars, &lb_trust, &ub_trust);
}

/// Outcome of one trust-region inner loop.
enum Step {
    /// Candidate accepted; the iterate moved and the box expanded.
    Accepted,

    /// Predicted improvement below threshold: stage converged.
    SmallImprove,

    /// Box shrank below its minimum without an acceptable step.
    TrustTiny,

    /// The subproblem solver did not return a solution.
    SolverFailed,
}

/// Outcome of one penalty stage.
enum SqpExit {
    Converged,
    IterLimit,
    Failed,
}

/// Trust-region SQP solver over an [`OptProblem`].
pub struct BasicTrustRegionSqp {
    prob: OptProblem,
    pub param: BasicTrustRegionSqpParams,
    results: OptResults,
    callbacks: Vec<Callback>,
}

impl BasicTrustRegionSqp {
    pub fn new(prob: OptProblem) -> Self {
        BasicTrustRegionSqp {
            prob,
            param: BasicTrustRegionSqpParams::default(),
            results: OptResults::default(),
            callbacks: Vec::new(),
        }
    }

    pub fn with_params(mut self, param: BasicTrustRegionSqpParams) -> Self {
        self.param = param;
        self
    }

    pub fn problem(&self) -> &OptProblem {
        &self.prob
    }

    pub fn results(&self) -> &OptResults {
        &self.results
    }

    /// Register an observer called at the start of every SQP iteration and
    /// once at termination.
    pub fn add_callback(&mut self, cb: Callback) {
        self.callbacks.push(cb);
    }

    /// Set the initial iterate. Resets all previous results.
    pub fn initialize(&mut self, x: &[f64]) -> Result<(), SqpError> {
        if x.len() != self.prob.num_vars() {
            return Err(SqpError::InitializationLength {
                expected: self.prob.num_vars(),
                got: x.len(),
            });
        }
        self.results.clear();
        self.results.x = x.to_vec();
        Ok(())
    }

    fn call_callbacks(&mut self) {
        for cb in &mut self.callbacks {
            cb(&self.prob, &self.results);
        }
    }

    /// Run the optimization to a terminal status.
    ///
    /// # Panics
    ///
    /// Panics if [`BasicTrustRegionSqp::initialize`] was never called or the
    /// problem has neither costs nor constraints.
    pub fn optimize(&mut self) -> OptStatus {
        assert!(
            !self.results.x.is_empty(),
            "initialize() must be called before optimize()"
        );
        assert!(
            !self.prob.costs.is_empty() || !self.prob.cnts.is_empty(),
            "problem has no costs or constraints"
        );

        let mut iteration_results = IterationResults::new(
            self.prob.var_names().to_vec(),
            self.prob.cost_names(),
            self.prob.cnt_names(),
        );

        let mut logs = if self.param.log_results {
            match LogStreams::open(&self.param.log_dir) {
                Ok(streams) => Some(streams),
                Err(e) => {
                    warn!(
                        "could not open result logs in {}: {}",
                        self.param.log_dir.display(),
                        e
                    );
                    None
                }
            }
        } else {
            None
        };

        self.results.x = self.prob.closest_feasible_point(&self.results.x);

        let prob_vars = self.prob.vars.clone();
        let lb = self.prob.lower_bounds.clone();
        let ub = self.prob.upper_bounds.clone();

        let start = Instant::now();
        let mut merit_increases = 0;

        let retval = 'penalty: loop {
            if merit_increases >= self.param.max_merit_coeff_increases {
                info!("optimization couldn't satisfy all constraints");
                break 'penalty OptStatus::PenaltyIterationLimit;
            }

            let mut iter = 0;
            let sqp_exit = 'sqp: loop {
                iter += 1;
                self.call_callbacks();

                debug!("current iterate: {:?}", self.results.x);
                info!("iteration {}", iter);

                if start.elapsed().as_secs_f64() > self.param.max_time {
                    info!("time budget exhausted");
                    break 'sqp SqpExit::IterLimit;
                }

                // only happens on the first iteration
                if self.results.cost_vals.is_empty() && self.results.cnt_viols.is_empty() {
                    self.results.cnt_viols = evaluate_cnt_viols(&self.prob.cnts, &self.results.x);
                    self.results.cost_vals = evaluate_costs(&self.prob.costs, &self.results.x);
                    debug_assert_eq!(self.results.n_func_evals, 0);
                    self.results.n_func_evals += 1;
                }

                let model: &mut dyn Model = &mut *self.prob.model;
                let costs: &[Box<dyn Cost>] = &self.prob.costs;
                let cnts: &[Box<dyn Constraint>] = &self.prob.cnts;

                let mut cost_models = convexify_costs(costs, &self.results.x, &mut *model);
                let cnt_models = convexify_cnts(cnts, &self.results.x, &mut *model);
                let mut cnt_cost_models =
                    cnts_to_costs(&cnt_models, self.param.merit_error_coeff);
                model.update();
                for cost in cost_models.iter_mut() {
                    cost.install(&mut *model);
                }
                for cost in cnt_cost_models.iter_mut() {
                    cost.install(&mut *model);
                }
                model.update();

                let mut objective = QuadExpr::new();
                for co in &cost_models {
                    objective += &co.quad;
                }
                for co in &cnt_cost_models {
                    objective += &co.quad;
                }
                model.set_objective(objective);

                let step = 'trust: loop {
                    if self.param.trust_box_size < self.param.min_trust_box_size {
                        break 'trust Step::TrustTiny;
                    }

                    set_trust_box_constraints(
                        &mut *model,
                        &prob_vars,
                        &self.results.x,
                        &lb,
                        &ub,
                        self.param.trust_box_size,
                    );
                    let status = model.optimize();
                    self.results.n_qp_solves += 1;
                    if status != CvxStatus::Solved {
                        let lp = self.param.fail_dump_dir.join("fail.lp");
                        let ilp = self.param.fail_dump_dir.join("fail.ilp");
                        error!(
                            "convex solver failed ({}); saving model to {} and {}",
                            status,
                            lp.display(),
                            ilp.display()
                        );
                        for path in [&lp, &ilp] {
                            if let Err(e) = model.write_to_file(path) {
                                warn!("could not write {}: {}", path.display(), e);
                            }
                        }
                        break 'trust Step::SolverFailed;
                    }

                    iteration_results.update(
                        &self.results,
                        &*model,
                        &cost_models,
                        &cnt_models,
                        &cnt_cost_models,
                        costs,
                        cnts,
                        self.param.merit_error_coeff,
                    );
                    if log::log_enabled!(log::Level::Info) {
                        info!("\n{}", iteration_results);
                    }

                    if let Some(streams) = logs.as_mut() {
                        streams.record(&iteration_results, self.results.n_func_evals == 1);
                    }
                    self.results.n_func_evals += 1;

                    if iteration_results.approx_merit_improve < -1e-5 {
                        error!(
                            "approximate merit function got worse ({:.3e}); \
                             the convexification is probably wrong to zeroth order",
                            iteration_results.approx_merit_improve
                        );
                    }

                    if iteration_results.old_merit.abs() <= MERIT_EPSILON
                        && iteration_results.approx_merit_improve.abs() <= MERIT_EPSILON
                    {
                        // nothing left to improve; the fractional and ratio
                        // tests below would divide zero by zero
                        info!("converged because the merit function is already zero");
                        break 'trust Step::SmallImprove;
                    }

                    if iteration_results.approx_merit_improve < self.param.min_approx_improve {
                        info!(
                            "converged because improvement was small ({:.3e} < {:.3e})",
                            iteration_results.approx_merit_improve, self.param.min_approx_improve
                        );
                        break 'trust Step::SmallImprove;
                    }
                    if iteration_results.approx_merit_improve / iteration_results.old_merit
                        < self.param.min_approx_improve_frac
                    {
                        info!(
                            "converged because improvement ratio was small ({:.3e} < {:.3e})",
                            iteration_results.approx_merit_improve / iteration_results.old_merit,
                            self.param.min_approx_improve_frac
                        );
                        break 'trust Step::SmallImprove;
                    } else if iteration_results.exact_merit_improve < 0.0
                        || iteration_results.merit_improve_ratio
                            < self.param.improve_ratio_threshold
                    {
                        self.param.trust_box_size *= self.param.trust_shrink_ratio;
                        info!(
                            "shrunk trust region. new box size: {:.4}",
                            self.param.trust_box_size
                        );
                    } else {
                        self.results.x = iteration_results.new_x.clone();
                        self.results.cost_vals = iteration_results.new_cost_vals.clone();
                        self.results.cnt_viols = iteration_results.new_cnt_viols.clone();
                        self.param.trust_box_size *= self.param.trust_expand_ratio;
                        info!(
                            "expanded trust region. new box size: {:.4}",
                            self.param.trust_box_size
                        );
                        break 'trust Step::Accepted;
                    }
                };

                // scoped release: this iteration's auxiliaries go away on
                // every path before the next convexification
                for co in cost_models.iter_mut() {
                    co.release(&mut *model);
                }
                for co in cnt_cost_models.iter_mut() {
                    co.release(&mut *model);
                }
                model.update();

                match step {
                    Step::SolverFailed => break 'sqp SqpExit::Failed,
                    Step::SmallImprove => break 'sqp SqpExit::Converged,
                    Step::TrustTiny => {
                        info!("converged because trust region is tiny");
                        break 'sqp SqpExit::Converged;
                    }
                    Step::Accepted => {
                        if iter >= self.param.max_iter {
                            info!("iteration limit");
                            break 'sqp SqpExit::IterLimit;
                        }
                    }
                }
            };

            match sqp_exit {
                SqpExit::Failed => break 'penalty OptStatus::Failed,
                SqpExit::IterLimit => break 'penalty OptStatus::IterationLimit,
                SqpExit::Converged => {
                    if self.results.cnt_viols.is_empty()
                        || vec_max(&self.results.cnt_viols) < self.param.cnt_tolerance
                    {
                        if !self.results.cnt_viols.is_empty() {
                            info!(
                                "all constraints are satisfied (to tolerance {:.2e})",
                                self.param.cnt_tolerance
                            );
                        }
                        break 'penalty OptStatus::Converged;
                    }
                    info!("not all constraints are satisfied; increasing penalties");
                    self.param.merit_error_coeff *= self.param.merit_coeff_increase_ratio;
                    self.param.trust_box_size = self.param.trust_box_size.max(
                        self.param.min_trust_box_size / self.param.trust_shrink_ratio * 1.5,
                    );
                    merit_increases += 1;
                }
            }
        };

        debug_assert!(retval != OptStatus::Invalid, "should never happen");
        self.results.status = retval;
        self.results.total_cost = vec_sum(&self.results.cost_vals);
        info!("\n==================\n{}==================", self.results);
        self.call_callbacks();
        retval
    }
}
