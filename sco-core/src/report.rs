//! Per-iteration solve record and result log streams.
//!
//! [`IterationResults`] captures everything one trust-region step needs for
//! the accept/shrink decision: exact values at the old point, convex-model
//! values at the subproblem solution, exact values at the candidate point,
//! and the derived merit quantities. [`LogStreams`] appends one CSV-shaped
//! record per evaluated step to four files in the configured directory;
//! write failures are logged and never abort the optimization.

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use log::warn;

use crate::convex::{ConvexConstraints, ConvexObjective};
use crate::model::Model;
use crate::optimizer::{
    evaluate_cnt_viols, evaluate_costs, evaluate_model_cnt_viols, evaluate_model_costs, OptResults,
};
use crate::problem::{Constraint, Cost};
use crate::util::numerics::vec_sum;

/// Per-component improvements below this are reported without a ratio.
const RATIO_EPSILON: f64 = 1e-8;

/// Solver summary log file name.
pub const SOLVER_LOG_FILE: &str = "trajopt_solver.log";
/// Variable values log file name.
pub const VARS_LOG_FILE: &str = "trajopt_vars.log";
/// Per-cost improvements log file name.
pub const COSTS_LOG_FILE: &str = "trajopt_costs.log";
/// Per-constraint improvements log file name.
pub const CNTS_LOG_FILE: &str = "trajopt_constraints.log";

/// Record of one trust-region step.
#[derive(Debug, Clone, Default)]
pub struct IterationResults {
    pub var_names: Vec<String>,
    pub cost_names: Vec<String>,
    pub cnt_names: Vec<String>,

    /// Subproblem solution over all backend variables (problem + auxiliary).
    pub model_var_vals: Vec<f64>,

    /// Convex-objective values at `model_var_vals`.
    pub model_cost_vals: Vec<f64>,

    /// Linearized-constraint violations at `model_var_vals`.
    pub model_cnt_viols: Vec<f64>,

    /// Candidate iterate: the first `n` entries of `model_var_vals`.
    pub new_x: Vec<f64>,

    /// Exact cost values at `new_x`.
    pub new_cost_vals: Vec<f64>,

    /// Exact constraint violations at `new_x`.
    pub new_cnt_viols: Vec<f64>,

    /// Exact cost values at the current iterate.
    pub old_cost_vals: Vec<f64>,

    /// Exact constraint violations at the current iterate.
    pub old_cnt_viols: Vec<f64>,

    pub old_merit: f64,
    pub model_merit: f64,
    pub new_merit: f64,
    pub approx_merit_improve: f64,
    pub exact_merit_improve: f64,
    pub merit_improve_ratio: f64,
    pub merit_error_coeff: f64,
}

impl IterationResults {
    pub fn new(var_names: Vec<String>, cost_names: Vec<String>, cnt_names: Vec<String>) -> Self {
        IterationResults {
            var_names,
            cost_names,
            cnt_names,
            ..Default::default()
        }
    }

    /// Refresh the record from the just-solved subproblem.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        prev: &OptResults,
        model: &dyn Model,
        cost_models: &[ConvexObjective],
        cnt_models: &[ConvexConstraints],
        cnt_cost_models: &[ConvexObjective],
        costs: &[Box<dyn Cost>],
        cnts: &[Box<dyn Constraint>],
        merit_error_coeff: f64,
    ) {
        self.merit_error_coeff = merit_error_coeff;
        self.model_var_vals = model.var_values(&model.vars());
        self.model_cost_vals = evaluate_model_costs(cost_models, &self.model_var_vals);
        self.model_cnt_viols = evaluate_model_cnt_viols(cnt_models, &self.model_var_vals);

        // the problem's variables are the first n backend columns
        self.new_x = self.model_var_vals[..prev.x.len()].to_vec();

        if log::log_enabled!(log::Level::Debug) {
            let penalty_vals = evaluate_model_costs(cnt_cost_models, &self.model_var_vals);
            let scaled_viols: Vec<f64> = self
                .model_cnt_viols
                .iter()
                .map(|v| v * merit_error_coeff)
                .collect();
            // equal up to auxiliary-variable slack at the solver's tolerance
            log::debug!(
                "penalty objectives {:?} should match scaled model violations {:?}",
                penalty_vals,
                scaled_viols
            );
        }

        self.old_cost_vals = prev.cost_vals.clone();
        self.old_cnt_viols = prev.cnt_viols.clone();
        self.new_cost_vals = evaluate_costs(costs, &self.new_x);
        self.new_cnt_viols = evaluate_cnt_viols(cnts, &self.new_x);

        self.old_merit = vec_sum(&self.old_cost_vals) + merit_error_coeff * vec_sum(&self.old_cnt_viols);
        self.model_merit =
            vec_sum(&self.model_cost_vals) + merit_error_coeff * vec_sum(&self.model_cnt_viols);
        self.new_merit = vec_sum(&self.new_cost_vals) + merit_error_coeff * vec_sum(&self.new_cnt_viols);
        self.approx_merit_improve = self.old_merit - self.model_merit;
        self.exact_merit_improve = self.old_merit - self.new_merit;
        // a negligible prediction would make this 0/0; report zero instead
        // of letting NaN reach the accept decision
        self.merit_improve_ratio = if self.approx_merit_improve.abs() > RATIO_EPSILON {
            self.exact_merit_improve / self.approx_merit_improve
        } else {
            0.0
        };
    }

    /// Solver summary: one CSV row of the merit quantities.
    pub fn write_solver<W: Write>(&self, w: &mut W, header: bool) -> io::Result<()> {
        if header {
            writeln!(w, "DESCRIPTION,oldexact,dapprox,dexact,ratio")?;
        }
        writeln!(
            w,
            "Solver,{:.3e},{:.3e},{:.3e},{:.3e}",
            self.old_merit, self.approx_merit_improve, self.exact_merit_improve, self.merit_improve_ratio
        )?;
        w.flush()
    }

    /// Variable values at the candidate iterate.
    pub fn write_vars<W: Write>(&self, w: &mut W, header: bool) -> io::Result<()> {
        if header {
            write!(w, "NAMES")?;
            for name in &self.var_names {
                write!(w, ",{}", name)?;
            }
            writeln!(w)?;
        }
        write!(w, "VALUES")?;
        for x in &self.new_x {
            write!(w, ",{:e}", x)?;
        }
        writeln!(w)?;
        w.flush()
    }

    /// Four columns per cost: old value, predicted and exact improvement,
    /// their ratio (`nan` when the prediction is negligible).
    pub fn write_costs<W: Write>(&self, w: &mut W, header: bool) -> io::Result<()> {
        if header {
            write!(w, "COST NAMES")?;
            for name in &self.cost_names {
                write!(w, ",{0},{0},{0},{0}", name)?;
            }
            writeln!(w)?;
            write!(w, "DESCRIPTION")?;
            for _ in &self.cost_names {
                write!(w, ",oldexact,dapprox,dexact,ratio")?;
            }
            writeln!(w)?;
        }
        write!(w, "COSTS")?;
        for i in 0..self.old_cost_vals.len() {
            let approx = self.old_cost_vals[i] - self.model_cost_vals[i];
            let exact = self.old_cost_vals[i] - self.new_cost_vals[i];
            if approx.abs() > RATIO_EPSILON {
                write!(
                    w,
                    ",{:e},{:e},{:e},{:e}",
                    self.old_cost_vals[i],
                    approx,
                    exact,
                    exact / approx
                )?;
            } else {
                write!(w, ",{:e},{:e},{:e},nan", self.old_cost_vals[i], approx, exact)?;
            }
        }
        writeln!(w)?;
        w.flush()
    }

    /// Like [`IterationResults::write_costs`], scaled by the merit
    /// coefficient.
    pub fn write_constraints<W: Write>(&self, w: &mut W, header: bool) -> io::Result<()> {
        if header {
            write!(w, "CONSTRAINT NAMES")?;
            for name in &self.cnt_names {
                write!(w, ",{0},{0},{0},{0}", name)?;
            }
            writeln!(w)?;
            write!(w, "DESCRIPTION")?;
            for _ in &self.cnt_names {
                write!(w, ",oldexact,dapprox,dexact,ratio")?;
            }
            writeln!(w)?;
        }
        write!(w, "CONSTRAINTS")?;
        let mu = self.merit_error_coeff;
        for i in 0..self.old_cnt_viols.len() {
            let approx = self.old_cnt_viols[i] - self.model_cnt_viols[i];
            let exact = self.old_cnt_viols[i] - self.new_cnt_viols[i];
            if approx.abs() > RATIO_EPSILON {
                write!(
                    w,
                    ",{:e},{:e},{:e},{:e}",
                    mu * self.old_cnt_viols[i],
                    mu * approx,
                    mu * exact,
                    exact / approx
                )?;
            } else {
                write!(
                    w,
                    ",{:e},{:e},{:e},nan",
                    mu * self.old_cnt_viols[i],
                    mu * approx,
                    mu * exact
                )?;
            }
        }
        writeln!(w)?;
        w.flush()
    }
}

impl fmt::Display for IterationResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>15} | {:>10} | {:>10} | {:>10} | {:>10}",
            "", "oldexact", "dapprox", "dexact", "ratio"
        )?;
        writeln!(f, "{:>15} | {:-^46}", "COSTS", "")?;
        for i in 0..self.old_cost_vals.len() {
            let approx = self.old_cost_vals[i] - self.model_cost_vals[i];
            let exact = self.old_cost_vals[i] - self.new_cost_vals[i];
            if approx.abs() > RATIO_EPSILON {
                writeln!(
                    f,
                    "{:>15} | {:>10.3e} | {:>10.3e} | {:>10.3e} | {:>10.3e}",
                    self.cost_names[i], self.old_cost_vals[i], approx, exact, exact / approx
                )?;
            } else {
                writeln!(
                    f,
                    "{:>15} | {:>10.3e} | {:>10.3e} | {:>10.3e} | {:>10}",
                    self.cost_names[i], self.old_cost_vals[i], approx, exact, "------"
                )?;
            }
        }
        if !self.cnt_names.is_empty() {
            writeln!(f, "{:>15} | {:-^46}", "CONSTRAINTS", "")?;
            let mu = self.merit_error_coeff;
            for i in 0..self.old_cnt_viols.len() {
                let approx = self.old_cnt_viols[i] - self.model_cnt_viols[i];
                let exact = self.old_cnt_viols[i] - self.new_cnt_viols[i];
                if approx.abs() > RATIO_EPSILON {
                    writeln!(
                        f,
                        "{:>15} | {:>10.3e} | {:>10.3e} | {:>10.3e} | {:>10.3e}",
                        self.cnt_names[i],
                        mu * self.old_cnt_viols[i],
                        mu * approx,
                        mu * exact,
                        exact / approx
                    )?;
                } else {
                    writeln!(
                        f,
                        "{:>15} | {:>10.3e} | {:>10.3e} | {:>10.3e} | {:>10}",
                        self.cnt_names[i],
                        mu * self.old_cnt_viols[i],
                        mu * approx,
                        mu * exact,
                        "------"
                    )?;
                }
            }
        }
        writeln!(
            f,
            "{:>15} | {:>10.3e} | {:>10.3e} | {:>10.3e} | {:>10.3e}",
            "TOTAL",
            self.old_merit,
            self.approx_merit_improve,
            self.exact_merit_improve,
            self.merit_improve_ratio
        )
    }
}

/// The four CSV result streams, opened together in one directory.
pub struct LogStreams {
    solver: BufWriter<File>,
    vars: BufWriter<File>,
    costs: BufWriter<File>,
    cnts: BufWriter<File>,
}

impl LogStreams {
    pub fn open(dir: &Path) -> io::Result<Self> {
        Ok(LogStreams {
            solver: BufWriter::new(File::create(dir.join(SOLVER_LOG_FILE))?),
            vars: BufWriter::new(File::create(dir.join(VARS_LOG_FILE))?),
            costs: BufWriter::new(File::create(dir.join(COSTS_LOG_FILE))?),
            cnts: BufWriter::new(File::create(dir.join(CNTS_LOG_FILE))?),
        })
    }

    /// Append one record to every stream, best effort.
    pub fn record(&mut self, results: &IterationResults, header: bool) {
        if let Err(e) = self.write_all(results, header) {
            warn!("failed to write iteration logs: {}", e);
        }
    }

    fn write_all(&mut self, results: &IterationResults, header: bool) -> io::Result<()> {
        results.write_solver(&mut self.solver, header)?;
        results.write_vars(&mut self.vars, header)?;
        results.write_costs(&mut self.costs, header)?;
        results.write_constraints(&mut self.cnts, header)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> IterationResults {
        let mut r = IterationResults::new(
            vec!["x".to_string(), "y".to_string()],
            vec!["quad".to_string()],
            vec!["line".to_string()],
        );
        r.old_cost_vals = vec![4.0];
        r.model_cost_vals = vec![1.0];
        r.new_cost_vals = vec![1.5];
        r.old_cnt_viols = vec![1.0];
        r.model_cnt_viols = vec![1.0];
        r.new_cnt_viols = vec![1.0];
        r.new_x = vec![0.5, 0.5];
        r.merit_error_coeff = 10.0;
        r.old_merit = 14.0;
        r.model_merit = 11.0;
        r.new_merit = 11.5;
        r.approx_merit_improve = 3.0;
        r.exact_merit_improve = 2.5;
        r.merit_improve_ratio = 2.5 / 3.0;
        r
    }

    #[test]
    fn test_write_solver_header_once() {
        let r = sample();
        let mut buf = Vec::new();
        r.write_solver(&mut buf, true).unwrap();
        r.write_solver(&mut buf, false).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "DESCRIPTION,oldexact,dapprox,dexact,ratio");
        assert!(lines[1].starts_with("Solver,"));
        assert!(lines[2].starts_with("Solver,"));
    }

    #[test]
    fn test_write_vars_row() {
        let r = sample();
        let mut buf = Vec::new();
        r.write_vars(&mut buf, true).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "NAMES,x,y");
        assert!(lines[1].starts_with("VALUES,"));
    }

    #[test]
    fn test_write_constraints_omits_ratio_for_flat_prediction() {
        // model violation equals old violation: dapprox is zero
        let r = sample();
        let mut buf = Vec::new();
        r.write_constraints(&mut buf, false).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains(",nan"));
    }

    #[test]
    fn test_update_reports_zero_ratio_for_flat_merit() {
        // no costs, no constraints: every merit quantity is zero and the
        // ratio must come out 0, not 0/0
        let mut r = IterationResults::new(Vec::new(), Vec::new(), Vec::new());
        let prev = OptResults::default();
        let model = crate::test_util::StubModel::new();
        r.update(&prev, &model, &[], &[], &[], &[], &[], 10.0);
        assert_eq!(r.merit_improve_ratio, 0.0);
        assert!(!r.merit_improve_ratio.is_nan());
    }

    #[test]
    fn test_display_has_total_row() {
        let r = sample();
        let text = format!("{}", r);
        assert!(text.contains("TOTAL"));
        assert!(text.contains("COSTS"));
        assert!(text.contains("CONSTRAINTS"));
    }
}
