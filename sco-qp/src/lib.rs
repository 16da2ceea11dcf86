//! Dense QP backend for the sequential convex optimization core.
//!
//! [`DenseQpModel`] keeps an incremental in-memory convex model (named
//! variables with bounds, linear equality/inequality constraints addressed
//! by handle, one quadratic objective) and implements `sco_core::Model` on
//! top of the operator-splitting solver in [`admm`]. Trajectory subproblems
//! are small and dense, so the assembly is plain dense matrices.
//!
//! Variable removal follows the core's auxiliary-variable discipline: only
//! the most recently created variables may be removed, so the surviving
//! columns keep their indices and [`Model::update`] just truncates.

pub mod admm;

use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use log::warn;
use nalgebra::{DMatrix, DVector};

use sco_core::{AffExpr, Cnt, CvxStatus, Model, QuadExpr, Var};

use crate::admm::{AdmmSettings, AdmmStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sense {
    Eq,
    Ineq,
}

#[derive(Debug, Clone)]
struct VarData {
    name: String,
    lb: f64,
    ub: f64,
    removed: bool,
}

#[derive(Debug, Clone)]
struct CntData {
    aff: AffExpr,
    sense: Sense,
    name: String,
}

/// Incremental dense QP model.
#[derive(Default)]
pub struct DenseQpModel {
    vars: Vec<VarData>,
    cnts: Vec<Option<CntData>>,
    objective: QuadExpr,
    solution: Vec<f64>,
    settings: AdmmSettings,
}

impl DenseQpModel {
    pub fn new() -> Self {
        Self::with_settings(AdmmSettings::default())
    }

    pub fn with_settings(settings: AdmmSettings) -> Self {
        DenseQpModel {
            vars: Vec::new(),
            cnts: Vec::new(),
            objective: QuadExpr::new(),
            solution: Vec::new(),
            settings,
        }
    }

    fn live_cnts(&self) -> impl Iterator<Item = (usize, &CntData)> + '_ {
        self.cnts
            .iter()
            .enumerate()
            .filter_map(|(id, c)| c.as_ref().map(|c| (id, c)))
    }

    /// Assemble `(P, q, A, l, u)` for the solver: one row per live
    /// constraint plus one bound row per variable.
    fn assemble(&self) -> (DMatrix<f64>, DVector<f64>, DMatrix<f64>, DVector<f64>, DVector<f64>) {
        let n = self.vars.len();
        let live: Vec<&CntData> = self.cnts.iter().flatten().collect();
        let m = live.len() + n;

        let mut p = DMatrix::zeros(n, n);
        for k in 0..self.objective.coeffs.len() {
            let i = self.objective.vars1[k].index();
            let j = self.objective.vars2[k].index();
            let c = self.objective.coeffs[k];
            if i == j {
                p[(i, i)] += 2.0 * c;
            } else {
                p[(i, j)] += c;
                p[(j, i)] += c;
            }
        }

        let mut q = DVector::zeros(n);
        for (c, v) in self
            .objective
            .affexpr
            .coeffs
            .iter()
            .zip(&self.objective.affexpr.vars)
        {
            q[v.index()] += c;
        }

        let mut a = DMatrix::zeros(m, n);
        let mut l = DVector::from_element(m, f64::NEG_INFINITY);
        let mut u = DVector::from_element(m, f64::INFINITY);
        for (r, cnt) in live.iter().enumerate() {
            for (c, v) in cnt.aff.coeffs.iter().zip(&cnt.aff.vars) {
                a[(r, v.index())] += c;
            }
            match cnt.sense {
                Sense::Eq => {
                    l[r] = -cnt.aff.constant;
                    u[r] = -cnt.aff.constant;
                }
                Sense::Ineq => {
                    u[r] = -cnt.aff.constant;
                }
            }
        }
        for (j, var) in self.vars.iter().enumerate() {
            let r = live.len() + j;
            a[(r, j)] = 1.0;
            l[r] = var.lb;
            u[r] = var.ub;
        }

        (p, q, a, l, u)
    }

    fn add_cnt(&mut self, aff: AffExpr, sense: Sense, name: &str) -> Cnt {
        self.cnts.push(Some(CntData {
            aff,
            sense,
            name: name.to_string(),
        }));
        Cnt::new(self.cnts.len() - 1)
    }

    fn render_aff(&self, aff: &AffExpr) -> String {
        let mut out = String::new();
        let _ = write!(out, "{}", aff.constant);
        for (c, v) in aff.coeffs.iter().zip(&aff.vars) {
            let _ = write!(out, " + {} {}", c, self.vars[v.index()].name);
        }
        out
    }

    fn render_objective(&self) -> String {
        let mut out = self.render_aff(&self.objective.affexpr);
        for k in 0..self.objective.coeffs.len() {
            let _ = write!(
                out,
                " + {} {} {}",
                self.objective.coeffs[k],
                self.vars[self.objective.vars1[k].index()].name,
                self.vars[self.objective.vars2[k].index()].name
            );
        }
        out
    }
}

impl Model for DenseQpModel {
    fn add_vars(&mut self, names: &[&str]) -> Vec<Var> {
        let start = self.vars.len();
        for name in names {
            self.vars.push(VarData {
                name: name.to_string(),
                lb: f64::NEG_INFINITY,
                ub: f64::INFINITY,
                removed: false,
            });
        }
        (start..self.vars.len()).map(Var::new).collect()
    }

    fn add_aux_vars(&mut self, count: usize, prefix: &str) -> Vec<Var> {
        let start = self.vars.len();
        for k in 0..count {
            self.vars.push(VarData {
                name: format!("{}{}", prefix, start + k),
                lb: 0.0,
                ub: f64::INFINITY,
                removed: false,
            });
        }
        (start..self.vars.len()).map(Var::new).collect()
    }

    fn remove_vars(&mut self, vars: &[Var]) {
        for v in vars {
            self.vars[v.index()].removed = true;
        }
    }

    fn set_var_bounds(&mut self, vars: &[Var], lb: &[f64], ub: &[f64]) {
        debug_assert_eq!(vars.len(), lb.len());
        debug_assert_eq!(vars.len(), ub.len());
        for (i, v) in vars.iter().enumerate() {
            self.vars[v.index()].lb = lb[i];
            self.vars[v.index()].ub = ub[i];
        }
    }

    fn add_eq_cnt(&mut self, aff: AffExpr, name: &str) -> Cnt {
        self.add_cnt(aff, Sense::Eq, name)
    }

    fn add_ineq_cnt(&mut self, aff: AffExpr, name: &str) -> Cnt {
        self.add_cnt(aff, Sense::Ineq, name)
    }

    fn remove_cnts(&mut self, cnts: &[Cnt]) {
        for c in cnts {
            self.cnts[c.id()] = None;
        }
    }

    fn set_objective(&mut self, objective: QuadExpr) {
        self.objective = objective;
    }

    fn update(&mut self) {
        while matches!(self.vars.last(), Some(v) if v.removed) {
            self.vars.pop();
        }
        assert!(
            self.vars.iter().all(|v| !v.removed),
            "only trailing (auxiliary) variables can be removed"
        );
        if cfg!(debug_assertions) {
            for (_, cnt) in self.live_cnts() {
                for v in &cnt.aff.vars {
                    debug_assert!(
                        v.index() < self.vars.len(),
                        "live constraint references a removed variable"
                    );
                }
            }
        }
    }

    fn optimize(&mut self) -> CvxStatus {
        debug_assert!(
            self.vars.iter().all(|v| !v.removed),
            "update() must commit removals before optimize()"
        );
        if self.vars.is_empty() {
            self.solution.clear();
            return CvxStatus::Solved;
        }
        let (p, q, a, l, u) = self.assemble();
        let sol = admm::solve(&p, &q, &a, &l, &u, &self.settings);
        match sol.status {
            AdmmStatus::Solved => {
                self.solution = sol.x.iter().copied().collect();
                CvxStatus::Solved
            }
            AdmmStatus::MaxIters => {
                warn!(
                    "QP did not converge within {} iterations",
                    self.settings.max_iter
                );
                CvxStatus::Failed
            }
            AdmmStatus::NumericalError => {
                warn!("QP solve hit a numerical error");
                CvxStatus::Failed
            }
        }
    }

    fn vars(&self) -> Vec<Var> {
        (0..self.vars.len())
            .filter(|&i| !self.vars[i].removed)
            .map(Var::new)
            .collect()
    }

    fn num_vars(&self) -> usize {
        self.vars.iter().filter(|v| !v.removed).count()
    }

    fn var_values(&self, vars: &[Var]) -> Vec<f64> {
        vars.iter()
            .map(|v| {
                assert!(
                    v.index() < self.solution.len(),
                    "var_values requires a prior successful optimize()"
                );
                self.solution[v.index()]
            })
            .collect()
    }

    fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        writeln!(
            w,
            "\\ dense QP model: {} variables, {} constraints",
            self.vars.len(),
            self.live_cnts().count()
        )?;
        writeln!(w, "Minimize")?;
        writeln!(w, "  {}", self.render_objective())?;
        writeln!(w, "Subject To")?;
        for (id, cnt) in self.live_cnts() {
            let rel = match cnt.sense {
                Sense::Eq => "=",
                Sense::Ineq => "<=",
            };
            let label = if cnt.name.is_empty() {
                format!("c{}", id)
            } else {
                cnt.name.clone()
            };
            writeln!(w, "  {}: {} {} 0", label, self.render_aff(&cnt.aff), rel)?;
        }
        writeln!(w, "Bounds")?;
        for var in &self.vars {
            writeln!(w, "  {} <= {} <= {}", var.lb, var.name, var.ub)?;
        }
        writeln!(w, "End")?;
        w.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solve_equality_constrained_qp() {
        // min x^2 + y^2  s.t.  x + y - 1 = 0
        let mut model = DenseQpModel::new();
        let vars = model.add_vars(&["x", "y"]);

        let mut quad = QuadExpr::new();
        quad.add_quad_term(1.0, vars[0], vars[0]);
        quad.add_quad_term(1.0, vars[1], vars[1]);
        model.set_objective(quad);

        let mut aff = AffExpr::from_constant(-1.0);
        aff.add_term(1.0, vars[0]);
        aff.add_term(1.0, vars[1]);
        model.add_eq_cnt(aff, "line");

        model.update();
        assert_eq!(model.optimize(), CvxStatus::Solved);
        let x = model.var_values(&vars);
        assert!((x[0] - 0.5).abs() < 1e-5);
        assert!((x[1] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_bounds_clamp_solution() {
        // min (x - 5)^2 with x in [0, 1]
        let mut model = DenseQpModel::new();
        let vars = model.add_vars(&["x"]);
        model.set_var_bounds(&vars, &[0.0], &[1.0]);

        let mut quad = QuadExpr::new();
        quad.affexpr.constant = 25.0;
        quad.affexpr.add_term(-10.0, vars[0]);
        quad.add_quad_term(1.0, vars[0], vars[0]);
        model.set_objective(quad);

        model.update();
        assert_eq!(model.optimize(), CvxStatus::Solved);
        assert!((model.var_values(&vars)[0] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_aux_removal_compacts_trailing_columns() {
        let mut model = DenseQpModel::new();
        let vars = model.add_vars(&["x", "y"]);
        let aux = model.add_aux_vars(2, "t");
        assert_eq!(aux[0].index(), 2);
        assert_eq!(aux[1].index(), 3);
        assert_eq!(model.num_vars(), 4);

        model.remove_vars(&aux);
        model.update();
        assert_eq!(model.num_vars(), 2);

        // fresh auxiliaries reuse the freed columns
        let aux2 = model.add_aux_vars(1, "t");
        assert_eq!(aux2[0].index(), 2);
        let _ = vars;
    }

    #[test]
    #[should_panic]
    fn test_non_trailing_removal_rejected() {
        let mut model = DenseQpModel::new();
        let vars = model.add_vars(&["x", "y"]);
        model.remove_vars(&vars[..1]);
        model.update();
    }

    #[test]
    fn test_constraint_handles_survive_removal() {
        let mut model = DenseQpModel::new();
        let vars = model.add_vars(&["x"]);
        let c1 = model.add_ineq_cnt(AffExpr::from_var(vars[0]), "a");
        let c2 = model.add_ineq_cnt(AffExpr::from_var(vars[0]), "b");
        model.remove_cnts(&[c1]);
        model.update();
        // the second handle still addresses its constraint
        assert_eq!(model.live_cnts().count(), 1);
        model.remove_cnts(&[c2]);
        assert_eq!(model.live_cnts().count(), 0);
    }

    #[test]
    fn test_write_to_file_smoke() {
        let mut model = DenseQpModel::new();
        let vars = model.add_vars(&["x"]);
        model.set_var_bounds(&vars, &[0.0], &[2.0]);
        model.add_ineq_cnt(AffExpr::from_var(vars[0]), "cap");
        let path = std::env::temp_dir().join("dense_qp_model_dump.lp");
        model.write_to_file(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("Minimize"));
        assert!(text.contains("cap:"));
        let _ = std::fs::remove_file(&path);
    }
}
