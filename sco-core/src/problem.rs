//! Problem aggregation: variables, bounds, cost and constraint terms.

use crate::convex::{ConvexConstraints, ConvexObjective};
use crate::exprs::Var;
use crate::model::Model;
use crate::util::numerics::pospart;

/// Kind of a constraint term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CntKind {
    /// Components must equal zero.
    Eq,

    /// Components must be `<= 0`.
    Ineq,
}

/// A non-convex scalar cost term.
pub trait Cost {
    fn name(&self) -> &str;

    /// Exact value at a point.
    fn value(&self, x: &[f64]) -> f64;

    /// Local convex model at `x`. Must equal `value(x)` at the linearization
    /// point (after installation, with auxiliaries at their tight values).
    fn convex(&self, x: &[f64], model: &mut dyn Model) -> ConvexObjective;
}

/// A non-convex vector constraint term.
pub trait Constraint {
    fn name(&self) -> &str;

    fn kind(&self) -> CntKind;

    /// Raw component values `c_i(x)`.
    fn values(&self, x: &[f64]) -> Vec<f64>;

    /// First-order model of every component at `x`.
    fn convex(&self, x: &[f64], model: &mut dyn Model) -> ConvexConstraints;

    /// Component-wise violations: `|c_i|` for equalities, `max(0, c_i)` for
    /// inequalities.
    fn violations(&self, x: &[f64]) -> Vec<f64> {
        let vals = self.values(x);
        match self.kind() {
            CntKind::Eq => vals.iter().map(|v| v.abs()).collect(),
            CntKind::Ineq => vals.iter().map(|&v| pospart(v)).collect(),
        }
    }

    /// Total violation (sum of component violations).
    fn violation(&self, x: &[f64]) -> f64 {
        self.violations(x).iter().sum()
    }
}

/// A non-convex optimization problem: variables with bounds plus registered
/// cost and constraint terms, backed by a convex model for the subproblems.
///
/// The problem's variables are created first and therefore occupy the first
/// `n` columns of the backend model for the whole solve.
pub struct OptProblem {
    pub(crate) model: Box<dyn Model>,
    pub(crate) vars: Vec<Var>,
    pub(crate) var_names: Vec<String>,
    pub(crate) lower_bounds: Vec<f64>,
    pub(crate) upper_bounds: Vec<f64>,
    pub(crate) costs: Vec<Box<dyn Cost>>,
    pub(crate) cnts: Vec<Box<dyn Constraint>>,
}

impl OptProblem {
    pub fn new(model: Box<dyn Model>) -> Self {
        OptProblem {
            model,
            vars: Vec::new(),
            var_names: Vec::new(),
            lower_bounds: Vec::new(),
            upper_bounds: Vec::new(),
            costs: Vec::new(),
            cnts: Vec::new(),
        }
    }

    /// Create problem variables with the given bounds. Use `f64::INFINITY` /
    /// `f64::NEG_INFINITY` for unbounded sides.
    pub fn create_vars(&mut self, names: &[&str], lb: &[f64], ub: &[f64]) -> Vec<Var> {
        assert_eq!(names.len(), lb.len(), "one lower bound per variable");
        assert_eq!(names.len(), ub.len(), "one upper bound per variable");
        let vars = self.model.add_vars(names);
        self.model.set_var_bounds(&vars, lb, ub);
        self.model.update();
        self.vars.extend_from_slice(&vars);
        self.var_names.extend(names.iter().map(|n| n.to_string()));
        self.lower_bounds.extend_from_slice(lb);
        self.upper_bounds.extend_from_slice(ub);
        vars
    }

    pub fn add_cost(&mut self, cost: Box<dyn Cost>) {
        self.costs.push(cost);
    }

    pub fn add_constraint(&mut self, cnt: Box<dyn Constraint>) {
        self.cnts.push(cnt);
    }

    pub fn num_vars(&self) -> usize {
        self.vars.len()
    }

    pub fn vars(&self) -> &[Var] {
        &self.vars
    }

    pub fn var_names(&self) -> &[String] {
        &self.var_names
    }

    pub fn lower_bounds(&self) -> &[f64] {
        &self.lower_bounds
    }

    pub fn upper_bounds(&self) -> &[f64] {
        &self.upper_bounds
    }

    pub fn costs(&self) -> &[Box<dyn Cost>] {
        &self.costs
    }

    pub fn constraints(&self) -> &[Box<dyn Constraint>] {
        &self.cnts
    }

    pub fn model(&self) -> &dyn Model {
        self.model.as_ref()
    }

    pub fn model_mut(&mut self) -> &mut dyn Model {
        self.model.as_mut()
    }

    pub(crate) fn cost_names(&self) -> Vec<String> {
        self.costs.iter().map(|c| c.name().to_string()).collect()
    }

    pub(crate) fn cnt_names(&self) -> Vec<String> {
        self.cnts.iter().map(|c| c.name().to_string()).collect()
    }

    /// Project a point onto the variable box.
    pub fn closest_feasible_point(&self, x: &[f64]) -> Vec<f64> {
        assert_eq!(x.len(), self.num_vars(), "point has wrong length");
        x.iter()
            .zip(self.lower_bounds.iter().zip(&self.upper_bounds))
            .map(|(&xi, (&lb, &ub))| xi.max(lb).min(ub))
            .collect()
    }
}
