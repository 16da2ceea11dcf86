//! Generic cost and constraint terms built from closures.
//!
//! These adapters turn plain functions into [`Cost`] / [`Constraint`]
//! implementations. Derivatives come from caller-supplied closures when
//! available and forward differences otherwise. Convexification is a Taylor
//! model around the current point, so it is exact there by construction.

use crate::convex::{ConvexConstraints, ConvexObjective};
use crate::exprs::{AffExpr, QuadExpr, Var};
use crate::model::Model;
use crate::problem::{CntKind, Constraint, Cost};
use crate::util::numerics::{forward_diff_gradient, forward_diff_jacobian, DEFAULT_EPSILON};

type ScalarFn = Box<dyn Fn(&[f64]) -> f64>;
type VectorFn = Box<dyn Fn(&[f64]) -> Vec<f64>>;
type MatrixFn = Box<dyn Fn(&[f64]) -> Vec<Vec<f64>>>;

/// Cost term from a scalar closure over a subset of the problem variables.
///
/// Without a gradient the convex model is first order with a
/// forward-difference gradient; with [`CostFromFunc::with_hess`] it is a
/// full second-order Taylor model. The Hessian closure must return a
/// symmetric positive-semidefinite matrix (row-major, square in the number
/// of attached variables).
pub struct CostFromFunc {
    name: String,
    vars: Vec<Var>,
    f: ScalarFn,
    grad: Option<VectorFn>,
    hess: Option<MatrixFn>,
    epsilon: f64,
}

impl CostFromFunc {
    pub fn new(name: impl Into<String>, vars: Vec<Var>, f: impl Fn(&[f64]) -> f64 + 'static) -> Self {
        CostFromFunc {
            name: name.into(),
            vars,
            f: Box::new(f),
            grad: None,
            hess: None,
            epsilon: DEFAULT_EPSILON,
        }
    }

    pub fn with_grad(mut self, grad: impl Fn(&[f64]) -> Vec<f64> + 'static) -> Self {
        self.grad = Some(Box::new(grad));
        self
    }

    /// Attach an analytic Hessian. The caller guarantees it is PSD.
    pub fn with_hess(mut self, hess: impl Fn(&[f64]) -> Vec<Vec<f64>> + 'static) -> Self {
        self.hess = Some(Box::new(hess));
        self
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    fn local(&self, x: &[f64]) -> Vec<f64> {
        self.vars.iter().map(|v| x[v.index()]).collect()
    }
}

impl Cost for CostFromFunc {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self, x: &[f64]) -> f64 {
        (self.f)(&self.local(x))
    }

    fn convex(&self, x: &[f64], _model: &mut dyn Model) -> ConvexObjective {
        let x0 = self.local(x);
        let f0 = (self.f)(&x0);
        let grad = match &self.grad {
            Some(g) => g(&x0),
            None => forward_diff_gradient(self.f.as_ref(), &x0, self.epsilon),
        };
        debug_assert_eq!(grad.len(), self.vars.len());

        let k = self.vars.len();
        let mut quad = QuadExpr::new();
        let mut constant = f0;
        let mut lin = grad.clone();
        for i in 0..k {
            constant -= grad[i] * x0[i];
        }

        if let Some(h) = &self.hess {
            let hm = h(&x0);
            for i in 0..k {
                for j in i..k {
                    let hij = hm[i][j];
                    if hij != 0.0 {
                        let coeff = if i == j { 0.5 * hij } else { hij };
                        quad.add_quad_term(coeff, self.vars[i], self.vars[j]);
                    }
                }
                let hx0: f64 = (0..k).map(|j| hm[i][j] * x0[j]).sum();
                lin[i] -= hx0;
                constant += 0.5 * x0[i] * hx0;
            }
        }

        quad.affexpr.constant = constant;
        for i in 0..k {
            quad.affexpr.add_term(lin[i], self.vars[i]);
        }
        quad.affexpr.cleanup(1e-15);

        let mut out = ConvexObjective::new();
        out.add_quad(quad);
        out
    }
}

/// Constraint term from a vector closure over a subset of the problem
/// variables. Convexification is component-wise linearization with an
/// analytic or forward-difference Jacobian.
pub struct CntFromFunc {
    name: String,
    vars: Vec<Var>,
    kind: CntKind,
    f: VectorFn,
    jac: Option<MatrixFn>,
    epsilon: f64,
}

impl CntFromFunc {
    pub fn new(
        name: impl Into<String>,
        vars: Vec<Var>,
        kind: CntKind,
        f: impl Fn(&[f64]) -> Vec<f64> + 'static,
    ) -> Self {
        CntFromFunc {
            name: name.into(),
            vars,
            kind,
            f: Box::new(f),
            jac: None,
            epsilon: DEFAULT_EPSILON,
        }
    }

    /// Attach an analytic Jacobian, one row per constraint component.
    pub fn with_jac(mut self, jac: impl Fn(&[f64]) -> Vec<Vec<f64>> + 'static) -> Self {
        self.jac = Some(Box::new(jac));
        self
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    fn local(&self, x: &[f64]) -> Vec<f64> {
        self.vars.iter().map(|v| x[v.index()]).collect()
    }
}

impl Constraint for CntFromFunc {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> CntKind {
        self.kind
    }

    fn values(&self, x: &[f64]) -> Vec<f64> {
        (self.f)(&self.local(x))
    }

    fn convex(&self, x: &[f64], _model: &mut dyn Model) -> ConvexConstraints {
        let x0 = self.local(x);
        let c0 = (self.f)(&x0);
        let jac = match &self.jac {
            Some(j) => j(&x0),
            None => forward_diff_jacobian(self.f.as_ref(), &x0, self.epsilon),
        };
        debug_assert_eq!(jac.len(), c0.len());

        let mut out = ConvexConstraints::new();
        for (r, row) in jac.iter().enumerate() {
            let mut aff = AffExpr::from_constant(c0[r]);
            for (j, &var) in self.vars.iter().enumerate() {
                aff.constant -= row[j] * x0[j];
                aff.add_term(row[j], var);
            }
            aff.cleanup(1e-15);
            match self.kind {
                CntKind::Eq => out.eqs.push(aff),
                CntKind::Ineq => out.ineqs.push(aff),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_value_uses_attached_vars() {
        let cost = CostFromFunc::new("c", vec![Var::new(1)], |x| x[0] * x[0]);
        // full point (7, 3): cost reads only column 1
        assert!((cost.value(&[7.0, 3.0]) - 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_cnt_violations_by_kind() {
        let eq = CntFromFunc::new("eq", vec![Var::new(0)], CntKind::Eq, |x| vec![x[0] - 1.0]);
        assert!((eq.violation(&[3.0]) - 2.0).abs() < 1e-12);
        assert!((eq.violation(&[-1.0]) - 2.0).abs() < 1e-12);

        let ineq = CntFromFunc::new("le", vec![Var::new(0)], CntKind::Ineq, |x| vec![x[0] - 1.0]);
        assert!((ineq.violation(&[3.0]) - 2.0).abs() < 1e-12);
        assert!(ineq.violation(&[-1.0]).abs() < 1e-12);
    }

    #[test]
    fn test_linearization_matches_at_center() {
        use crate::test_util::StubModel;

        // nonlinear component: x0^2 + x0*x1 - 2
        let f = |x: &[f64]| vec![x[0] * x[0] + x[0] * x[1] - 2.0];
        let cnt = CntFromFunc::new("n", vec![Var::new(0), Var::new(1)], CntKind::Ineq, f);

        let x = [1.5, -0.5];
        let cc = cnt.convex(&x, &mut StubModel::new());
        assert_eq!(cc.ineqs.len(), 1);
        let exact = f(&x)[0];
        assert!((cc.ineqs[0].value(&x) - exact).abs() < 1e-8);
    }

    #[test]
    fn test_second_order_model_matches_at_center() {
        use crate::test_util::StubModel;

        let cost = CostFromFunc::new("q", vec![Var::new(0), Var::new(1)], |x| {
            (x[0] - 3.0).powi(2) + (x[1] + 1.0).powi(2)
        })
        .with_grad(|x| vec![2.0 * (x[0] - 3.0), 2.0 * (x[1] + 1.0)])
        .with_hess(|_| vec![vec![2.0, 0.0], vec![0.0, 2.0]]);

        let x = [0.25, -2.0];
        let cv = cost.convex(&x, &mut StubModel::new());
        assert!((cv.value(&x) - cost.value(&x)).abs() < 1e-8);
        // exact quadratic: the model reproduces the function everywhere
        let y = [5.0, 4.0];
        assert!((cv.value(&y) - cost.value(&y)).abs() < 1e-8);
    }
}
