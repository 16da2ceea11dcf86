//! Convexified cost and constraint records.
//!
//! A [`ConvexObjective`] is one term's convex contribution for a single SQP
//! iteration: a quadratic part plus absolute-value and hinge penalty terms.
//! Penalty terms are recorded first and materialized into the backend by
//! [`ConvexObjective::install`], which creates the auxiliary variables and
//! linear constraints that encode them. [`ConvexObjective::release`] removes
//! everything `install` created; the driver calls it on every exit path
//! before the next convexification.

use log::debug;

use crate::exprs::{AffExpr, QuadExpr, Var};
use crate::model::{Cnt, Model};
use crate::util::numerics::pospart;

/// Builder for one iteration's convex objective contribution.
#[derive(Default)]
pub struct ConvexObjective {
    /// Quadratic objective part. After `install` this includes the linear
    /// `coeff · t` contributions of the penalty terms.
    pub quad: QuadExpr,

    /// Absolute-value penalties `coeff · |aff|`, recorded until `install`.
    pub abs_terms: Vec<(AffExpr, f64)>,

    /// Hinge penalties `coeff · max(0, aff)`, recorded until `install`.
    pub hinge_terms: Vec<(AffExpr, f64)>,

    aux_vars: Vec<Var>,
    cnts: Vec<Cnt>,
    installed: bool,
}

impl ConvexObjective {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a quadratic part. The caller guarantees it is convex (PSD).
    pub fn add_quad(&mut self, quad: QuadExpr) {
        self.quad += &quad;
    }

    pub fn add_affine(&mut self, aff: AffExpr) {
        self.quad += &aff;
    }

    /// Add `coeff · |aff|` to the objective.
    pub fn add_abs(&mut self, aff: AffExpr, coeff: f64) {
        assert!(coeff >= 0.0, "absolute-value penalty coefficient must be nonnegative");
        self.abs_terms.push((aff, coeff));
    }

    /// Add `coeff · max(0, aff)` to the objective.
    pub fn add_hinge(&mut self, aff: AffExpr, coeff: f64) {
        assert!(coeff >= 0.0, "hinge penalty coefficient must be nonnegative");
        self.hinge_terms.push((aff, coeff));
    }

    /// Materialize the penalty terms into the backend. Idempotent.
    ///
    /// Each absolute-value term gets one auxiliary `t >= 0` with
    /// `aff - t <= 0` and `-aff - t <= 0`; each hinge term gets one
    /// auxiliary `t >= 0` with `aff - t <= 0`. The `coeff · t` objective
    /// contributions are folded into [`ConvexObjective::quad`].
    pub fn install(&mut self, model: &mut dyn Model) {
        if self.installed {
            return;
        }
        self.installed = true;

        for (aff, coeff) in &self.abs_terms {
            let t = model.add_aux_vars(1, "abs")[0];
            self.aux_vars.push(t);
            self.quad.affexpr.add_term(*coeff, t);

            let mut upper = aff.clone();
            upper.add_term(-1.0, t);
            self.cnts.push(model.add_ineq_cnt(upper, ""));

            let mut lower = aff.clone();
            lower.scale(-1.0);
            lower.add_term(-1.0, t);
            self.cnts.push(model.add_ineq_cnt(lower, ""));
        }

        for (aff, coeff) in &self.hinge_terms {
            let t = model.add_aux_vars(1, "hinge")[0];
            self.aux_vars.push(t);
            self.quad.affexpr.add_term(*coeff, t);

            let mut expr = aff.clone();
            expr.add_term(-1.0, t);
            self.cnts.push(model.add_ineq_cnt(expr, ""));
        }
    }

    /// Value of the current quadratic form at the enlarged (problem plus
    /// auxiliary) point.
    pub fn value(&self, x: &[f64]) -> f64 {
        self.quad.value(x)
    }

    /// Remove every auxiliary variable and constraint `install` created.
    /// Idempotent; the removal is committed by the next `model.update()`.
    pub fn release(&mut self, model: &mut dyn Model) {
        if self.cnts.is_empty() && self.aux_vars.is_empty() {
            return;
        }
        debug!(
            "releasing {} auxiliary constraints and {} auxiliary variables",
            self.cnts.len(),
            self.aux_vars.len()
        );
        model.remove_cnts(&self.cnts);
        self.cnts.clear();
        model.remove_vars(&self.aux_vars);
        self.aux_vars.clear();
    }
}

/// Linearized equalities and inequalities produced by a constraint term at a
/// point. Each affine expression matches the underlying constraint component
/// in value and gradient at the linearization point.
#[derive(Debug, Clone, Default)]
pub struct ConvexConstraints {
    /// Affine expressions meant to equal zero.
    pub eqs: Vec<AffExpr>,

    /// Affine expressions meant to be `<= 0`.
    pub ineqs: Vec<AffExpr>,
}

impl ConvexConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of `|eq|` over equalities and `max(0, ineq)` over inequalities at
    /// the enlarged point.
    pub fn violation(&self, x: &[f64]) -> f64 {
        let eq: f64 = self.eqs.iter().map(|a| a.value(x).abs()).sum();
        let ineq: f64 = self.ineqs.iter().map(|a| pospart(a.value(x))).sum();
        eq + ineq
    }
}
