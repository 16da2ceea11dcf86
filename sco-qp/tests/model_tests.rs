//! End-to-end checks of the penalty encodings against the dense backend.

use sco_core::{AffExpr, ConvexObjective, CvxStatus, Model, QuadExpr};
use sco_qp::DenseQpModel;

#[test]
fn test_abs_penalty_pulls_variable_to_target() {
    // min 5 |x - 3|: the auxiliary encoding must place x at 3 with a tight t
    let mut model = DenseQpModel::new();
    let vars = model.add_vars(&["x"]);

    let mut aff = AffExpr::from_constant(-3.0);
    aff.add_term(1.0, vars[0]);

    let mut obj = ConvexObjective::new();
    obj.add_abs(aff, 5.0);
    model.update();
    obj.install(&mut model);
    model.update();
    assert_eq!(model.num_vars(), 2);

    model.set_objective(obj.quad.clone());
    assert_eq!(model.optimize(), CvxStatus::Solved);

    let full = model.var_values(&model.vars());
    assert!((full[0] - 3.0).abs() < 1e-4, "x = {}", full[0]);
    assert!(full[1].abs() < 1e-4, "t = {}", full[1]);
    // the installed objective evaluates to 5 |x - 3| at the solution
    assert!(obj.value(&full).abs() < 1e-3);

    obj.release(&mut model);
    model.update();
    assert_eq!(model.num_vars(), 1);
}

#[test]
fn test_hinge_penalty_stops_at_kink() {
    // min x^2 + 5 max(0, 1 - x): unconstrained optimum of the smooth part
    // would sit at x = 2.5, so the minimizer is the kink x = 1
    let mut model = DenseQpModel::new();
    let vars = model.add_vars(&["x"]);

    let mut quad = QuadExpr::new();
    quad.add_quad_term(1.0, vars[0], vars[0]);

    let mut aff = AffExpr::from_constant(1.0);
    aff.add_term(-1.0, vars[0]);

    let mut obj = ConvexObjective::new();
    obj.add_quad(quad);
    obj.add_hinge(aff, 5.0);
    model.update();
    obj.install(&mut model);
    model.update();

    model.set_objective(obj.quad.clone());
    assert_eq!(model.optimize(), CvxStatus::Solved);

    let full = model.var_values(&model.vars());
    assert!((full[0] - 1.0).abs() < 1e-3, "x = {}", full[0]);

    obj.release(&mut model);
    model.update();
    assert_eq!(model.num_vars(), 1);
}

#[test]
fn test_install_is_idempotent() {
    let mut model = DenseQpModel::new();
    let vars = model.add_vars(&["x"]);

    let mut obj = ConvexObjective::new();
    obj.add_hinge(AffExpr::from_var(vars[0]), 1.0);
    obj.install(&mut model);
    obj.install(&mut model);
    model.update();
    // one hinge: exactly one auxiliary variable
    assert_eq!(model.num_vars(), 2);
}
