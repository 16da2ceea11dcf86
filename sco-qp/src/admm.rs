//! Dense operator-splitting QP solver.
//!
//! Solves
//!
//! ```text
//! minimize    (1/2) x^T P x + q^T x
//! subject to  l <= A x <= u
//! ```
//!
//! with P positive semidefinite, by ADMM with over-relaxation. The per-row
//! penalty weight is boosted on equality rows (`l == u`), which speeds up
//! convergence on the constraint-heavy models the SQP layer produces. The
//! normal-equations matrix `P + σI + AᵀRA` is factored once per solve; with
//! the variable-bound rows always present it is strictly positive definite.
//!
//! Termination follows the usual absolute-plus-relative residual test on
//! the primal residual `Ax − z` and the dual residual `Px + q + Aᵀy`.

use nalgebra::{DMatrix, DVector};

/// Tuning parameters for [`solve`].
#[derive(Debug, Clone)]
pub struct AdmmSettings {
    /// Base penalty weight.
    pub rho: f64,

    /// Multiplier applied to `rho` on equality rows.
    pub rho_eq_scale: f64,

    /// Proximal regularization on the x-update.
    pub sigma: f64,

    /// Over-relaxation parameter in (0, 2).
    pub alpha: f64,

    /// Absolute residual tolerance.
    pub eps_abs: f64,

    /// Relative residual tolerance.
    pub eps_rel: f64,

    /// Iteration cap.
    pub max_iter: usize,

    /// Residuals are evaluated every this many iterations. Must be nonzero.
    pub check_interval: usize,
}

impl Default for AdmmSettings {
    fn default() -> Self {
        AdmmSettings {
            rho: 0.1,
            rho_eq_scale: 1e3,
            sigma: 1e-6,
            alpha: 1.6,
            eps_abs: 1e-8,
            eps_rel: 1e-8,
            max_iter: 100_000,
            check_interval: 25,
        }
    }
}

/// Outcome of a [`solve`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmmStatus {
    /// Both residuals met tolerance.
    Solved,

    /// Iteration cap reached before the residuals met tolerance.
    MaxIters,

    /// Factorization failure or non-finite iterates.
    NumericalError,
}

/// Solution returned by [`solve`].
#[derive(Debug, Clone)]
pub struct AdmmSolution {
    pub status: AdmmStatus,
    pub x: DVector<f64>,
    pub iters: usize,
}

fn amax(v: &DVector<f64>) -> f64 {
    v.iter().fold(0.0_f64, |acc, &x| acc.max(x.abs()))
}

/// Solve one box-constrained QP. `a` is `m × n` with `l`, `u` of length `m`;
/// infinite entries mark one-sided rows.
pub fn solve(
    p: &DMatrix<f64>,
    q: &DVector<f64>,
    a: &DMatrix<f64>,
    l: &DVector<f64>,
    u: &DVector<f64>,
    settings: &AdmmSettings,
) -> AdmmSolution {
    let n = q.len();
    let m = l.len();
    debug_assert_eq!(p.nrows(), n);
    debug_assert_eq!(p.ncols(), n);
    debug_assert_eq!(a.nrows(), m);
    debug_assert_eq!(a.ncols(), n);
    debug_assert_eq!(u.len(), m);
    assert!(settings.check_interval > 0, "check_interval must be nonzero");

    if n == 0 {
        return AdmmSolution {
            status: AdmmStatus::Solved,
            x: DVector::zeros(0),
            iters: 0,
        };
    }

    let mut rho = DVector::from_element(m, settings.rho);
    for i in 0..m {
        if l[i].is_finite() && u[i].is_finite() && (u[i] - l[i]).abs() < 1e-12 {
            rho[i] *= settings.rho_eq_scale;
        }
    }

    let at = a.transpose();
    let mut scaled_a = a.clone();
    for i in 0..m {
        let r = rho[i];
        for j in 0..n {
            scaled_a[(i, j)] *= r;
        }
    }
    let mut kkt = p.clone();
    for i in 0..n {
        kkt[(i, i)] += settings.sigma;
    }
    kkt += &at * &scaled_a;

    let chol = match kkt.cholesky() {
        Some(c) => c,
        None => {
            return AdmmSolution {
                status: AdmmStatus::NumericalError,
                x: DVector::zeros(n),
                iters: 0,
            }
        }
    };

    let mut x = DVector::zeros(n);
    let mut z = DVector::zeros(m);
    let mut y = DVector::zeros(m);

    for iter in 1..=settings.max_iter {
        let rhs = x.scale(settings.sigma) - q + &at * (rho.component_mul(&z) - &y);
        let x_tilde = chol.solve(&rhs);
        let z_tilde = a * &x_tilde;

        let x_next = x_tilde.scale(settings.alpha) + x.scale(1.0 - settings.alpha);
        let z_relax = z_tilde.scale(settings.alpha) + z.scale(1.0 - settings.alpha);
        let v = &z_relax + &y.component_div(&rho);
        let z_next = DVector::from_fn(m, |i, _| v[i].clamp(l[i], u[i]));
        y += rho.component_mul(&(&z_relax - &z_next));
        x = x_next;
        z = z_next;

        if iter % settings.check_interval == 0 || iter == settings.max_iter {
            if x.iter().any(|v| !v.is_finite()) || y.iter().any(|v| !v.is_finite()) {
                return AdmmSolution {
                    status: AdmmStatus::NumericalError,
                    x,
                    iters: iter,
                };
            }
            let ax = a * &x;
            let px = p * &x;
            let aty = &at * &y;
            let r_prim = amax(&(&ax - &z));
            let r_dual = amax(&(&px + q + &aty));
            let eps_prim = settings.eps_abs + settings.eps_rel * amax(&ax).max(amax(&z));
            let eps_dual =
                settings.eps_abs + settings.eps_rel * amax(&px).max(amax(&aty)).max(amax(q));
            if r_prim <= eps_prim && r_dual <= eps_dual {
                return AdmmSolution {
                    status: AdmmStatus::Solved,
                    x,
                    iters: iter,
                };
            }
        }
    }

    AdmmSolution {
        status: AdmmStatus::MaxIters,
        x,
        iters: settings.max_iter,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INF: f64 = f64::INFINITY;

    fn solve_default(
        p: DMatrix<f64>,
        q: DVector<f64>,
        a: DMatrix<f64>,
        l: DVector<f64>,
        u: DVector<f64>,
    ) -> AdmmSolution {
        let sol = solve(&p, &q, &a, &l, &u, &AdmmSettings::default());
        assert_eq!(sol.status, AdmmStatus::Solved, "solver did not converge");
        sol
    }

    #[test]
    fn test_unconstrained_scalar() {
        // min (x - 1)^2
        let sol = solve_default(
            DMatrix::from_row_slice(1, 1, &[2.0]),
            DVector::from_vec(vec![-2.0]),
            DMatrix::from_row_slice(1, 1, &[1.0]),
            DVector::from_vec(vec![-INF]),
            DVector::from_vec(vec![INF]),
        );
        assert!((sol.x[0] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_equality_constrained() {
        // min x^2 + y^2  s.t.  x + y = 1
        let a = DMatrix::from_row_slice(3, 2, &[1.0, 1.0, 1.0, 0.0, 0.0, 1.0]);
        let sol = solve_default(
            DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 2.0]),
            DVector::zeros(2),
            a,
            DVector::from_vec(vec![1.0, -INF, -INF]),
            DVector::from_vec(vec![1.0, INF, INF]),
        );
        assert!((sol.x[0] - 0.5).abs() < 1e-5);
        assert!((sol.x[1] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_active_box_bound() {
        // min (x - 5)^2  s.t.  0 <= x <= 1
        let sol = solve_default(
            DMatrix::from_row_slice(1, 1, &[2.0]),
            DVector::from_vec(vec![-10.0]),
            DMatrix::from_row_slice(1, 1, &[1.0]),
            DVector::from_vec(vec![0.0]),
            DVector::from_vec(vec![1.0]),
        );
        assert!((sol.x[0] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_active_inequality() {
        // min (x + 1)^2  s.t.  x >= 0
        let sol = solve_default(
            DMatrix::from_row_slice(1, 1, &[2.0]),
            DVector::from_vec(vec![2.0]),
            DMatrix::from_row_slice(1, 1, &[1.0]),
            DVector::from_vec(vec![0.0]),
            DVector::from_vec(vec![INF]),
        );
        assert!(sol.x[0].abs() < 1e-5);
    }

    #[test]
    fn test_empty_problem() {
        let sol = solve(
            &DMatrix::zeros(0, 0),
            &DVector::zeros(0),
            &DMatrix::zeros(0, 0),
            &DVector::zeros(0),
            &DVector::zeros(0),
            &AdmmSettings::default(),
        );
        assert_eq!(sol.status, AdmmStatus::Solved);
        assert_eq!(sol.x.len(), 0);
    }
}
