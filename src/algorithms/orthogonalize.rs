//! Gram-Schmidt orthonormalization of basis columns.
//!
//! A column is orthogonalized against every `Final` column of the basis and normalized
//! under the configured inner product. Since the Sylvester matrices must follow every
//! change of basis, each step returns the [`Transform`] it applied, built from the
//! Gram-Schmidt coefficients: if `x` was the column before the step, the step maintains
//!
//! ```text
//! x = Σ_{i final} c_i·v_i + c_k·v_k
//! ```
//!
//! so `c` is column `k` of `T⁻¹`, and column `k` of `T` is `(e_k − c_F) / c_k`. Both
//! factors are exact in the coefficients; nothing is inverted numerically.

use super::{Basis, ColumnState, Transform};
use crate::{
    error::{KrylovError, KrylovErrorKind},
    matrix::LinearOperator,
    options::{InnerProduct, Orthogonalization, Reorthogonalization},
};
use faer::{
    Mat, MatMut, MatRef, c64, get_global_parallelism,
    linalg::{solvers::Qr, triangular_inverse::invert_upper_triangular},
    prelude::Reborrow,
};

/// Sweep budget of the DGKS scheme.
const MAX_DGKS_SWEEPS: usize = 50;

fn weighted(inner: &InnerProduct, x: MatRef<'_, c64>) -> Mat<c64> {
    match inner {
        InnerProduct::Euclidean => x.to_owned(),
        InnerProduct::Weighted(m) => m.apply(x),
    }
}

/// The Gram matrix `Vᴴ·M·V`.
pub fn gram(v: MatRef<'_, c64>, inner: &InnerProduct) -> Mat<c64> {
    let mv = weighted(inner, v);
    v.adjoint() * mv.as_ref()
}

/// Orthonormalizes basis columns under one policy and one inner product.
#[derive(Debug, Clone, Copy)]
pub struct Orthogonalizer<'a> {
    policy: Orthogonalization,
    inner: &'a InnerProduct,
    tolerance: f64,
}

impl<'a> Orthogonalizer<'a> {
    /// `tolerance` is the DGKS target for `‖V_Fᴴ·M·V_F − I‖_F`; other policies ignore it.
    pub fn new(policy: Orthogonalization, inner: &'a InnerProduct, tolerance: f64) -> Self {
        Self {
            policy,
            inner,
            tolerance,
        }
    }

    /// `yᴴ·M·x` for single columns.
    fn dot(&self, x: MatRef<'_, c64>, y: MatRef<'_, c64>) -> c64 {
        let mx = weighted(self.inner, x);
        (y.adjoint() * mx.as_ref())[(0, 0)]
    }

    /// Orthonormalizes column `k` against all final columns and marks it final.
    ///
    /// Returns the transformation that was applied to the basis, identity outside column
    /// `k`.
    pub fn orthonormalize(&self, basis: &mut Basis, k: usize) -> Result<Transform, KrylovError> {
        let q = basis.width();
        let mut transform = Transform::identity(q);
        if self.policy == Orthogonalization::None {
            basis.states[k] = ColumnState::Final;
            return Ok(transform);
        }

        let finals = basis.final_columns();
        let initial_norm = self.dot(basis.cols.col(k).as_mat(), basis.cols.col(k).as_mat()).re.sqrt();
        let mut coeffs = Mat::<c64>::zeros(q, 1);
        coeffs[(k, 0)] = c64::new(1.0, 0.0);

        let sweeps = match self.policy {
            Orthogonalization::Mgs => 1,
            Orthogonalization::DoubleMgs => 2,
            _ => MAX_DGKS_SWEEPS,
        };
        let mut converged = self.policy != Orthogonalization::Dgks;
        for sweep in 0..sweeps {
            self.sweep(basis.cols.as_mut(), &finals, k, coeffs.as_mut());
            self.normalize(basis.cols.as_mut(), k, coeffs.as_mut(), initial_norm)?;
            if self.policy == Orthogonalization::Dgks {
                let loss = self.partial_loss(basis.as_ref(), &finals, k);
                log::trace!("DGKS sweep {} on column {}: loss {:e}", sweep + 1, k, loss);
                if loss < self.tolerance {
                    converged = true;
                    break;
                }
            }
        }
        if !converged {
            return Err(KrylovErrorKind::OrthogonalizationFailed {
                column: k,
                sweeps: MAX_DGKS_SWEEPS,
            }
            .into());
        }

        let ck = coeffs[(k, 0)];
        for i in 0..q {
            transform.inverse[(i, k)] = coeffs[(i, 0)];
            transform.forward[(i, k)] = if i == k { ck.inv() } else { -coeffs[(i, 0)] / ck };
        }
        basis.states[k] = ColumnState::Final;
        Ok(transform)
    }

    /// One modified Gram-Schmidt sweep of column `k` against `finals`.
    fn sweep(&self, mut v: MatMut<'_, c64>, finals: &[usize], k: usize, mut coeffs: MatMut<'_, c64>) {
        for &i in finals {
            let h = self.dot(v.rb().col(k).as_mat(), v.rb().col(i).as_mat());
            for r in 0..v.nrows() {
                let vi = v[(r, i)];
                v[(r, k)] -= h * vi;
            }
            let ck = coeffs[(k, 0)];
            coeffs[(i, 0)] += ck * h;
        }
    }

    fn normalize(
        &self,
        mut v: MatMut<'_, c64>,
        k: usize,
        mut coeffs: MatMut<'_, c64>,
        initial_norm: f64,
    ) -> Result<(), KrylovError> {
        let alpha = self.dot(v.rb().col(k).as_mat(), v.rb().col(k).as_mat()).re.sqrt();
        if !(alpha.is_finite() && alpha > 10.0 * f64::EPSILON * initial_norm) {
            return Err(KrylovErrorKind::Breakdown { column: k }.into());
        }
        let scale = c64::new(1.0 / alpha, 0.0);
        for r in 0..v.nrows() {
            v[(r, k)] *= scale;
        }
        coeffs[(k, 0)] *= c64::new(alpha, 0.0);
        Ok(())
    }

    /// `‖V_Fᴴ·M·V_F − I‖_F` over the final columns plus column `k`.
    fn partial_loss(&self, v: MatRef<'_, c64>, finals: &[usize], k: usize) -> f64 {
        let cols: Vec<usize> = finals.iter().copied().chain(std::iter::once(k)).collect();
        let sub = Mat::from_fn(v.nrows(), cols.len(), |r, c| v[(r, cols[c])]);
        let n = cols.len();
        (gram(sub.as_ref(), self.inner) - Mat::<c64>::identity(n, n)).norm_l2()
    }

    /// Runs the final pass over the complete basis and returns the composed transform.
    pub fn reorthogonalize(
        &self,
        basis: &mut Basis,
        policy: Reorthogonalization,
    ) -> Result<Transform, KrylovError> {
        let q = basis.width();
        match policy {
            Reorthogonalization::None => Ok(Transform::identity(q)),
            Reorthogonalization::Mgs => {
                let single = Orthogonalizer::new(Orthogonalization::Mgs, self.inner, self.tolerance);
                for state in basis.states.iter_mut() {
                    *state = ColumnState::Raw;
                }
                let mut total = Transform::identity(q);
                for k in 0..q {
                    let t = single.orthonormalize(basis, k)?;
                    total = total.then(&t);
                }
                Ok(total)
            }
            Reorthogonalization::Qr => {
                if let InnerProduct::Weighted(_) = self.inner {
                    return Err(KrylovErrorKind::UnsupportedCombination(
                        "QR reorthogonalization is Euclidean and cannot honour a weighted inner product"
                            .to_string(),
                    )
                    .into());
                }
                if basis.cols.nrows() < q {
                    return Err(KrylovErrorKind::InvalidInput(format!(
                        "QR reorthogonalization needs at least as many rows as columns, got {}×{}",
                        basis.cols.nrows(),
                        q
                    ))
                    .into());
                }
                let qr = Qr::new(basis.as_ref());
                let r = qr.thin_R().to_owned();
                let forward = upper_triangular_inverse(r.as_ref())?;
                basis.cols = qr.compute_thin_Q();
                for state in basis.states.iter_mut() {
                    *state = ColumnState::Final;
                }
                Ok(Transform {
                    forward,
                    inverse: r,
                })
            }
        }
    }
}

/// Inverts an upper-triangular matrix, rejecting a zero or non-finite diagonal.
fn upper_triangular_inverse(r: MatRef<'_, c64>) -> Result<Mat<c64>, KrylovError> {
    let n = r.nrows();
    if let Some(i) = (0..n).find(|&i| r[(i, i)].norm() == 0.0 || !r[(i, i)].is_finite()) {
        return Err(KrylovErrorKind::Breakdown { column: i }.into());
    }
    let mut inv = Mat::<c64>::zeros(n, n);
    invert_upper_triangular(inv.as_mut(), r, get_global_parallelism());
    Ok(inv)
}
