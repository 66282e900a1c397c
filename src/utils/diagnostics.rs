//! Residual and orthogonality measurements.
//!
//! These functions only read their arguments; they are used to validate constructions in
//! tests and to report on them in the experiment binary.

use crate::{
    algorithms::{SylvesterState, orthogonalize::gram},
    matrix::{LinearOperator, Pencil, to_complex},
    options::InnerProduct,
};
use faer::{Mat, MatRef, c64};

/// Frobenius norm of `A·V·D − E·V·S − B·R`.
///
/// `drive` is `B` (`N × m`) for an input basis. With `transposed` set the pencil is
/// transposed and `drive` should be `Cᵀ` (`N × p`), which measures the output relation
/// `Aᵀ·W·D − Eᵀ·W·S − Cᵀ·L`. A missing `D` stands for the identity.
pub fn sylvester_residual(
    pencil: &Pencil,
    drive: MatRef<'_, f64>,
    basis: MatRef<'_, c64>,
    state: &SylvesterState,
    transposed: bool,
) -> f64 {
    let (av, ev) = if transposed {
        (pencil.a().apply_transpose(basis), pencil.e().apply_transpose(basis))
    } else {
        (pencil.a().apply(basis), pencil.e().apply(basis))
    };
    let avd = match &state.d {
        Some(d) => &av * d,
        None => av,
    };
    let residual = avd - &ev * &state.s - to_complex(drive) * &state.r;
    residual.norm_l2()
}

/// [`sylvester_residual`] divided by `‖A‖·‖D‖ + ‖E‖·‖S‖ + ‖drive‖·‖R‖` (Frobenius norms).
pub fn relative_sylvester_residual(
    pencil: &Pencil,
    drive: MatRef<'_, f64>,
    basis: MatRef<'_, c64>,
    state: &SylvesterState,
    transposed: bool,
) -> f64 {
    let d_norm = state
        .d
        .as_ref()
        .map_or((state.s.nrows() as f64).sqrt(), |d| d.norm_l2());
    let scale = pencil.a().norm_frobenius() * d_norm
        + pencil.e().norm_frobenius() * state.s.norm_l2()
        + drive.norm_l2() * state.r.norm_l2();
    let residual = sylvester_residual(pencil, drive, basis, state, transposed);
    if scale > 0.0 { residual / scale } else { residual }
}

/// `‖Vᴴ·M·V − I‖_F` under the given inner product.
pub fn orthogonality_loss(basis: MatRef<'_, c64>, inner: &InnerProduct) -> f64 {
    let q = basis.ncols();
    (gram(basis, inner) - Mat::<c64>::identity(q, q)).norm_l2()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::SystemMatrix;
    use faer::mat;

    #[test]
    fn test_exact_relation_has_zero_residual() {
        // A = diag(-1, -2), E = I, B = [1; 1], shift 0: v = A⁻¹B, S = 0, R = 1.
        let a: Mat<f64> = mat![[-1.0, 0.0], [0.0, -2.0]];
        let pencil = Pencil::standard(a).unwrap();
        let b = Mat::from_fn(2, 1, |_, _| 1.0);
        let v = Mat::from_fn(2, 1, |i, _| c64::new(-1.0 / (i + 1) as f64, 0.0));
        let mut state = SylvesterState::new(1, 1, false);
        state.r[(0, 0)] = c64::new(1.0, 0.0);
        assert!(sylvester_residual(&pencil, b.as_ref(), v.as_ref(), &state, false) < 1e-15);

        state.r[(0, 0)] = c64::new(2.0, 0.0);
        let rel = relative_sylvester_residual(&pencil, b.as_ref(), v.as_ref(), &state, false);
        assert!(rel > 0.1);
    }

    #[test]
    fn test_orthogonality_loss_weighted() {
        let v = Mat::from_fn(2, 2, |i, j| {
            if i == j {
                c64::new(0.5, 0.0)
            } else {
                c64::new(0.0, 0.0)
            }
        });
        let loss = orthogonality_loss(v.as_ref(), &InnerProduct::Euclidean);
        assert!((loss - 0.75 * 2.0_f64.sqrt()).abs() < 1e-14);
        let m = SystemMatrix::sparse_from_entries(2, 2, &[(0, 0, 4.0), (1, 1, 4.0)]).unwrap();
        assert!(orthogonality_loss(v.as_ref(), &InnerProduct::Weighted(m)) < 1e-15);
    }
}
