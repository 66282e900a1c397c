//! Hessenberg-triangular reduction of a dense pencil.
//!
//! The pencil is reduced once by orthogonal transformations,
//!
//! ```text
//! Qᵀ A Z = H   (upper Hessenberg)
//! Qᵀ E Z = T   (upper triangular)
//! ```
//!
//! after which every shifted system `(A − sE) x = b` becomes `(H − sT) y = Qᵀ b`,
//! `x = Z y`. A Hessenberg matrix is eliminated in `O(N²)` with adjacent-row pivoting, so
//! many shifts can be processed without a cubic factorization each. Transposed systems
//! and the mass matrix (infinite shift) reuse the same reduction.
//!
//! `E` is triangularized by a Householder QR; the chase to Hessenberg form applies Givens
//! rotations on real data. Only the per-shift elimination works in complex arithmetic.

use crate::matrix::{LinearOperator, to_complex};
use faer::{
    Mat, MatMut, MatRef, c64, get_global_parallelism,
    linalg::{jacobi::JacobiRotation, solvers::Qr, triangular_solve},
    prelude::ReborrowMut,
};

/// Rotation `J` with `J·[a; b] = [r; 0]`, applied to a pair of rows.
fn row_rotation(a: f64, b: f64) -> JacobiRotation<f64> {
    let r = a.hypot(b);
    if r == 0.0 {
        return JacobiRotation { c: 1.0, s: 0.0 };
    }
    JacobiRotation { c: a / r, s: -b / r }
}

/// Rotation `J` with `[u, w]·J = [0, r]`, applied to a pair of columns.
fn column_rotation(u: f64, w: f64) -> JacobiRotation<f64> {
    let r = u.hypot(w);
    if r == 0.0 {
        return JacobiRotation { c: 1.0, s: 0.0 };
    }
    JacobiRotation { c: w / r, s: -u / r }
}

/// The reduced pencil `(H, T)` with its orthogonal factors.
#[derive(Debug, Clone)]
pub struct HessenbergTriangular {
    q: Mat<f64>,
    z: Mat<f64>,
    h: Mat<f64>,
    t: Mat<c64>,
}

impl HessenbergTriangular {
    /// Reduces the dense pencil `(E, A)`.
    pub fn reduce(e: MatRef<'_, f64>, a: MatRef<'_, f64>) -> Self {
        let n = a.nrows();
        let qr = Qr::new(e);
        let mut q = qr.compute_Q();
        let r = qr.R();
        let mut e = Mat::from_fn(n, n, |i, j| if i <= j { r[(i, j)] } else { 0.0 });
        let mut a = q.transpose() * a;
        let mut z = Mat::<f64>::identity(n, n);

        // Every row rotation that removes an entry below the subdiagonal of A creates one
        // subdiagonal entry in E, removed again by a column rotation.
        for j in 0..n.saturating_sub(2) {
            for i in (j + 2..n).rev() {
                let rot = row_rotation(a[(i - 1, j)], a[(i, j)]);
                rot.apply_on_the_left_in_place(a.two_rows_mut(i - 1, i));
                rot.apply_on_the_left_in_place(e.two_rows_mut(i - 1, i));
                rot.transpose().apply_on_the_right_in_place(q.two_cols_mut(i - 1, i));
                a[(i, j)] = 0.0;

                let rot = column_rotation(e[(i, i - 1)], e[(i, i)]);
                rot.apply_on_the_right_in_place(e.two_cols_mut(i - 1, i));
                rot.apply_on_the_right_in_place(a.two_cols_mut(i - 1, i));
                rot.apply_on_the_right_in_place(z.two_cols_mut(i - 1, i));
                e[(i, i - 1)] = 0.0;
            }
        }

        Self {
            q,
            z,
            h: a,
            t: to_complex(e.as_ref()),
        }
    }

    pub fn order(&self) -> usize {
        self.h.nrows()
    }

    /// The upper Hessenberg factor `H = Qᵀ A Z`.
    pub fn h(&self) -> MatRef<'_, f64> {
        self.h.as_ref()
    }

    /// The orthogonal factors `(Q, Z)`.
    pub fn factors(&self) -> (MatRef<'_, f64>, MatRef<'_, f64>) {
        (self.q.as_ref(), self.z.as_ref())
    }

    /// Eliminates `H − sT` for a finite shift.
    pub fn shifted(&self, s: c64) -> Result<HessenbergLu, &'static str> {
        let n = self.order();
        let work = Mat::from_fn(n, n, |i, j| c64::new(self.h[(i, j)], 0.0) - s * self.t[(i, j)]);
        HessenbergLu::factor(work)
    }

    /// Solves `(A − sE) X = rhs` with a factored `H − sT`.
    pub fn solve(&self, lu: &HessenbergLu, rhs: MatRef<'_, c64>) -> Result<Mat<c64>, &'static str> {
        let mut y = self.q.apply_transpose(rhs);
        lu.solve_in_place(y.as_mut())?;
        Ok(self.z.apply(y.as_ref()))
    }

    /// Solves `(A − sE)ᵀ X = rhs` with a factored `H − sT`.
    pub fn solve_transpose(
        &self,
        lu: &HessenbergLu,
        rhs: MatRef<'_, c64>,
    ) -> Result<Mat<c64>, &'static str> {
        let mut y = self.z.apply_transpose(rhs);
        lu.solve_transpose_in_place(y.as_mut())?;
        Ok(self.q.apply(y.as_ref()))
    }

    /// Solves `E X = rhs` through the triangular factor.
    pub fn solve_mass(&self, rhs: MatRef<'_, c64>) -> Result<Mat<c64>, &'static str> {
        let mut y = self.q.apply_transpose(rhs);
        solve_upper(self.t.as_ref(), y.as_mut(), false)?;
        Ok(self.z.apply(y.as_ref()))
    }

    /// Solves `Eᵀ X = rhs` through the triangular factor.
    pub fn solve_mass_transpose(&self, rhs: MatRef<'_, c64>) -> Result<Mat<c64>, &'static str> {
        let mut y = self.z.apply_transpose(rhs);
        solve_upper(self.t.as_ref(), y.as_mut(), true)?;
        Ok(self.q.apply(y.as_ref()))
    }
}

/// `U X = Y` (or `Uᵀ X = Y`), overwriting `Y`. faer does not check the diagonal, so an
/// exact zero pivot is reported here.
fn solve_upper(u: MatRef<'_, c64>, y: MatMut<'_, c64>, transpose: bool) -> Result<(), &'static str> {
    if (0..u.nrows()).any(|i| u[(i, i)] == c64::new(0.0, 0.0)) {
        return Err("zero pivot in triangular factor");
    }
    let par = get_global_parallelism();
    if transpose {
        triangular_solve::solve_lower_triangular_in_place(u.transpose(), y, par);
    } else {
        triangular_solve::solve_upper_triangular_in_place(u, y, par);
    }
    Ok(())
}

/// Gaussian elimination of an upper Hessenberg matrix with adjacent-row pivoting.
#[derive(Debug, Clone)]
pub struct HessenbergLu {
    u: Mat<c64>,
    swapped: Vec<bool>,
    multipliers: Vec<c64>,
}

impl HessenbergLu {
    fn factor(mut work: Mat<c64>) -> Result<Self, &'static str> {
        let n = work.nrows();
        let mut swapped = vec![false; n.saturating_sub(1)];
        let mut multipliers = vec![c64::new(0.0, 0.0); n.saturating_sub(1)];
        for k in 0..n.saturating_sub(1) {
            if work[(k + 1, k)].norm() > work[(k, k)].norm() {
                for j in k..n {
                    let tmp = work[(k, j)];
                    work[(k, j)] = work[(k + 1, j)];
                    work[(k + 1, j)] = tmp;
                }
                swapped[k] = true;
            }
            let pivot = work[(k, k)];
            if pivot == c64::new(0.0, 0.0) {
                return Err("zero pivot in Hessenberg elimination");
            }
            let l = work[(k + 1, k)] / pivot;
            for j in k..n {
                let upper = work[(k, j)];
                work[(k + 1, j)] -= l * upper;
            }
            work[(k + 1, k)] = c64::new(0.0, 0.0);
            multipliers[k] = l;
        }
        if n > 0 && work[(n - 1, n - 1)] == c64::new(0.0, 0.0) {
            return Err("zero pivot in Hessenberg elimination");
        }
        Ok(Self {
            u: work,
            swapped,
            multipliers,
        })
    }

    fn solve_in_place(&self, mut y: MatMut<'_, c64>) -> Result<(), &'static str> {
        for (k, (&swap, &l)) in self.swapped.iter().zip(&self.multipliers).enumerate() {
            for c in 0..y.ncols() {
                if swap {
                    let tmp = y[(k, c)];
                    y[(k, c)] = y[(k + 1, c)];
                    y[(k + 1, c)] = tmp;
                }
                let upper = y[(k, c)];
                y[(k + 1, c)] -= l * upper;
            }
        }
        solve_upper(self.u.as_ref(), y, false)
    }

    fn solve_transpose_in_place(&self, mut y: MatMut<'_, c64>) -> Result<(), &'static str> {
        solve_upper(self.u.as_ref(), y.rb_mut(), true)?;
        for (k, (&swap, &l)) in self.swapped.iter().zip(&self.multipliers).enumerate().rev() {
            for c in 0..y.ncols() {
                let lower = y[(k + 1, c)];
                y[(k, c)] -= l * lower;
                if swap {
                    let tmp = y[(k, c)];
                    y[(k, c)] = y[(k + 1, c)];
                    y[(k + 1, c)] = tmp;
                }
            }
        }
        Ok(())
    }
}
