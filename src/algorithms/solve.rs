//! Cached factorizations of the shifted pencil.
//!
//! A rational Krylov recurrence solves one linear system per basis column, and
//! consecutive columns very often share their shift (moment chains, block directions,
//! the output basis of a two-sided construction). [`LinearSolveCache`] keeps the single
//! most recent factorization, tagged with its shift, and only refactors when a column asks
//! for a different shift. Transposed systems reuse the same factorization.
//!
//! The cache is an explicit object owned by the driver of one construction; it is never
//! shared between threads or constructions.

use super::{
    Shift,
    hessenberg::{HessenbergLu, HessenbergTriangular},
};
use crate::{
    error::{KrylovError, KrylovErrorKind},
    matrix::{Pencil, to_complex},
    options::SolveStrategy,
};
use faer::{
    Mat, MatRef, Side, c64,
    linalg::solvers::{Llt as DenseLlt, PartialPivLu},
    prelude::Solve,
    sparse::{
        SparseColMat, Triplet,
        linalg::solvers::{Llt as SparseLlt, Lu as SparseLu},
    },
};
use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

/// One decomposition, valid for the shift it was computed at.
enum Factorization {
    SparseLu(SparseLu<usize, c64>),
    SparseLlt(SparseLlt<usize, c64>),
    DenseLu(PartialPivLu<c64>),
    DenseLlt(DenseLlt<c64>),
    Hessenberg {
        reduction: Arc<HessenbergTriangular>,
        lu: HessenbergLu,
    },
    /// Infinite shift on a reduced pencil: the triangular factor of `E` is used as is.
    ReducedMass(Arc<HessenbergTriangular>),
}

impl Factorization {
    fn solve(&self, rhs: MatRef<'_, c64>, transpose: bool) -> Result<Mat<c64>, String> {
        let x = match (self, transpose) {
            (Factorization::SparseLu(lu), false) => lu.solve(rhs),
            (Factorization::SparseLu(lu), true) => lu.solve_transpose(rhs),
            (Factorization::SparseLlt(llt), false) => llt.solve(rhs),
            (Factorization::SparseLlt(llt), true) => llt.solve_transpose(rhs),
            (Factorization::DenseLu(lu), false) => lu.solve(rhs),
            (Factorization::DenseLu(lu), true) => lu.solve_transpose(rhs),
            (Factorization::DenseLlt(llt), false) => llt.solve(rhs),
            (Factorization::DenseLlt(llt), true) => llt.solve_transpose(rhs),
            (Factorization::Hessenberg { reduction, lu }, false) => reduction.solve(lu, rhs)?,
            (Factorization::Hessenberg { reduction, lu }, true) => {
                reduction.solve_transpose(lu, rhs)?
            }
            (Factorization::ReducedMass(reduction), false) => reduction.solve_mass(rhs)?,
            (Factorization::ReducedMass(reduction), true) => {
                reduction.solve_mass_transpose(rhs)?
            }
        };
        // Dense LU does not report singularity; it shows up as non-finite values.
        if (0..x.ncols()).all(|j| (0..x.nrows()).all(|i| x[(i, j)].is_finite())) {
            Ok(x)
        } else {
            Err("the solution contains non-finite values".to_string())
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Factorization::SparseLu(_) => "sparse LU",
            Factorization::SparseLlt(_) => "sparse Cholesky",
            Factorization::DenseLu(_) => "dense LU",
            Factorization::DenseLlt(_) => "dense Cholesky",
            Factorization::Hessenberg { .. } => "Hessenberg elimination",
            Factorization::ReducedMass(_) => "triangular mass factor",
        }
    }
}

struct ActiveFactorization {
    shift: Shift,
    factor: Factorization,
}

/// Owns at most one factorization of `A − sE` (or of `E` for `s = ∞`).
pub struct LinearSolveCache<'a> {
    pencil: &'a Pencil,
    strategy: SolveStrategy,
    dense: Option<(Mat<f64>, Mat<f64>)>,
    reduction: Option<Arc<HessenbergTriangular>>,
    active: Option<ActiveFactorization>,
    factorizations: usize,
}

impl<'a> LinearSolveCache<'a> {
    /// Creates an empty cache. The precomputed-reduction strategy reduces the pencil here,
    /// once for the whole construction.
    pub fn new(pencil: &'a Pencil, strategy: SolveStrategy) -> Self {
        let (dense, reduction) = match strategy {
            SolveStrategy::Sparse => (None, None),
            SolveStrategy::Dense => (Some((pencil.e().to_dense(), pencil.a().to_dense())), None),
            SolveStrategy::PrecomputedReduction => {
                let (e, a) = (pencil.e().to_dense(), pencil.a().to_dense());
                log::debug!("Reducing pencil of order {} to Hessenberg-triangular form", a.nrows());
                let reduction = HessenbergTriangular::reduce(e.as_ref(), a.as_ref());
                (None, Some(Arc::new(reduction)))
            }
        };
        Self {
            pencil,
            strategy,
            dense,
            reduction,
            active: None,
            factorizations: 0,
        }
    }

    /// Number of factorizations computed so far.
    pub fn factorizations(&self) -> usize {
        self.factorizations
    }

    /// Whether a solve at `shift` would reuse the cached factorization.
    pub fn is_cached(&self, shift: Shift) -> bool {
        self.active.as_ref().is_some_and(|a| a.shift == shift)
    }

    /// Solves `(A − sE) X = rhs`, or `E X = rhs` for an infinite shift.
    pub fn solve(&mut self, shift: Shift, rhs: MatRef<'_, c64>) -> Result<Mat<c64>, KrylovError> {
        self.solve_impl(shift, rhs, false)
    }

    /// Solves `(A − sE)ᵀ X = rhs`, or `Eᵀ X = rhs` for an infinite shift.
    pub fn solve_transpose(
        &mut self,
        shift: Shift,
        rhs: MatRef<'_, c64>,
    ) -> Result<Mat<c64>, KrylovError> {
        self.solve_impl(shift, rhs, true)
    }

    fn solve_impl(
        &mut self,
        shift: Shift,
        rhs: MatRef<'_, c64>,
        transpose: bool,
    ) -> Result<Mat<c64>, KrylovError> {
        let active = match self.active.take() {
            Some(active) if active.shift == shift => active,
            _ => {
                let factor = self.factor(shift)?;
                self.factorizations += 1;
                log::debug!("New {} at shift {}", factor.name(), shift);
                ActiveFactorization { shift, factor }
            }
        };
        let result = active.factor.solve(rhs, transpose);
        self.active = Some(active);
        result.map_err(|reason| singular(shift, reason))
    }

    fn factor(&self, shift: Shift) -> Result<Factorization, KrylovError> {
        match (self.strategy, shift) {
            (SolveStrategy::Sparse, Shift::Finite(s)) => {
                let pencil = self.shifted_sparse(s)?;
                sparse_lu(&pencil, shift)
            }
            (SolveStrategy::Sparse, Shift::Infinite) => {
                let e = self.mass_sparse()?;
                if self.pencil.e_is_symmetric() {
                    match e.as_ref().sp_cholesky(Side::Lower) {
                        Ok(llt) => return Ok(Factorization::SparseLlt(llt)),
                        Err(err) => log::warn!(
                            "Sparse Cholesky of E failed ({err:?}); falling back to sparse LU"
                        ),
                    }
                }
                sparse_lu(&e, shift)
            }
            (SolveStrategy::Dense, _) => {
                let Some((e, a)) = &self.dense else {
                    return Err(singular(shift, "dense copy of the pencil is missing".to_string()));
                };
                match shift {
                    Shift::Finite(s) => {
                        let shifted = Mat::from_fn(a.nrows(), a.ncols(), |i, j| {
                            c64::new(a[(i, j)], 0.0) - s * e[(i, j)]
                        });
                        Ok(Factorization::DenseLu(shifted.partial_piv_lu()))
                    }
                    Shift::Infinite => {
                        let e = to_complex(e.as_ref());
                        if self.pencil.e_is_symmetric() {
                            match e.llt(Side::Lower) {
                                Ok(llt) => return Ok(Factorization::DenseLlt(llt)),
                                Err(err) => log::warn!(
                                    "Dense Cholesky of E failed ({err:?}); falling back to LU"
                                ),
                            }
                        }
                        Ok(Factorization::DenseLu(e.partial_piv_lu()))
                    }
                }
            }
            (SolveStrategy::PrecomputedReduction, _) => {
                let Some(reduction) = &self.reduction else {
                    return Err(singular(shift, "pencil reduction is missing".to_string()));
                };
                match shift {
                    Shift::Finite(s) => reduction
                        .shifted(s)
                        .map(|lu| Factorization::Hessenberg {
                            reduction: Arc::clone(reduction),
                            lu,
                        })
                        .map_err(|reason| singular(shift, reason.to_string())),
                    Shift::Infinite => Ok(Factorization::ReducedMass(Arc::clone(reduction))),
                }
            }
        }
    }

    /// `A − sE` as a complex sparse matrix.
    fn shifted_sparse(&self, s: c64) -> Result<SparseColMat<usize, c64>, KrylovError> {
        let n = self.pencil.order();
        let mut triplets: Vec<_> = self
            .pencil
            .a()
            .entries()
            .into_iter()
            .map(|(i, j, v)| Triplet::new(i, j, c64::new(v, 0.0)))
            .collect();
        if s != c64::new(0.0, 0.0) {
            triplets.extend(
                self.pencil
                    .e()
                    .entries()
                    .into_iter()
                    .map(|(i, j, v)| Triplet::new(i, j, -s * v)),
            );
        }
        SparseColMat::try_new_from_triplets(n, n, &triplets)
            .map_err(|e| singular(Shift::Finite(s), format!("{e:?}")))
    }

    /// `E` as a complex sparse matrix.
    fn mass_sparse(&self) -> Result<SparseColMat<usize, c64>, KrylovError> {
        let n = self.pencil.order();
        let triplets: Vec<_> = self
            .pencil
            .e()
            .entries()
            .into_iter()
            .map(|(i, j, v)| Triplet::new(i, j, c64::new(v, 0.0)))
            .collect();
        SparseColMat::try_new_from_triplets(n, n, &triplets)
            .map_err(|e| singular(Shift::Infinite, format!("{e:?}")))
    }
}

/// Sparse LU that reports an exactly zero pivot as an error. faer's simplicial LU panics
/// on one instead of returning `LuError`.
fn sparse_lu(m: &SparseColMat<usize, c64>, shift: Shift) -> Result<Factorization, KrylovError> {
    match catch_unwind(AssertUnwindSafe(|| m.as_ref().sp_lu())) {
        Ok(Ok(lu)) => Ok(Factorization::SparseLu(lu)),
        Ok(Err(e)) => Err(singular(shift, format!("{e:?}"))),
        Err(_) => Err(singular(shift, "zero pivot in sparse LU".to_string())),
    }
}

fn singular(shift: Shift, reason: String) -> KrylovError {
    KrylovErrorKind::SingularPencil {
        shift: shift.to_string(),
        reason,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{LinearOperator, SystemMatrix};

    fn test_pencil() -> Pencil {
        // A tridiagonal, E diagonal and symmetric positive definite.
        let n = 5;
        let mut a = Vec::new();
        let mut e = Vec::new();
        for i in 0..n {
            a.push((i, i, -2.0 - i as f64));
            e.push((i, i, 1.0 + 0.1 * i as f64));
            if i + 1 < n {
                a.push((i, i + 1, 1.0));
                a.push((i + 1, i, 0.5));
            }
        }
        Pencil::new(
            SystemMatrix::sparse_from_entries(n, n, &e).unwrap(),
            SystemMatrix::sparse_from_entries(n, n, &a).unwrap(),
        )
        .unwrap()
    }

    fn rhs() -> Mat<c64> {
        Mat::from_fn(5, 1, |i, _| c64::new(1.0 + i as f64, -(i as f64)))
    }

    fn residual(pencil: &Pencil, shift: Shift, x: &Mat<c64>, b: &Mat<c64>, transpose: bool) -> f64 {
        let (ax, ex) = if transpose {
            (pencil.a().apply_transpose(x.as_ref()), pencil.e().apply_transpose(x.as_ref()))
        } else {
            (pencil.a().apply(x.as_ref()), pencil.e().apply(x.as_ref()))
        };
        let lhs = match shift {
            Shift::Finite(s) => ax - ex * faer::Scale(s),
            Shift::Infinite => ex,
        };
        (lhs - b).norm_l2()
    }

    #[test]
    fn test_all_strategies_solve_plain_and_transposed() {
        let pencil = test_pencil();
        let b = rhs();
        for strategy in [
            SolveStrategy::Sparse,
            SolveStrategy::Dense,
            SolveStrategy::PrecomputedReduction,
        ] {
            let mut cache = LinearSolveCache::new(&pencil, strategy);
            for shift in [
                Shift::Finite(c64::new(0.0, 0.0)),
                Shift::Finite(c64::new(-0.5, 2.0)),
                Shift::Infinite,
            ] {
                let x = cache.solve(shift, b.as_ref()).unwrap();
                assert!(residual(&pencil, shift, &x, &b, false) < 1e-11, "{strategy:?} {shift}");
                let xt = cache.solve_transpose(shift, b.as_ref()).unwrap();
                assert!(residual(&pencil, shift, &xt, &b, true) < 1e-11, "{strategy:?} {shift}");
            }
            assert_eq!(cache.factorizations(), 3);
        }
    }

    #[test]
    fn test_factorization_reused_for_same_shift() {
        let pencil = test_pencil();
        let mut cache = LinearSolveCache::new(&pencil, SolveStrategy::Sparse);
        let s = Shift::Finite(c64::new(1.0, 0.0));
        assert!(!cache.is_cached(s));
        cache.solve(s, rhs().as_ref()).unwrap();
        cache.solve_transpose(s, rhs().as_ref()).unwrap();
        cache.solve(s, rhs().as_ref()).unwrap();
        assert!(cache.is_cached(s));
        assert_eq!(cache.factorizations(), 1);
        cache.solve(Shift::Finite(c64::new(2.0, 0.0)), rhs().as_ref()).unwrap();
        assert!(!cache.is_cached(s));
        assert_eq!(cache.factorizations(), 2);
    }

    #[test]
    fn test_singular_pencil_reported() {
        // A = E = I makes A − 1·E the zero matrix.
        let pencil = Pencil::standard(SystemMatrix::identity(4)).unwrap();
        let b = Mat::from_fn(4, 1, |_, _| c64::new(1.0, 0.0));
        for strategy in [
            SolveStrategy::Sparse,
            SolveStrategy::Dense,
            SolveStrategy::PrecomputedReduction,
        ] {
            let mut cache = LinearSolveCache::new(&pencil, strategy);
            let err = cache
                .solve(Shift::Finite(c64::new(1.0, 0.0)), b.as_ref())
                .unwrap_err();
            assert!(
                matches!(err.kind(), KrylovErrorKind::SingularPencil { .. }),
                "{strategy:?}"
            );
        }
    }

    #[test]
    fn test_nonsymmetric_mass_uses_lu() {
        let e = faer::mat![[2.0, 1.0], [0.0, 3.0]];
        let a = faer::mat![[-1.0, 0.0], [0.0, -2.0]];
        let pencil = Pencil::new(e, a).unwrap();
        assert!(!pencil.e_is_symmetric());
        let mut cache = LinearSolveCache::new(&pencil, SolveStrategy::Dense);
        let b = Mat::from_fn(2, 1, |i, _| c64::new(1.0 + i as f64, 0.0));
        let x = cache.solve(Shift::Infinite, b.as_ref()).unwrap();
        assert!(residual(&pencil, Shift::Infinite, &x, &b, false) < 1e-14);
    }

    #[test]
    fn test_indefinite_mass_falls_back_to_lu() {
        // E is symmetric but indefinite, so its Cholesky factorization fails.
        let diagonal = [1.0, -1.0, 2.0];
        let e: Vec<_> = diagonal.iter().enumerate().map(|(i, &d)| (i, i, d)).collect();
        let a: Vec<_> = (0..3).map(|i| (i, i, -1.0)).collect();
        let pencil = Pencil::new(
            SystemMatrix::sparse_from_entries(3, 3, &e).unwrap(),
            SystemMatrix::sparse_from_entries(3, 3, &a).unwrap(),
        )
        .unwrap();
        assert!(pencil.e_is_symmetric());
        let b = Mat::from_fn(3, 1, |i, _| c64::new(1.0 + i as f64, 0.5));

        for (strategy, expected) in [
            (SolveStrategy::Sparse, "sparse LU"),
            (SolveStrategy::Dense, "dense LU"),
        ] {
            let mut cache = LinearSolveCache::new(&pencil, strategy);
            let x = cache.solve(Shift::Infinite, b.as_ref()).unwrap();
            let used = cache.active.as_ref().map(|a| a.factor.name());
            assert_eq!(used, Some(expected), "{strategy:?}");
            for i in 0..3 {
                assert!((x[(i, 0)] - b[(i, 0)] / diagonal[i]).norm() < 1e-15, "{strategy:?}");
            }
            assert_eq!(cache.factorizations(), 1);
        }
    }
}
