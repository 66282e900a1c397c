//! Linear-operator abstraction and the data model of the system being reduced.
//!
//! The construction engine only ever needs a handful of operations from the system
//! matrices: products with (complex) blocks, products with their transposes, and access
//! to their nonzero entries when a shifted pencil has to be assembled and factored.
//! The [`LinearOperator`] trait captures the products; [`SystemMatrix`] is the closed
//! set of storage formats the solvers know how to factor (dense or sparse CSC).
//!
//! All system matrices are real. Shifts are complex, so every product takes and returns
//! complex blocks: a real operator acts on the real and imaginary parts separately.

use crate::error::{KrylovError, KrylovErrorKind};
use faer::{
    Accum, Mat, MatRef, c64, get_global_parallelism,
    sparse::{
        SparseColMat, SymbolicSparseColMat, Triplet,
        linalg::matmul::{dense_sparse_matmul, sparse_dense_matmul},
    },
};
use std::collections::HashMap;

/// Represents a real linear operator that can be applied to complex blocks.
///
/// Krylov recurrences never look inside the operator: they multiply by `A`, `E`, `B`
/// or their transposes. Depending on this trait keeps the recurrence independent of the
/// storage format.
pub trait LinearOperator {
    /// Returns the number of rows of the operator.
    fn nrows(&self) -> usize;

    /// Returns the number of columns of the operator.
    fn ncols(&self) -> usize;

    /// Computes `self * rhs`.
    ///
    /// # Panics
    ///
    /// Panics if `rhs.nrows()` differs from `self.ncols()`.
    fn apply(&self, rhs: MatRef<'_, c64>) -> Mat<c64>;

    /// Computes `selfᵀ * rhs` (plain transpose, no conjugation).
    ///
    /// # Panics
    ///
    /// Panics if `rhs.nrows()` differs from `self.nrows()`.
    fn apply_transpose(&self, rhs: MatRef<'_, c64>) -> Mat<c64>;
}

/// Splits a complex block into its real and imaginary parts.
pub(crate) fn split_complex(rhs: MatRef<'_, c64>) -> (Mat<f64>, Mat<f64>) {
    let re = Mat::from_fn(rhs.nrows(), rhs.ncols(), |i, j| rhs[(i, j)].re);
    let im = Mat::from_fn(rhs.nrows(), rhs.ncols(), |i, j| rhs[(i, j)].im);
    (re, im)
}

/// Reassembles a complex block from its real and imaginary parts.
pub(crate) fn join_complex(re: &Mat<f64>, im: &Mat<f64>) -> Mat<c64> {
    Mat::from_fn(re.nrows(), re.ncols(), |i, j| c64::new(re[(i, j)], im[(i, j)]))
}

/// Promotes a real matrix to complex storage.
pub fn to_complex(m: MatRef<'_, f64>) -> Mat<c64> {
    Mat::from_fn(m.nrows(), m.ncols(), |i, j| c64::new(m[(i, j)], 0.0))
}

impl LinearOperator for Mat<f64> {
    #[inline]
    fn nrows(&self) -> usize {
        self.as_ref().nrows()
    }

    #[inline]
    fn ncols(&self) -> usize {
        self.as_ref().ncols()
    }

    fn apply(&self, rhs: MatRef<'_, c64>) -> Mat<c64> {
        assert_eq!(
            self.ncols(),
            rhs.nrows(),
            "Dimension mismatch: operator columns ({}) do not match block rows ({}).",
            self.ncols(),
            rhs.nrows(),
        );
        // Two real products are cheaper than promoting the operator to complex storage.
        let (re, im) = split_complex(rhs);
        join_complex(&(self * &re), &(self * &im))
    }

    fn apply_transpose(&self, rhs: MatRef<'_, c64>) -> Mat<c64> {
        assert_eq!(
            self.nrows(),
            rhs.nrows(),
            "Dimension mismatch: operator rows ({}) do not match block rows ({}).",
            self.nrows(),
            rhs.nrows(),
        );
        let (re, im) = split_complex(rhs);
        join_complex(
            &(self.transpose() * re.as_ref()),
            &(self.transpose() * im.as_ref()),
        )
    }
}

impl LinearOperator for SparseColMat<usize, f64> {
    #[inline]
    fn nrows(&self) -> usize {
        self.as_ref().nrows()
    }

    #[inline]
    fn ncols(&self) -> usize {
        self.as_ref().ncols()
    }

    fn apply(&self, rhs: MatRef<'_, c64>) -> Mat<c64> {
        assert_eq!(
            self.ncols(),
            rhs.nrows(),
            "Dimension mismatch: operator columns ({}) do not match block rows ({}).",
            self.ncols(),
            rhs.nrows(),
        );
        let (re, im) = split_complex(rhs);
        let product = |part: &Mat<f64>| {
            let mut out = Mat::<f64>::zeros(self.nrows(), part.ncols());
            sparse_dense_matmul(
                out.as_mut(),
                Accum::Replace,
                self.as_ref(),
                part.as_ref(),
                1.0,
                get_global_parallelism(),
            );
            out
        };
        join_complex(&product(&re), &product(&im))
    }

    fn apply_transpose(&self, rhs: MatRef<'_, c64>) -> Mat<c64> {
        assert_eq!(
            self.nrows(),
            rhs.nrows(),
            "Dimension mismatch: operator rows ({}) do not match block rows ({}).",
            self.nrows(),
            rhs.nrows(),
        );
        // Aᵀ·X is computed as (Xᵀ·A)ᵀ, written through a transposed view.
        let (re, im) = split_complex(rhs);
        let product = |part: &Mat<f64>| {
            let mut out = Mat::<f64>::zeros(self.ncols(), part.ncols());
            dense_sparse_matmul(
                out.as_mut().transpose_mut(),
                Accum::Replace,
                part.transpose(),
                self.as_ref(),
                1.0,
                get_global_parallelism(),
            );
            out
        };
        join_complex(&product(&re), &product(&im))
    }
}

/// A real system matrix in one of the storage formats the solvers can factor.
#[derive(Debug, Clone)]
pub enum SystemMatrix {
    Dense(Mat<f64>),
    Sparse(SparseColMat<usize, f64>),
}

impl SystemMatrix {
    /// Builds a sparse matrix from `(row, col, value)` entries. Duplicates are summed.
    pub fn sparse_from_entries(
        nrows: usize,
        ncols: usize,
        entries: &[(usize, usize, f64)],
    ) -> Result<Self, KrylovError> {
        let triplets: Vec<_> = entries
            .iter()
            .map(|&(row, col, val)| Triplet::new(row, col, val))
            .collect();
        SparseColMat::try_new_from_triplets(nrows, ncols, &triplets)
            .map(SystemMatrix::Sparse)
            .map_err(|e| {
                KrylovErrorKind::InvalidInput(format!("invalid sparse entries: {e:?}")).into()
            })
    }

    /// The sparse identity of order `n`.
    pub fn identity(n: usize) -> Self {
        let symbolic =
            SymbolicSparseColMat::<usize>::new_checked(n, n, (0..=n).collect(), None, (0..n).collect());
        SystemMatrix::Sparse(SparseColMat::new(symbolic, vec![1.0; n]))
    }

    /// Returns the stored entries as `(row, col, value)`, skipping explicit dense zeros.
    pub fn entries(&self) -> Vec<(usize, usize, f64)> {
        match self {
            SystemMatrix::Dense(m) => {
                let mut out = Vec::new();
                for j in 0..m.ncols() {
                    for i in 0..m.nrows() {
                        let v = m[(i, j)];
                        if v != 0.0 {
                            out.push((i, j, v));
                        }
                    }
                }
                out
            }
            SystemMatrix::Sparse(m) => {
                let a = m.as_ref();
                let mut out = Vec::with_capacity(a.compute_nnz());
                for j in 0..a.ncols() {
                    for (i, &v) in a.row_idx_of_col(j).zip(a.val_of_col(j)) {
                        out.push((i, j, v));
                    }
                }
                out
            }
        }
    }

    /// Dense copy of the matrix.
    pub fn to_dense(&self) -> Mat<f64> {
        match self {
            SystemMatrix::Dense(m) => m.clone(),
            SystemMatrix::Sparse(m) => {
                let mut out = Mat::zeros(m.nrows(), m.ncols());
                for (i, j, v) in self.entries() {
                    out[(i, j)] += v;
                }
                out
            }
        }
    }

    /// Frobenius norm.
    pub fn norm_frobenius(&self) -> f64 {
        match self {
            SystemMatrix::Dense(m) => m.norm_l2(),
            SystemMatrix::Sparse(_) => self
                .entries()
                .iter()
                .map(|&(_, _, v)| v * v)
                .sum::<f64>()
                .sqrt(),
        }
    }

    /// Checks numerical symmetry entry by entry (relative to the largest magnitude).
    pub fn is_symmetric(&self) -> bool {
        if self.nrows() != self.ncols() {
            return false;
        }
        let mut map: HashMap<(usize, usize), f64> = HashMap::new();
        for (i, j, v) in self.entries() {
            *map.entry((i, j)).or_insert(0.0) += v;
        }
        let scale = map.values().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        let tol = 1e-14 * scale.max(f64::MIN_POSITIVE);
        map.iter().all(|(&(i, j), &v)| {
            let w = map.get(&(j, i)).copied().unwrap_or(0.0);
            (v - w).abs() <= tol
        })
    }
}

impl LinearOperator for SystemMatrix {
    fn nrows(&self) -> usize {
        match self {
            SystemMatrix::Dense(m) => m.nrows(),
            SystemMatrix::Sparse(m) => m.nrows(),
        }
    }

    fn ncols(&self) -> usize {
        match self {
            SystemMatrix::Dense(m) => m.ncols(),
            SystemMatrix::Sparse(m) => m.ncols(),
        }
    }

    fn apply(&self, rhs: MatRef<'_, c64>) -> Mat<c64> {
        match self {
            SystemMatrix::Dense(m) => m.apply(rhs),
            SystemMatrix::Sparse(m) => m.apply(rhs),
        }
    }

    fn apply_transpose(&self, rhs: MatRef<'_, c64>) -> Mat<c64> {
        match self {
            SystemMatrix::Dense(m) => m.apply_transpose(rhs),
            SystemMatrix::Sparse(m) => m.apply_transpose(rhs),
        }
    }
}

impl From<Mat<f64>> for SystemMatrix {
    fn from(m: Mat<f64>) -> Self {
        SystemMatrix::Dense(m)
    }
}

impl From<SparseColMat<usize, f64>> for SystemMatrix {
    fn from(m: SparseColMat<usize, f64>) -> Self {
        SystemMatrix::Sparse(m)
    }
}

/// The matrix pencil `(E, A)` of a descriptor system `E x' = A x + B u`.
#[derive(Debug, Clone)]
pub struct Pencil {
    e: SystemMatrix,
    a: SystemMatrix,
    e_symmetric: bool,
}

impl Pencil {
    /// Creates a pencil, checking that `E` and `A` are square and of the same order.
    pub fn new(e: impl Into<SystemMatrix>, a: impl Into<SystemMatrix>) -> Result<Self, KrylovError> {
        let e = e.into();
        let a = a.into();
        if a.nrows() != a.ncols() {
            return Err(KrylovErrorKind::DimensionMismatch {
                what: "columns of A",
                expected: a.nrows(),
                actual: a.ncols(),
            }
            .into());
        }
        if e.nrows() != a.nrows() || e.ncols() != a.ncols() {
            return Err(KrylovErrorKind::DimensionMismatch {
                what: "order of E",
                expected: a.nrows(),
                actual: if e.nrows() != a.nrows() { e.nrows() } else { e.ncols() },
            }
            .into());
        }
        let e_symmetric = e.is_symmetric();
        Ok(Self { e, a, e_symmetric })
    }

    /// A standard state-space pencil, `E = I`.
    pub fn standard(a: impl Into<SystemMatrix>) -> Result<Self, KrylovError> {
        let a = a.into();
        Self::new(SystemMatrix::identity(a.nrows()), a)
    }

    pub fn e(&self) -> &SystemMatrix {
        &self.e
    }

    pub fn a(&self) -> &SystemMatrix {
        &self.a
    }

    /// Order `N` of the pencil.
    pub fn order(&self) -> usize {
        self.a.nrows()
    }

    /// Whether `E` is numerically symmetric, making it a Cholesky candidate.
    pub fn e_is_symmetric(&self) -> bool {
        self.e_symmetric
    }
}

/// Input matrix `B` (`N × m`) and, for two-sided construction, output matrix `C` (`p × N`).
#[derive(Debug, Clone)]
pub struct InputMatrices {
    b: Mat<f64>,
    c: Option<Mat<f64>>,
}

impl InputMatrices {
    /// Inputs for a one-sided (input Krylov) construction.
    pub fn new(b: Mat<f64>) -> Self {
        Self { b, c: None }
    }

    /// Inputs and outputs for a two-sided (Hermite) construction.
    pub fn with_output(b: Mat<f64>, c: Mat<f64>) -> Self {
        Self { b, c: Some(c) }
    }

    pub fn b(&self) -> &Mat<f64> {
        &self.b
    }

    pub fn c(&self) -> Option<&Mat<f64>> {
        self.c.as_ref()
    }

    /// Number of inputs `m`.
    pub fn inputs(&self) -> usize {
        self.b.ncols()
    }

    /// Number of outputs `p` (0 when no `C` was given).
    pub fn outputs(&self) -> usize {
        self.c.as_ref().map_or(0, |c| c.nrows())
    }

    pub fn is_two_sided(&self) -> bool {
        self.c.is_some()
    }

    /// `B * r` for a tangential direction `r` of length `m`.
    pub(crate) fn b_times(&self, r: &[c64]) -> Mat<c64> {
        let dir = Mat::from_fn(r.len(), 1, |i, _| r[i]);
        self.b.apply(dir.as_ref())
    }

    /// Checks that `B` and `C` are compatible with a pencil of order `n`.
    pub(crate) fn check_order(&self, n: usize) -> Result<(), KrylovError> {
        if self.b.nrows() != n {
            return Err(KrylovErrorKind::DimensionMismatch {
                what: "rows of B",
                expected: n,
                actual: self.b.nrows(),
            }
            .into());
        }
        if self.b.ncols() == 0 {
            return Err(KrylovErrorKind::InvalidInput("B has no columns".to_string()).into());
        }
        if let Some(c) = &self.c {
            if c.ncols() != n {
                return Err(KrylovErrorKind::DimensionMismatch {
                    what: "columns of C",
                    expected: n,
                    actual: c.ncols(),
                }
                .into());
            }
            if c.nrows() == 0 {
                return Err(KrylovErrorKind::InvalidInput("C has no rows".to_string()).into());
            }
        }
        Ok(())
    }
}
