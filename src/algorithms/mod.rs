//! Building blocks of the rational Krylov construction.
//!
//! ** NOTE: We recommend using the high-level entry point [`crate::solvers::build_krylov`].
//! These modules are public for callers that need to drive the recurrence column by column.
//!
//! The submodules follow the data flow of one basis column:
//!
//! - [`shifts`]: expands shifts and tangential directions into a per-column schedule.
//! - [`direction`]: decides what a column solves for and records its Sylvester entries.
//! - [`solve`] and [`hessenberg`]: the cached factorizations of the shifted pencil.
//! - [`split`]: turns a complex column into a real pair.
//! - [`orthogonalize`]: Gram-Schmidt variants and the final reorthogonalization.
//!
//! This module holds the state they share: shifts, the basis with its per-column
//! lifecycle, the Sylvester matrices and the basis transformations that update them.

pub mod direction;
pub mod hessenberg;
pub mod orthogonalize;
pub mod shifts;
pub mod solve;
pub mod split;

use faer::{Mat, MatMut, MatRef, c64};
use std::fmt;

/// An expansion point of the rational Krylov subspace.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shift {
    /// A finite frequency `s`: the column solves `(A − sE) x = rhs`.
    Finite(c64),
    /// The point at infinity: the column matches Markov parameters and solves `E x = rhs`.
    Infinite,
}

impl Shift {
    /// Classifies a complex number; any infinite component means the point at infinity.
    pub fn from_value(s: c64) -> Self {
        if s.re.is_infinite() || s.im.is_infinite() {
            Shift::Infinite
        } else {
            Shift::Finite(s)
        }
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self, Shift::Infinite)
    }

    /// Whether the shift lies on the real axis (infinity counts as real).
    pub fn is_real(&self) -> bool {
        match self {
            Shift::Finite(s) => s.im == 0.0,
            Shift::Infinite => true,
        }
    }

    /// The complex value, with `∞` represented as a real infinity.
    pub fn value(&self) -> c64 {
        match self {
            Shift::Finite(s) => *s,
            Shift::Infinite => c64::new(f64::INFINITY, 0.0),
        }
    }

    pub fn conj(&self) -> Self {
        match self {
            Shift::Finite(s) => Shift::Finite(s.conj()),
            Shift::Infinite => Shift::Infinite,
        }
    }
}

impl fmt::Display for Shift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shift::Finite(s) => write!(f, "{s}"),
            Shift::Infinite => write!(f, "inf"),
        }
    }
}

/// Lifecycle of a basis column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnState {
    /// Not computed yet.
    Empty,
    /// Written by the recurrence or by real splitting, not yet orthonormalized.
    Raw,
    /// Orthonormalized against all earlier final columns; frozen until reorthogonalization.
    Final,
}

/// A basis under construction: `N × q` complex storage plus the state of each column.
#[derive(Debug, Clone)]
pub struct Basis {
    pub(crate) cols: Mat<c64>,
    pub(crate) states: Vec<ColumnState>,
}

impl Basis {
    pub fn new(order: usize, width: usize) -> Self {
        Self {
            cols: Mat::zeros(order, width),
            states: vec![ColumnState::Empty; width],
        }
    }

    pub fn as_ref(&self) -> MatRef<'_, c64> {
        self.cols.as_ref()
    }

    pub fn as_mut(&mut self) -> MatMut<'_, c64> {
        self.cols.as_mut()
    }

    pub fn width(&self) -> usize {
        self.cols.ncols()
    }

    pub fn state(&self, k: usize) -> ColumnState {
        self.states[k]
    }

    /// Stores a freshly computed column and marks it raw.
    pub fn write(&mut self, k: usize, column: MatRef<'_, c64>) {
        self.cols.col_mut(k).copy_from(column.col(0));
        self.states[k] = ColumnState::Raw;
    }

    /// Indices of all final columns, in storage order.
    pub fn final_columns(&self) -> Vec<usize> {
        (0..self.width())
            .filter(|&k| self.states[k] == ColumnState::Final)
            .collect()
    }

    /// Indices of all raw columns, in storage order.
    pub fn raw_columns(&self) -> Vec<usize> {
        (0..self.width())
            .filter(|&k| self.states[k] == ColumnState::Raw)
            .collect()
    }

    pub fn into_inner(self) -> Mat<c64> {
        self.cols
    }
}

/// A change of basis `V ← V·T`, carried together with its inverse.
///
/// Every step that alters the basis produces both factors explicitly, so the Sylvester
/// matrices are updated without inverting anything numerically.
#[derive(Debug, Clone)]
pub struct Transform {
    pub forward: Mat<c64>,
    pub inverse: Mat<c64>,
}

impl Transform {
    pub fn identity(q: usize) -> Self {
        Self {
            forward: Mat::identity(q, q),
            inverse: Mat::identity(q, q),
        }
    }

    /// The transform of `self` followed by `next`.
    pub fn then(&self, next: &Transform) -> Transform {
        Transform {
            forward: &self.forward * &next.forward,
            inverse: &next.inverse * &self.inverse,
        }
    }
}

/// The matrices tying a basis to the pencil.
///
/// For the input basis: `A·V·D − E·V·S − B·R = 0`, with `D = I` (not stored) unless the
/// schedule contains Markov steps. The output basis uses the same structure with `Aᵀ`,
/// `Eᵀ` and `Cᵀ`.
#[derive(Debug, Clone)]
pub struct SylvesterState {
    pub s: Mat<c64>,
    pub r: Mat<c64>,
    pub d: Option<Mat<c64>>,
}

impl SylvesterState {
    /// Zero state for a basis of width `q` and `inputs` residual directions.
    pub fn new(q: usize, inputs: usize, with_descriptor: bool) -> Self {
        Self {
            s: Mat::zeros(q, q),
            r: Mat::zeros(inputs, q),
            d: with_descriptor.then(|| Mat::zeros(q, q)),
        }
    }

    /// Mirrors `V ← V·T`: `S ← T⁻¹·S·T`, `D ← T⁻¹·D·T`, `R ← R·T`.
    pub fn apply_transform(&mut self, t: &Transform) {
        self.s = &t.inverse * &self.s * &t.forward;
        self.r = &self.r * &t.forward;
        if let Some(d) = self.d.as_mut() {
            *d = &t.inverse * &*d * &t.forward;
        }
    }

    /// Drops rounding-level imaginary parts once every computed column is real.
    pub fn clear_imaginary(&mut self) {
        clear_imaginary(self.s.as_mut());
        clear_imaginary(self.r.as_mut());
        if let Some(d) = self.d.as_mut() {
            clear_imaginary(d.as_mut());
        }
    }
}

/// Sets the imaginary part of every entry to zero.
pub(crate) fn clear_imaginary(mut m: MatMut<'_, c64>) {
    for j in 0..m.ncols() {
        for i in 0..m.nrows() {
            m[(i, j)].im = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shift_classification() {
        assert!(Shift::from_value(c64::new(f64::INFINITY, 0.0)).is_infinite());
        assert!(Shift::from_value(c64::new(0.0, f64::NEG_INFINITY)).is_infinite());
        let s = Shift::from_value(c64::new(1.0, -2.0));
        assert!(!s.is_real());
        assert_eq!(s.conj(), Shift::Finite(c64::new(1.0, 2.0)));
        assert!(Shift::from_value(c64::new(3.0, 0.0)).is_real());
    }

    #[test]
    fn test_transform_composition_inverts() {
        let forward = Mat::from_fn(3, 3, |i, j| {
            if i == j {
                c64::new(2.0, 0.0)
            } else if i < j {
                c64::new(1.0, 1.0)
            } else {
                c64::new(0.0, 0.0)
            }
        });
        // Inverse of an upper-triangular matrix with 2 on the diagonal and 1+i above.
        let inverse = {
            let h = c64::new(0.5, 0.0);
            let a = c64::new(1.0, 1.0);
            let mut inv = Mat::<c64>::zeros(3, 3);
            for k in 0..3 {
                inv[(k, k)] = h;
            }
            inv[(0, 1)] = -a * h * h;
            inv[(1, 2)] = -a * h * h;
            inv[(0, 2)] = (a * a * h - a) * h * h;
            inv
        };
        let t = Transform { forward, inverse };
        let id = t.then(&Transform::identity(3));
        let product = &id.forward * &id.inverse;
        assert!((product - Mat::<c64>::identity(3, 3)).norm_l2() < 1e-14);
    }

    #[test]
    fn test_apply_transform_preserves_similarity_trace() {
        let mut state = SylvesterState::new(2, 1, false);
        state.s[(0, 0)] = c64::new(1.0, 0.0);
        state.s[(0, 1)] = c64::new(1.0, 0.0);
        state.s[(1, 1)] = c64::new(3.0, 0.0);
        state.r[(0, 0)] = c64::new(1.0, 0.0);
        let mut t = Transform::identity(2);
        t.forward[(1, 1)] = c64::new(0.5, 0.0);
        t.inverse[(1, 1)] = c64::new(2.0, 0.0);
        state.apply_transform(&t);
        assert_eq!(state.s[(0, 1)], c64::new(0.5, 0.0));
        assert_eq!(state.s[(1, 1)], c64::new(3.0, 0.0));
        assert_eq!(state.r[(0, 0)], c64::new(1.0, 0.0));
    }

    #[test]
    fn test_basis_lifecycle() {
        let mut basis = Basis::new(3, 2);
        assert_eq!(basis.state(0), ColumnState::Empty);
        let col = Mat::from_fn(3, 1, |i, _| c64::new(i as f64, 0.0));
        basis.write(1, col.as_ref());
        assert_eq!(basis.raw_columns(), vec![1]);
        assert!(basis.final_columns().is_empty());
    }
}
