//! The per-column recurrence: what each basis column solves for, and the Sylvester
//! entries that record it.
//!
//! A column either starts a new direction from the inputs (`B·r`, or `Cᵀ·l` on the output
//! side) or continues a chain from the previous working column. The previous column is
//! tracked as a coefficient vector in the *current* basis coordinates, so it stays exact
//! across every orthogonalization and real splitting that happened since it was computed.
//!
//! Sylvester entries per step, for a column `j` whose chain source is `V·c`:
//!
//! | step          | solve                   | `S[:, j]`    | `R[:, j]` | `D[:, j]` |
//! |---------------|-------------------------|--------------|-----------|-----------|
//! | finite, new   | `(A − sE) v = B r`      | `s·e_j`      | `r`       | `e_j`     |
//! | finite, chain | `(A − sE) v = E V c`    | `c + s·e_j`  | `0`       | `e_j`     |
//! | Markov, new   | `E v = B r`             | `e_j`        | `−r`      | `0`       |
//! | Markov, chain | `E v = A V c`           | `e_j`        | `0`       | `c`       |

use super::{
    Basis, Shift, SylvesterState, Transform, clear_imaginary, shifts::ColumnSpec,
    solve::LinearSolveCache,
};
use crate::{
    error::{KrylovError, KrylovErrorKind},
    matrix::{InputMatrices, LinearOperator, Pencil},
    options::KrylovMode,
};
use faer::{Mat, MatRef, c64};

/// The two recurrences of a two-sided construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasisSide {
    /// `V`, driven by `B`, plain solves.
    Input,
    /// `W`, driven by `Cᵀ`, transposed solves.
    Output,
}

/// How a column relates to the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Starts from the inputs with the column's tangential direction.
    New,
    /// Continues from the previous column (higher moment or cascade step).
    Chain,
}

/// What happened while producing one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub kind: StepKind,
    /// Whether the solve had to compute a new factorization.
    pub new_factorization: bool,
}

/// Classifies working column `current` given the previous working column.
///
/// In standard mode a column chains only when it repeats both the shift and the tangential
/// directions of its predecessor; a repeated shift with a new direction starts over from
/// the inputs (and still reuses the factorization). In cascaded mode every column after
/// the first chains.
pub fn classify(
    mode: KrylovMode,
    previous: Option<&ColumnSpec>,
    current: &ColumnSpec,
) -> StepKind {
    match (mode, previous) {
        (_, None) => StepKind::New,
        (KrylovMode::Cascaded, Some(_)) => StepKind::Chain,
        (KrylovMode::Standard, Some(prev)) => {
            if prev.shift == current.shift
                && prev.right == current.right
                && prev.left == current.left
            {
                StepKind::Chain
            } else {
                StepKind::New
            }
        }
    }
}

/// One side of the construction: its basis, its Sylvester matrices and the chain source.
#[derive(Debug, Clone)]
pub struct Recurrence<'a> {
    side: BasisSide,
    pencil: &'a Pencil,
    inputs: &'a InputMatrices,
    keep_real: bool,
    pub(crate) basis: Basis,
    pub(crate) sylvester: SylvesterState,
    /// The last computed column as coefficients in the current basis, `q × 1`.
    source: Option<Mat<c64>>,
}

impl<'a> Recurrence<'a> {
    /// An empty recurrence of basis width `width`.
    ///
    /// `with_descriptor` allocates the descriptor matrix `D`, needed when the schedule
    /// contains Markov steps.
    pub fn new(
        side: BasisSide,
        pencil: &'a Pencil,
        inputs: &'a InputMatrices,
        width: usize,
        keep_real: bool,
        with_descriptor: bool,
    ) -> Self {
        let residual_rows = match side {
            BasisSide::Input => inputs.inputs(),
            BasisSide::Output => inputs.outputs(),
        };
        Self {
            side,
            pencil,
            inputs,
            keep_real,
            basis: Basis::new(pencil.order(), width),
            sylvester: SylvesterState::new(width, residual_rows, with_descriptor),
            source: None,
        }
    }

    pub fn into_parts(self) -> (Basis, SylvesterState) {
        (self.basis, self.sylvester)
    }

    /// Mirrors a basis change `V ← V·T` in the Sylvester matrices and the chain source.
    ///
    /// The basis itself is updated by whoever produced `t`.
    pub fn transform(&mut self, t: &Transform) {
        self.sylvester.apply_transform(t);
        if let Some(source) = self.source.as_mut() {
            *source = &t.inverse * &*source;
        }
    }

    /// Computes working column `j`, writes it as raw and records its Sylvester entries.
    pub fn advance(
        &mut self,
        j: usize,
        spec: &ColumnSpec,
        kind: StepKind,
        cache: &mut LinearSolveCache<'_>,
    ) -> Result<Step, KrylovError> {
        let q = self.basis.width();
        let direction = self.direction(spec)?;
        let chain = match kind {
            StepKind::New => None,
            // A real shift has no companion to take an imaginary part, so after a split it
            // continues from the real part of the previous column.
            StepKind::Chain => {
                let real_part = self.keep_real && spec.shift.is_real();
                Some(self.chain_source(j, real_part)?)
            }
        };

        let rhs = match &chain {
            None => self.drive(&direction),
            Some(c) => {
                let x = self.basis.as_ref() * c;
                match (spec.shift, self.side) {
                    (Shift::Finite(_), BasisSide::Input) => self.pencil.e().apply(x.as_ref()),
                    (Shift::Finite(_), BasisSide::Output) => {
                        self.pencil.e().apply_transpose(x.as_ref())
                    }
                    (Shift::Infinite, BasisSide::Input) => self.pencil.a().apply(x.as_ref()),
                    (Shift::Infinite, BasisSide::Output) => {
                        self.pencil.a().apply_transpose(x.as_ref())
                    }
                }
            }
        };

        let new_factorization = !cache.is_cached(spec.shift);
        let mut column = match self.side {
            BasisSide::Input => cache.solve(spec.shift, rhs.as_ref())?,
            BasisSide::Output => cache.solve_transpose(spec.shift, rhs.as_ref())?,
        };
        let real_problem = spec.shift.is_real()
            && direction.iter().all(|d| d.im == 0.0)
            && chain.as_ref().is_none_or(|c| is_real(c.as_ref()));
        if self.keep_real && real_problem {
            clear_imaginary(column.as_mut());
        }

        if spec.shift.is_infinite() && self.sylvester.d.is_none() {
            return Err(KrylovErrorKind::InvalidInput(
                "Markov steps need a descriptor matrix".to_string(),
            )
            .into());
        }
        let one = c64::new(1.0, 0.0);
        let s = &mut self.sylvester;
        match (spec.shift, &chain) {
            (Shift::Finite(shift), None) => {
                s.s[(j, j)] = shift;
                for (i, &d) in direction.iter().enumerate() {
                    s.r[(i, j)] = d;
                }
                if let Some(d) = s.d.as_mut() {
                    d[(j, j)] = one;
                }
            }
            (Shift::Finite(shift), Some(c)) => {
                for i in 0..q {
                    s.s[(i, j)] = c[(i, 0)];
                }
                s.s[(j, j)] += shift;
                if let Some(d) = s.d.as_mut() {
                    d[(j, j)] = one;
                }
            }
            (Shift::Infinite, None) => {
                s.s[(j, j)] = one;
                for (i, &d) in direction.iter().enumerate() {
                    s.r[(i, j)] = -d;
                }
            }
            (Shift::Infinite, Some(c)) => {
                s.s[(j, j)] = one;
                if let Some(d) = s.d.as_mut() {
                    for i in 0..q {
                        d[(i, j)] = c[(i, 0)];
                    }
                }
            }
        }

        self.basis.write(j, column.as_ref());
        let mut source = Mat::zeros(q, 1);
        source[(j, 0)] = one;
        self.source = Some(source);

        log::debug!(
            "{:?} column {}: {:?} step at shift {}{}",
            self.side,
            j,
            kind,
            spec.shift,
            if new_factorization {
                " (new factorization)"
            } else {
                ""
            }
        );
        Ok(Step {
            kind,
            new_factorization,
        })
    }

    fn direction(&self, spec: &ColumnSpec) -> Result<Vec<c64>, KrylovError> {
        match self.side {
            BasisSide::Input => Ok(spec.right.clone()),
            BasisSide::Output => spec.left.clone().ok_or_else(|| {
                KrylovErrorKind::InvalidInput(
                    "output recurrence needs left tangential directions".to_string(),
                )
                .into()
            }),
        }
    }

    /// `B·r` on the input side, `Cᵀ·l` on the output side.
    fn drive(&self, direction: &[c64]) -> Mat<c64> {
        match (self.side, self.inputs.c()) {
            (BasisSide::Output, Some(c)) => {
                let l = Mat::from_fn(direction.len(), 1, |i, _| direction[i]);
                c.apply_transpose(l.as_ref())
            }
            _ => self.inputs.b_times(direction),
        }
    }

    /// The chain source scaled to unit coefficient norm, optionally reduced to its real
    /// part. The basis is real whenever that is asked for, so `V·Re(c) = Re(V·c)`.
    fn chain_source(&self, j: usize, real_part: bool) -> Result<Mat<c64>, KrylovError> {
        let source = self.source.as_ref().ok_or_else(|| {
            KrylovError::from(KrylovErrorKind::InvalidInput(format!(
                "column {j} continues a chain but no previous column exists"
            )))
        })?;
        let source = if real_part {
            Mat::from_fn(source.nrows(), 1, |i, _| c64::new(source[(i, 0)].re, 0.0))
        } else {
            source.clone()
        };
        let norm = source.norm_l2();
        if !(norm.is_finite() && norm > 0.0) {
            return Err(KrylovErrorKind::Breakdown { column: j }.into());
        }
        Ok(&source * faer::Scale(c64::new(1.0 / norm, 0.0)))
    }
}

fn is_real(m: MatRef<'_, c64>) -> bool {
    (0..m.ncols()).all(|j| (0..m.nrows()).all(|i| m[(i, j)].im == 0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{matrix::SystemMatrix, options::SolveStrategy, utils::diagnostics};
    use faer::mat;

    fn siso_system() -> (Pencil, InputMatrices) {
        let a = SystemMatrix::sparse_from_entries(
            4,
            4,
            &[
                (0, 0, -1.0),
                (1, 1, -2.0),
                (2, 2, -3.0),
                (3, 3, -4.0),
                (0, 1, 0.5),
                (2, 3, 0.25),
            ],
        )
        .unwrap();
        let e: Mat<f64> = mat![
            [2.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.1, 0.0],
            [0.0, 0.1, 1.0, 0.0],
            [0.0, 0.0, 0.0, 3.0]
        ];
        let b = Mat::from_fn(4, 1, |_, _| 1.0);
        let c = Mat::from_fn(1, 4, |_, j| (j + 1) as f64);
        (Pencil::new(e, a).unwrap(), InputMatrices::with_output(b, c))
    }

    fn spec(shift: Shift) -> ColumnSpec {
        ColumnSpec {
            shift,
            right: vec![c64::new(1.0, 0.0)],
            left: Some(vec![c64::new(1.0, 0.0)]),
            companion: None,
        }
    }

    fn input_residual(rec: &Recurrence<'_>, pencil: &Pencil, inputs: &InputMatrices) -> f64 {
        diagnostics::sylvester_residual(
            pencil,
            inputs.b().as_ref(),
            rec.basis.as_ref(),
            &rec.sylvester,
            false,
        )
    }

    #[test]
    fn test_classification() {
        let s0 = spec(Shift::Finite(c64::new(0.0, 0.0)));
        let s1 = spec(Shift::Finite(c64::new(1.0, 0.0)));
        assert_eq!(classify(KrylovMode::Standard, None, &s0), StepKind::New);
        assert_eq!(classify(KrylovMode::Standard, Some(&s0), &s0), StepKind::Chain);
        assert_eq!(classify(KrylovMode::Standard, Some(&s0), &s1), StepKind::New);
        assert_eq!(classify(KrylovMode::Cascaded, Some(&s0), &s1), StepKind::Chain);

        let mut other_dir = s0.clone();
        other_dir.right = vec![c64::new(0.0, 1.0)];
        assert_eq!(classify(KrylovMode::Standard, Some(&s0), &other_dir), StepKind::New);
    }

    #[test]
    fn test_moment_chain_entries_and_reuse() {
        let (pencil, inputs) = siso_system();
        let mut cache = LinearSolveCache::new(&pencil, SolveStrategy::Sparse);
        let mut rec = Recurrence::new(BasisSide::Input, &pencil, &inputs, 2, true, false);
        let s = spec(Shift::Finite(c64::new(0.5, 0.0)));

        let first = rec.advance(0, &s, StepKind::New, &mut cache).unwrap();
        assert!(first.new_factorization);
        let second = rec.advance(1, &s, StepKind::Chain, &mut cache).unwrap();
        assert!(!second.new_factorization);
        assert_eq!(cache.factorizations(), 1);

        assert_eq!(rec.sylvester.s[(0, 0)], c64::new(0.5, 0.0));
        assert_eq!(rec.sylvester.s[(0, 1)], c64::new(1.0, 0.0));
        assert_eq!(rec.sylvester.s[(1, 1)], c64::new(0.5, 0.0));
        assert_eq!(rec.sylvester.r[(0, 1)], c64::new(0.0, 0.0));
        assert!(input_residual(&rec, &pencil, &inputs) < 1e-12);
    }

    #[test]
    fn test_chain_source_follows_transforms() {
        let (pencil, inputs) = siso_system();
        let mut cache = LinearSolveCache::new(&pencil, SolveStrategy::Dense);
        let mut rec = Recurrence::new(BasisSide::Input, &pencil, &inputs, 2, true, false);
        let s = spec(Shift::Finite(c64::new(0.3, 0.0)));
        rec.advance(0, &s, StepKind::New, &mut cache).unwrap();

        // Rescale column 0 as an orthogonalizer would.
        let mut t = Transform::identity(2);
        t.forward[(0, 0)] = c64::new(0.25, 0.0);
        t.inverse[(0, 0)] = c64::new(4.0, 0.0);
        let scaled = rec.basis.as_ref() * &t.forward;
        rec.basis.cols = scaled;
        rec.transform(&t);
        assert!(input_residual(&rec, &pencil, &inputs) < 1e-12);

        rec.advance(1, &s, StepKind::Chain, &mut cache).unwrap();
        assert!(input_residual(&rec, &pencil, &inputs) < 1e-12);
    }

    #[test]
    fn test_markov_steps_keep_relation() {
        let (pencil, inputs) = siso_system();
        let mut cache = LinearSolveCache::new(&pencil, SolveStrategy::Sparse);
        let mut rec = Recurrence::new(BasisSide::Input, &pencil, &inputs, 3, true, true);
        let inf = spec(Shift::Infinite);
        rec.advance(0, &inf, StepKind::New, &mut cache).unwrap();
        rec.advance(1, &inf, StepKind::Chain, &mut cache).unwrap();
        rec.advance(2, &spec(Shift::Finite(c64::new(1.0, 0.0))), StepKind::New, &mut cache)
            .unwrap();

        let d = rec.sylvester.d.as_ref().unwrap();
        assert_eq!(d[(0, 0)], c64::new(0.0, 0.0));
        assert_eq!(d[(2, 2)], c64::new(1.0, 0.0));
        assert_eq!(rec.sylvester.r[(0, 0)], c64::new(-1.0, 0.0));
        assert_eq!(cache.factorizations(), 2);
        assert!(input_residual(&rec, &pencil, &inputs) < 1e-12);
    }

    #[test]
    fn test_output_side_uses_transposed_solves() {
        let (pencil, inputs) = siso_system();
        let mut cache = LinearSolveCache::new(&pencil, SolveStrategy::Sparse);
        let mut v = Recurrence::new(BasisSide::Input, &pencil, &inputs, 1, true, false);
        let mut w = Recurrence::new(BasisSide::Output, &pencil, &inputs, 1, true, false);
        let s = spec(Shift::Finite(c64::new(2.0, 0.0)));
        v.advance(0, &s, StepKind::New, &mut cache).unwrap();
        let step = w.advance(0, &s, StepKind::New, &mut cache).unwrap();
        assert!(!step.new_factorization);

        let ct = inputs.c().unwrap().transpose();
        let residual =
            diagnostics::sylvester_residual(&pencil, ct, w.basis.as_ref(), &w.sylvester, true);
        assert!(residual < 1e-12);
    }

    #[test]
    fn test_output_side_requires_left_direction() {
        let (pencil, inputs) = siso_system();
        let mut cache = LinearSolveCache::new(&pencil, SolveStrategy::Sparse);
        let mut w = Recurrence::new(BasisSide::Output, &pencil, &inputs, 1, true, false);
        let mut s = spec(Shift::Finite(c64::new(2.0, 0.0)));
        s.left = None;
        let err = w.advance(0, &s, StepKind::New, &mut cache).unwrap_err();
        assert!(matches!(err.kind(), KrylovErrorKind::InvalidInput(_)));
    }

    #[test]
    fn test_real_shift_chains_from_real_part_after_split() {
        let (pencil, inputs) = siso_system();
        let mut cache = LinearSolveCache::new(&pencil, SolveStrategy::Sparse);
        let mut rec = Recurrence::new(BasisSide::Input, &pencil, &inputs, 3, true, false);
        let mut pair = spec(Shift::Finite(c64::new(1.0, 1.0)));
        pair.companion = Some(2);
        rec.advance(0, &pair, StepKind::New, &mut cache).unwrap();
        crate::algorithms::split::split_column(&mut rec, 0, 2).unwrap();

        let real = spec(Shift::Finite(c64::new(2.0, 0.0)));
        rec.advance(1, &real, StepKind::Chain, &mut cache).unwrap();
        let basis = rec.basis.as_ref();
        assert!((0..basis.nrows()).all(|i| basis[(i, 1)].im == 0.0));
        assert!((0..2).all(|i| rec.sylvester.s[(i, 1)].im == 0.0));
        assert!(input_residual(&rec, &pencil, &inputs) < 1e-12);
    }
}
