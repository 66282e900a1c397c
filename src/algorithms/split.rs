//! Real splitting of complex basis columns.
//!
//! When the shifts are closed under conjugation only one column of each pair is solved
//! for. Its conjugate `v̄` satisfies the conjugated Sylvester relation as long as every
//! other column is real, so it can be written down without another solve. Splitting
//! first materializes `v̄` in the companion slot, then applies the change of basis
//! `[v, v̄] → [Re v, Im v]`:
//!
//! ```text
//!       j      y                 j     y
//! T = [ 1/2  1/(2i) ]  (j)   T⁻¹ = [ 1    1 ]  (j)
//!     [ 1/2 −1/(2i) ]  (y)         [ i   −i ]  (y)
//! ```
//!
//! For a shift `s = σ + iω` the pair's block of `S` becomes `[[σ, ω], [−ω, σ]]`.

use super::{ColumnState, Transform, direction::Recurrence};
use crate::error::{KrylovError, KrylovErrorKind};
use faer::c64;

/// Splits working column `j` of `rec` into its real part (in place) and its imaginary
/// part (in slot `companion`, left raw).
///
/// Returns the transform that was applied to the Sylvester state.
pub fn split_column(
    rec: &mut Recurrence<'_>,
    j: usize,
    companion: usize,
) -> Result<Transform, KrylovError> {
    let y = companion;
    if j == y || rec.basis.state(y) != ColumnState::Empty {
        return Err(KrylovErrorKind::InvalidInput(format!(
            "companion slot {y} of column {j} is not available"
        ))
        .into());
    }

    // The conjugate column: same entries conjugated, with its own diagonal at (y, y).
    let state = &mut rec.sylvester;
    conjugate_companion(&mut state.s, j, y);
    if let Some(d) = state.d.as_mut() {
        conjugate_companion(d, j, y);
    }
    for i in 0..state.r.nrows() {
        state.r[(i, y)] = state.r[(i, j)].conj();
    }

    let q = rec.basis.width();
    let half = c64::new(0.5, 0.0);
    let i_unit = c64::new(0.0, 1.0);
    let mut t = Transform::identity(q);
    t.forward[(j, j)] = half;
    t.forward[(y, j)] = half;
    t.forward[(j, y)] = (i_unit * 2.0).inv();
    t.forward[(y, y)] = -(i_unit * 2.0).inv();
    t.inverse[(j, j)] = c64::new(1.0, 0.0);
    t.inverse[(y, j)] = i_unit;
    t.inverse[(j, y)] = c64::new(1.0, 0.0);
    t.inverse[(y, y)] = -i_unit;

    let basis = &mut rec.basis;
    for r in 0..basis.cols.nrows() {
        let v = basis.cols[(r, j)];
        basis.cols[(r, j)] = c64::new(v.re, 0.0);
        basis.cols[(r, y)] = c64::new(v.im, 0.0);
    }
    basis.states[y] = ColumnState::Raw;

    rec.transform(&t);
    rec.sylvester.clear_imaginary();
    log::debug!("Split column {j} into real pair ({j}, {y})");
    Ok(t)
}

/// Writes the conjugate of column `j` of `m` into column `y`, swapping the roles of rows
/// `j` and `y`.
fn conjugate_companion(m: &mut faer::Mat<c64>, j: usize, y: usize) {
    for i in 0..m.nrows() {
        let source_row = if i == y {
            j
        } else if i == j {
            y
        } else {
            i
        };
        m[(i, y)] = m[(source_row, j)].conj();
    }
}
