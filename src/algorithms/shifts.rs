//! Expansion of shifts and tangential directions into a per-column schedule.
//!
//! The schedule has one entry per *working* column, i.e. per column the recurrence
//! actually solves for. When a real basis is requested, each complex-conjugate pair is
//! represented by a single working column; the real basis still has one column per
//! original shift, and the second column of the pair (its imaginary part) lives in a
//! companion slot appended after all working columns.

use super::Shift;
use crate::error::{KrylovError, KrylovErrorKind};
use faer::{MatRef, c64};

/// Relative tolerance used to recognise two shifts as complex conjugates.
fn pairing_tolerance(s: c64) -> f64 {
    100.0 * f64::EPSILON * s.norm().max(1.0)
}

/// One working column of the schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub shift: Shift,
    /// Right tangential direction, length `m`.
    pub right: Vec<c64>,
    /// Left tangential direction, length `p`, for two-sided construction.
    pub left: Option<Vec<c64>>,
    /// Basis slot receiving the imaginary part when this column is split.
    pub companion: Option<usize>,
}

/// The full per-column schedule of one construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ShiftSchedule {
    pub columns: Vec<ColumnSpec>,
    /// Final basis width `q`: working columns plus companion slots.
    pub width: usize,
}

impl ShiftSchedule {
    /// Whether any working column expands at infinity.
    pub fn has_markov_steps(&self) -> bool {
        self.columns.iter().any(|c| c.shift.is_infinite())
    }
}

/// Everything the preprocessor needs besides the shifts.
#[derive(Debug, Clone, Copy)]
pub struct ShiftRequest<'a> {
    pub shifts: &'a [c64],
    pub right: Option<MatRef<'a, c64>>,
    pub left: Option<MatRef<'a, c64>>,
    pub inputs: usize,
    /// Number of outputs for two-sided construction, `None` for one-sided.
    pub outputs: Option<usize>,
    pub keep_real: bool,
}

fn column_of(m: MatRef<'_, c64>, j: usize) -> Vec<c64> {
    (0..m.nrows()).map(|i| m[(i, j)]).collect()
}

fn unit(len: usize, k: usize) -> Vec<c64> {
    let mut v = vec![c64::new(0.0, 0.0); len];
    v[k] = c64::new(1.0, 0.0);
    v
}

fn check_directions(
    what: &'static str,
    dirs: MatRef<'_, c64>,
    rows: usize,
    shifts: usize,
) -> Result<(), KrylovError> {
    if dirs.ncols() != shifts {
        return Err(KrylovErrorKind::DimensionMismatch {
            what,
            expected: shifts,
            actual: dirs.ncols(),
        }
        .into());
    }
    if dirs.nrows() != rows {
        return Err(KrylovErrorKind::DimensionMismatch {
            what,
            expected: rows,
            actual: dirs.nrows(),
        }
        .into());
    }
    Ok(())
}

/// Builds the working schedule from raw shifts and optional tangential directions.
pub fn preprocess(request: &ShiftRequest<'_>) -> Result<ShiftSchedule, KrylovError> {
    let shifts = request.shifts;
    if shifts.is_empty() {
        return Err(KrylovErrorKind::InvalidInput("at least one shift is required".to_string()).into());
    }
    if let Some(&bad) = shifts.iter().find(|s| s.re.is_nan() || s.im.is_nan()) {
        return Err(KrylovErrorKind::InvalidShiftPairing { shift: bad }.into());
    }
    let m = request.inputs;

    let mut columns = match request.right {
        Some(right) => {
            check_directions("right tangential directions", right, m, shifts.len())?;
            let left = match (request.outputs, request.left) {
                (None, _) => None,
                (Some(p), Some(left)) => {
                    check_directions("left tangential directions", left, p, shifts.len())?;
                    Some(left)
                }
                (Some(1), None) => None,
                (Some(p), None) => {
                    return Err(KrylovErrorKind::DimensionMismatch {
                        what: "left tangential directions (rows)",
                        expected: p,
                        actual: 0,
                    }
                    .into());
                }
            };
            shifts
                .iter()
                .enumerate()
                .map(|(j, &s)| ColumnSpec {
                    shift: Shift::from_value(s),
                    right: column_of(right, j),
                    left: match (request.outputs, left) {
                        (None, _) => None,
                        (Some(_), Some(l)) => Some(column_of(l, j)),
                        (Some(_), None) => Some(vec![c64::new(1.0, 0.0)]),
                    },
                    companion: None,
                })
                .collect::<Vec<_>>()
        }
        None if m == 1 && request.outputs.is_none_or(|p| p == 1) => {
            if let Some(left) = request.left {
                check_directions("left tangential directions", left, 1, shifts.len())?;
            }
            shifts
                .iter()
                .enumerate()
                .map(|(j, &s)| ColumnSpec {
                    shift: Shift::from_value(s),
                    right: vec![c64::new(1.0, 0.0)],
                    left: request.outputs.map(|_| match request.left {
                        Some(left) => column_of(left, j),
                        None => vec![c64::new(1.0, 0.0)],
                    }),
                    companion: None,
                })
                .collect()
        }
        None => block_expansion(shifts, m, request.outputs)?,
    };

    if request.keep_real && columns.iter().any(|c| !c.shift.is_real()) {
        columns = reduce_conjugate_pairs(columns)?;
    }

    let working = columns.len();
    let mut next_slot = working;
    for col in columns.iter_mut().filter(|c| !c.shift.is_real()) {
        if request.keep_real {
            col.companion = Some(next_slot);
            next_slot += 1;
        }
    }
    log::debug!(
        "Shift schedule: {} working columns, basis width {}",
        working,
        next_slot
    );
    Ok(ShiftSchedule {
        columns,
        width: next_slot,
    })
}

/// Block Krylov: every shift is paired with each standard basis direction in turn.
fn block_expansion(
    shifts: &[c64],
    m: usize,
    outputs: Option<usize>,
) -> Result<Vec<ColumnSpec>, KrylovError> {
    if let Some(p) = outputs {
        if p != m {
            return Err(KrylovErrorKind::DimensionMismatch {
                what: "outputs for two-sided block Krylov",
                expected: m,
                actual: p,
            }
            .into());
        }
    }
    for (j, s) in shifts.iter().enumerate() {
        if shifts[..j].iter().any(|t| t == s) {
            return Err(KrylovErrorKind::UnsupportedMultiplicity { shift: *s }.into());
        }
    }
    Ok(shifts
        .iter()
        .flat_map(|&s| {
            (0..m).map(move |k| ColumnSpec {
                shift: Shift::from_value(s),
                right: unit(m, k),
                left: outputs.map(|p| unit(p, k)),
                companion: None,
            })
        })
        .collect())
}

fn directions_conjugate(a: &[c64], b: &[c64]) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(x, y)| (x.conj() - y).norm() <= pairing_tolerance(*x))
}

fn is_partner(a: &ColumnSpec, b: &ColumnSpec) -> bool {
    let (Shift::Finite(sa), Shift::Finite(sb)) = (a.shift, b.shift) else {
        return false;
    };
    (sa.conj() - sb).norm() <= pairing_tolerance(sa)
        && directions_conjugate(&a.right, &b.right)
        && match (&a.left, &b.left) {
            (Some(la), Some(lb)) => directions_conjugate(la, lb),
            (None, None) => true,
            _ => false,
        }
}

/// Keeps one representative per conjugate pair.
///
/// Candidates are visited in canonical pairing order (real part, then magnitude of the
/// imaginary part, stable), and each representative is matched with the first unmatched
/// partner carrying the conjugate shift and conjugate tangential directions. The
/// representative is whichever member of the pair comes first in the caller's order, so
/// the relative order of the schedule (and with it moment chains) is preserved.
fn reduce_conjugate_pairs(columns: Vec<ColumnSpec>) -> Result<Vec<ColumnSpec>, KrylovError> {
    let mut order: Vec<usize> = (0..columns.len())
        .filter(|&j| !columns[j].shift.is_real())
        .collect();
    order.sort_by(|&i, &j| {
        let (si, sj) = (columns[i].shift.value(), columns[j].shift.value());
        si.re
            .total_cmp(&sj.re)
            .then(si.im.abs().total_cmp(&sj.im.abs()))
    });

    let mut dropped = vec![false; columns.len()];
    let mut matched = vec![false; columns.len()];
    for (pos, &j) in order.iter().enumerate() {
        if matched[j] {
            continue;
        }
        let partner = order[pos + 1..]
            .iter()
            .copied()
            .find(|&k| !matched[k] && is_partner(&columns[j], &columns[k]));
        match partner {
            Some(k) => {
                matched[j] = true;
                matched[k] = true;
                dropped[j.max(k)] = true;
            }
            None => {
                return Err(KrylovErrorKind::InvalidShiftPairing {
                    shift: columns[j].shift.value(),
                }
                .into());
            }
        }
    }

    Ok(columns
        .into_iter()
        .zip(dropped)
        .filter_map(|(c, d)| (!d).then_some(c))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::Mat;

    fn request(shifts: &[c64]) -> ShiftRequest<'_> {
        ShiftRequest {
            shifts,
            right: None,
            left: None,
            inputs: 1,
            outputs: None,
            keep_real: true,
        }
    }

    #[test]
    fn test_siso_real_shifts_keep_order() {
        let shifts = [c64::new(2.0, 0.0), c64::new(1.0, 0.0), c64::new(2.0, 0.0)];
        let schedule = preprocess(&request(&shifts)).unwrap();
        assert_eq!(schedule.width, 3);
        let values: Vec<_> = schedule.columns.iter().map(|c| c.shift.value()).collect();
        assert_eq!(values, shifts.to_vec());
        assert!(schedule.columns.iter().all(|c| c.companion.is_none()));
    }

    #[test]
    fn test_conjugate_pair_reduced_with_companion() {
        let shifts = [
            c64::new(1.0, 0.0),
            c64::new(-1.0, 3.0),
            c64::new(5.0, 0.0),
            c64::new(-1.0, -3.0),
        ];
        let schedule = preprocess(&request(&shifts)).unwrap();
        assert_eq!(schedule.columns.len(), 3);
        assert_eq!(schedule.width, 4);
        assert_eq!(schedule.columns[1].shift, Shift::Finite(c64::new(-1.0, 3.0)));
        assert_eq!(schedule.columns[1].companion, Some(3));
    }

    #[test]
    fn test_complex_without_keep_real_is_untouched() {
        let shifts = [c64::new(0.0, 1.0)];
        let mut req = request(&shifts);
        req.keep_real = false;
        let schedule = preprocess(&req).unwrap();
        assert_eq!(schedule.width, 1);
        assert_eq!(schedule.columns[0].companion, None);
    }

    #[test]
    fn test_unpaired_complex_shift_rejected() {
        let shifts = [c64::new(0.0, 1.0), c64::new(0.0, 2.0)];
        let err = preprocess(&request(&shifts)).unwrap_err();
        assert_eq!(
            err.kind(),
            &KrylovErrorKind::InvalidShiftPairing {
                shift: c64::new(0.0, 1.0)
            }
        );
    }

    #[test]
    fn test_block_expansion() {
        let shifts = [c64::new(0.0, 0.0), c64::new(1.0, 0.0)];
        let mut req = request(&shifts);
        req.inputs = 3;
        let schedule = preprocess(&req).unwrap();
        assert_eq!(schedule.columns.len(), 6);
        assert_eq!(schedule.columns[4].right, unit(3, 1));
        assert_eq!(schedule.columns[4].shift, Shift::Finite(c64::new(1.0, 0.0)));
    }

    #[test]
    fn test_block_expansion_rejects_duplicates() {
        let shifts = [c64::new(0.0, 0.0), c64::new(0.0, 0.0)];
        let mut req = request(&shifts);
        req.inputs = 2;
        let err = preprocess(&req).unwrap_err();
        assert!(matches!(
            err.kind(),
            KrylovErrorKind::UnsupportedMultiplicity { .. }
        ));
    }

    #[test]
    fn test_block_pairs_matched_by_direction() {
        let shifts = [c64::new(-1.0, 2.0), c64::new(-1.0, -2.0)];
        let mut req = request(&shifts);
        req.inputs = 2;
        let schedule = preprocess(&req).unwrap();
        assert_eq!(schedule.columns.len(), 2);
        assert_eq!(schedule.width, 4);
        assert_eq!(schedule.columns[0].right, unit(2, 0));
        assert_eq!(schedule.columns[1].right, unit(2, 1));
        assert_eq!(schedule.columns[1].companion, Some(3));
    }

    #[test]
    fn test_tangential_dimension_mismatch() {
        let shifts = [c64::new(0.0, 0.0), c64::new(1.0, 0.0)];
        let right = Mat::<c64>::zeros(2, 3);
        let mut req = request(&shifts);
        req.inputs = 2;
        req.right = Some(right.as_ref());
        let err = preprocess(&req).unwrap_err();
        assert_eq!(
            err.kind(),
            &KrylovErrorKind::DimensionMismatch {
                what: "right tangential directions",
                expected: 2,
                actual: 3
            }
        );
    }

    #[test]
    fn test_tangential_pairs_need_conjugate_directions() {
        let shifts = [c64::new(0.0, 1.0), c64::new(0.0, -1.0)];
        let right = Mat::from_fn(2, 2, |i, j| c64::new((i + 1) as f64, (j + 1) as f64));
        let mut req = request(&shifts);
        req.inputs = 2;
        req.right = Some(right.as_ref());
        assert!(preprocess(&req).is_err());

        let conjugated = Mat::from_fn(2, 2, |i, j| {
            c64::new((i + 1) as f64, if j == 0 { 1.0 } else { -1.0 })
        });
        req.right = Some(conjugated.as_ref());
        let schedule = preprocess(&req).unwrap();
        assert_eq!(schedule.columns.len(), 1);
        assert_eq!(schedule.width, 2);
    }

    #[test]
    fn test_nan_shift_rejected() {
        let shifts = [c64::new(f64::NAN, 0.0)];
        assert!(matches!(
            preprocess(&request(&shifts)).unwrap_err().kind(),
            KrylovErrorKind::InvalidShiftPairing { .. }
        ));
    }

    #[test]
    fn test_infinite_shift_is_real() {
        let shifts = [c64::new(f64::INFINITY, 0.0), c64::new(f64::INFINITY, 0.0)];
        let schedule = preprocess(&request(&shifts)).unwrap();
        assert!(schedule.has_markov_steps());
        assert_eq!(schedule.width, 2);
    }
}
