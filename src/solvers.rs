//! This module provides the high-level API of the crate: one call that builds a rational
//! Krylov basis, with its Sylvester matrices, from a pencil, its inputs and a set of shifts.

use crate::{
    algorithms::{
        SylvesterState,
        direction::{BasisSide, Recurrence, classify},
        orthogonalize::Orthogonalizer,
        shifts::{ShiftRequest, preprocess},
        solve::LinearSolveCache,
        split::split_column,
    },
    error::KrylovError,
    matrix::{InputMatrices, Pencil},
    options::KrylovOptions,
    utils::diagnostics::relative_sylvester_residual,
};
use faer::{Mat, MatRef, c64};

/// The output basis `W` of a two-sided construction and its Sylvester matrices.
///
/// Satisfies `Aᵀ·W·Dw − Eᵀ·W·Sw − Cᵀ·Lw = 0`, with `Dw = I` when `dw` is `None`.
#[derive(Debug, Clone)]
pub struct DualBasis {
    pub w: Mat<c64>,
    pub sw: Mat<c64>,
    pub lw: Mat<c64>,
    pub dw: Option<Mat<c64>>,
}

/// The result of [`build_krylov`].
///
/// Satisfies `A·V·Dv − E·V·Sv − B·Rv = 0`, with `Dv = I` when `dv` is `None` (no shift
/// at infinity was requested).
#[derive(Debug, Clone)]
pub struct KrylovOutput {
    pub v: Mat<c64>,
    pub sv: Mat<c64>,
    pub rv: Mat<c64>,
    pub dv: Option<Mat<c64>>,
    pub dual: Option<DualBasis>,
    /// Number of factorizations of the pencil computed during the construction.
    pub factorizations: usize,
}

/// Real-valued copy of a [`KrylovOutput`].
#[derive(Debug, Clone)]
pub struct RealKrylovOutput {
    pub v: Mat<f64>,
    pub sv: Mat<f64>,
    pub rv: Mat<f64>,
    pub dv: Option<Mat<f64>>,
    pub w: Option<Mat<f64>>,
    pub sw: Option<Mat<f64>>,
    pub lw: Option<Mat<f64>>,
    pub dw: Option<Mat<f64>>,
}

fn all_real(m: &Mat<c64>) -> bool {
    (0..m.ncols()).all(|j| (0..m.nrows()).all(|i| m[(i, j)].im == 0.0))
}

fn real_part(m: &Mat<c64>) -> Mat<f64> {
    Mat::from_fn(m.nrows(), m.ncols(), |i, j| m[(i, j)].re)
}

impl KrylovOutput {
    fn matrices(&self) -> Vec<&Mat<c64>> {
        let mut out = vec![&self.v, &self.sv, &self.rv];
        out.extend(self.dv.as_ref());
        if let Some(dual) = &self.dual {
            out.extend([&dual.w, &dual.sw, &dual.lw]);
            out.extend(dual.dw.as_ref());
        }
        out
    }

    /// Width `q` of the basis.
    pub fn width(&self) -> usize {
        self.v.ncols()
    }

    /// Whether every returned matrix has exactly zero imaginary part.
    pub fn is_real(&self) -> bool {
        self.matrices().into_iter().all(all_real)
    }

    /// The real parts of all matrices, or `None` if any of them is genuinely complex.
    pub fn real_parts(&self) -> Option<RealKrylovOutput> {
        if !self.is_real() {
            return None;
        }
        Some(RealKrylovOutput {
            v: real_part(&self.v),
            sv: real_part(&self.sv),
            rv: real_part(&self.rv),
            dv: self.dv.as_ref().map(real_part),
            w: self.dual.as_ref().map(|d| real_part(&d.w)),
            sw: self.dual.as_ref().map(|d| real_part(&d.sw)),
            lw: self.dual.as_ref().map(|d| real_part(&d.lw)),
            dw: self.dual.as_ref().and_then(|d| d.dw.as_ref().map(real_part)),
        })
    }

    /// Relative residuals of the input relation and, if present, of the output relation.
    pub fn sylvester_residual(&self, pencil: &Pencil, inputs: &InputMatrices) -> (f64, Option<f64>) {
        let input_state = SylvesterState {
            s: self.sv.clone(),
            r: self.rv.clone(),
            d: self.dv.clone(),
        };
        let input = relative_sylvester_residual(
            pencil,
            inputs.b().as_ref(),
            self.v.as_ref(),
            &input_state,
            false,
        );
        let output = match (&self.dual, inputs.c()) {
            (Some(dual), Some(c)) => {
                let state = SylvesterState {
                    s: dual.sw.clone(),
                    r: dual.lw.clone(),
                    d: dual.dw.clone(),
                };
                Some(relative_sylvester_residual(
                    pencil,
                    c.transpose(),
                    dual.w.as_ref(),
                    &state,
                    true,
                ))
            }
            _ => None,
        };
        (input, output)
    }
}

/// Builds a rational Krylov basis for the pencil `(E, A)` at the given shifts.
///
/// Every column solves one shifted system. Repeated shifts build moment chains on a
/// single factorization; infinite shifts match Markov parameters. With
/// `options.keep_real`, complex shifts must come in conjugate pairs and the returned
/// basis and Sylvester matrices are real. If `inputs` carries an output matrix `C`, the
/// output basis `W` is built in lockstep, sharing every factorization.
///
/// # Arguments
/// * `pencil`: The pencil `(E, A)` of order `N`.
/// * `inputs`: The input matrix `B` and, for two-sided construction, the output matrix `C`.
/// * `shifts`: The expansion points; an infinite component denotes the point at infinity.
/// * `right`: Optional right tangential directions (`m × shifts.len()`).
/// * `left`: Optional left tangential directions (`p × shifts.len()`), two-sided only.
/// * `options`: Orthogonalization, solver and realness settings.
///
/// # Returns
/// A `Result` containing the basis with its Sylvester matrices, or a `KrylovError`. No
/// partial result is returned on failure.
pub fn build_krylov(
    pencil: &Pencil,
    inputs: &InputMatrices,
    shifts: &[c64],
    right: Option<MatRef<'_, c64>>,
    left: Option<MatRef<'_, c64>>,
    options: &KrylovOptions,
) -> Result<KrylovOutput, KrylovError> {
    // --- VALIDATION ---
    let n = pencil.order();
    inputs.check_order(n)?;
    options.validate(n, inputs.inputs(), inputs.outputs())?;

    let schedule = preprocess(&ShiftRequest {
        shifts,
        right,
        left,
        inputs: inputs.inputs(),
        outputs: inputs.is_two_sided().then(|| inputs.outputs()),
        keep_real: options.keep_real,
    })?;
    let q = schedule.width;
    let descriptor = schedule.has_markov_steps();

    let mut cache = LinearSolveCache::new(pencil, options.solve_strategy);
    let ortho = Orthogonalizer::new(
        options.orthogonalization,
        &options.inner_product,
        options.dgks_tolerance,
    );
    let mut input = Recurrence::new(
        BasisSide::Input,
        pencil,
        inputs,
        q,
        options.keep_real,
        descriptor,
    );
    let mut output = inputs.is_two_sided().then(|| {
        Recurrence::new(
            BasisSide::Output,
            pencil,
            inputs,
            q,
            options.keep_real,
            descriptor,
        )
    });

    // --- RECURRENCE ---
    // Both sides advance on the same column before moving on, so the output side always
    // finds the factorization the input side just used.
    for (j, spec) in schedule.columns.iter().enumerate() {
        let previous = j.checked_sub(1).map(|p| &schedule.columns[p]);
        let kind = classify(options.mode, previous, spec);
        for rec in std::iter::once(&mut input).chain(output.as_mut()) {
            rec.advance(j, spec, kind, &mut cache)?;
            if let Some(companion) = spec.companion {
                split_column(rec, j, companion)?;
            }
            let t = ortho.orthonormalize(&mut rec.basis, j)?;
            rec.transform(&t);
        }
    }

    // --- COMPANION COLUMNS ---
    // Imaginary parts left raw by splitting, in slot order.
    for rec in std::iter::once(&mut input).chain(output.as_mut()) {
        for k in rec.basis.raw_columns() {
            let t = ortho.orthonormalize(&mut rec.basis, k)?;
            rec.transform(&t);
        }
    }

    // --- REORTHOGONALIZATION ---
    for rec in std::iter::once(&mut input).chain(output.as_mut()) {
        let was_real = all_real(&rec.basis.cols)
            && all_real(&rec.sylvester.s)
            && all_real(&rec.sylvester.r)
            && rec.sylvester.d.as_ref().is_none_or(all_real);
        let t = ortho.reorthogonalize(&mut rec.basis, options.reorthogonalization)?;
        rec.transform(&t);
        if options.keep_real && was_real {
            crate::algorithms::clear_imaginary(rec.basis.cols.as_mut());
            rec.sylvester.clear_imaginary();
        }
    }

    log::info!(
        "Built rational Krylov basis: {} columns ({} solved), {} factorizations{}",
        q,
        schedule.columns.len(),
        cache.factorizations(),
        if inputs.is_two_sided() { ", two-sided" } else { "" }
    );

    let (v_basis, v_state) = input.into_parts();
    let dual = output.map(|rec| {
        let (basis, state) = rec.into_parts();
        DualBasis {
            w: basis.into_inner(),
            sw: state.s,
            lw: state.r,
            dw: state.d,
        }
    });
    Ok(KrylovOutput {
        v: v_basis.into_inner(),
        sv: v_state.s,
        rv: v_state.r,
        dv: v_state.d,
        dual,
        factorizations: cache.factorizations(),
    })
}
