//! Configuration of a Krylov basis construction.
//!
//! All policies are closed sets of variants selected once, before the first column is
//! computed. [`KrylovOptions`] derives `serde` traits so experiment configurations can be
//! recorded next to their results; the inner product is the one field that is set in code
//! only, since it carries a matrix.

use crate::{
    error::{KrylovError, KrylovErrorKind},
    matrix::{LinearOperator, SystemMatrix},
};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Gram-Schmidt scheme applied to every new basis column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Orthogonalization {
    /// Columns are kept as produced; the caller is responsible for conditioning.
    None,
    /// One modified Gram-Schmidt sweep.
    Mgs,
    /// Two modified Gram-Schmidt sweeps.
    #[default]
    DoubleMgs,
    /// Modified Gram-Schmidt sweeps repeated until the partial basis is orthonormal to
    /// within `dgks_tolerance`.
    Dgks,
}

/// Optional pass over the complete basis after all columns have been computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Reorthogonalization {
    #[default]
    None,
    /// A fresh modified Gram-Schmidt sweep over all columns.
    Mgs,
    /// A thin Householder QR of the whole basis; replaces the basis by `Q`.
    Qr,
}

/// How shifted pencils are factored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SolveStrategy {
    /// Sparse LU (sparse Cholesky of `E` for infinite shifts when `E` is symmetric).
    #[default]
    Sparse,
    /// Dense partial-pivoting LU of the densified pencil.
    Dense,
    /// One Hessenberg-triangular reduction up front, `O(N²)` work per shift afterwards.
    PrecomputedReduction,
}

/// Shape of the Krylov recurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KrylovMode {
    /// Every new shift starts again from `B`; repeated shifts build moment chains.
    #[default]
    Standard,
    /// Every column after the first starts from `E` times the previous column.
    /// Single-input single-output systems only.
    Cascaded,
}

/// Inner product used to orthonormalize the basis.
#[derive(Debug, Clone, Default)]
pub enum InnerProduct {
    /// `⟨x, y⟩ = yᴴ x`.
    #[default]
    Euclidean,
    /// `⟨x, y⟩ = yᴴ M x` for a symmetric positive definite `M`, e.g. an energy norm.
    Weighted(SystemMatrix),
}

/// Options of a Krylov basis construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct KrylovOptions {
    /// Return a real basis when the shifts are closed under conjugation.
    pub keep_real: bool,
    pub orthogonalization: Orthogonalization,
    pub reorthogonalization: Reorthogonalization,
    pub solve_strategy: SolveStrategy,
    /// Orthogonality target of the DGKS scheme, `‖VᴴMV − I‖_F`.
    pub dgks_tolerance: f64,
    pub mode: KrylovMode,
    #[serde(skip)]
    pub inner_product: InnerProduct,
}

impl Default for KrylovOptions {
    fn default() -> Self {
        Self {
            keep_real: true,
            orthogonalization: Orthogonalization::DoubleMgs,
            reorthogonalization: Reorthogonalization::None,
            solve_strategy: SolveStrategy::Sparse,
            dgks_tolerance: 1e-12,
            mode: KrylovMode::Standard,
            inner_product: InnerProduct::Euclidean,
        }
    }
}

impl KrylovOptions {
    /// Checks the options on their own and against the system dimensions.
    ///
    /// `order` is the pencil order, `inputs`/`outputs` the column count of `B` and the row
    /// count of `C` (0 for one-sided construction).
    pub fn validate(
        &self,
        order: usize,
        inputs: usize,
        outputs: usize,
    ) -> Result<(), KrylovError> {
        if !(self.dgks_tolerance.is_finite() && self.dgks_tolerance > 0.0) {
            return Err(KrylovErrorKind::InvalidInput(format!(
                "dgks_tolerance must be a positive number, got {}",
                self.dgks_tolerance
            ))
            .into());
        }
        if self.mode == KrylovMode::Cascaded {
            if inputs > 1 || outputs > 1 {
                return Err(KrylovErrorKind::UnsupportedForMimo { inputs, outputs }.into());
            }
            if outputs > 0 {
                return Err(KrylovErrorKind::UnsupportedCombination(
                    "cascaded mode cannot be combined with two-sided construction".to_string(),
                )
                .into());
            }
        }
        if let InnerProduct::Weighted(m) = &self.inner_product {
            if m.nrows() != order || m.ncols() != order {
                return Err(KrylovErrorKind::DimensionMismatch {
                    what: "inner product matrix",
                    expected: order,
                    actual: if m.nrows() != order { m.nrows() } else { m.ncols() },
                }
                .into());
            }
            if self.reorthogonalization == Reorthogonalization::Qr {
                return Err(KrylovErrorKind::UnsupportedCombination(
                    "QR reorthogonalization is Euclidean and cannot honour a weighted inner product"
                        .to_string(),
                )
                .into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = KrylovOptions::default();
        assert!(opts.keep_real);
        assert_eq!(opts.orthogonalization, Orthogonalization::DoubleMgs);
        assert_eq!(opts.reorthogonalization, Reorthogonalization::None);
        assert_eq!(opts.solve_strategy, SolveStrategy::Sparse);
        assert_eq!(opts.mode, KrylovMode::Standard);
        assert_eq!(opts.dgks_tolerance, 1e-12);
        assert!(opts.validate(4, 1, 0).is_ok());
    }

    #[test]
    fn test_command_line_names_are_kebab_case() {
        assert_eq!(
            SolveStrategy::from_str("precomputed-reduction", true),
            Ok(SolveStrategy::PrecomputedReduction)
        );
        assert_eq!(
            Reorthogonalization::from_str("qr", true),
            Ok(Reorthogonalization::Qr)
        );
        assert_eq!(
            Orthogonalization::from_str("double-mgs", true),
            Ok(Orthogonalization::DoubleMgs)
        );
        let names: Vec<String> = SolveStrategy::value_variants()
            .iter()
            .filter_map(|v| v.to_possible_value())
            .map(|v| v.get_name().to_owned())
            .collect();
        assert_eq!(names, ["sparse", "dense", "precomputed-reduction"]);
    }

    #[test]
    fn test_cascade_rejected_for_mimo() {
        let opts = KrylovOptions {
            mode: KrylovMode::Cascaded,
            ..Default::default()
        };
        let err = opts.validate(10, 2, 0).unwrap_err();
        assert_eq!(
            err.kind(),
            &KrylovErrorKind::UnsupportedForMimo {
                inputs: 2,
                outputs: 0
            }
        );
    }

    #[test]
    fn test_cascade_rejected_for_two_sided() {
        let opts = KrylovOptions {
            mode: KrylovMode::Cascaded,
            ..Default::default()
        };
        let err = opts.validate(10, 1, 1).unwrap_err();
        assert!(matches!(
            err.kind(),
            KrylovErrorKind::UnsupportedCombination(_)
        ));
    }

    #[test]
    fn test_bad_tolerance() {
        let opts = KrylovOptions {
            dgks_tolerance: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            opts.validate(3, 1, 0).unwrap_err().kind(),
            KrylovErrorKind::InvalidInput(_)
        ));
    }

    #[test]
    fn test_weighted_qr_rejected() {
        let opts = KrylovOptions {
            reorthogonalization: Reorthogonalization::Qr,
            inner_product: InnerProduct::Weighted(SystemMatrix::identity(3)),
            ..Default::default()
        };
        assert!(matches!(
            opts.validate(3, 1, 0).unwrap_err().kind(),
            KrylovErrorKind::UnsupportedCombination(_)
        ));
    }
}
