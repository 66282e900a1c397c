//! Error types for the Krylov construction engine.
//!
//! Every failure that can abort a basis construction is collected in a single enum,
//! [`KrylovErrorKind`], wrapped by the public [`KrylovError`]. None of these errors is
//! recoverable inside the engine: a construction either completes with a basis that
//! satisfies the Sylvester relation, or it returns one of these and no partial result.
//!
//! `faer` factorization errors do not implement [`std::error::Error`], so they are
//! reported through their `Debug` representation inside [`KrylovErrorKind::SingularPencil`].
use faer::c64;
use thiserror::Error;

/// Represents all possible errors that can occur while building a Krylov basis.
#[derive(Error, Debug)]
#[error(transparent)]
pub struct KrylovError(#[from] KrylovErrorKind);

impl KrylovError {
    /// Returns the kind of failure, for callers that need to branch on it.
    pub fn kind(&self) -> &KrylovErrorKind {
        &self.0
    }
}

/// The distinct kinds of errors.
#[derive(Error, Debug, PartialEq)]
pub enum KrylovErrorKind {
    /// A non-real shift has no conjugate partner (with conjugate tangential direction)
    /// while a real-valued basis was requested, or the shift itself is malformed.
    #[error("Invalid shift {shift}: shifts must be finite or infinite numbers closed under conjugation.")]
    InvalidShiftPairing { shift: c64 },

    /// Block Krylov expansion (MIMO without tangential directions) was asked to match
    /// higher-order moments at a repeated shift.
    #[error("Shift {shift} appears more than once; repeated shifts need tangential directions for MIMO systems.")]
    UnsupportedMultiplicity { shift: c64 },

    /// Cascaded Krylov mode was requested for a multi-input or multi-output system.
    #[error("Cascaded Krylov mode needs a single-input single-output system, got {inputs} inputs and {outputs} outputs.")]
    UnsupportedForMimo { inputs: usize, outputs: usize },

    /// A combination of options that the engine does not define.
    #[error("Unsupported option combination: {0}")]
    UnsupportedCombination(String),

    /// Incompatible dimensions between the pencil, the input/output matrices or the
    /// tangential directions.
    #[error("Dimension mismatch for {what}: expected {expected}, got {actual}.")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The shifted pencil (or the mass matrix, for an infinite shift) could not be factored,
    /// or its solve produced non-finite values.
    #[error("The pencil is singular at shift {shift}: {reason}")]
    SingularPencil { shift: String, reason: String },

    /// Iterated Gram-Schmidt did not reach the requested orthogonality within its sweep budget.
    #[error("Orthogonalization of column {column} did not converge after {sweeps} sweeps.")]
    OrthogonalizationFailed { column: usize, sweeps: usize },

    /// A new column is numerically contained in the span of the previous ones.
    #[error("Krylov breakdown at column {column}: the new direction is linearly dependent on the basis.")]
    Breakdown { column: usize },

    /// Indicates that an invalid input parameter was provided to a function.
    #[error("Invalid input parameter: {0}")]
    InvalidInput(String),
}

impl PartialEq for KrylovError {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breakdown_error_message() {
        let error = KrylovError(KrylovErrorKind::Breakdown { column: 7 });
        let expected = "Krylov breakdown at column 7: the new direction is linearly dependent on the basis.";
        assert_eq!(error.to_string(), expected);
    }

    #[test]
    fn test_dimension_mismatch_error_message() {
        let error = KrylovError(KrylovErrorKind::DimensionMismatch {
            what: "right tangential directions",
            expected: 3,
            actual: 2,
        });
        assert_eq!(
            error.to_string(),
            "Dimension mismatch for right tangential directions: expected 3, got 2."
        );
    }

    #[test]
    fn test_pairing_error_formats_complex_shift() {
        let error = KrylovError(KrylovErrorKind::InvalidShiftPairing {
            shift: c64::new(1.0, 2.0),
        });
        assert!(error.to_string().starts_with("Invalid shift 1+2i"));
    }

    #[test]
    fn test_kind_accessor() {
        let error = KrylovError::from(KrylovErrorKind::UnsupportedForMimo {
            inputs: 2,
            outputs: 1,
        });
        assert_eq!(
            error.kind(),
            &KrylovErrorKind::UnsupportedForMimo {
                inputs: 2,
                outputs: 1
            }
        );
    }
}
