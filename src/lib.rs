//! Rational Krylov subspace construction for moment-matching model reduction.
//!
//! This crate builds the projection bases used to reduce large linear time-invariant
//! descriptor systems `E x' = A x + B u`, `y = C x`. Given expansion points ("shifts")
//! `s₁ … s_q`, it computes an orthonormal basis `V` of the rational Krylov subspace
//!
//! ```text
//! span{ (A − s₁E)⁻¹B r₁, (A − s₂E)⁻¹B r₂, … }
//! ```
//!
//! together with the Sylvester matrices `Sv`, `Rv` satisfying `A·V − E·V·Sv − B·Rv = 0`.
//! Repeated shifts match higher moments, shifts at infinity match Markov parameters, and
//! a second basis `W` can be built in lockstep for two-sided (Hermite) reduction.
//!
//! Built on the [`faer`] linear algebra framework, the engine works with dense or sparse
//! pencils ([`matrix::SystemMatrix`]) and reuses one factorization across all columns that
//! share a shift.
//!
//! ## Features
//!
//! **Real bases from complex shifts**: with [`KrylovOptions::keep_real`] (the default),
//! conjugate shift pairs are solved once and split into real and imaginary parts; every
//! returned matrix is real and `Sv` carries the pair as a `[[σ, ω], [−ω, σ]]` block.
//!
//! **Orthogonalization schemes**: none, modified Gram-Schmidt, double modified
//! Gram-Schmidt (default) and DGKS, under the Euclidean or a weighted inner product,
//! optionally followed by a modified Gram-Schmidt or Householder QR pass over the
//! whole basis.
//!
//! **Solver strategies**: sparse LU (sparse Cholesky for a symmetric `E` at infinity),
//! dense LU, or a one-time Hessenberg-triangular reduction that makes every further
//! shift an `O(N²)` solve.
//!
//! ## Example Usage
//!
//! The following example builds a three-column basis from a conjugate pair and a real
//! shift, and checks the Sylvester relation.
//!
//! ```rust
//! use faer::{Mat, c64};
//! use rational_krylov::{
//!     KrylovOptions, build_krylov,
//!     matrix::{InputMatrices, Pencil, SystemMatrix},
//! };
//!
//! let a = SystemMatrix::sparse_from_entries(
//!     4,
//!     4,
//!     &[(0, 0, -1.0), (1, 1, -2.0), (2, 2, -3.0), (3, 3, -4.0), (0, 3, 0.5)],
//! )?;
//! let pencil = Pencil::standard(a)?;
//! let inputs = InputMatrices::new(Mat::from_fn(4, 1, |_, _| 1.0));
//!
//! let shifts = [c64::new(0.5, 1.0), c64::new(0.5, -1.0), c64::new(0.0, 0.0)];
//! let out = build_krylov(&pencil, &inputs, &shifts, None, None, &KrylovOptions::default())?;
//!
//! assert_eq!(out.width(), 3);
//! assert!(out.is_real());
//! let (residual, _) = out.sylvester_residual(&pencil, &inputs);
//! assert!(residual < 1e-12);
//! # Ok::<(), rational_krylov::KrylovError>(())
//! ```

// Declare the modules that form the crate's API structure.
pub mod algorithms;
pub mod error;
pub mod matrix;
pub mod options;
pub mod solvers;
pub mod utils;

// Re-export the main API for convenient access.
pub use error::{KrylovError, KrylovErrorKind};
pub use options::KrylovOptions;
pub use solvers::{DualBasis, KrylovOutput, RealKrylovOutput, build_krylov};
