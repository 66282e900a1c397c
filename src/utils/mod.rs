//! Measurement helpers shared by the library, the experiment binary and the tests.
//!
//! - **`diagnostics`**: residual of the Sylvester relation and loss of orthogonality of a
//!   basis, the two quantities every construction is judged by.

pub mod diagnostics;
