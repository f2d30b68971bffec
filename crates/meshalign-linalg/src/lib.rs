#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Proper rotation extraction and closed-form rigid fits.
pub mod rigid;

/// One-sided Jacobi singular value decomposition.
pub mod svd;
