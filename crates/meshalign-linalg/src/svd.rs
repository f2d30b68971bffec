//! One-sided Jacobi Singular Value Decomposition (SVD).
//!
//! The decomposition factors a real `m×n` matrix as
//!
//! ```text
//! A = U Σ Vᵀ
//! ```
//!
//! by repeatedly applying plane rotations to pairs of columns of a working
//! copy of `A` until every pair is orthogonal. The accumulated rotations form
//! `V`; the column norms of the rotated matrix are the singular values and the
//! normalized columns are the left singular vectors.
//!
//! Pairs are also swapped whenever the left column has the smaller norm, so the
//! singular values come out in descending order for well-conditioned inputs.
//!
//! # Example
//!
//! ```
//! use glam::DMat3;
//! use meshalign_linalg::svd::svd3;
//!
//! let a = DMat3::from_cols_array(&[
//!     1.0, 0.0, 0.0,
//!     0.0, 2.0, 0.0,
//!     0.0, 0.0, 3.0,
//! ]);
//!
//! let svd = svd3(&a);
//! let reconstructed = svd.u * glam::DMat3::from_diagonal(svd.s) * svd.vt;
//! assert!(reconstructed.abs_diff_eq(a, 1e-9));
//! ```
//!
//! # References
//!
//! * J. C. Nash (1975). "A one-sided transformation method for the singular
//!   value decomposition and algebraic eigenproblem." The Computer Journal.
//! * GNU Scientific Library, `gsl_linalg_SV_decomp_jacobi`.

use faer::Mat;
use glam::{DMat3, DVec3};

/// Minimum number of sweeps the solver is allowed before giving up.
const MIN_SWEEP_BUDGET: usize = 12;

/// Result of [`jacobi_svd`].
#[derive(Debug, Clone)]
pub struct JacobiSvd {
    u: Mat<f64>,
    s: Vec<f64>,
    vt: Mat<f64>,
    sweeps: usize,
    converged: bool,
}

impl JacobiSvd {
    /// Left singular vectors, one per column.
    #[inline]
    pub fn u(&self) -> &Mat<f64> {
        &self.u
    }

    /// Singular values, aligned with the columns of [`JacobiSvd::u`].
    #[inline]
    pub fn s(&self) -> &[f64] {
        &self.s
    }

    /// Transposed right singular vectors, one per row.
    #[inline]
    pub fn vt(&self) -> &Mat<f64> {
        &self.vt
    }

    /// Number of sweeps performed.
    #[inline]
    pub fn sweeps(&self) -> usize {
        self.sweeps
    }

    /// Whether the last sweep left every column pair orthogonal.
    ///
    /// A `false` value means the sweep budget ran out and the decomposition may be degraded.
    #[inline]
    pub fn converged(&self) -> bool {
        self.converged
    }
}

/// Decomposition of a 3×3 matrix produced by [`svd3`].
#[derive(Debug, Clone, Copy)]
pub struct Svd3 {
    /// Left singular vectors as columns.
    pub u: DMat3,
    /// Singular values.
    pub s: DVec3,
    /// Transposed right singular vectors.
    pub vt: DMat3,
    /// Whether the Jacobi sweeps converged within budget.
    pub converged: bool,
}

fn column_dot(a: &Mat<f64>, j: usize, k: usize) -> f64 {
    (0..a.nrows()).map(|i| a[(i, j)] * a[(i, k)]).sum()
}

fn column_norm(a: &Mat<f64>, j: usize) -> f64 {
    column_dot(a, j, j).sqrt()
}

#[inline]
fn rotate_columns(a: &mut Mat<f64>, j: usize, k: usize, cosine: f64, sine: f64) {
    for i in 0..a.nrows() {
        let a_ij = a[(i, j)];
        let a_ik = a[(i, k)];
        a[(i, j)] = a_ij * cosine + a_ik * sine;
        a[(i, k)] = -a_ij * sine + a_ik * cosine;
    }
}

/// Compute the singular value decomposition of an `m×n` matrix.
///
/// The sweep budget is `max(5n, 12)`. Column pairs are skipped once they are
/// orthogonal within `10·m·ε` or when their norm falls below the accumulated
/// rounding error estimate. Columns whose norm collapses to zero (relative to
/// the previous column) are zeroed in `U` and reported with a zero singular value.
///
/// If `m < n` only the first `m` singular triplets are returned.
///
/// Exhausting the sweep budget is not an error: the best-effort result is
/// returned with [`JacobiSvd::converged`] set to `false` and a warning is logged.
pub fn jacobi_svd(a: &Mat<f64>) -> JacobiSvd {
    jacobi_svd_with_budget(a, (5 * a.ncols()).max(MIN_SWEEP_BUDGET))
}

/// [`jacobi_svd`] with at most `max_sweeps` sweeps.
pub(crate) fn jacobi_svd_with_budget(a: &Mat<f64>, max_sweeps: usize) -> JacobiSvd {
    let m = a.nrows();
    let n = a.ncols();

    let mut u = a.clone();
    let mut v = Mat::<f64>::identity(n, n);

    let tolerance = 10.0 * m as f64 * f64::EPSILON;

    // per-column rounding error estimates, reused for the singular values at the end
    let mut s = (0..n)
        .map(|j| f64::EPSILON * column_norm(&u, j))
        .collect::<Vec<_>>();

    let mut pending = 1;
    let mut sweeps = 0;

    while pending > 0 && sweeps < max_sweeps {
        pending = n * n.saturating_sub(1) / 2;

        for j in 0..n.saturating_sub(1) {
            for k in (j + 1)..n {
                let p = 2.0 * column_dot(&u, j, k);
                let norm_j = column_norm(&u, j);
                let norm_k = column_norm(&u, k);

                let q = norm_j * norm_j - norm_k * norm_k;
                let h = p.hypot(q);

                let err_j = s[j];
                let err_k = s[k];

                let sorted = norm_j >= norm_k;
                let orthogonal = p.abs() <= tolerance * norm_j * norm_k;
                let noisy = norm_j < err_j || norm_k < err_k;

                if sorted && (orthogonal || noisy) {
                    pending -= 1;
                    continue;
                }

                // an unsorted pair is swapped by a quarter turn
                let (cosine, sine) = if h == 0.0 || !sorted {
                    (0.0, 1.0)
                } else {
                    let cosine = ((h + q) / (2.0 * h)).sqrt();
                    (cosine, p / (2.0 * h * cosine))
                };

                rotate_columns(&mut u, j, k, cosine, sine);

                s[j] = cosine.abs() * err_j + sine.abs() * err_k;
                s[k] = sine.abs() * err_j + cosine.abs() * err_k;

                rotate_columns(&mut v, j, k, cosine, sine);
            }
        }

        sweeps += 1;
    }

    let mut prev_norm = -1.0;
    for j in 0..n {
        let norm = column_norm(&u, j);

        if norm == 0.0 || prev_norm == 0.0 || (j > 0 && norm <= tolerance * prev_norm) {
            s[j] = 0.0;
            for i in 0..m {
                u[(i, j)] = 0.0;
            }
            prev_norm = 0.0;
        } else {
            s[j] = norm;
            for i in 0..m {
                u[(i, j)] /= norm;
            }
            prev_norm = norm;
        }
    }

    let converged = pending == 0;
    if !converged {
        log::warn!(
            "Jacobi SVD did not converge after {} sweeps ({} column pairs still rotating)",
            sweeps,
            pending
        );
    }

    let rank = m.min(n);
    let u = Mat::from_fn(m, rank, |i, j| u[(i, j)]);
    let vt = Mat::from_fn(rank, n, |i, j| v[(j, i)]);
    s.truncate(rank);

    JacobiSvd {
        u,
        s,
        vt,
        sweeps,
        converged,
    }
}

/// Decompose a 3×3 matrix with [`jacobi_svd`].
pub fn svd3(a: &DMat3) -> Svd3 {
    let mat = Mat::from_fn(3, 3, |i, j| a.col(j)[i]);
    let svd = jacobi_svd(&mat);

    let u = svd.u();
    let vt = svd.vt();
    let s = svd.s();

    Svd3 {
        u: DMat3::from_cols(
            DVec3::new(u[(0, 0)], u[(1, 0)], u[(2, 0)]),
            DVec3::new(u[(0, 1)], u[(1, 1)], u[(2, 1)]),
            DVec3::new(u[(0, 2)], u[(1, 2)], u[(2, 2)]),
        ),
        s: DVec3::new(s[0], s[1], s[2]),
        vt: DMat3::from_cols(
            DVec3::new(vt[(0, 0)], vt[(1, 0)], vt[(2, 0)]),
            DVec3::new(vt[(0, 1)], vt[(1, 1)], vt[(2, 1)]),
            DVec3::new(vt[(0, 2)], vt[(1, 2)], vt[(2, 2)]),
        ),
        converged: svd.converged(),
    }
}
