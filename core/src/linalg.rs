//! Linear algebra helpers for keeping covariance matrices well behaved.
//!
//! Public API:
//!     pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64>
//!     pub fn asymmetry(m: &DMatrix<f64>) -> f64
//!     pub fn min_eigenvalue(m: &DMatrix<f64>) -> f64
//!     pub fn floor_eigenvalues(m: &DMatrix<f64>, floor: f64) -> DMatrix<f64>
//!     pub fn invert_innovation(s: &DMatrix<f64>) -> Result<DMatrix<f64>, Singular>
//!
//! Inversion strategy for the innovation covariance S:
//! 1) 1×1 and 2×2: closed form, singular when |det S| < SINGULARITY_EPSILON
//! 2) larger: LU determinant check, then LU inverse

use nalgebra::DMatrix;
use nalgebra::linalg::SymmetricEigen;

/// Determinant magnitude below which the innovation covariance is treated as singular.
pub const SINGULARITY_EPSILON: f64 = 1e-12;

/// The matrix handed to [invert_innovation] has no usable inverse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Singular {
    pub determinant: f64,
}

/// Symmetrize a matrix: P ← 0.5 (P + Pᵀ)
///
/// Simple matrix symmetrization function that reduces round-off errors associated
/// with floating point arithmetic.
#[inline]
pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64> {
    0.5 * (m + m.transpose())
}
/// Largest absolute element of `m - mᵀ`.
pub fn asymmetry(m: &DMatrix<f64>) -> f64 {
    assert!(m.is_square(), "asymmetry: matrix must be square");
    (m - m.transpose()).amax()
}
/// Smallest eigenvalue of the symmetric part of `m`.
pub fn min_eigenvalue(m: &DMatrix<f64>) -> f64 {
    assert!(m.is_square(), "min_eigenvalue: matrix must be square");
    if m.is_empty() {
        return 0.0;
    }
    SymmetricEigen::new(symmetrize(m)).eigenvalues.min()
}
/// Rebuild a symmetric matrix with its eigenvalues floored:
/// P = U * max(λ, floor) * Uᵀ
pub fn floor_eigenvalues(m: &DMatrix<f64>, floor: f64) -> DMatrix<f64> {
    let se = SymmetricEigen::new(symmetrize(m));
    let lambdas = se.eigenvalues.map(|l| l.max(floor));
    let u = se.eigenvectors;
    symmetrize(&(&u * DMatrix::from_diagonal(&lambdas) * u.transpose()))
}
/// Symmetric and positive semi-definite within `tolerance`.
pub fn is_symmetric_psd(m: &DMatrix<f64>, tolerance: f64) -> bool {
    m.is_square() && asymmetry(m) <= tolerance && min_eigenvalue(m) >= -tolerance
}

/// Invert the innovation covariance S.
///
/// Uses the closed form for 1×1 and 2×2 matrices and an LU decomposition
/// otherwise. Never returns a matrix containing NaN or infinity: near-singular
/// input is reported as [Singular] instead.
pub fn invert_innovation(s: &DMatrix<f64>) -> Result<DMatrix<f64>, Singular> {
    assert!(s.is_square(), "invert_innovation: S must be square");
    let inverse = match s.nrows() {
        1 => {
            let det = s[(0, 0)];
            check_determinant(det)?;
            DMatrix::from_element(1, 1, 1.0 / det)
        }
        2 => {
            let (a, b, c, d) = (s[(0, 0)], s[(0, 1)], s[(1, 0)], s[(1, 1)]);
            let det = a * d - b * c;
            check_determinant(det)?;
            DMatrix::from_row_slice(2, 2, &[d / det, -b / det, -c / det, a / det])
        }
        _ => {
            let lu = s.clone().lu();
            let det = lu.determinant();
            check_determinant(det)?;
            lu.try_inverse().ok_or(Singular { determinant: det })?
        }
    };
    if inverse.iter().all(|v| v.is_finite()) {
        Ok(inverse)
    } else {
        Err(Singular {
            determinant: f64::NAN,
        })
    }
}

fn check_determinant(det: f64) -> Result<(), Singular> {
    if det.is_finite() && det.abs() >= SINGULARITY_EPSILON {
        Ok(())
    } else {
        Err(Singular { determinant: det })
    }
}

/* =============================== Tests ==================================== */
