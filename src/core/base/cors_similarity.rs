use faer::{Mat, MatRef};

use crate::assert_symmetric_mat;

/// Calculate the correlation matrix from the co-variance matrix
///
/// Missing covariances stay missing. Features with a zero or missing
/// variance get `NaN` correlations, including on the diagonal.
///
/// ### Params
///
/// * `mat` - The co-variance matrix
///
/// ### Returns
///
/// The resulting correlation matrix.
pub fn cov2cor(mat: MatRef<f64>) -> Mat<f64> {
    assert_symmetric_mat!(mat);

    let n = mat.nrows();

    let inv_sqrt_diag: Vec<f64> = (0..n)
        .map(|i| {
            let var = mat[(i, i)];
            if var > 0.0 {
                1.0 / var.sqrt()
            } else {
                f64::NAN
            }
        })
        .collect();

    Mat::from_fn(n, n, |i, j| {
        if i == j && !inv_sqrt_diag[i].is_nan() {
            1.0
        } else {
            mat[(i, j)] * inv_sqrt_diag[i] * inv_sqrt_diag[j]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::mat;

    #[test]
    fn test_cov2cor() {
        let cov = mat![[4.0, 3.0, -1.0], [3.0, 9.0, 0.0], [-1.0, 0.0, 1.0]];
        let cor = cov2cor(cov.as_ref());

        assert_eq!(cor[(0, 0)], 1.0);
        assert!((cor[(0, 1)] - 0.5).abs() < 1e-12);
        assert!((cor[(1, 0)] - 0.5).abs() < 1e-12);
        assert!((cor[(0, 2)] + 0.5).abs() < 1e-12);
        assert_eq!(cor[(1, 2)], 0.0);
    }

    #[test]
    fn test_cov2cor_degenerate() {
        let cov = mat![[4.0, 0.0, f64::NAN], [0.0, 0.0, 0.0], [f64::NAN, 0.0, 1.0]];
        let cor = cov2cor(cov.as_ref());

        assert_eq!(cor[(0, 0)], 1.0);
        // zero variance
        assert!(cor[(1, 1)].is_nan());
        assert!(cor[(0, 1)].is_nan());
        // missing covariance
        assert!(cor[(0, 2)].is_nan());
        assert_eq!(cor[(2, 2)], 1.0);
    }
}
