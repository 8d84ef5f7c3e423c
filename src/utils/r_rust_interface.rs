use extendr_api::prelude::*;
use faer::MatRef;

/// Transform an R matrix to a Faer one
pub fn r_matrix_to_faer(x: &RMatrix<f64>) -> faer::MatRef<'_, f64> {
    let ncol = x.ncols();
    let nrow = x.nrows();
    let data = x.data();

    MatRef::from_column_major_slice(data, nrow, ncol)
}

/// Transform a faer into an R matrix
pub fn faer_to_r_matrix(x: faer::MatRef<f64>) -> extendr_api::RArray<f64, [usize; 2]> {
    let nrow = x.nrows();
    let ncol = x.ncols();

    RArray::new_matrix(nrow, ncol, |row, column| x[(row, column)])
}

/// Transform R integer block sizes into counts
///
/// R hands over block sizes as doubles; they need to be non-negative whole
/// numbers.
pub fn r_sizes_to_counts(ns: &[f64]) -> extendr_api::Result<Vec<usize>> {
    ns.iter()
        .map(|&n| {
            if n >= 0.0 && n.fract() == 0.0 {
                Ok(n as usize)
            } else {
                Err(Error::Other(format!(
                    "Block sizes need to be non-negative whole numbers, got {}",
                    n
                )))
            }
        })
        .collect()
}
