use faer::MatRef;

////////////////////
// MATRIX INDICES //
////////////////////

/// Get the index pairs of the upper triangle of a square matrix
///
/// ### Params
///
/// * `n_dim` - The dimensions of the square matrix
/// * `offset` - Do you want to include the diagonal values (offset = 0) or
///   exclude them (offset = 1).
///
/// ### Returns
///
/// Vector of `(row, col)` positions of the upper triangle, iterating through
/// the rows.
pub fn upper_triangle_pairs(n_dim: usize, offset: usize) -> Vec<(usize, usize)> {
    assert!(offset <= 1, "The offset should be 0 or 1");
    if offset >= n_dim {
        return Vec::new();
    }

    let total_elements: usize = (0..n_dim)
        .map(|row| n_dim.saturating_sub(row + offset))
        .sum();

    let mut pairs = Vec::with_capacity(total_elements);
    for row in 0..n_dim {
        for col in (row + offset)..n_dim {
            pairs.push((row, col));
        }
    }

    pairs
}

/// Store the upper triangle values as a flat vector from a faer matrix
///
/// ### Params
///
/// * `x` The faer matrix
/// * `shift` Shall the diagonal be included (shift = 0) or not (shift = 1).
///
/// ### Returns
///
/// A vector representing the upper triangle values (row major ordered)
pub fn faer_mat_to_upper_triangle(x: MatRef<f64>, shift: usize) -> Vec<f64> {
    upper_triangle_pairs(x.ncols(), shift)
        .into_iter()
        .map(|(i, j)| x[(i, j)])
        .collect()
}

///////////////////
// NaN AWARE OPS //
///////////////////

/// Mean of the non-missing values of a slice
///
/// ### Params
///
/// * `x` - The values. `NaN` is treated as missing.
///
/// ### Returns
///
/// Tuple of the mean and the number of values used. The mean is `NaN` if no
/// value was present.
pub fn nan_mean(x: impl IntoIterator<Item = f64>) -> (f64, usize) {
    let mut sum = 0_f64;
    let mut n = 0_usize;
    for v in x {
        if !v.is_nan() {
            sum += v;
            n += 1;
        }
    }
    if n == 0 {
        (f64::NAN, 0)
    } else {
        (sum / n as f64, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::mat;

    #[test]
    fn test_upper_triangle_pairs() {
        let with_diag = upper_triangle_pairs(3, 0);
        assert_eq!(
            with_diag,
            vec![(0, 0), (0, 1), (0, 2), (1, 1), (1, 2), (2, 2)]
        );

        let without_diag = upper_triangle_pairs(3, 1);
        assert_eq!(without_diag, vec![(0, 1), (0, 2), (1, 2)]);

        assert!(upper_triangle_pairs(1, 1).is_empty());
    }

    #[test]
    fn test_upper_triangle_values() {
        let x = mat![[1.0, 2.0, 3.0], [2.0, 4.0, 5.0], [3.0, 5.0, 6.0]];
        assert_eq!(
            faer_mat_to_upper_triangle(x.as_ref(), 0),
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]
        );
        assert_eq!(
            faer_mat_to_upper_triangle(x.as_ref(), 1),
            vec![2.0, 3.0, 5.0]
        );
    }

    #[test]
    fn test_nan_mean() {
        let (mean, n) = nan_mean(vec![1.0, f64::NAN, 3.0]);
        assert_eq!(n, 2);
        assert!((mean - 2.0).abs() < 1e-12);

        let (mean, n) = nan_mean(vec![f64::NAN, f64::NAN]);
        assert_eq!(n, 0);
        assert!(mean.is_nan());
    }
}
