use extendr_api::prelude::*;

use crate::core::base::combine::combine_cov_estimates;
use crate::core::base::cors_similarity::cov2cor;
use crate::core::base::covariance::*;
use crate::core::data::synthetic_data::{add_missing_values, generate_synthetic_profiles};
use crate::core::methods::split_cov::*;
use crate::utils::r_rust_interface::*;

/// Online co-variance of two vectors
///
/// @description Calculates the co-variance between two numeric vectors with
/// a single pass (online) algorithm. Pairs with a missing value are dropped.
///
/// @param x1 Numeric vector.
/// @param x2 Numeric vector of the same length as `x1`.
///
/// @returns The co-variance.
///
/// @export
#[extendr]
fn rs_online_covar(x1: &[f64], x2: &[f64]) -> extendr_api::Result<f64> {
    Ok(online_covar(x1, x2)?)
}

/// Two pass co-variance matrix
///
/// @description Calculates the co-variance of the columns with the two pass
/// algorithm. Missing values are excluded pairwise. Pairs with fewer than two
/// complete observations are returned as `NaN`.
///
/// @param s R matrix with doubles. Features are columns.
///
/// @returns The co-variance matrix.
///
/// @export
#[extendr]
fn rs_two_pass_multi_covar(s: RMatrix<f64>) -> extendr_api::RArray<f64, [usize; 2]> {
    let mat = r_matrix_to_faer(&s);
    let stat = two_pass_multi_covar(mat);

    faer_to_r_matrix(stat.cov.as_ref())
}

/// Combine per-block co-variance estimates
///
/// @description Combines co-variance estimates of disjoint row blocks into
/// the co-variance over all rows.
///
/// @param mn_covs R matrix with one row per block: the K column means
/// followed by the K x K co-variance matrix (column-major).
/// @param ns Numeric vector with the number of observations per block.
///
/// @returns The combined co-variance matrix.
///
/// @export
#[extendr]
fn rs_combine_cov_estimates(
    mn_covs: RMatrix<f64>,
    ns: &[f64],
) -> extendr_api::Result<extendr_api::RArray<f64, [usize; 2]>> {
    let mat = r_matrix_to_faer(&mn_covs);
    let ns = r_sizes_to_counts(ns)?;
    let cov = combine_cov_estimates(mat, &ns)?;

    Ok(faer_to_r_matrix(cov.as_ref()))
}

/// Split co-variance matrix
///
/// @description Splits the rows into blocks, calculates the co-variance of
/// every block in parallel and combines the block estimates. The result is
/// the same as the co-variance over all rows.
///
/// @param x R matrix with doubles. Features are columns.
/// @param split_cov_params A list with the parameters: `splits`, `cores`,
/// `cov_fun` (one of `c("two_pass", "online")`) and `verbose`.
///
/// @returns The co-variance matrix. Rows and columns carry the column names
/// of `x` if present.
///
/// @export
#[extendr]
fn rs_split_covariance(x: RMatrix<f64>, split_cov_params: List) -> extendr_api::Result<Robj> {
    let mat = r_matrix_to_faer(&x);
    let params = SplitCovParams::from_r_list(split_cov_params)?;
    let stat = split_block_stat(mat, &params)?;

    let mut res: Robj = faer_to_r_matrix(stat.cov.as_ref()).into();
    if let Some(col_names) = x.get_colnames() {
        res.set_attrib("dimnames", list!(col_names.clone(), col_names))?;
    }

    Ok(res)
}

/// Calculates the correlation matrix from the co-variance matrix
///
/// @description Calculates the correlation matrix from a co-variance
/// matrix. Missing co-variances stay missing.
///
/// @param x R matrix with doubles that is the co-variance matrix
///
/// @returns The correlation matrix.
///
/// @export
#[extendr]
fn rs_cov2cor(x: RMatrix<f64>) -> extendr_api::RArray<f64, [usize; 2]> {
    let mat = r_matrix_to_faer(&x);

    faer_to_r_matrix(cov2cor(mat).as_ref())
}

/// Generate synthetic profiles
///
/// @description Generates synthetic morphology profiles in which features
/// belong to latent modules, optionally with missing values.
///
/// @param n_rows Integer. Number of observations.
/// @param n_features Integer. Number of features.
/// @param n_modules Integer. Number of latent modules.
/// @param noise_sd Numeric. Standard deviation of the feature noise.
/// @param missing_frac Numeric. Fraction of values to set to `NA`.
/// @param seed Integer. Seed for reproducibility.
///
/// @returns The synthetic data matrix.
///
/// @export
#[extendr]
fn rs_synthetic_profiles(
    n_rows: usize,
    n_features: usize,
    n_modules: usize,
    noise_sd: f64,
    missing_frac: f64,
    seed: usize,
) -> extendr_api::Result<extendr_api::RArray<f64, [usize; 2]>> {
    let data = generate_synthetic_profiles(n_rows, n_features, n_modules, noise_sd, seed as u64)?;
    let data = add_missing_values(data.as_ref(), missing_frac, seed as u64 + 1)?;

    Ok(faer_to_r_matrix(data.as_ref()))
}

extendr_module! {
  mod r_covariance;
  fn rs_online_covar;
  fn rs_two_pass_multi_covar;
  fn rs_combine_cov_estimates;
  fn rs_split_covariance;
  fn rs_cov2cor;
  fn rs_synthetic_profiles;
}
