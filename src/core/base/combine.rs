use faer::{Mat, MatRef};

use crate::core::base::covariance::{BlockStatistic, PairMoments};
use crate::utils::errors::CovError;
use crate::utils::general::upper_triangle_pairs;

/////////////
// Helpers //
/////////////

/// Merge the moments of one feature pair from two disjoint sets of rows
///
/// Pairwise update of Chan et al. generalised to co-moments: the correction
/// term uses the product of the two mean shifts.
///
/// ### Params
///
/// * `a` - Moments of the first set of rows.
/// * `b` - Moments of the second set of rows.
///
/// ### Returns
///
/// The moments over the union of the rows.
pub fn merge_pair_moments(a: &PairMoments, b: &PairMoments) -> PairMoments {
    if a.n == 0 {
        return *b;
    }
    if b.n == 0 {
        return *a;
    }

    let n = a.n + b.n;
    let n_a = a.n as f64;
    let n_b = b.n as f64;
    let n_total = n as f64;

    let delta_i = b.mean_i - a.mean_i;
    let delta_j = b.mean_j - a.mean_j;

    PairMoments {
        n,
        mean_i: a.mean_i + delta_i * n_b / n_total,
        mean_j: a.mean_j + delta_j * n_b / n_total,
        comoment: a.comoment + b.comoment + delta_i * delta_j * n_a * n_b / n_total,
    }
}

/////////////
// Merging //
/////////////

/// Merge two block statistics into one
///
/// Every feature pair is merged independently with its own counts and
/// means. A pair without complete rows in one of the blocks simply takes the
/// moments of the other block.
///
/// ### Params
///
/// * `a` - The first block statistic.
/// * `b` - The second block statistic.
///
/// ### Returns
///
/// The block statistic of the union of both blocks.
pub fn merge_block_stats(
    a: &BlockStatistic,
    b: &BlockStatistic,
) -> Result<BlockStatistic, CovError> {
    let k = a.n_features();
    if b.n_features() != k {
        return Err(CovError::InvalidInput(format!(
            "Block statistics have different number of features: {} != {}",
            k,
            b.n_features()
        )));
    }

    let moments: Vec<((usize, usize), PairMoments)> = upper_triangle_pairs(k, 0)
        .into_iter()
        .map(|(i, j)| {
            let merged = merge_pair_moments(&a.pair_moments(i, j), &b.pair_moments(i, j));
            ((i, j), merged)
        })
        .collect();

    Ok(BlockStatistic::from_pair_moments(
        k,
        a.n_obs + b.n_obs,
        moments,
    ))
}

/// Combine block statistics with a left fold
///
/// ### Params
///
/// * `blocks` - The statistics of disjoint row blocks.
///
/// ### Returns
///
/// The statistic equivalent to computing the covariance on all rows.
pub fn combine_block_stats(blocks: &[BlockStatistic]) -> Result<BlockStatistic, CovError> {
    let (first, rest) = blocks.split_first().ok_or_else(|| {
        CovError::InvalidInput("Need at least one block statistic to combine".to_string())
    })?;

    let mut combined = first.clone();
    for block in rest {
        combined = merge_block_stats(&combined, block)?;
    }

    Ok(combined)
}

/// Combine block statistics with a balanced pairwise reduction
///
/// Neighbouring blocks are merged level by level, which keeps the magnitude
/// of the merged counts similar on both sides of every merge.
///
/// ### Params
///
/// * `blocks` - The statistics of disjoint row blocks.
///
/// ### Returns
///
/// The statistic equivalent to computing the covariance on all rows.
pub fn combine_block_stats_tree(blocks: &[BlockStatistic]) -> Result<BlockStatistic, CovError> {
    if blocks.is_empty() {
        return Err(CovError::InvalidInput(
            "Need at least one block statistic to combine".to_string(),
        ));
    }

    let mut level: Vec<BlockStatistic> = blocks.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [a, b] => merge_block_stats(a, b),
                [a] => Ok(a.clone()),
                _ => unreachable!(),
            })
            .collect::<Result<Vec<_>, _>>()?;
    }

    level.pop().ok_or_else(|| {
        CovError::InvalidInput("Need at least one block statistic to combine".to_string())
    })
}

/// Combine dense per-block estimates
///
/// Each row of `mn_covs` holds one block: the `K` feature means followed by
/// the `K x K` covariance matrix in column-major order. Blocks are assumed to
/// be free of missing values.
///
/// ### Params
///
/// * `mn_covs` - Matrix of the block estimates, one row per block.
/// * `ns` - Number of observations per block.
///
/// ### Returns
///
/// The combined `K x K` covariance matrix.
pub fn combine_cov_estimates(mn_covs: MatRef<f64>, ns: &[usize]) -> Result<Mat<f64>, CovError> {
    if mn_covs.nrows() != ns.len() {
        return Err(CovError::InvalidInput(format!(
            "Got {} block estimates but {} block sizes",
            mn_covs.nrows(),
            ns.len()
        )));
    }

    // ncols = k + k^2
    let n_cols = mn_covs.ncols();
    let k = (((1 + 4 * n_cols) as f64).sqrt() as usize).saturating_sub(1) / 2;
    if k == 0 || k + k * k != n_cols {
        return Err(CovError::InvalidInput(format!(
            "{} columns do not correspond to K means plus a K x K covariance matrix",
            n_cols
        )));
    }

    let blocks: Vec<BlockStatistic> = (0..mn_covs.nrows())
        .map(|b| {
            let means: Vec<f64> = (0..k).map(|i| mn_covs[(b, i)]).collect();
            let cov = Mat::from_fn(k, k, |i, j| mn_covs[(b, k + j * k + i)]);
            BlockStatistic::from_dense(&means, cov.as_ref(), ns[b])
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(combine_block_stats(&blocks)?.cov)
}
