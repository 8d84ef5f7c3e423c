use faer::MatRef;
use rayon::iter::*;
use std::any::Any;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

#[cfg(feature = "r")]
use extendr_api::List;

use crate::core::base::combine::combine_block_stats;
use crate::core::base::covariance::{
    block_covariance, parse_cov_fun, BlockStatistic, CovFunType,
};
use crate::core::data::feature_matrix::{CovarianceMatrix, FeatureMatrix};
use crate::utils::errors::CovError;

////////////////
// Parameters //
////////////////

/// Structure to save the split covariance parameters
///
/// ### Fields
///
/// * `splits` - Number of row partitions.
/// * `cores` - Number of worker threads.
/// * `cov_fun` - Covariance algorithm used per partition.
/// * `verbose` - Shall timing messages be printed.
#[derive(Clone, Debug)]
pub struct SplitCovParams {
    pub splits: usize,
    pub cores: usize,
    pub cov_fun: CovFunType,
    pub verbose: bool,
}

impl Default for SplitCovParams {
    fn default() -> Self {
        SplitCovParams {
            splits: 1,
            cores: 1,
            cov_fun: CovFunType::TwoPass,
            verbose: false,
        }
    }
}

impl SplitCovParams {
    /// Generate new parameters
    ///
    /// ### Params
    ///
    /// * `splits` - Number of row partitions.
    /// * `cores` - Number of worker threads.
    /// * `cov_fun` - One of `c("two_pass", "online")`.
    /// * `verbose` - Shall timing messages be printed.
    ///
    /// ### Returns
    ///
    /// The `SplitCovParams` or an error for an unknown covariance function.
    pub fn new(
        splits: usize,
        cores: usize,
        cov_fun: &str,
        verbose: bool,
    ) -> Result<Self, CovError> {
        let cov_fun = parse_cov_fun(cov_fun).ok_or_else(|| {
            CovError::InvalidInput(format!("Invalid covariance function: {}", cov_fun))
        })?;

        Ok(SplitCovParams {
            splits,
            cores,
            cov_fun,
            verbose,
        })
    }

    /// Prepare split covariance parameters from R List
    ///
    /// Takes in a R list and extracts the parameters or uses the defaults.
    ///
    /// ### Params
    ///
    /// * `r_list` - R List with the parameters.
    ///
    /// ### Returns
    ///
    /// `SplitCovParams` parameter structure.
    #[cfg(feature = "r")]
    pub fn from_r_list(r_list: List) -> Result<Self, CovError> {
        let params = r_list.into_hashmap();

        let get_count = |key: &str, default: usize| -> Result<usize, CovError> {
            let value = params.get(key).and_then(|v| {
                v.as_integer()
                    .map(|x| x as f64)
                    .or_else(|| v.as_real())
            });
            match value {
                None => Ok(default),
                Some(x) if x >= 1.0 && x.fract() == 0.0 => Ok(x as usize),
                Some(x) => Err(CovError::InvalidInput(format!(
                    "{} needs to be a positive integer, got {}",
                    key, x
                ))),
            }
        };

        let splits = get_count("splits", 1)?;
        let cores = get_count("cores", 1)?;
        let cov_fun = params
            .get("cov_fun")
            .and_then(|v| v.as_str())
            .unwrap_or("two_pass")
            .to_string();
        let verbose = params
            .get("verbose")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        Self::new(splits, cores, &cov_fun, verbose)
    }
}

////////////////
// Partitions //
////////////////

/// A contiguous block of rows
///
/// ### Fields
///
/// * `index` - Position of the partition.
/// * `row_start` - First row of the partition.
/// * `nrows` - Number of rows in the partition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    pub index: usize,
    pub row_start: usize,
    pub nrows: usize,
}

impl Partition {
    /// Row range covered by the partition
    ///
    /// Fails if the end of the range does not fit into `usize`.
    pub fn rows(&self) -> Result<Range<usize>, CovError> {
        let end = self.row_start.checked_add(self.nrows).ok_or_else(|| {
            CovError::InvalidInput(format!(
                "Partition {} ends beyond the addressable rows",
                self.index
            ))
        })?;
        Ok(self.row_start..end)
    }

    /// Read-only view of the partition rows
    pub fn view<'a>(&self, mat: MatRef<'a, f64>) -> MatRef<'a, f64> {
        mat.subrows(self.row_start, self.nrows)
    }
}

/// Split the rows into balanced contiguous partitions
///
/// If the rows cannot be split evenly, the first partitions get one extra
/// row each.
///
/// ### Params
///
/// * `n_rows` - Number of rows.
/// * `splits` - Number of partitions. Needs to be within `[1, n_rows]`.
///
/// ### Returns
///
/// The partitions in row order.
pub fn plan_partitions(n_rows: usize, splits: usize) -> Result<Vec<Partition>, CovError> {
    if splits < 1 || splits > n_rows {
        return Err(CovError::InvalidInput(format!(
            "splits needs to be within [1, {}], got {}",
            n_rows, splits
        )));
    }

    let base = n_rows / splits;
    let remainder = n_rows % splits;

    let mut partitions = Vec::with_capacity(splits);
    let mut row_start = 0;
    for index in 0..splits {
        let nrows = base + usize::from(index < remainder);
        partitions.push(Partition {
            index,
            row_start,
            nrows,
        });
        row_start += nrows;
    }

    Ok(partitions)
}

/////////////////
// Aggregation //
/////////////////

/// Get the message out of a panic payload
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown error".to_string()
    }
}

/// Run a block function over all partitions on a dedicated thread pool
///
/// Slot `k` of the result holds the statistic of partition `k`. With
/// `cores == 1` the partitions are processed one after the other.
///
/// ### Params
///
/// * `mat` - The full matrix. Assumes features are columns.
/// * `partitions` - The row partitions.
/// * `cores` - Number of worker threads.
/// * `block_fun` - Function computing the statistic of one block.
///
/// ### Returns
///
/// The block statistics, or the first failure. No partial results are
/// returned.
pub fn aggregate_blocks_with<F>(
    mat: MatRef<f64>,
    partitions: &[Partition],
    cores: usize,
    block_fun: F,
) -> Result<Vec<BlockStatistic>, CovError>
where
    F: Fn(MatRef<f64>) -> BlockStatistic + Sync + Send,
{
    if cores < 1 {
        return Err(CovError::InvalidInput(
            "cores needs to be at least 1".to_string(),
        ));
    }
    for p in partitions {
        let rows = p.rows()?;
        if rows.end > mat.nrows() {
            return Err(CovError::InvalidInput(format!(
                "Partition {} covers rows {:?} but the matrix has {} rows",
                p.index,
                rows,
                mat.nrows()
            )));
        }
    }

    let run = |p: &Partition| -> Result<BlockStatistic, CovError> {
        let view = p.view(mat);
        panic::catch_unwind(AssertUnwindSafe(|| block_fun(view))).map_err(|e| {
            CovError::WorkerFailure(format!(
                "Partition {} failed: {}",
                p.index,
                panic_message(e.as_ref())
            ))
        })
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(cores)
        .build()
        .map_err(|e| CovError::WorkerFailure(format!("Could not build thread pool: {}", e)))?;

    pool.install(|| {
        if cores == 1 {
            partitions.iter().map(&run).collect()
        } else {
            partitions.par_iter().map(&run).collect()
        }
    })
}

/// Calculate the covariance statistics of every partition
///
/// ### Params
///
/// * `mat` - The full matrix. Assumes features are columns.
/// * `partitions` - The row partitions.
/// * `cores` - Number of worker threads.
/// * `cov_fun` - Covariance algorithm per partition.
///
/// ### Returns
///
/// One `BlockStatistic` per partition, in partition order.
pub fn aggregate_blocks(
    mat: MatRef<f64>,
    partitions: &[Partition],
    cores: usize,
    cov_fun: CovFunType,
) -> Result<Vec<BlockStatistic>, CovError> {
    aggregate_blocks_with(mat, partitions, cores, |view| {
        block_covariance(view, cov_fun)
    })
}

//////////////
// Pipeline //
//////////////

/// Split covariance of an unlabelled matrix
///
/// Partitions the rows, calculates the per-partition statistics in parallel
/// and combines them.
///
/// ### Params
///
/// * `mat` - The matrix. Assumes features are columns.
/// * `params` - The split covariance parameters.
///
/// ### Returns
///
/// The combined statistic over all rows.
pub fn split_block_stat(
    mat: MatRef<f64>,
    params: &SplitCovParams,
) -> Result<BlockStatistic, CovError> {
    if mat.ncols() == 0 {
        return Err(CovError::InvalidInput(
            "Matrix needs at least one column".to_string(),
        ));
    }

    let start_total = Instant::now();

    let partitions = plan_partitions(mat.nrows(), params.splits)?;

    let start_blocks = Instant::now();
    let blocks = aggregate_blocks(mat, &partitions, params.cores, params.cov_fun)?;
    let end_blocks = start_blocks.elapsed();

    if params.verbose {
        println!(
            "Covariance of {} partitions ({} features) on {} cores in {:.2?}",
            partitions.len(),
            mat.ncols(),
            params.cores,
            end_blocks
        );
    }

    let start_combine = Instant::now();
    let combined = combine_block_stats(&blocks)?;
    let end_combine = start_combine.elapsed();

    if params.verbose {
        println!("Combined block estimates in {:.2?}", end_combine);
        println!(
            "Total time for the split covariance: {:.2?}",
            start_total.elapsed()
        );
    }

    Ok(combined)
}

/// Split covariance of a feature matrix
///
/// ### Params
///
/// * `data` - The named feature matrix.
/// * `params` - The split covariance parameters.
///
/// ### Returns
///
/// The labelled covariance matrix, equivalent to a single two pass
/// covariance over all observations.
pub fn split_covariance(
    data: &FeatureMatrix,
    params: &SplitCovParams,
) -> Result<CovarianceMatrix, CovError> {
    let combined = split_block_stat(data.as_ref(), params)?;

    CovarianceMatrix::from_block_stat(data.col_names().to_vec(), combined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::base::covariance::two_pass_multi_covar;
    use crate::core::data::synthetic_data::{add_missing_values, generate_synthetic_profiles};
    use faer::{mat, Mat};

    fn assert_close(a: MatRef<f64>, b: MatRef<f64>, tol: f64) {
        assert_eq!(a.shape(), b.shape());
        for i in 0..a.nrows() {
            for j in 0..a.ncols() {
                let (x, y) = (a[(i, j)], b[(i, j)]);
                if x.is_nan() || y.is_nan() {
                    assert!(x.is_nan() && y.is_nan(), "NaN mismatch at ({}, {})", i, j);
                } else {
                    let scale = x.abs().max(y.abs()).max(1.0);
                    assert!(
                        (x - y).abs() <= tol * scale,
                        "Mismatch at ({}, {}): {} vs {}",
                        i,
                        j,
                        x,
                        y
                    );
                }
            }
        }
    }

    fn profiles_with_missing(n_rows: usize, n_features: usize, seed: u64) -> Mat<f64> {
        let data = generate_synthetic_profiles(n_rows, n_features, 2, 0.5, seed).unwrap();
        add_missing_values(data.as_ref(), 0.1, seed + 1).unwrap()
    }

    fn params(splits: usize, cores: usize) -> SplitCovParams {
        SplitCovParams {
            splits,
            cores,
            ..SplitCovParams::default()
        }
    }

    #[test]
    fn test_plan_partitions() {
        let parts = plan_partitions(10, 3).unwrap();
        let sizes: Vec<usize> = parts.iter().map(|p| p.nrows).collect();
        let starts: Vec<usize> = parts.iter().map(|p| p.row_start).collect();
        assert_eq!(sizes, vec![4, 3, 3]);
        assert_eq!(starts, vec![0, 4, 7]);
        assert_eq!(parts[2].rows().unwrap(), 7..10);

        let parts = plan_partitions(5, 5).unwrap();
        assert!(parts.iter().all(|p| p.nrows == 1));

        let parts = plan_partitions(7, 1).unwrap();
        assert_eq!(
            parts,
            vec![Partition {
                index: 0,
                row_start: 0,
                nrows: 7
            }]
        );
    }

    #[test]
    fn test_plan_partitions_bounds() {
        assert!(matches!(
            plan_partitions(5, 6),
            Err(CovError::InvalidInput(_))
        ));
        assert!(matches!(
            plan_partitions(5, 0),
            Err(CovError::InvalidInput(_))
        ));
        assert!(matches!(
            plan_partitions(0, 1),
            Err(CovError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_equivalence_to_single_block() {
        let data = profiles_with_missing(60, 6, 42);
        let reference = two_pass_multi_covar(data.as_ref());

        for splits in [1, 2, 3, 7, 60] {
            for cores in [1, 2, 4] {
                let res = split_block_stat(data.as_ref(), &params(splits, cores)).unwrap();
                assert_eq!(res.n_obs, 60);
                assert_eq!(res.pair_counts, reference.pair_counts);
                assert_close(res.cov.as_ref(), reference.cov.as_ref(), 1e-8);
            }
        }
    }

    #[test]
    fn test_partition_invariance_one_row_each() {
        let data = profiles_with_missing(12, 4, 7);
        let reference = split_block_stat(data.as_ref(), &params(1, 1)).unwrap();

        for cores in 1..=12 {
            let res = split_block_stat(data.as_ref(), &params(12, cores)).unwrap();
            assert_close(res.cov.as_ref(), reference.cov.as_ref(), 1e-8);
        }
    }

    #[test]
    fn test_sequential_matches_parallel_bitwise() {
        let data = profiles_with_missing(50, 5, 3);
        let parts = plan_partitions(50, 5).unwrap();

        let seq = aggregate_blocks(data.as_ref(), &parts, 1, CovFunType::TwoPass).unwrap();
        let par = aggregate_blocks(data.as_ref(), &parts, 4, CovFunType::TwoPass).unwrap();

        assert_eq!(seq.len(), 5);
        for (a, b) in seq.iter().zip(par.iter()) {
            assert_eq!(a.n_obs, b.n_obs);
            assert_eq!(a.pair_counts, b.pair_counts);
            for i in 0..5 {
                for j in 0..5 {
                    assert_eq!(a.cov[(i, j)].to_bits(), b.cov[(i, j)].to_bits());
                    assert_eq!(a.pair_means[(i, j)].to_bits(), b.pair_means[(i, j)].to_bits());
                }
            }
        }

        let seq = split_block_stat(data.as_ref(), &params(5, 1)).unwrap();
        let par = split_block_stat(data.as_ref(), &params(5, 3)).unwrap();
        for i in 0..5 {
            for j in 0..5 {
                assert_eq!(seq.cov[(i, j)].to_bits(), par.cov[(i, j)].to_bits());
            }
        }
    }

    #[test]
    fn test_results_in_partition_order() {
        let data = mat![[1.0], [2.0], [10.0], [20.0], [100.0], [200.0]];
        let parts = plan_partitions(6, 3).unwrap();
        let blocks = aggregate_blocks(data.as_ref(), &parts, 3, CovFunType::TwoPass).unwrap();

        let means: Vec<f64> = blocks.iter().map(|b| b.means()[0]).collect();
        assert_eq!(means, vec![1.5, 15.0, 150.0]);
    }

    #[test]
    fn test_symmetry_and_diagonal() {
        let data = generate_synthetic_profiles(40, 5, 2, 1.0, 11).unwrap();
        let res = split_block_stat(data.as_ref(), &params(4, 2)).unwrap();

        for i in 0..5 {
            for j in 0..5 {
                assert_eq!(res.cov[(i, j)].to_bits(), res.cov[(j, i)].to_bits());
            }
            let col: Vec<f64> = (0..40).map(|r| data[(r, i)]).collect();
            let mean = col.iter().sum::<f64>() / 40.0;
            let var = col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 39.0;
            assert!((res.cov[(i, i)] - var).abs() < 1e-10 * var.max(1.0));
        }
    }

    #[test]
    fn test_missing_value_isolation() {
        let clean = generate_synthetic_profiles(30, 4, 2, 0.5, 5).unwrap();
        let mut dirty = clean.clone();
        for r in [0, 3, 4, 17, 29] {
            dirty[(r, 2)] = f64::NAN;
        }

        let res_clean = split_block_stat(clean.as_ref(), &params(3, 2)).unwrap();
        let res_dirty = split_block_stat(dirty.as_ref(), &params(3, 2)).unwrap();

        for i in 0..4 {
            for j in 0..4 {
                if i == 2 || j == 2 {
                    assert_eq!(res_dirty.pair_counts[i * 4 + j], 25);
                    continue;
                }
                assert_eq!(
                    res_clean.cov[(i, j)].to_bits(),
                    res_dirty.cov[(i, j)].to_bits()
                );
            }
        }
    }

    #[test]
    fn test_perfectly_correlated_features() {
        let a: Vec<f64> = (1..=10).map(|x| x as f64).collect();
        let b: Vec<f64> = a.iter().map(|x| 2.0 * x + 3.0).collect();
        let data = FeatureMatrix::from_columns(vec![
            ("a".to_string(), a),
            ("b".to_string(), b),
        ])
        .unwrap();

        let cov = split_covariance(&data, &params(3, 2)).unwrap();

        let var_a = cov.get("a", "a").unwrap();
        assert!((var_a - 55.0 / 6.0).abs() < 1e-10);
        assert!((cov.get("a", "b").unwrap() - 2.0 * var_a).abs() < 1e-10);

        let cor = cov.to_correlation();
        assert!((cor[(0, 1)] - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_single_row_data() {
        let data = mat![[1.0, 2.0, 3.0]];
        let res = split_block_stat(data.as_ref(), &params(1, 1)).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                assert!(res.cov[(i, j)].is_nan());
            }
        }

        let res = split_block_stat(data.as_ref(), &params(2, 1));
        assert!(matches!(res, Err(CovError::InvalidInput(_))));
    }

    #[test]
    fn test_online_cov_fun() {
        let data = profiles_with_missing(40, 4, 9);
        let two_pass = split_block_stat(data.as_ref(), &params(4, 2)).unwrap();
        let online_params = SplitCovParams::new(4, 2, "online", false).unwrap();
        let online = split_block_stat(data.as_ref(), &online_params).unwrap();
        assert_close(online.cov.as_ref(), two_pass.cov.as_ref(), 1e-8);
    }

    #[test]
    fn test_invalid_params() {
        let data = mat![[1.0, 2.0], [3.0, 4.0], [5.0, 7.0]];
        let res = split_block_stat(data.as_ref(), &params(2, 0));
        assert!(matches!(res, Err(CovError::InvalidInput(_))));

        let res = SplitCovParams::new(2, 2, "naive", false);
        assert!(matches!(res, Err(CovError::InvalidInput(_))));

        let empty = Mat::<f64>::zeros(3, 0);
        let res = split_block_stat(empty.as_ref(), &params(1, 1));
        assert!(matches!(res, Err(CovError::InvalidInput(_))));

        let bad_parts = vec![Partition {
            index: 0,
            row_start: 2,
            nrows: 5,
        }];
        let res = aggregate_blocks(data.as_ref(), &bad_parts, 1, CovFunType::TwoPass);
        assert!(matches!(res, Err(CovError::InvalidInput(_))));
    }

    #[test]
    fn test_partition_range_overflow() {
        let data = mat![[1.0, 2.0], [3.0, 4.0], [5.0, 7.0]];
        let huge = Partition {
            index: 0,
            row_start: usize::MAX,
            nrows: 2,
        };
        assert!(matches!(huge.rows(), Err(CovError::InvalidInput(_))));

        let res = aggregate_blocks(data.as_ref(), &[huge], 2, CovFunType::TwoPass);
        assert!(matches!(res, Err(CovError::InvalidInput(_))));
    }

    #[test]
    fn test_worker_failure() {
        let data = mat![[1.0], [2.0], [3.0], [4.0], [5.0], [6.0]];
        let parts = plan_partitions(6, 3).unwrap();

        let res = aggregate_blocks_with(data.as_ref(), &parts, 2, |view| {
            if view[(0, 0)] > 4.0 {
                panic!("simulated allocation failure");
            }
            two_pass_multi_covar(view)
        });

        match res {
            Err(CovError::WorkerFailure(msg)) => {
                assert!(msg.contains("Partition 2"));
                assert!(msg.contains("simulated allocation failure"));
            }
            other => panic!("Expected a worker failure, got {:?}", other),
        }
    }
}
