use faer::{Mat, MatRef};
use rayon::iter::*;

use crate::utils::errors::CovError;
use crate::utils::general::{nan_mean, upper_triangle_pairs};

///////////
// Enums //
///////////

/// Per-block covariance algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CovFunType {
    /// Two pass algorithm: column means first, then centred cross products
    #[default]
    TwoPass,
    /// Single pass Welford-type update per feature pair
    Online,
}

/// Parsing the covariance function type
///
/// ### Params
///
/// * `s` - string defining the covariance function
///
/// ### Returns
///
/// The `CovFunType`.
pub fn parse_cov_fun(s: &str) -> Option<CovFunType> {
    match s.to_lowercase().as_str() {
        "two_pass" | "twopass" => Some(CovFunType::TwoPass),
        "online" => Some(CovFunType::Online),
        _ => None,
    }
}

////////////////
// Structures //
////////////////

/// Sufficient statistics of one feature pair
///
/// All values refer to the rows in which both features are present.
///
/// ### Fields
///
/// * `n` - Number of complete rows.
/// * `mean_i` - Mean of the first feature over the complete rows.
/// * `mean_j` - Mean of the second feature over the complete rows.
/// * `comoment` - Sum of the centred cross products.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PairMoments {
    pub n: usize,
    pub mean_i: f64,
    pub mean_j: f64,
    pub comoment: f64,
}

impl PairMoments {
    /// Moments of a pair without any complete row
    pub fn empty() -> Self {
        PairMoments {
            n: 0,
            mean_i: f64::NAN,
            mean_j: f64::NAN,
            comoment: 0.0,
        }
    }

    /// Unbiased covariance estimate, `NaN` if fewer than two complete rows
    pub fn covariance(&self) -> f64 {
        if self.n < 2 {
            f64::NAN
        } else {
            self.comoment / (self.n - 1) as f64
        }
    }
}

/// Online covariance accumulator for two variables
///
/// Keeps running means of both variables and the running co-moment. Samples
/// where either value is `NaN` are skipped.
#[derive(Clone, Debug, Default)]
pub struct OnlineCovariance {
    n: usize,
    mean_x: f64,
    mean_y: f64,
    comoment: f64,
}

impl OnlineCovariance {
    /// Generate a new, empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one paired sample
    ///
    /// ### Params
    ///
    /// * `x` - Value of the first variable
    /// * `y` - Value of the second variable
    pub fn update(&mut self, x: f64, y: f64) {
        if x.is_nan() || y.is_nan() {
            return;
        }
        self.n += 1;
        let n = self.n as f64;
        let dx = x - self.mean_x;
        self.mean_x += dx / n;
        self.mean_y += (y - self.mean_y) / n;
        self.comoment += dx * (y - self.mean_y);
    }

    /// Number of complete samples seen so far
    pub fn count(&self) -> usize {
        self.n
    }

    /// Running means of both variables
    pub fn means(&self) -> (f64, f64) {
        (self.mean_x, self.mean_y)
    }

    /// Running co-moment
    pub fn comoment(&self) -> f64 {
        self.comoment
    }

    /// Sample covariance, `None` with fewer than two complete samples
    pub fn covariance(&self) -> Option<f64> {
        if self.n < 2 {
            None
        } else {
            Some(self.comoment / (self.n - 1) as f64)
        }
    }

    /// Transform the accumulator into the pair moments
    pub fn into_moments(self) -> PairMoments {
        if self.n == 0 {
            return PairMoments::empty();
        }
        PairMoments {
            n: self.n,
            mean_i: self.mean_x,
            mean_j: self.mean_y,
            comoment: self.comoment,
        }
    }
}

/// Covariance statistics of one block of observations
///
/// ### Fields
///
/// * `cov` - Symmetric feature x feature covariance matrix. `NaN` for pairs
///   with fewer than two complete rows.
/// * `pair_means` - Pair-conditional means. Entry `(i, j)` is the mean of
///   feature `i` over the rows where `i` and `j` are both present. The
///   diagonal holds the per-feature means.
/// * `pair_counts` - Number of complete rows per pair, row-major.
/// * `n_obs` - Number of rows of the block.
#[derive(Clone, Debug)]
pub struct BlockStatistic {
    pub cov: Mat<f64>,
    pub pair_means: Mat<f64>,
    pub pair_counts: Vec<usize>,
    pub n_obs: usize,
}

impl BlockStatistic {
    /// Assemble the block statistic from the moments of the upper triangle
    ///
    /// ### Params
    ///
    /// * `n_features` - Number of features.
    /// * `n_obs` - Number of rows of the block.
    /// * `moments` - Moments for every `(i, j)` with `i <= j`.
    pub fn from_pair_moments(
        n_features: usize,
        n_obs: usize,
        moments: Vec<((usize, usize), PairMoments)>,
    ) -> Self {
        let mut cov = Mat::<f64>::zeros(n_features, n_features);
        let mut pair_means = Mat::<f64>::zeros(n_features, n_features);
        let mut pair_counts = vec![0_usize; n_features * n_features];

        for ((i, j), m) in moments {
            let c = m.covariance();
            cov[(i, j)] = c;
            cov[(j, i)] = c;
            pair_means[(i, j)] = m.mean_i;
            pair_means[(j, i)] = m.mean_j;
            pair_counts[i * n_features + j] = m.n;
            pair_counts[j * n_features + i] = m.n;
        }

        BlockStatistic {
            cov,
            pair_means,
            pair_counts,
            n_obs,
        }
    }

    /// Rebuild a block estimate from dense means and covariances
    ///
    /// Assumes no missing data within the block, i.e., every pair was
    /// computed from all `n` rows.
    ///
    /// ### Params
    ///
    /// * `means` - The per-feature means of the block.
    /// * `cov` - The covariance matrix of the block.
    /// * `n` - Number of rows of the block.
    ///
    /// ### Returns
    ///
    /// The `BlockStatistic` or an error on inconsistent shapes.
    pub fn from_dense(means: &[f64], cov: MatRef<f64>, n: usize) -> Result<Self, CovError> {
        let k = means.len();
        if cov.nrows() != k || cov.ncols() != k {
            return Err(CovError::InvalidInput(format!(
                "Covariance matrix is {}x{}, expected {}x{} from the means",
                cov.nrows(),
                cov.ncols(),
                k,
                k
            )));
        }
        if n == 0 {
            return Err(CovError::InvalidInput(
                "Block size needs to be at least 1".to_string(),
            ));
        }

        let block_cov = Mat::from_fn(k, k, |i, j| if n < 2 { f64::NAN } else { cov[(i, j)] });
        let pair_means = Mat::from_fn(k, k, |i, _| means[i]);

        Ok(BlockStatistic {
            cov: block_cov,
            pair_means,
            pair_counts: vec![n; k * k],
            n_obs: n,
        })
    }

    /// Number of features
    pub fn n_features(&self) -> usize {
        self.cov.ncols()
    }

    /// Number of complete rows of the pair `(i, j)`
    pub fn pair_count(&self, i: usize, j: usize) -> usize {
        self.pair_counts[i * self.n_features() + j]
    }

    /// Per-feature means, ignoring missing values
    pub fn means(&self) -> Vec<f64> {
        (0..self.n_features())
            .map(|i| self.pair_means[(i, i)])
            .collect()
    }

    /// Sufficient statistics of the pair `(i, j)`
    pub fn pair_moments(&self, i: usize, j: usize) -> PairMoments {
        let n = self.pair_count(i, j);
        if n == 0 {
            return PairMoments::empty();
        }
        let comoment = if n < 2 {
            0.0
        } else {
            self.cov[(i, j)] * (n - 1) as f64
        };
        PairMoments {
            n,
            mean_i: self.pair_means[(i, j)],
            mean_j: self.pair_means[(j, i)],
            comoment,
        }
    }
}

///////////////////////
// Pair co-variances //
///////////////////////

/// Calculate the covariance between two vectors with an online algorithm
///
/// Samples where either value is `NaN` are dropped.
///
/// ### Params
///
/// * `x1` - The first vector.
/// * `x2` - The second vector.
///
/// ### Returns
///
/// The sample covariance, or an error if the lengths differ or fewer than
/// two complete pairs remain.
pub fn online_covar(x1: &[f64], x2: &[f64]) -> Result<f64, CovError> {
    if x1.len() != x2.len() {
        return Err(CovError::InvalidInput(format!(
            "Vectors have different lengths: {} != {}",
            x1.len(),
            x2.len()
        )));
    }

    let mut acc = OnlineCovariance::new();
    for (&x, &y) in x1.iter().zip(x2.iter()) {
        acc.update(x, y);
    }

    acc.covariance().ok_or_else(|| {
        CovError::InvalidInput(format!(
            "Need at least 2 complete pairs, found {}",
            acc.count()
        ))
    })
}

////////////////////////////
// Block co-variance calc //
////////////////////////////

/// Two pass covariance of all feature pairs of a block
///
/// The first pass gets the column means ignoring missing values. The second
/// pass accumulates per pair, over the rows where both values are present,
/// the centred sums and the centred cross products. The cross products are
/// corrected by the centred sums, so pairs with a different missing pattern
/// than their columns still get their exact pairwise-complete covariance.
///
/// ### Params
///
/// * `mat` - The block. Assumes features are columns.
///
/// ### Returns
///
/// The `BlockStatistic` of the block.
pub fn two_pass_multi_covar(mat: MatRef<f64>) -> BlockStatistic {
    let (n_rows, n_cols) = mat.shape();

    let col_means: Vec<f64> = (0..n_cols)
        .into_par_iter()
        .map(|j| nan_mean(mat.col(j).iter().copied()).0)
        .collect();

    let moments: Vec<((usize, usize), PairMoments)> = upper_triangle_pairs(n_cols, 0)
        .into_par_iter()
        .map(|(i, j)| {
            let m_i = col_means[i];
            let m_j = col_means[j];

            let mut n = 0_usize;
            let mut sum_i = 0_f64;
            let mut sum_j = 0_f64;
            let mut sum_ij = 0_f64;

            for r in 0..n_rows {
                let x = mat[(r, i)];
                let y = mat[(r, j)];
                if x.is_nan() || y.is_nan() {
                    continue;
                }
                let dx = x - m_i;
                let dy = y - m_j;
                n += 1;
                sum_i += dx;
                sum_j += dy;
                sum_ij += dx * dy;
            }

            if n == 0 {
                return ((i, j), PairMoments::empty());
            }

            let n_f = n as f64;
            let mut comoment = sum_ij - sum_i * sum_j / n_f;
            if i == j {
                comoment = comoment.max(0.0);
            }

            (
                (i, j),
                PairMoments {
                    n,
                    mean_i: m_i + sum_i / n_f,
                    mean_j: m_j + sum_j / n_f,
                    comoment,
                },
            )
        })
        .collect();

    BlockStatistic::from_pair_moments(n_cols, n_rows, moments)
}

/// Online covariance of all feature pairs of a block
///
/// ### Params
///
/// * `mat` - The block. Assumes features are columns.
///
/// ### Returns
///
/// The `BlockStatistic` of the block.
pub fn online_multi_covar(mat: MatRef<f64>) -> BlockStatistic {
    let (n_rows, n_cols) = mat.shape();

    let moments: Vec<((usize, usize), PairMoments)> = upper_triangle_pairs(n_cols, 0)
        .into_par_iter()
        .map(|(i, j)| {
            let mut acc = OnlineCovariance::new();
            for r in 0..n_rows {
                acc.update(mat[(r, i)], mat[(r, j)]);
            }
            ((i, j), acc.into_moments())
        })
        .collect();

    BlockStatistic::from_pair_moments(n_cols, n_rows, moments)
}

/// Run the selected covariance function on a block
///
/// ### Params
///
/// * `mat` - The block. Assumes features are columns.
/// * `cov_fun` - Which algorithm to use.
///
/// ### Returns
///
/// The `BlockStatistic` of the block.
pub fn block_covariance(mat: MatRef<f64>, cov_fun: CovFunType) -> BlockStatistic {
    match cov_fun {
        CovFunType::TwoPass => two_pass_multi_covar(mat),
        CovFunType::Online => online_multi_covar(mat),
    }
}
