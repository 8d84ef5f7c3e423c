use faer::{Mat, MatRef};
use rustc_hash::{FxBuildHasher, FxHashMap};

use crate::core::base::cors_similarity::cov2cor;
use crate::core::base::covariance::BlockStatistic;
use crate::utils::errors::CovError;
use crate::utils::general::faer_mat_to_upper_triangle;

/////////////
// Helpers //
/////////////

/// Build the name -> index lookup and check for duplicates
fn build_col_index(col_names: &[String]) -> Result<FxHashMap<String, usize>, CovError> {
    let mut index = FxHashMap::with_capacity_and_hasher(col_names.len(), FxBuildHasher);
    for (i, name) in col_names.iter().enumerate() {
        if index.insert(name.clone(), i).is_some() {
            return Err(CovError::InvalidInput(format!(
                "Duplicated column name: {}",
                name
            )));
        }
    }
    Ok(index)
}

////////////////
// Structures //
////////////////

/// Named feature matrix
///
/// Observations are rows and features are columns. `NaN` marks a missing
/// value.
///
/// ### Fields
///
/// * `col_names` - Ordered feature names.
/// * `col_index` - Lookup of the column position by feature name.
/// * `values` - The observations.
#[derive(Clone, Debug)]
pub struct FeatureMatrix {
    col_names: Vec<String>,
    col_index: FxHashMap<String, usize>,
    values: Mat<f64>,
}

impl FeatureMatrix {
    /// Generate a new feature matrix
    ///
    /// ### Params
    ///
    /// * `col_names` - The feature names, one per column.
    /// * `values` - The values with features as columns.
    ///
    /// ### Returns
    ///
    /// The `FeatureMatrix` or an error on zero columns, a name count that
    /// does not match the columns, or duplicated names.
    pub fn new(col_names: Vec<String>, values: Mat<f64>) -> Result<Self, CovError> {
        if values.ncols() == 0 {
            return Err(CovError::InvalidInput(
                "Feature matrix needs at least one column".to_string(),
            ));
        }
        if col_names.len() != values.ncols() {
            return Err(CovError::InvalidInput(format!(
                "Got {} column names for {} columns",
                col_names.len(),
                values.ncols()
            )));
        }
        let col_index = build_col_index(&col_names)?;

        Ok(FeatureMatrix {
            col_names,
            col_index,
            values,
        })
    }

    /// Generate a feature matrix from named columns
    ///
    /// ### Params
    ///
    /// * `columns` - Ordered `(name, values)` pairs. All columns need the
    ///   same length.
    ///
    /// ### Returns
    ///
    /// The `FeatureMatrix` or an error on malformed input.
    pub fn from_columns(columns: Vec<(String, Vec<f64>)>) -> Result<Self, CovError> {
        let n_rows = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        if let Some((name, col)) = columns.iter().find(|(_, v)| v.len() != n_rows) {
            return Err(CovError::InvalidInput(format!(
                "Column {} has {} values, expected {}",
                name,
                col.len(),
                n_rows
            )));
        }

        let values = Mat::from_fn(n_rows, columns.len(), |i, j| columns[j].1[i]);
        let col_names = columns.into_iter().map(|(name, _)| name).collect();

        Self::new(col_names, values)
    }

    /// Generate a feature matrix with generic names `feature_1`, ...
    pub fn from_unnamed(values: Mat<f64>) -> Result<Self, CovError> {
        let col_names = (1..=values.ncols())
            .map(|i| format!("feature_{}", i))
            .collect();
        Self::new(col_names, values)
    }

    /// Number of observations
    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    /// Number of features
    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    /// The feature names
    pub fn col_names(&self) -> &[String] {
        &self.col_names
    }

    /// Position of a feature
    pub fn col_position(&self, name: &str) -> Option<usize> {
        self.col_index.get(name).copied()
    }

    /// Read-only view of the values
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        self.values.as_ref()
    }
}

/// Labelled covariance matrix
///
/// ### Fields
///
/// * `col_names` - Feature names of rows and columns.
/// * `values` - Symmetric covariance matrix, variances on the diagonal. `NaN`
///   for pairs with fewer than two complete observations.
/// * `pair_counts` - Number of complete observations per pair, row-major.
/// * `n_obs` - Total number of observations.
#[derive(Clone, Debug)]
pub struct CovarianceMatrix {
    pub col_names: Vec<String>,
    pub values: Mat<f64>,
    pub pair_counts: Vec<usize>,
    pub n_obs: usize,
    col_index: FxHashMap<String, usize>,
}

impl CovarianceMatrix {
    /// Label a combined block statistic
    ///
    /// ### Params
    ///
    /// * `col_names` - Feature names in column order.
    /// * `stat` - The statistic over all observations.
    pub fn from_block_stat(col_names: Vec<String>, stat: BlockStatistic) -> Result<Self, CovError> {
        if col_names.len() != stat.n_features() {
            return Err(CovError::InvalidInput(format!(
                "Got {} names for {} features",
                col_names.len(),
                stat.n_features()
            )));
        }
        let col_index = build_col_index(&col_names)?;

        Ok(CovarianceMatrix {
            col_names,
            values: stat.cov,
            pair_counts: stat.pair_counts,
            n_obs: stat.n_obs,
            col_index,
        })
    }

    /// Number of features
    pub fn n_features(&self) -> usize {
        self.values.ncols()
    }

    /// Covariance of two features by name
    pub fn get(&self, name_a: &str, name_b: &str) -> Option<f64> {
        let i = *self.col_index.get(name_a)?;
        let j = *self.col_index.get(name_b)?;
        Some(self.values[(i, j)])
    }

    /// Number of complete observations of the pair `(i, j)`
    pub fn pair_count(&self, i: usize, j: usize) -> usize {
        self.pair_counts[i * self.n_features() + j]
    }

    /// Correlation matrix derived from the covariances
    pub fn to_correlation(&self) -> Mat<f64> {
        cov2cor(self.values.as_ref())
    }

    /// Upper triangle of the covariances, row-major
    ///
    /// ### Params
    ///
    /// * `shift` - Include the diagonal (0) or not (1).
    pub fn upper_triangle(&self, shift: usize) -> Vec<f64> {
        faer_mat_to_upper_triangle(self.values.as_ref(), shift)
    }
}
