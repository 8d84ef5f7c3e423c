use faer::{Mat, MatRef};
use rand::prelude::*;
use rand_distr::{Distribution, Normal};

use crate::utils::errors::CovError;

/////////////////////////////
// Synthetic profile data //
/////////////////////////////

/// Generate synthetic morphology profiles with a module correlation structure
///
/// Every feature loads on one latent module (standard normal), is shifted by
/// its own location and gets independent Gaussian noise. Features of the same
/// module are correlated, features of different modules are not.
///
/// ### Params
///
/// * `n_rows` - Number of observations (wells or cells).
/// * `n_features` - Number of features.
/// * `n_modules` - Number of latent modules. Feature `j` belongs to module
///   `j % n_modules`.
/// * `noise_sd` - Standard deviation of the feature noise.
/// * `seed` - Seed for reproducibility purposes.
///
/// ### Returns
///
/// The `n_rows x n_features` matrix.
pub fn generate_synthetic_profiles(
    n_rows: usize,
    n_features: usize,
    n_modules: usize,
    noise_sd: f64,
    seed: u64,
) -> Result<Mat<f64>, CovError> {
    if n_rows == 0 || n_features == 0 || n_modules == 0 {
        return Err(CovError::InvalidInput(format!(
            "Need at least one row, feature and module, got {}, {} and {}",
            n_rows, n_features, n_modules
        )));
    }

    if !noise_sd.is_finite() || noise_sd < 0.0 {
        return Err(CovError::InvalidInput(format!(
            "noise_sd needs to be a finite, non-negative number, got {}",
            noise_sd
        )));
    }

    let std_normal = Normal::new(0.0, 1.0)
        .map_err(|e| CovError::InvalidInput(format!("Invalid distribution: {}", e)))?;
    let noise = Normal::new(0.0, noise_sd)
        .map_err(|e| CovError::InvalidInput(format!("Invalid noise sd {}: {}", noise_sd, e)))?;

    let mut rng = StdRng::seed_from_u64(seed);

    // feature level parameters
    let loadings: Vec<f64> = (0..n_features)
        .map(|_| {
            let sign = if rng.random::<bool>() { 1.0 } else { -1.0 };
            sign * (0.5 + rng.random::<f64>())
        })
        .collect();
    let locations: Vec<f64> = (0..n_features)
        .map(|_| rng.random_range(-100.0..100.0))
        .collect();

    let latent: Vec<Vec<f64>> = (0..n_rows)
        .map(|_| (0..n_modules).map(|_| std_normal.sample(&mut rng)).collect())
        .collect();

    let mut data = Mat::<f64>::zeros(n_rows, n_features);
    for (r, factors) in latent.iter().enumerate() {
        for j in 0..n_features {
            let module = j % n_modules;
            data[(r, j)] = locations[j] + loadings[j] * factors[module] + noise.sample(&mut rng);
        }
    }

    Ok(data)
}

/// Set a random fraction of the values to missing
///
/// ### Params
///
/// * `mat` - The matrix to copy.
/// * `frac` - Probability of each cell to become `NaN`. Within `[0, 1]`.
/// * `seed` - Seed for reproducibility purposes.
///
/// ### Returns
///
/// The copy with the missing values.
pub fn add_missing_values(mat: MatRef<f64>, frac: f64, seed: u64) -> Result<Mat<f64>, CovError> {
    if !(0.0..=1.0).contains(&frac) {
        return Err(CovError::InvalidInput(format!(
            "Missing fraction needs to be within [0, 1], got {}",
            frac
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut res = mat.to_owned();
    for j in 0..res.ncols() {
        for i in 0..res.nrows() {
            if rng.random::<f64>() < frac {
                res[(i, j)] = f64::NAN;
            }
        }
    }

    Ok(res)
}
