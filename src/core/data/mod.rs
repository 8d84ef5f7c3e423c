//! Module containing the feature and covariance matrix structures and
//! synthetic data

pub mod feature_matrix;
pub mod synthetic_data;
