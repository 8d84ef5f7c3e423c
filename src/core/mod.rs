//! Numerical core: block covariances, their combination, the data
//! structures and the split covariance method.

pub mod base;
pub mod data;
pub mod methods;
