//! Module containing the covariance kernels, the merging of partial
//! estimates and the correlation helpers.

pub mod combine;
pub mod cors_similarity;
pub mod covariance;
