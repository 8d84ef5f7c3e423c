//! Split/parallel covariance

pub mod split_cov;
