pub mod r_covariance;
