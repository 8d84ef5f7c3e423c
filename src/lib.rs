pub mod core;
pub mod utils;

#[cfg(feature = "r")]
mod r_bindings;

#[cfg(feature = "r")]
use extendr_api::prelude::*;

#[cfg(feature = "r")]
pub use r_bindings::r_base::r_covariance;

#[cfg(feature = "r")]
extendr_module! {
    mod cytocov;
    use r_covariance;
}
