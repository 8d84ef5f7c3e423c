//! Helpers shared across the crate

pub mod errors;
pub mod general;
pub mod macros;
#[cfg(feature = "r")]
pub mod r_rust_interface;
