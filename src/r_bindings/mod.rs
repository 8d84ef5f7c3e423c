//! Everything and anything related to the Rust <> R interface.

pub mod r_base;
