//! Persistence for user configs and setup conversations.
//!
//! - `model`: row → entity mapping.
//! - `repo`: SQL-only functions, including the compare-and-swap transitions
//!   the engines rely on instead of read-modify-write.

pub mod model;
pub mod repo;

pub use repo::*;
