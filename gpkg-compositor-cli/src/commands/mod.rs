//! CLI command implementations.

pub mod common;
pub mod merge;
pub mod tiles;
