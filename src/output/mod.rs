//! Report output
//!
//! Text goes to stdout for humans; JSON goes to a file for tooling.

pub mod json;
pub mod text;
