//! # tripod
//!
//! Library half of the `tripod` binary, so the command layer can be driven
//! from tests.

pub mod cli;
