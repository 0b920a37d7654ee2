//! Command-line interface modules for shardpq
//!
//! This module contains all CLI command implementations.

pub mod convert;
pub mod info;
pub mod train;
