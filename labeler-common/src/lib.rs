//! # Labeler Common Library
//!
//! Shared code for the labeler service and anything that talks to it:
//! - Error type
//! - Bootstrap configuration loading
//! - Training-service wire types (request bodies of the trainer contract)
//! - Atomic file writes

pub mod atomic;
pub mod config;
pub mod error;
pub mod protocol;

pub use error::{Error, Result};
