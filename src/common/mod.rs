//! Shared infrastructure: error types and small cross-cutting helpers

pub mod error;

pub use error::{Error, Result};
