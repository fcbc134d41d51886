//! Core types and error handling shared across the definition core.

mod error;

pub use error::{BundlerError, FrozenDiff};

/// Result alias for operations that fail with a [`BundlerError`].
pub type Result<T> = std::result::Result<T, BundlerError>;
