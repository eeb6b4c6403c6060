//! Utility functions for common operations.
//!
//! - **URL validation**: scheme/host checks for configured feed URLs
//! - **Text processing**: char-based truncation and control character stripping
//!   for feed-supplied titles

mod text;
mod url_validator;

pub use text::{collapse_whitespace, strip_control_chars, truncate_chars};
pub use url_validator::{validate_feed_url, UrlValidationError};
