//! Feed retrieval for RSS and Atom sources.
//!
//! - [`parser`] - feed parsing using the `feed-rs` crate
//! - [`reader`] - HTTP fetching with timeout, size limit and retry logic
//!
//! A failed fetch is returned as a [`FetchError`] value; callers treat it as
//! an empty feed for the current cycle.

mod parser;
mod reader;

pub use parser::{parse_feed, FeedEntry};
pub use reader::{FeedReader, FetchError};
