//! Publishing segmented entries to the discussion platform.
//!
//! - [`platform`] - the [`Platform`] trait and its error taxonomy
//! - [`reddit`] - Reddit OAuth2 implementation of [`Platform`]
//! - [`sequencer`] - root post plus reply chain, with per-call retries

mod platform;
mod reddit;
mod sequencer;

pub use platform::{Platform, PlatformError, PostHandle, Submission};
pub use reddit::{Credentials, RedditClient};
pub use sequencer::{PublishError, PublishReceipt, Sequencer};
