//! Relays RSS/Atom feed entries to Reddit.
//!
//! Each new entry is converted to Reddit markdown, split into length-bounded
//! segments and posted as a root post followed by a reply chain. A SQLite
//! story log keeps entries from being posted twice.

pub mod config;
pub mod feed;
pub mod markdown;
pub mod pipeline;
pub mod publish;
pub mod storage;
pub mod util;
