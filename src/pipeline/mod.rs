//! The polling pipeline.
//!
//! - [`cycle`] - one read → filter → plan → publish → record → prune pass
//! - [`runner`] - the cycle loop with backoff and shutdown
//! - [`backoff`] - inter-cycle sleep growth and recovery
//! - [`moderation`] - removal of the account's heavily downvoted posts

mod backoff;
mod context;
mod cycle;
mod moderation;
mod runner;

use std::time::Duration;

use tokio::sync::watch;

pub use backoff::Backoff;
pub use context::{Context, RelaySettings};
pub use cycle::{run_cycle, CycleError, CycleReport};
pub use moderation::{sweep_downvoted, SWEEP_LIMIT};
pub use runner::run;

/// Sleeps for `duration` unless shutdown is requested first.
/// Returns true when shutdown was requested.
async fn sleep_or_shutdown(duration: Duration, shutdown: &watch::Receiver<bool>) -> bool {
    if duration.is_zero() {
        return *shutdown.borrow();
    }

    let mut shutdown = shutdown.clone();
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        Ok(_) = shutdown.wait_for(|stop| *stop) => true,
    }
}
