use tokio::sync::watch;

use super::backoff::Backoff;
use super::context::Context;
use super::cycle::{run_cycle, CycleError};

/// Runs cycles until shutdown is requested, or once when `once` is set.
///
/// Between cycles the task sleeps for the current backoff interval; a
/// shutdown request ends the sleep early. Returns the first fatal error.
pub async fn run(
    ctx: &Context,
    mut backoff: Backoff,
    shutdown: watch::Receiver<bool>,
    once: bool,
) -> Result<(), CycleError> {
    loop {
        let report = run_cycle(ctx, &shutdown).await?;
        tracing::info!(
            feeds_read = report.feeds_read,
            feeds_failed = report.feeds_failed,
            published = report.published,
            partial = report.partial,
            pruned = report.pruned,
            deleted = report.deleted,
            "Cycle complete"
        );

        if report.transient_failure {
            backoff.on_failure();
        } else {
            backoff.on_success();
        }

        if once || report.interrupted {
            break;
        }

        let delay = backoff.current();
        tracing::debug!(sleep_secs = delay.as_secs(), "Sleeping until next cycle");
        if super::sleep_or_shutdown(delay, &shutdown).await {
            break;
        }
    }

    tracing::info!("Relay stopped");
    Ok(())
}
