use crate::publish::{Platform, PlatformError};

/// How many of the account's newest submissions are checked per sweep.
pub const SWEEP_LIMIT: usize = 25;

/// Deletes the account's recent submissions scoring at or below `threshold`.
///
/// With `submit` off the candidates are only logged. Returns the number of
/// deleted submissions.
pub async fn sweep_downvoted(
    platform: &dyn Platform,
    threshold: i64,
    submit: bool,
) -> Result<usize, PlatformError> {
    let submissions = platform.recent_submissions(SWEEP_LIMIT).await?;

    let mut deleted = 0;
    for submission in submissions.iter().filter(|s| s.score <= threshold) {
        if !submit {
            tracing::info!(
                post = %submission.handle,
                score = submission.score,
                title = %submission.title,
                "Dry run: would delete downvoted submission"
            );
            continue;
        }

        platform.delete(&submission.handle).await?;
        tracing::info!(
            post = %submission.handle,
            score = submission.score,
            url = %submission.url,
            "Deleted downvoted submission"
        );
        deleted += 1;
    }

    Ok(deleted)
}
