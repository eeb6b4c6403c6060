use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use super::platform::{Platform, PlatformError, PostHandle};
use crate::markdown::PublishPlan;

const MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum PublishError {
    /// Nothing reached the platform.
    #[error("Root post failed: {0}")]
    NotPublished(#[source] PlatformError),
    /// The chain broke after `published` segments; those stay online.
    #[error("Published {published} of {total} segments under {root}: {source}")]
    Partial {
        published: usize,
        total: usize,
        root: PostHandle,
        #[source]
        source: PlatformError,
    },
    #[error("Publish plan has no segments")]
    Empty,
}

impl PublishError {
    pub fn is_transient(&self) -> bool {
        match self {
            PublishError::NotPublished(source) | PublishError::Partial { source, .. } => {
                source.is_transient()
            }
            PublishError::Empty => false,
        }
    }
}

/// Handles of every post in a completed chain, root first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub handles: Vec<PostHandle>,
}

impl PublishReceipt {
    pub fn root(&self) -> Option<&PostHandle> {
        self.handles.first()
    }
}

/// Emits a plan as a root post followed by a linear reply chain.
#[derive(Clone)]
pub struct Sequencer {
    platform: Arc<dyn Platform>,
    segment_delay: Duration,
    retry_delay: Duration,
}

impl Sequencer {
    pub fn new(platform: Arc<dyn Platform>, segment_delay: Duration) -> Self {
        Self {
            platform,
            segment_delay,
            retry_delay: Duration::from_secs(2),
        }
    }

    /// Sets the first retry delay; later retries double it.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Publishes segment 0 as a post in `plan.target` and every following
    /// segment as a reply to the previous one.
    ///
    /// Each platform call is retried up to 3 times on transient errors.
    /// Segments already posted are never deleted on failure.
    pub async fn publish(&self, plan: &PublishPlan) -> Result<PublishReceipt, PublishError> {
        let segments = plan.segments.segments();
        let Some((first, rest)) = segments.split_first() else {
            return Err(PublishError::Empty);
        };

        let root = self
            .with_retries(|| self.platform.submit(&plan.target, &plan.title, &first.text))
            .await
            .map_err(PublishError::NotPublished)?;

        let mut handles = Vec::with_capacity(segments.len());
        handles.push(root.clone());

        for segment in rest {
            if !self.segment_delay.is_zero() {
                tokio::time::sleep(self.segment_delay).await;
            }

            let parent = handles.last().unwrap_or(&root).clone();
            match self
                .with_retries(|| self.platform.reply(&parent, &segment.text))
                .await
            {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    return Err(PublishError::Partial {
                        published: handles.len(),
                        total: segments.len(),
                        root,
                        source,
                    });
                }
            }
        }

        tracing::debug!(root = %root, segments = handles.len(), "Publish chain complete");
        Ok(PublishReceipt { handles })
    }

    async fn with_retries<F, Fut>(&self, mut call: F) -> Result<PostHandle, PlatformError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<PostHandle, PlatformError>>,
    {
        let mut retry_count = 0;
        loop {
            match call().await {
                Ok(handle) => return Ok(handle),
                Err(e) if e.is_transient() && retry_count < MAX_RETRIES => {
                    let delay = self.retry_delay * 2u32.pow(retry_count);
                    tracing::debug!(
                        error = %e,
                        retry = retry_count,
                        delay_ms = delay.as_millis() as u64,
                        "Platform call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
