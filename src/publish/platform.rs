use async_trait::async_trait;
use thiserror::Error;

/// Platform identifier of a created post or reply (Reddit "fullname",
/// e.g. `t3_abc123`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PostHandle(pub String);

impl PostHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PostHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One of the account's own submissions, as listed by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub handle: PostHandle,
    pub title: String,
    pub url: String,
    pub score: i64,
}

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Request timed out")]
    Timeout,
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Rate limited by platform")]
    RateLimited,
    /// Credentials rejected or token request failed
    #[error("Authentication failed: {0}")]
    Auth(String),
    /// The API accepted the request but reported an error
    #[error("API error: {0}")]
    Api(String),
    /// Response did not have the expected shape
    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl PlatformError {
    /// Returns true if the failure is likely to go away on its own and the
    /// call should be retried later.
    pub fn is_transient(&self) -> bool {
        match self {
            PlatformError::Timeout | PlatformError::Network(_) | PlatformError::RateLimited => true,
            PlatformError::HttpStatus(status) => *status >= 500,
            PlatformError::Api(message) => {
                let message = message.to_lowercase();
                message.contains("try again") || message.contains("ratelimit")
            }
            PlatformError::Auth(_) | PlatformError::Decode(_) => false,
        }
    }
}

/// Operations the relay needs from a discussion platform.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Create a root self-post in `target`.
    async fn submit(
        &self,
        target: &str,
        title: &str,
        body: &str,
    ) -> Result<PostHandle, PlatformError>;

    /// Reply to an existing post or reply.
    async fn reply(&self, parent: &PostHandle, body: &str) -> Result<PostHandle, PlatformError>;

    /// Send a private message to a user.
    async fn send_message(&self, to: &str, subject: &str, body: &str)
        -> Result<(), PlatformError>;

    /// The account's newest submissions, newest first.
    async fn recent_submissions(&self, limit: usize) -> Result<Vec<Submission>, PlatformError>;

    /// Delete one of the account's own posts.
    async fn delete(&self, handle: &PostHandle) -> Result<(), PlatformError>;
}
