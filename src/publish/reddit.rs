use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Deserialize;
use tokio::sync::Mutex;

use super::platform::{Platform, PlatformError, PostHandle, Submission};

const DEFAULT_AUTH_BASE: &str = "https://www.reddit.com";
const DEFAULT_API_BASE: &str = "https://oauth.reddit.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Tokens are refreshed this long before Reddit says they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Reddit "script app" credentials.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
    pub client_id: String,
    pub client_secret: SecretString,
    pub user_agent: String,
}

struct AccessToken {
    value: SecretString,
    expires_at: Instant,
}

/// Reddit API client using the OAuth2 password grant.
pub struct RedditClient {
    http: reqwest::Client,
    credentials: Credentials,
    auth_base: String,
    api_base: String,
    token: Mutex<Option<AccessToken>>,
}

impl std::fmt::Debug for RedditClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedditClient")
            .field("username", &self.credentials.username)
            .field("auth_base", &self.auth_base)
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
    error: Option<String>,
}

/// `api_type=json` responses: `{"json": {"errors": [...], "data": {...}}}`
#[derive(Deserialize)]
struct ApiEnvelope<T> {
    json: ApiBody<T>,
}

#[derive(Deserialize)]
struct ApiBody<T> {
    #[serde(default)]
    errors: Vec<Vec<serde_json::Value>>,
    data: Option<T>,
}

#[derive(Deserialize)]
struct Named {
    name: String,
}

#[derive(Deserialize)]
struct Thing<T> {
    data: T,
}

#[derive(Deserialize)]
struct CommentData {
    things: Vec<Thing<Named>>,
}

#[derive(Deserialize)]
struct Listing<T> {
    data: ListingData<T>,
}

#[derive(Deserialize)]
struct ListingData<T> {
    children: Vec<Thing<T>>,
}

#[derive(Deserialize)]
struct LinkData {
    name: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    score: i64,
}

impl<T> ApiEnvelope<T> {
    /// Turns reported API errors into `PlatformError::Api`.
    fn into_data(self) -> Result<Option<T>, PlatformError> {
        if let Some(first) = self.json.errors.first() {
            let message = first
                .iter()
                .filter_map(|part| part.as_str())
                .collect::<Vec<_>>()
                .join(": ");
            return Err(PlatformError::Api(message));
        }
        Ok(self.json.data)
    }
}

// ============================================================================
// Client
// ============================================================================

impl RedditClient {
    pub fn new(http: reqwest::Client, credentials: Credentials) -> Self {
        Self {
            http,
            credentials,
            auth_base: DEFAULT_AUTH_BASE.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            token: Mutex::new(None),
        }
    }

    /// Points the client at other hosts (test servers).
    pub fn with_base_urls(mut self, auth_base: &str, api_base: &str) -> Self {
        self.auth_base = auth_base.trim_end_matches('/').to_string();
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    async fn request_token(&self) -> Result<AccessToken, PlatformError> {
        let url = format!("{}/api/v1/access_token", self.auth_base);
        let request = self
            .http
            .post(&url)
            .header(USER_AGENT, &self.credentials.user_agent)
            .basic_auth(
                &self.credentials.client_id,
                Some(self.credentials.client_secret.expose_secret()),
            )
            .form(&[
                ("grant_type", "password"),
                ("username", self.credentials.username.as_str()),
                ("password", self.credentials.password.expose_secret()),
            ]);

        let response = tokio::time::timeout(REQUEST_TIMEOUT, request.send())
            .await
            .map_err(|_| PlatformError::Timeout)??;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(PlatformError::Auth(format!(
                "token request rejected with status {}",
                status.as_u16()
            )));
        }
        let body: TokenResponse = read_json(response).await?;

        // Bad credentials come back as 200 with an `error` field.
        if let Some(error) = body.error {
            return Err(PlatformError::Auth(error));
        }
        let value = body
            .access_token
            .ok_or_else(|| PlatformError::Decode("token response without access_token".into()))?;
        let lifetime = Duration::from_secs(body.expires_in.unwrap_or(3600));

        tracing::debug!(
            username = %self.credentials.username,
            expires_in_secs = lifetime.as_secs(),
            "Obtained access token"
        );
        Ok(AccessToken {
            value: SecretString::from(value),
            expires_at: Instant::now() + lifetime,
        })
    }

    /// `Authorization` header value, refreshing the token when close to expiry.
    async fn authorization(&self) -> Result<String, PlatformError> {
        let mut cached = self.token.lock().await;
        let fresh = cached
            .as_ref()
            .is_some_and(|t| Instant::now() + TOKEN_REFRESH_MARGIN < t.expires_at);
        if !fresh {
            *cached = Some(self.request_token().await?);
        }
        match cached.as_ref() {
            Some(token) => Ok(format!("bearer {}", token.value.expose_secret())),
            None => Err(PlatformError::Auth("no access token".into())),
        }
    }

    /// Sends an authorized API request. A 401 drops the cached token and
    /// retries once with a new one.
    async fn call<T, F>(&self, build: F) -> Result<T, PlatformError>
    where
        T: DeserializeOwned,
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut refreshed = false;
        loop {
            let authorization = self.authorization().await?;
            let request = build(&self.http)
                .header(USER_AGENT, &self.credentials.user_agent)
                .header(reqwest::header::AUTHORIZATION, authorization);

            let response = tokio::time::timeout(REQUEST_TIMEOUT, request.send())
                .await
                .map_err(|_| PlatformError::Timeout)??;

            if response.status() == StatusCode::UNAUTHORIZED && !refreshed {
                tracing::debug!("Access token rejected, requesting a new one");
                *self.token.lock().await = None;
                refreshed = true;
                continue;
            }

            return read_json(response).await;
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, PlatformError> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(PlatformError::RateLimited);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(PlatformError::Auth(format!("status {}", status.as_u16())));
    }
    if !status.is_success() {
        return Err(PlatformError::HttpStatus(status.as_u16()));
    }

    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| PlatformError::Decode(e.to_string()))
}

#[async_trait]
impl Platform for RedditClient {
    async fn submit(
        &self,
        target: &str,
        title: &str,
        body: &str,
    ) -> Result<PostHandle, PlatformError> {
        let url = self.api_url("/api/submit");
        let envelope: ApiEnvelope<Named> = self
            .call(|http| {
                http.post(&url).form(&[
                    ("api_type", "json"),
                    ("kind", "self"),
                    ("sr", target),
                    ("title", title),
                    ("text", body),
                    ("resubmit", "true"),
                ])
            })
            .await?;

        let handle = envelope
            .into_data()?
            .map(|data| PostHandle(data.name))
            .ok_or_else(|| PlatformError::Decode("submit response without data".into()))?;
        tracing::info!(subreddit = %target, post = %handle, "Submitted post");
        Ok(handle)
    }

    async fn reply(&self, parent: &PostHandle, body: &str) -> Result<PostHandle, PlatformError> {
        let url = self.api_url("/api/comment");
        let envelope: ApiEnvelope<CommentData> = self
            .call(|http| {
                http.post(&url).form(&[
                    ("api_type", "json"),
                    ("thing_id", parent.as_str()),
                    ("text", body),
                ])
            })
            .await?;

        let handle = envelope
            .into_data()?
            .and_then(|data| data.things.into_iter().next())
            .map(|thing| PostHandle(thing.data.name))
            .ok_or_else(|| PlatformError::Decode("comment response without thing".into()))?;
        tracing::debug!(parent = %parent, reply = %handle, "Posted reply");
        Ok(handle)
    }

    async fn send_message(&self, to: &str, subject: &str, body: &str) -> Result<(), PlatformError> {
        let url = self.api_url("/api/compose");
        let envelope: ApiEnvelope<IgnoredAny> = self
            .call(|http| {
                http.post(&url).form(&[
                    ("api_type", "json"),
                    ("to", to),
                    ("subject", subject),
                    ("text", body),
                ])
            })
            .await?;
        envelope.into_data()?;
        Ok(())
    }

    async fn recent_submissions(&self, limit: usize) -> Result<Vec<Submission>, PlatformError> {
        let path = format!("/user/{}/submitted", self.credentials.username);
        let limit = limit.to_string();
        let url = url::Url::parse_with_params(
            &self.api_url(&path),
            &[("sort", "new"), ("limit", limit.as_str())],
        )
        .map_err(|e| PlatformError::Decode(format!("invalid listing URL: {e}")))?;

        let listing: Listing<LinkData> = self.call(|http| http.get(url.clone())).await?;

        Ok(listing
            .data
            .children
            .into_iter()
            .map(|child| Submission {
                handle: PostHandle(child.data.name),
                title: child.data.title,
                url: child.data.url,
                score: child.data.score,
            })
            .collect())
    }

    async fn delete(&self, handle: &PostHandle) -> Result<(), PlatformError> {
        let url = self.api_url("/api/del");
        let _: IgnoredAny = self
            .call(|http| http.post(&url).form(&[("id", handle.as_str())]))
            .await?;
        tracing::info!(post = %handle, "Deleted post");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> Credentials {
        Credentials {
            username: "relaybot".to_string(),
            password: SecretString::from("hunter2".to_string()),
            client_id: "client".to_string(),
            client_secret: SecretString::from("secret".to_string()),
            user_agent: "feedpost-test/0.1".to_string(),
        }
    }

    async fn mount_token(server: &MockServer, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/api/v1/access_token"))
            .and(body_string_contains("grant_type=password"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok-1",
                "token_type": "bearer",
                "expires_in": 3600,
                "scope": "*"
            })))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    fn client(server: &MockServer) -> RedditClient {
        RedditClient::new(reqwest::Client::new(), credentials())
            .with_base_urls(&server.uri(), &server.uri())
    }

    #[tokio::test]
    async fn test_submit_returns_fullname_and_caches_token() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/api/submit"))
            .and(header("authorization", "bearer tok-1"))
            .and(body_string_contains("kind=self"))
            .and(body_string_contains("sr=eve"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "json": {"errors": [], "data": {"url": "https://reddit.com/r/eve/x", "id": "x", "name": "t3_x"}}
            })))
            .expect(2)
            .mount(&server)
            .await;

        let client = client(&server);
        let first = client.submit("eve", "Title", "Body").await.unwrap();
        let second = client.submit("eve", "Title", "Body").await.unwrap();

        assert_eq!(first, PostHandle("t3_x".to_string()));
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn test_reply_returns_comment_fullname() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/api/comment"))
            .and(body_string_contains("thing_id=t3_x"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "json": {"errors": [], "data": {"things": [{"kind": "t1", "data": {"name": "t1_c1", "id": "c1"}}]}}
            })))
            .mount(&server)
            .await;

        let reply = client(&server)
            .reply(&PostHandle("t3_x".to_string()), "more")
            .await
            .unwrap();
        assert_eq!(reply.as_str(), "t1_c1");
    }

    #[tokio::test]
    async fn test_api_ratelimit_error_is_transient() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/api/submit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "json": {"errors": [["RATELIMIT", "you are doing that too much. try again in 9 minutes.", "ratelimit"]]}
            })))
            .mount(&server)
            .await;

        let err = client(&server).submit("eve", "t", "b").await.unwrap_err();
        assert!(matches!(err, PlatformError::Api(ref m) if m.starts_with("RATELIMIT")));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_bad_credentials_are_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/access_token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"error": "invalid_grant"})),
            )
            .mount(&server)
            .await;

        let err = client(&server).submit("eve", "t", "b").await.unwrap_err();
        assert!(matches!(err, PlatformError::Auth(ref m) if m == "invalid_grant"));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/api/comment"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&server)
            .reply(&PostHandle("t3_x".to_string()), "b")
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::HttpStatus(503)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_unauthorized_refreshes_token_once() {
        let server = MockServer::start().await;
        mount_token(&server, 2).await;
        Mock::given(method("POST"))
            .and(path("/api/del"))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/del"))
            .and(body_string_contains("id=t3_gone"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        client(&server)
            .delete(&PostHandle("t3_gone".to_string()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_recent_submissions_parses_listing() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("GET"))
            .and(path("/user/relaybot/submitted"))
            .and(query_param("sort", "new"))
            .and(query_param("limit", "25"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "kind": "Listing",
                "data": {"children": [
                    {"kind": "t3", "data": {"name": "t3_a", "title": "A", "url": "https://x/a", "score": 12}},
                    {"kind": "t3", "data": {"name": "t3_b", "title": "B", "url": "https://x/b", "score": -7}}
                ]}
            })))
            .mount(&server)
            .await;

        let submissions = client(&server).recent_submissions(25).await.unwrap();
        assert_eq!(submissions.len(), 2);
        assert_eq!(submissions[1].handle.as_str(), "t3_b");
        assert_eq!(submissions[1].score, -7);
    }

    #[tokio::test]
    async fn test_send_message() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/api/compose"))
            .and(body_string_contains("to=operator"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"json": {"errors": []}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .send_message("operator", "subject", "body")
            .await
            .unwrap();
    }

    #[test]
    fn test_debug_hides_secrets() {
        let client = RedditClient::new(reqwest::Client::new(), credentials());
        let debug = format!("{:?}", client);
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("secret"));
    }
}
