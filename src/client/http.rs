//! HTTP implementation of [`PlatformApi`] against the platform's v2 REST API.

use async_trait::async_trait;
use oauth1_request as oauth;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use super::platform::{ApiResponse, PlatformApi, UserList};
use crate::errors::{ClientError, SecretError};
use crate::secrets::{ACCESS_TOKEN, ACCESS_TOKEN_SECRET, API_KEY, API_SECRET};

const USER_FIELDS: &str =
    "created_at,description,pinned_tweet_id,protected,public_metrics,url,verified,withheld";
const TWEET_FIELDS: &str = "attachments,author_id,context_annotations,created_at,geo,lang,\
possibly_sensitive,public_metrics,referenced_tweets,reply_settings";
const POST_EXPANSIONS: &str =
    "author_id,attachments.media_keys,attachments.poll_ids,geo.place_id,referenced_tweets.id";

/// Wait used when a 429 carries no reset header.
const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(15 * 60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// What came back for one HTTP request.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

/// Executes built requests. The default goes through reqwest; tests swap in
/// scripted replies.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: reqwest::Request) -> Result<HttpReply, reqwest::Error>;
}

pub struct ReqwestTransport {
    http_client: Arc<reqwest::Client>,
}

impl ReqwestTransport {
    pub fn new(http_client: Arc<reqwest::Client>) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: reqwest::Request) -> Result<HttpReply, reqwest::Error> {
        let response = self.http_client.execute(request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;
        Ok(HttpReply {
            status,
            headers,
            body,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Get,
    Post,
}

/// Platform API over HTTP, every request signed with OAuth 1.0a user
/// credentials.
pub struct HttpPlatformApi {
    http_client: Arc<reqwest::Client>,
    transport: Arc<dyn HttpTransport>,
    api_base: String,
    token: oauth::Token<String, String>,
}

impl HttpPlatformApi {
    /// Needs all four of `api_key`, `api_secret`, `access_token` and
    /// `access_token_secret`.
    pub fn new(
        http_client: Arc<reqwest::Client>,
        api_base: &str,
        secrets: &HashMap<String, String>,
    ) -> Result<Self, SecretError> {
        let token = oauth::Token::from_parts(
            required_secret(secrets, API_KEY)?,
            required_secret(secrets, API_SECRET)?,
            required_secret(secrets, ACCESS_TOKEN)?,
            required_secret(secrets, ACCESS_TOKEN_SECRET)?,
        );

        Ok(Self {
            transport: Arc::new(ReqwestTransport::new(http_client.clone())),
            http_client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = transport;
        self
    }

    /// OAuth `Authorization` header for one attempt. Query parameters take
    /// part in the signature; a JSON body does not.
    fn authorization(&self, method: Method, url: &str, query: &[(&str, String)]) -> String {
        let mut params: Vec<(&str, &str)> = query
            .iter()
            .map(|(key, value)| (*key, value.as_str()))
            .collect();
        params.sort_unstable();
        let params = oauth::ParameterList::new(params);
        match method {
            Method::Get => oauth::get(url, &params, &self.token, oauth::HMAC_SHA1),
            Method::Post => oauth::post(url, &params, &self.token, oauth::HMAC_SHA1),
        }
    }

    async fn get(
        &self,
        operation: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<ApiResponse, ClientError> {
        let url = format!("{}{}", self.api_base, path);
        self.send(operation, || {
            self.http_client
                .get(&url)
                .query(query)
                .header(AUTHORIZATION, self.authorization(Method::Get, &url, query))
                .build()
        })
        .await
    }

    /// Send a request, sleeping through rate-limit windows until the platform
    /// accepts it. `build` is called once per attempt so every attempt gets a
    /// fresh nonce and timestamp.
    async fn send<F>(&self, operation: &str, build: F) -> Result<ApiResponse, ClientError>
    where
        F: Fn() -> Result<reqwest::Request, reqwest::Error>,
    {
        loop {
            let request = build().map_err(|e| ClientError::failure(operation, e))?;
            let reply = match timeout(REQUEST_TIMEOUT, self.transport.execute(request)).await {
                Ok(Ok(reply)) => reply,
                Ok(Err(e)) => return Err(ClientError::failure(operation, e)),
                Err(_) => {
                    return Err(ClientError::failure(
                        operation,
                        format!("request timed out after {}s", REQUEST_TIMEOUT.as_secs()),
                    ));
                }
            };

            if reply.status == StatusCode::TOO_MANY_REQUESTS {
                let wait = rate_limit_wait(&reply.headers, chrono::Utc::now().timestamp());
                warn!(
                    operation,
                    wait_secs = wait.as_secs(),
                    "Rate limit reached, sleeping until the window resets"
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            if !reply.status.is_success() {
                return Err(ClientError::failure(
                    operation,
                    format!("HTTP {}: {}", reply.status, reply.body),
                ));
            }

            debug!(operation, status = reply.status.as_u16(), "Platform call succeeded");
            return serde_json::from_str::<ApiResponse>(&reply.body).map_err(|e| {
                ClientError::Decode {
                    operation: operation.to_string(),
                    details: e.to_string(),
                }
            });
        }
    }
}

fn required_secret(secrets: &HashMap<String, String>, name: &str) -> Result<String, SecretError> {
    secrets
        .get(name)
        .filter(|value| !value.is_empty())
        .cloned()
        .ok_or_else(|| SecretError::Missing {
            name: name.to_string(),
        })
}

/// How long to sleep after a 429. The reset header is an epoch second; one
/// extra second covers clock skew.
fn rate_limit_wait(headers: &HeaderMap, now_epoch: i64) -> Duration {
    headers
        .get("x-rate-limit-reset")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<i64>().ok())
        .map(|reset| Duration::from_secs((reset - now_epoch).max(0) as u64 + 1))
        .unwrap_or(DEFAULT_RATE_LIMIT_WAIT)
}

fn join_ids(ids: &[u64]) -> String {
    ids.iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn user_query() -> Vec<(&'static str, String)> {
    vec![
        ("user.fields", USER_FIELDS.to_string()),
        ("expansions", "pinned_tweet_id".to_string()),
        ("tweet.fields", "text".to_string()),
    ]
}

#[async_trait]
impl PlatformApi for HttpPlatformApi {
    #[instrument(skip(self))]
    async fn me(&self) -> Result<ApiResponse, ClientError> {
        self.get("me", "/users/me", &user_query()).await
    }

    #[instrument(skip(self, handles), fields(count = handles.len()))]
    async fn users_by_handles(&self, handles: &[String]) -> Result<ApiResponse, ClientError> {
        let mut query = user_query();
        query.push(("usernames", handles.join(",")));
        self.get("users_by_handles", "/users/by", &query).await
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn users_by_ids(&self, ids: &[u64]) -> Result<ApiResponse, ClientError> {
        let mut query = user_query();
        query.push(("ids", join_ids(ids)));
        self.get("users_by_ids", "/users", &query).await
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn posts_by_ids(&self, ids: &[u64]) -> Result<ApiResponse, ClientError> {
        let query = vec![
            ("ids", join_ids(ids)),
            ("tweet.fields", TWEET_FIELDS.to_string()),
            ("expansions", POST_EXPANSIONS.to_string()),
            ("user.fields", USER_FIELDS.to_string()),
            ("media.fields", "type,url".to_string()),
            ("place.fields", "country_code,full_name,geo".to_string()),
            ("poll.fields", "options".to_string()),
        ];
        self.get("posts_by_ids", "/tweets", &query).await
    }

    #[instrument(skip(self), fields(list = list.name()))]
    async fn list_page(
        &self,
        list: UserList,
        next_token: Option<&str>,
    ) -> Result<ApiResponse, ClientError> {
        let mut query = user_query();
        query.push(("max_results", list.max_results().to_string()));
        if let Some(token) = next_token {
            query.push(("pagination_token", token.to_string()));
        }
        self.get(list.name(), &list.path(), &query).await
    }

    #[instrument(skip(self))]
    async fn block(&self, source_id: u64, target_id: u64) -> Result<bool, ClientError> {
        let url = format!("{}/users/{}/blocking", self.api_base, source_id);
        let body = json!({ "target_user_id": target_id.to_string() });
        let response = self
            .send("block", || {
                self.http_client
                    .post(&url)
                    .header(AUTHORIZATION, self.authorization(Method::Post, &url, &[]))
                    .json(&body)
                    .build()
            })
            .await?;

        Ok(response.data["blocking"].as_bool().unwrap_or(false))
    }
}
