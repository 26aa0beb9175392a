//! Fixture-backed [`PlatformApi`] for dry runs and tests.
//!
//! The fixture is a JSON document holding raw API objects:
//!
//! ```json
//! {
//!   "me": {"id": "1", "username": "me"},
//!   "users": [{"id": "2", "username": "alice", "public_metrics": {...}}],
//!   "posts": [{"id": "10", "author_id": "2", "text": "hi"}],
//!   "followers": [2],
//!   "following": [],
//!   "blocked": [],
//!   "likes": {"10": [2]},
//!   "retweets": {},
//!   "page_size": 100
//! }
//! ```
//!
//! Lists are kept newest first, the same order the platform pages them in.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use super::platform::{ApiError, ApiResponse, Includes, PlatformApi, ResponseMeta, UserList};
use crate::errors::ClientError;
use crate::model::parse_id;

fn default_page_size() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fixture {
    pub me: Value,
    #[serde(default)]
    pub users: Vec<Value>,
    #[serde(default)]
    pub posts: Vec<Value>,
    #[serde(default)]
    pub media: Vec<Value>,
    #[serde(default)]
    pub places: Vec<Value>,
    #[serde(default)]
    pub polls: Vec<Value>,
    #[serde(default)]
    pub followers: Vec<u64>,
    #[serde(default)]
    pub following: Vec<u64>,
    #[serde(default)]
    pub blocked: Vec<u64>,
    /// Post id to liking account ids.
    #[serde(default)]
    pub likes: HashMap<String, Vec<u64>>,
    /// Post id to reposting account ids.
    #[serde(default)]
    pub retweets: HashMap<String, Vec<u64>>,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for Fixture {
    fn default() -> Self {
        Self {
            me: json!({"id": "1", "username": "me"}),
            users: Vec::new(),
            posts: Vec::new(),
            media: Vec::new(),
            places: Vec::new(),
            polls: Vec::new(),
            followers: Vec::new(),
            following: Vec::new(),
            blocked: Vec::new(),
            likes: HashMap::new(),
            retweets: HashMap::new(),
            page_size: default_page_size(),
        }
    }
}

pub struct InMemoryPlatform {
    fixture: Fixture,
    blocked: Mutex<HashSet<u64>>,
    block_calls: Mutex<Vec<u64>>,
    calls: Mutex<HashMap<String, usize>>,
    latency: Option<Duration>,
}

impl InMemoryPlatform {
    pub fn new(fixture: Fixture) -> Self {
        let blocked = fixture.blocked.iter().copied().collect();
        Self {
            fixture,
            blocked: Mutex::new(blocked),
            block_calls: Mutex::new(Vec::new()),
            calls: Mutex::new(HashMap::new()),
            latency: None,
        }
    }

    pub fn load(path: &Path) -> Result<Self, ClientError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ClientError::failure("load_fixture", format!("{}: {e}", path.display())))?;
        let fixture = serde_json::from_str(&content).map_err(|e| ClientError::Decode {
            operation: "load_fixture".to_string(),
            details: e.to_string(),
        })?;
        Ok(Self::new(fixture))
    }

    /// Delay every call, standing in for network time or a rate-limit sleep.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Targets of every block call, in call order.
    pub fn block_calls(&self) -> Vec<u64> {
        self.block_calls.lock().clone()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.calls.lock().get(operation).copied().unwrap_or(0)
    }

    async fn enter(&self, operation: &str) {
        *self.calls.lock().entry(operation.to_string()).or_default() += 1;
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn user(&self, id: u64) -> Option<&Value> {
        self.fixture
            .users
            .iter()
            .find(|user| parse_id(user.get("id")) == id)
    }

    fn post(&self, id: u64) -> Option<&Value> {
        self.fixture
            .posts
            .iter()
            .find(|post| parse_id(post.get("id")) == id)
    }

    /// Posts referenced by `users`' pinned ids, for `includes.tweets`.
    fn pinned_posts(&self, users: &[Value]) -> Vec<Value> {
        users
            .iter()
            .filter_map(|user| user.get("pinned_tweet_id"))
            .filter_map(|id| self.post(parse_id(Some(id))))
            .cloned()
            .collect()
    }

    fn user_lookup(&self, users: Vec<Value>, errors: Vec<ApiError>) -> ApiResponse {
        ApiResponse {
            includes: Includes {
                tweets: self.pinned_posts(&users),
                ..Includes::default()
            },
            data: Value::Array(users),
            errors,
            meta: ResponseMeta::default(),
        }
    }

    fn list_ids(&self, list: UserList) -> Vec<u64> {
        match list {
            UserList::Followers(_) => self.fixture.followers.clone(),
            UserList::Following(_) => self.fixture.following.clone(),
            UserList::Blocking(_) => {
                // Keep fixture order for the seeded entries, then later blocks.
                let blocked = self.blocked.lock();
                let mut ids: Vec<u64> = self
                    .fixture
                    .blocked
                    .iter()
                    .copied()
                    .filter(|id| blocked.contains(id))
                    .collect();
                let seeded: HashSet<u64> = ids.iter().copied().collect();
                let mut added: Vec<u64> = blocked
                    .iter()
                    .copied()
                    .filter(|id| !seeded.contains(id))
                    .collect();
                added.sort_unstable();
                ids.extend(added);
                ids
            }
            UserList::LikingUsers(post) => self
                .fixture
                .likes
                .get(&post.to_string())
                .cloned()
                .unwrap_or_default(),
            UserList::RetweetedBy(post) => self
                .fixture
                .retweets
                .get(&post.to_string())
                .cloned()
                .unwrap_or_default(),
        }
    }
}

fn not_found(resource_type: &str, parameter: &str, value: Value, detail: String) -> ApiError {
    ApiError {
        title: "Not Found Error".to_string(),
        detail,
        value: Some(value),
        resource_type: Some(resource_type.to_string()),
        parameter: Some(parameter.to_string()),
    }
}

#[async_trait]
impl PlatformApi for InMemoryPlatform {
    async fn me(&self) -> Result<ApiResponse, ClientError> {
        self.enter("me").await;
        Ok(ApiResponse {
            data: self.fixture.me.clone(),
            ..ApiResponse::default()
        })
    }

    async fn users_by_handles(&self, handles: &[String]) -> Result<ApiResponse, ClientError> {
        self.enter("users_by_handles").await;
        let mut users = Vec::new();
        let mut errors = Vec::new();

        for handle in handles {
            let found = self.fixture.users.iter().find(|user| {
                user.get("username")
                    .and_then(Value::as_str)
                    .is_some_and(|name| name.eq_ignore_ascii_case(handle))
            });
            match found {
                Some(user) => users.push(user.clone()),
                None => errors.push(not_found(
                    "user",
                    "usernames",
                    json!(handle),
                    format!("Could not find user with usernames: [{handle}]."),
                )),
            }
        }

        Ok(self.user_lookup(users, errors))
    }

    async fn users_by_ids(&self, ids: &[u64]) -> Result<ApiResponse, ClientError> {
        self.enter("users_by_ids").await;
        let mut users = Vec::new();
        let mut errors = Vec::new();

        for &id in ids {
            match self.user(id) {
                Some(user) => users.push(user.clone()),
                None => errors.push(not_found(
                    "user",
                    "ids",
                    json!(id.to_string()),
                    format!("Could not find user with ids: [{id}]."),
                )),
            }
        }

        Ok(self.user_lookup(users, errors))
    }

    async fn posts_by_ids(&self, ids: &[u64]) -> Result<ApiResponse, ClientError> {
        self.enter("posts_by_ids").await;
        let mut posts = Vec::new();
        let mut errors = Vec::new();

        for &id in ids {
            match self.post(id) {
                Some(post) => posts.push(post.clone()),
                None => errors.push(not_found(
                    "tweet",
                    "ids",
                    json!(id.to_string()),
                    format!("Could not find tweet with ids: [{id}]."),
                )),
            }
        }

        let referenced: Vec<Value> = posts
            .iter()
            .filter_map(|post| post.get("referenced_tweets").and_then(Value::as_array))
            .flatten()
            .filter_map(|reference| self.post(parse_id(reference.get("id"))))
            .cloned()
            .collect();

        let author_ids: HashSet<u64> = posts
            .iter()
            .chain(referenced.iter())
            .map(|post| parse_id(post.get("author_id")))
            .collect();
        let authors = author_ids
            .into_iter()
            .filter_map(|id| self.user(id))
            .cloned()
            .collect();

        Ok(ApiResponse {
            data: Value::Array(posts),
            includes: Includes {
                users: authors,
                tweets: referenced,
                media: self.fixture.media.clone(),
                places: self.fixture.places.clone(),
                polls: self.fixture.polls.clone(),
            },
            errors,
            meta: ResponseMeta::default(),
        })
    }

    async fn list_page(
        &self,
        list: UserList,
        next_token: Option<&str>,
    ) -> Result<ApiResponse, ClientError> {
        self.enter(list.name()).await;
        let ids = self.list_ids(list);
        let page_size = self.fixture.page_size.max(1);
        let page: usize = match next_token {
            Some(token) => token.parse().map_err(|_| ClientError::InvalidArgument {
                operation: list.name().to_string(),
                details: format!("unknown pagination token {token:?}"),
            })?,
            None => 0,
        };

        let start = page * page_size;
        let end = (start + page_size).min(ids.len());
        let users: Vec<Value> = ids
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .map(|&id| self.user(id).cloned().unwrap_or_else(|| json!({"id": id.to_string()})))
            .collect();

        let next_token = (end < ids.len()).then(|| (page + 1).to_string());
        let mut response = self.user_lookup(users, Vec::new());
        response.meta = ResponseMeta {
            result_count: Some((end.saturating_sub(start)) as u64),
            next_token,
        };
        Ok(response)
    }

    async fn block(&self, _source_id: u64, target_id: u64) -> Result<bool, ClientError> {
        self.enter("block").await;
        self.block_calls.lock().push(target_id);
        self.blocked.lock().insert(target_id);
        Ok(true)
    }
}
