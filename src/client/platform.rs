//! Wire-level interface to the social platform.
//!
//! [`PlatformApi`] is the seam between the engine and whatever actually
//! speaks the platform protocol. Implementations own transport concerns,
//! including sleeping through rate-limit windows; callers only ever see one
//! response per call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ClientError;

/// Side-channel objects a response expanded alongside its `data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Includes {
    pub users: Vec<Value>,
    pub tweets: Vec<Value>,
    pub media: Vec<Value>,
    pub places: Vec<Value>,
    pub polls: Vec<Value>,
}

/// One entry of a response's error list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiError {
    pub title: String,
    pub detail: String,
    pub value: Option<Value>,
    pub resource_type: Option<String>,
    pub parameter: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseMeta {
    pub next_token: Option<String>,
    pub result_count: Option<u64>,
}

/// A decoded platform response.
///
/// A response with both `data` and a non-empty `errors` list is partially
/// successful; the data is still usable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiResponse {
    pub data: Value,
    pub includes: Includes,
    pub errors: Vec<ApiError>,
    pub meta: ResponseMeta,
}

impl ApiResponse {
    /// `data` as a list, whether the endpoint returned an array or one object.
    pub fn items(&self) -> Vec<&Value> {
        match &self.data {
            Value::Array(items) => items.iter().collect(),
            Value::Null => Vec::new(),
            single => vec![single],
        }
    }
}

/// Paginated account lists the platform exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserList {
    Followers(u64),
    Following(u64),
    Blocking(u64),
    LikingUsers(u64),
    RetweetedBy(u64),
}

impl UserList {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Followers(_) => "followers",
            Self::Following(_) => "following",
            Self::Blocking(_) => "blocking",
            Self::LikingUsers(_) => "liking_users",
            Self::RetweetedBy(_) => "retweeted_by",
        }
    }

    /// Path relative to the API base.
    pub fn path(&self) -> String {
        match self {
            Self::Followers(id) => format!("/users/{id}/followers"),
            Self::Following(id) => format!("/users/{id}/following"),
            Self::Blocking(id) => format!("/users/{id}/blocking"),
            Self::LikingUsers(id) => format!("/tweets/{id}/liking_users"),
            Self::RetweetedBy(id) => format!("/tweets/{id}/retweeted_by"),
        }
    }

    pub fn max_results(&self) -> u32 {
        match self {
            Self::LikingUsers(_) | Self::RetweetedBy(_) => 100,
            _ => 1000,
        }
    }
}

/// Platform operations the client is built on.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// The authenticated account.
    async fn me(&self) -> Result<ApiResponse, ClientError>;

    /// Look up at most 100 accounts by handle.
    async fn users_by_handles(&self, handles: &[String]) -> Result<ApiResponse, ClientError>;

    /// Look up at most 100 accounts by id.
    async fn users_by_ids(&self, ids: &[u64]) -> Result<ApiResponse, ClientError>;

    /// Look up at most 100 posts by id, with authors, media, polls, places
    /// and referenced posts expanded into `includes`.
    async fn posts_by_ids(&self, ids: &[u64]) -> Result<ApiResponse, ClientError>;

    /// One page of an account list. `next_token` is the cursor from the
    /// previous page's `meta`.
    async fn list_page(
        &self,
        list: UserList,
        next_token: Option<&str>,
    ) -> Result<ApiResponse, ClientError>;

    /// Block `target_id` on behalf of `source_id`. Returns whether the
    /// platform reports the target as blocked afterwards.
    async fn block(&self, source_id: u64, target_id: u64) -> Result<bool, ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_decodes_partial_success() {
        let response: ApiResponse = serde_json::from_value(json!({
            "data": [{"id": "1", "username": "alice"}],
            "errors": [{
                "value": "nobody",
                "detail": "Could not find user with usernames: [nobody].",
                "title": "Not Found Error",
                "resource_type": "user",
                "parameter": "usernames",
                "type": "https://api.twitter.com/2/problems/resource-not-found"
            }]
        }))
        .unwrap();

        assert_eq!(response.items().len(), 1);
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].value, Some(json!("nobody")));
        assert!(response.meta.next_token.is_none());
    }

    #[test]
    fn test_items_single_object_and_missing_data() {
        let single: ApiResponse = serde_json::from_value(json!({"data": {"id": "1"}})).unwrap();
        assert_eq!(single.items().len(), 1);
        assert!(ApiResponse::default().items().is_empty());
    }

    #[test]
    fn test_user_list_paths() {
        assert_eq!(UserList::Followers(5).path(), "/users/5/followers");
        assert_eq!(UserList::LikingUsers(9).path(), "/tweets/9/liking_users");
        assert_eq!(UserList::RetweetedBy(9).max_results(), 100);
    }
}
