use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::hash::{Hash, Hasher};

use super::{bool_field, parse_id, parse_optional_id, parse_time, str_field, u64_field};
use crate::client::Includes;

/// Withholding metadata attached to an account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withheld {
    #[serde(default)]
    pub copyright: bool,
    #[serde(default)]
    pub country_codes: Vec<String>,
}

/// One account on the platform.
///
/// Two accounts are equal when their ids are equal; every other field is a
/// snapshot that may differ between lookups. An account with id 0 is the
/// "empty" account produced from a malformed API object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Account {
    pub id: u64,
    pub handle: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub protected: bool,
    pub verified: bool,
    pub description: String,
    pub pinned_post_id: Option<u64>,
    pub pinned_post_text: Option<String>,
    pub followers_count: u64,
    pub following_count: u64,
    pub post_count: u64,
    pub url: Option<String>,
    pub withheld: Option<Withheld>,
}

impl Account {
    /// Build an account from an API user object.
    ///
    /// `includes` supplies the pinned post text when the response expanded it.
    pub fn from_api(user: &Value, includes: Option<&Includes>) -> Self {
        let metrics = user.get("public_metrics").cloned().unwrap_or(Value::Null);
        let pinned_post_id = parse_optional_id(user.get("pinned_tweet_id"));

        let pinned_post_text = pinned_post_id.and_then(|pinned| {
            includes?
                .tweets
                .iter()
                .find(|tweet| parse_id(tweet.get("id")) == pinned)
                .and_then(|tweet| tweet.get("text"))
                .and_then(Value::as_str)
                .map(str::to_string)
        });

        let url = user
            .get("url")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let withheld = user
            .get("withheld")
            .and_then(|w| serde_json::from_value(w.clone()).ok());

        Self {
            id: parse_id(user.get("id")),
            handle: str_field(user, "username"),
            name: str_field(user, "name"),
            created_at: parse_time(user.get("created_at")),
            protected: bool_field(user, "protected"),
            verified: bool_field(user, "verified"),
            description: str_field(user, "description"),
            pinned_post_id,
            pinned_post_text,
            followers_count: u64_field(&metrics, "followers_count"),
            following_count: u64_field(&metrics, "following_count"),
            post_count: u64_field(&metrics, "tweet_count"),
            url,
            withheld,
        }
    }

    /// Accounts with a zero id carry no identity and are never acted upon.
    pub fn is_valid(&self) -> bool {
        self.id != 0
    }

    /// Handles compare case-insensitively on the platform.
    pub fn has_handle(&self, handle: &str) -> bool {
        self.handle.eq_ignore_ascii_case(handle.trim_start_matches('@'))
    }
}

impl PartialEq for Account {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Account {}

impl Hash for Account {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_api_full_object() {
        let user = json!({
            "id": "2244994945",
            "username": "PlatformDev",
            "name": "Platform Dev",
            "created_at": "2013-12-14T04:35:55.000Z",
            "protected": false,
            "verified": true,
            "description": "The voice of the developer platform",
            "pinned_tweet_id": "1430984356139470849",
            "public_metrics": {
                "followers_count": 513958,
                "following_count": 2039,
                "tweet_count": 3635
            },
            "url": "https://t.co/3ZX3TNiZCY",
            "withheld": {"copyright": false, "country_codes": ["DE"]}
        });
        let includes = Includes {
            tweets: vec![json!({"id": "1430984356139470849", "text": "pinned words"})],
            ..Default::default()
        };

        let account = Account::from_api(&user, Some(&includes));
        assert_eq!(account.id, 2244994945);
        assert_eq!(account.handle, "PlatformDev");
        assert!(account.verified);
        assert_eq!(account.followers_count, 513958);
        assert_eq!(account.post_count, 3635);
        assert_eq!(account.pinned_post_id, Some(1430984356139470849));
        assert_eq!(account.pinned_post_text.as_deref(), Some("pinned words"));
        assert_eq!(
            account.withheld.map(|w| w.country_codes),
            Some(vec!["DE".to_string()])
        );
    }

    #[test]
    fn test_from_api_missing_fields_are_zero() {
        let account = Account::from_api(&json!({"id": "7"}), None);
        assert_eq!(account.id, 7);
        assert_eq!(account.handle, "");
        assert_eq!(account.followers_count, 0);
        assert_eq!(account.created_at, DateTime::<Utc>::default());
        assert!(account.pinned_post_id.is_none());
        assert!(account.url.is_none());
        assert!(account.is_valid());

        assert!(!Account::from_api(&json!({}), None).is_valid());
    }

    #[test]
    fn test_equality_by_id_and_case_insensitive_handle() {
        let a = Account {
            id: 1,
            handle: "Alice".into(),
            followers_count: 3,
            ..Default::default()
        };
        let b = Account {
            id: 1,
            handle: "renamed".into(),
            ..Default::default()
        };
        assert_eq!(a, b);
        assert!(a.has_handle("alice"));
        assert!(a.has_handle("@ALICE"));
    }
}
