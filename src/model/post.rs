use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::{Account, bool_field, parse_id, parse_time, str_field, u64_field};
use crate::client::Includes;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplySettings {
    #[default]
    #[serde(rename = "everyone")]
    Everyone,
    #[serde(rename = "mentionedUsers")]
    Mentioned,
    #[serde(rename = "following")]
    Following,
}

impl ReplySettings {
    fn from_api(value: Option<&Value>) -> Self {
        match value.and_then(Value::as_str) {
            Some("mentionedUsers") => Self::Mentioned,
            Some("following") => Self::Following,
            _ => Self::Everyone,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    Quoted,
    RepliedTo,
    Retweeted,
}

impl ReferenceType {
    fn from_api(value: &str) -> Option<Self> {
        match value {
            "quoted" => Some(Self::Quoted),
            "replied_to" => Some(Self::RepliedTo),
            "retweeted" => Some(Self::Retweeted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferencedPost {
    #[serde(rename = "type")]
    pub kind: ReferenceType,
    pub id: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMetrics {
    pub retweet_count: u64,
    pub reply_count: u64,
    pub like_count: u64,
    pub quote_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationEntity {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextAnnotation {
    pub domain: AnnotationEntity,
    pub entity: AnnotationEntity,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub id: String,
    pub full_name: String,
    pub country_code: String,
    pub geo: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub media_key: String,
    pub kind: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOption {
    pub position: u64,
    pub label: String,
    pub votes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    pub id: String,
    pub options: Vec<PollOption>,
}

/// A post, with the side-channel payload of its response already attached.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Post {
    pub id: u64,
    pub author: Account,
    pub created_at: DateTime<Utc>,
    pub text: String,
    pub sensitive: bool,
    pub reply_settings: ReplySettings,
    pub metrics: PostMetrics,
    pub lang: String,
    pub place: Option<Place>,
    pub media: Vec<Media>,
    pub polls: Vec<Poll>,
    pub referenced_posts: Vec<ReferencedPost>,
    pub related_posts: BTreeMap<ReferenceType, Vec<Post>>,
    pub context_annotations: Vec<ContextAnnotation>,
}

impl Post {
    /// Build a post from an API tweet object, resolving the author, media,
    /// poll, place and referenced posts from the response `includes`.
    pub fn from_api(tweet: &Value, includes: &Includes) -> Self {
        let mut post = Self::without_relations(tweet, includes);

        for reference in &post.referenced_posts {
            let related = includes
                .tweets
                .iter()
                .find(|t| parse_id(t.get("id")) == reference.id)
                .map(|t| Self::without_relations(t, includes));

            if let Some(related) = related {
                post.related_posts
                    .entry(reference.kind)
                    .or_default()
                    .push(related);
            }
        }

        post
    }

    fn without_relations(tweet: &Value, includes: &Includes) -> Self {
        let author_id = parse_id(tweet.get("author_id"));
        let author = includes
            .users
            .iter()
            .find(|u| parse_id(u.get("id")) == author_id)
            .map(|u| Account::from_api(u, Some(includes)))
            .unwrap_or_else(|| Account {
                id: author_id,
                ..Default::default()
            });

        let metrics = tweet.get("public_metrics").cloned().unwrap_or(Value::Null);
        let attachments = tweet.get("attachments").cloned().unwrap_or(Value::Null);

        let media = string_list(attachments.get("media_keys"))
            .into_iter()
            .filter_map(|key| {
                includes
                    .media
                    .iter()
                    .find(|m| m.get("media_key").and_then(Value::as_str) == Some(key.as_str()))
            })
            .map(|m| Media {
                media_key: str_field(m, "media_key"),
                kind: str_field(m, "type"),
                url: m.get("url").and_then(Value::as_str).map(str::to_string),
            })
            .collect();

        let polls = string_list(attachments.get("poll_ids"))
            .into_iter()
            .filter_map(|id| {
                includes
                    .polls
                    .iter()
                    .find(|p| p.get("id").and_then(Value::as_str) == Some(id.as_str()))
            })
            .map(|p| Poll {
                id: str_field(p, "id"),
                options: p
                    .get("options")
                    .and_then(Value::as_array)
                    .map(|options| {
                        options
                            .iter()
                            .map(|o| PollOption {
                                position: u64_field(o, "position"),
                                label: str_field(o, "label"),
                                votes: u64_field(o, "votes"),
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
            })
            .collect();

        let place = tweet
            .get("geo")
            .and_then(|g| g.get("place_id"))
            .and_then(Value::as_str)
            .and_then(|place_id| {
                includes
                    .places
                    .iter()
                    .find(|p| p.get("id").and_then(Value::as_str) == Some(place_id))
            })
            .map(|p| Place {
                id: str_field(p, "id"),
                full_name: str_field(p, "full_name"),
                country_code: str_field(p, "country_code"),
                geo: p.get("geo").cloned(),
            });

        let referenced_posts = tweet
            .get("referenced_tweets")
            .and_then(Value::as_array)
            .map(|refs| {
                refs.iter()
                    .filter_map(|r| {
                        let kind = ReferenceType::from_api(r.get("type")?.as_str()?)?;
                        Some(ReferencedPost {
                            kind,
                            id: parse_id(r.get("id")),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let context_annotations = tweet
            .get("context_annotations")
            .and_then(|c| serde_json::from_value(c.clone()).ok())
            .unwrap_or_default();

        Self {
            id: parse_id(tweet.get("id")),
            author,
            created_at: parse_time(tweet.get("created_at")),
            text: str_field(tweet, "text"),
            sensitive: bool_field(tweet, "possibly_sensitive"),
            reply_settings: ReplySettings::from_api(tweet.get("reply_settings")),
            metrics: PostMetrics {
                retweet_count: u64_field(&metrics, "retweet_count"),
                reply_count: u64_field(&metrics, "reply_count"),
                like_count: u64_field(&metrics, "like_count"),
                quote_count: u64_field(&metrics, "quote_count"),
            },
            lang: str_field(tweet, "lang"),
            place,
            media,
            polls,
            referenced_posts,
            related_posts: BTreeMap::new(),
            context_annotations,
        }
    }
}

impl PartialEq for Post {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_api_attaches_side_channel() {
        let tweet = json!({
            "id": "20",
            "author_id": "1",
            "text": "hello world",
            "created_at": "2021-06-01T00:00:00.000Z",
            "possibly_sensitive": true,
            "reply_settings": "mentionedUsers",
            "lang": "en",
            "public_metrics": {"like_count": 4, "retweet_count": 2},
            "attachments": {"media_keys": ["3_1"], "poll_ids": ["p1"]},
            "geo": {"place_id": "pl1"},
            "referenced_tweets": [{"type": "quoted", "id": "10"}],
            "context_annotations": [{
                "domain": {"id": "10", "name": "Person"},
                "entity": {"id": "99", "name": "Someone"}
            }]
        });
        let includes = Includes {
            users: vec![json!({"id": "1", "username": "alice"})],
            tweets: vec![json!({"id": "10", "author_id": "2", "text": "quoted text"})],
            media: vec![json!({"media_key": "3_1", "type": "photo", "url": "https://img"})],
            places: vec![json!({"id": "pl1", "full_name": "Somewhere", "country_code": "NZ"})],
            polls: vec![json!({"id": "p1", "options": [{"position": 1, "label": "yes", "votes": 3}]})],
        };

        let post = Post::from_api(&tweet, &includes);
        assert_eq!(post.id, 20);
        assert_eq!(post.author.handle, "alice");
        assert!(post.sensitive);
        assert_eq!(post.reply_settings, ReplySettings::Mentioned);
        assert_eq!(post.metrics.like_count, 4);
        assert_eq!(post.media[0].kind, "photo");
        assert_eq!(post.polls[0].options[0].votes, 3);
        assert_eq!(post.place.as_ref().map(|p| p.country_code.as_str()), Some("NZ"));
        assert_eq!(post.context_annotations[0].entity.name, "Someone");

        let quoted = &post.related_posts[&ReferenceType::Quoted];
        assert_eq!(quoted.len(), 1);
        assert_eq!(quoted[0].text, "quoted text");
        assert_eq!(quoted[0].author.id, 2);
    }

    #[test]
    fn test_from_api_tolerates_bare_object() {
        let post = Post::from_api(&json!({"id": "5"}), &Includes::default());
        assert_eq!(post.id, 5);
        assert_eq!(post.reply_settings, ReplySettings::Everyone);
        assert!(post.related_posts.is_empty());
        assert_eq!(post.author.id, 0);
    }
}
