//! Explicit and engagement-based account sources.

use futures::{StreamExt, TryStreamExt};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::{AccountBatches, ExecutionContext, RuleRef, SourceRule};
use crate::client::UserList;
use crate::parser::{Parser, RuleNode};

/// `handles: [alice, bob]` or `handles: {names: [alice, bob]}`.
#[derive(Debug)]
pub struct HandlesSource {
    rule: RuleRef,
    handles: Vec<String>,
}

impl SourceRule for HandlesSource {
    fn rule_ref(&self) -> &RuleRef {
        &self.rule
    }

    fn batches<'a>(&'a self, ctx: &'a ExecutionContext) -> AccountBatches<'a> {
        ctx.client
            .users_by_handles_batches(&self.handles)
            .inspect_ok(|accounts| {
                debug!(
                    rule.path = %self.rule.path,
                    found = accounts.len(),
                    "Resolved handle batch"
                );
            })
            .boxed()
    }
}

/// `ids: [12, 34]` or `ids: {ids: [12, 34]}`.
#[derive(Debug)]
pub struct IdsSource {
    rule: RuleRef,
    ids: Vec<u64>,
}

impl SourceRule for IdsSource {
    fn rule_ref(&self) -> &RuleRef {
        &self.rule
    }

    fn batches<'a>(&'a self, ctx: &'a ExecutionContext) -> AccountBatches<'a> {
        ctx.client
            .users_by_ids_batches(&self.ids)
            .inspect_ok(|accounts| {
                debug!(
                    rule.path = %self.rule.path,
                    found = accounts.len(),
                    "Resolved id batch"
                );
            })
            .boxed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Engagement {
    Liked,
    Retweeted,
}

/// Accounts that liked or reposted one post.
#[derive(Debug)]
pub struct EngagementSource {
    rule: RuleRef,
    engagement: Engagement,
    post_id: u64,
}

impl SourceRule for EngagementSource {
    fn rule_ref(&self) -> &RuleRef {
        &self.rule
    }

    fn batches<'a>(&'a self, ctx: &'a ExecutionContext) -> AccountBatches<'a> {
        let list = match self.engagement {
            Engagement::Liked => UserList::LikingUsers(self.post_id),
            Engagement::Retweeted => UserList::RetweetedBy(self.post_id),
        };
        ctx.client.list_pages(list)
    }
}

pub(crate) fn parse_handles(
    parser: &mut Parser<'_>,
    node: &RuleNode<'_>,
) -> Option<Arc<dyn SourceRule>> {
    let handles = match node.body {
        Value::Array(_) => parser.string_list(&node.body_path(), node.body)?,
        _ => {
            let mut body = parser.body(node)?;
            let names = body.strings("names");
            let names = body.require("names", names);
            body.finish()?;
            names?
        }
    };
    if handles.is_empty() {
        parser.error(&node.body_path(), "must name at least one handle");
        return None;
    }

    Some(Arc::new(HandlesSource {
        rule: node.rule_ref(),
        handles: handles
            .into_iter()
            .map(|handle| handle.trim_start_matches('@').to_string())
            .collect(),
    }))
}

pub(crate) fn parse_ids(parser: &mut Parser<'_>, node: &RuleNode<'_>) -> Option<Arc<dyn SourceRule>> {
    let ids = match node.body {
        Value::Array(_) => parser.id_list(&node.body_path(), node.body)?,
        _ => {
            let mut body = parser.body(node)?;
            let ids = body.ids("ids");
            let ids = body.require("ids", ids);
            body.finish()?;
            ids?
        }
    };
    if ids.is_empty() {
        parser.error(&node.body_path(), "must list at least one id");
        return None;
    }

    Some(Arc::new(IdsSource {
        rule: node.rule_ref(),
        ids,
    }))
}

pub(crate) fn parse_who_liked(
    parser: &mut Parser<'_>,
    node: &RuleNode<'_>,
) -> Option<Arc<dyn SourceRule>> {
    parse_engagement(parser, node, Engagement::Liked)
}

pub(crate) fn parse_who_retweeted(
    parser: &mut Parser<'_>,
    node: &RuleNode<'_>,
) -> Option<Arc<dyn SourceRule>> {
    parse_engagement(parser, node, Engagement::Retweeted)
}

/// `who_liked: 123` or `who_liked: {post_id: 123}`.
fn parse_engagement(
    parser: &mut Parser<'_>,
    node: &RuleNode<'_>,
    engagement: Engagement,
) -> Option<Arc<dyn SourceRule>> {
    let post_id = match node.body {
        Value::Number(_) | Value::String(_) => {
            let post_id = match node.body {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            }
            .filter(|id| *id != 0);
            if post_id.is_none() {
                parser.error(&node.body_path(), "expected a positive integer post id");
            }
            post_id
        }
        _ => {
            let mut body = parser.body(node)?;
            let post_id = body.id("post_id");
            let post_id = body.require("post_id", post_id);
            body.finish()?;
            post_id
        }
    }?;

    Some(Arc::new(EngagementSource {
        rule: node.rule_ref(),
        engagement,
        post_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Fixture;
    use crate::rules::{RuleRegistry, collect_accounts};
    use crate::test_helpers::{context, user_json};

    fn parse_source(yaml: &str) -> Result<Arc<dyn SourceRule>, Vec<crate::errors::ParseError>> {
        let registry = RuleRegistry::builtin().unwrap();
        let value: Value = serde_yml::from_str(yaml).unwrap();
        let mut parser = Parser::new(&registry);
        let rule = parser.parse_source("from[0]", &value);
        parser.finish(rule)
    }

    #[test]
    fn test_handles_accepts_list_and_mapping() {
        assert!(parse_source("handles: [alice, '@bob']").is_ok());
        assert!(parse_source("handles: {names: [alice]}").is_ok());

        let errors = parse_source("handles: {names: []}").unwrap_err();
        assert_eq!(errors[0].path, "from[0].handles");

        let errors = parse_source("handles: {}").unwrap_err();
        assert!(errors[0].message.contains("missing required field 'names'"));
    }

    #[test]
    fn test_ids_rejects_zero_and_text() {
        let errors = parse_source("ids: [1, 0, abc]").unwrap_err();
        let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["from[0].ids[1]", "from[0].ids[2]"]);
    }

    #[test]
    fn test_engagement_forms() {
        assert!(parse_source("who_liked: 123").is_ok());
        assert!(parse_source("who_retweeted: {post_id: '123'}").is_ok());
        assert!(parse_source("who_liked: {}").is_err());
    }

    #[tokio::test]
    async fn test_handles_source_resolves_known_accounts() {
        let test = context(Fixture {
            users: vec![user_json(2, "alice", 5), user_json(3, "bob", 100)],
            ..Fixture::default()
        });
        let rule = parse_source("handles: ['@Alice', bob, carol]").unwrap();

        let accounts = collect_accounts(rule.as_ref(), &test.ctx).await.unwrap();
        let ids: Vec<u64> = accounts.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(test.sink.of_type("partial_errors").len(), 1);
    }

    #[tokio::test]
    async fn test_who_liked_pages_through_likers() {
        let test = context(Fixture {
            users: vec![user_json(2, "alice", 5), user_json(3, "bob", 100)],
            likes: [("77".to_string(), vec![3, 2])].into_iter().collect(),
            page_size: 1,
            ..Fixture::default()
        });
        let rule = parse_source("who_liked: 77").unwrap();

        let accounts = collect_accounts(rule.as_ref(), &test.ctx).await.unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].handle, "bob");
        assert_eq!(test.platform.call_count("liking_users"), 2);
    }

    #[tokio::test]
    async fn test_handle_batches_are_fetched_on_demand() {
        let test = context(Fixture {
            users: (2..152).map(|id| user_json(id, &format!("user{id}"), 5)).collect(),
            ..Fixture::default()
        });
        let names: Vec<String> = (2..152).map(|id| format!("user{id}")).collect();
        let rule = parse_source(&format!("handles: [{}]", names.join(", "))).unwrap();

        let mut batches = rule.batches(&test.ctx);
        assert_eq!(test.platform.call_count("users_by_handles"), 0);

        let first = batches.next().await.unwrap().unwrap();
        assert_eq!(first.len(), 100);
        assert_eq!(test.platform.call_count("users_by_handles"), 1);

        let second = batches.next().await.unwrap().unwrap();
        assert_eq!(second.len(), 50);
        assert!(batches.next().await.is_none());
        assert_eq!(test.platform.call_count("users_by_handles"), 2);
    }
}
