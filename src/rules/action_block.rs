//! `block`: block a matched account, guarded by the relationship switches.
//!
//! ```yaml
//! do:
//!   - block
//!   - block: {block_follower: false}
//! ```
//!
//! The guard runs before any remote call:
//!
//! 1. Already blocked (before or during this run): success, no call.
//! 2. The authenticated account itself: refused.
//! 3. Followed by us and `block_following` is off: refused.
//! 4. Following us and `block_follower` is off: refused.
//!
//! Per-rule switches override the run settings.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{ActionRule, ExecutionContext, RuleRef, RuleResult};
use crate::errors::EngineError;
use crate::model::Account;
use crate::parser::{Parser, RuleNode};

#[derive(Debug)]
pub struct BlockAction {
    rule: RuleRef,
    block_following: Option<bool>,
    block_follower: Option<bool>,
}

impl BlockAction {
    fn refuse(&self, account: &Account, reason: &str) -> RuleResult {
        debug!(
            rule.path = %self.rule.path,
            account.id = account.id,
            account.handle = %account.handle,
            reason,
            "Block refused by guard"
        );
        RuleResult::new(&self.rule, false)
    }
}

#[async_trait]
impl ActionRule for BlockAction {
    fn rule_ref(&self) -> &RuleRef {
        &self.rule
    }

    async fn apply(
        &self,
        account: &Account,
        ctx: &ExecutionContext,
    ) -> Result<RuleResult, EngineError> {
        let client = &ctx.client;

        if client.is_blocked(account.id).await? {
            debug!(account.id = account.id, "Account already blocked");
            return Ok(RuleResult::new(&self.rule, true));
        }

        if client.me().await?.id == account.id {
            warn!(account.id = account.id, "Refusing to block the authenticated account");
            return Ok(self.refuse(account, "self"));
        }

        let block_following = self.block_following.unwrap_or(ctx.block_following);
        if !block_following && client.cached_following().await?.contains(account.id) {
            return Ok(self.refuse(account, "following"));
        }

        let block_follower = self.block_follower.unwrap_or(ctx.block_follower);
        if !block_follower && client.cached_followers().await?.contains(account.id) {
            return Ok(self.refuse(account, "follower"));
        }

        let blocked = client.block_user(account.id).await?;
        Ok(RuleResult::new(&self.rule, blocked))
    }
}

pub(crate) fn parse_block(
    parser: &mut Parser<'_>,
    node: &RuleNode<'_>,
) -> Option<Arc<dyn ActionRule>> {
    let mut body = parser.body(node)?;
    let block_following = body.bool("block_following");
    let block_follower = body.bool("block_follower");
    body.finish()?;

    Some(Arc::new(BlockAction {
        rule: node.rule_ref(),
        block_following,
        block_follower,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Fixture;
    use crate::config::Settings;
    use crate::rules::RuleRegistry;
    use crate::test_helpers::{account, context, context_with, user_json};
    use serde_json::Value;

    fn parse(yaml: &str) -> Result<Arc<dyn ActionRule>, Vec<crate::errors::ParseError>> {
        let registry = RuleRegistry::builtin().unwrap();
        let value: Value = serde_yml::from_str(yaml).unwrap();
        let mut parser = Parser::new(&registry);
        let rule = parser.parse_action("do[0]", &value);
        parser.finish(rule)
    }

    fn fixture() -> Fixture {
        Fixture {
            users: vec![
                user_json(2, "blocked", 5),
                user_json(3, "friend", 5),
                user_json(4, "fan", 5),
                user_json(5, "stranger", 5),
            ],
            blocked: vec![2],
            following: vec![3],
            followers: vec![4],
            ..Fixture::default()
        }
    }

    #[tokio::test]
    async fn test_already_blocked_skips_remote_call() {
        let test = context(fixture());
        let rule = parse("block").unwrap();

        let result = rule.apply(&account(2, "blocked", 5), &test.ctx).await.unwrap();
        assert!(result.is_true());
        assert!(test.platform.block_calls().is_empty());
    }

    #[tokio::test]
    async fn test_default_guard() {
        let test = context(fixture());
        let rule = parse("block").unwrap();

        // following is protected by default, followers are not
        let friend = rule.apply(&account(3, "friend", 5), &test.ctx).await.unwrap();
        assert!(!friend.is_true());
        let fan = rule.apply(&account(4, "fan", 5), &test.ctx).await.unwrap();
        assert!(fan.is_true());
        let stranger = rule.apply(&account(5, "stranger", 5), &test.ctx).await.unwrap();
        assert!(stranger.is_true());
        assert_eq!(test.platform.block_calls(), vec![4, 5]);

        // a second attempt hits the in-run record
        rule.apply(&account(5, "stranger", 5), &test.ctx).await.unwrap();
        assert_eq!(test.platform.block_calls(), vec![4, 5]);
    }

    #[tokio::test]
    async fn test_rule_switches_override_settings() {
        let settings = Settings {
            block_following: true,
            ..Settings::default()
        };
        let test = context_with(fixture(), settings);
        let rule = parse("block: {block_following: false, block_follower: false}").unwrap();

        assert!(!rule.apply(&account(3, "friend", 5), &test.ctx).await.unwrap().is_true());
        assert!(!rule.apply(&account(4, "fan", 5), &test.ctx).await.unwrap().is_true());
        assert!(test.platform.block_calls().is_empty());

        let permissive = parse("block: {}").unwrap();
        assert!(permissive.apply(&account(3, "friend", 5), &test.ctx).await.unwrap().is_true());
    }

    #[tokio::test]
    async fn test_never_blocks_self() {
        let test = context(fixture());
        let rule = parse("block").unwrap();
        assert!(!rule.apply(&account(1, "me", 0), &test.ctx).await.unwrap().is_true());
        assert!(test.platform.block_calls().is_empty());
    }

    #[test]
    fn test_parse_block() {
        let errors = parse("block: {block_follower: maybe}").unwrap_err();
        assert_eq!(errors[0].path, "do[0].block.block_follower");
        assert!(parse("block: {force: true}").is_err());
    }
}
