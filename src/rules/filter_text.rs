//! Regular-expression filters over an account's own texts.

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::{Cost, ExecutionContext, FilterRule, RuleRef, RuleResult};
use crate::errors::EngineError;
use crate::model::Account;
use crate::parser::{Parser, RuleNode};

/// `user_texts_match: REGEX` matches the handle, display name, description
/// and the pinned post text when the lookup already carried it.
#[derive(Debug)]
pub struct UserTextsFilter {
    rule: RuleRef,
    regex: Regex,
}

#[async_trait]
impl FilterRule for UserTextsFilter {
    fn rule_ref(&self) -> &RuleRef {
        &self.rule
    }

    async fn judge(
        &self,
        account: &Arc<Account>,
        _ctx: &Arc<ExecutionContext>,
    ) -> Result<RuleResult, EngineError> {
        let matched = [
            Some(account.handle.as_str()),
            Some(account.name.as_str()),
            Some(account.description.as_str()),
            account.pinned_post_text.as_deref(),
        ]
        .into_iter()
        .flatten()
        .any(|text| self.regex.is_match(text));
        Ok(RuleResult::new(&self.rule, matched))
    }
}

/// `pinned_post_match: REGEX` fetches the pinned post when its text is not
/// known yet. Accounts without a pinned post never match.
#[derive(Debug)]
pub struct PinnedPostFilter {
    rule: RuleRef,
    regex: Regex,
}

#[async_trait]
impl FilterRule for PinnedPostFilter {
    fn rule_ref(&self) -> &RuleRef {
        &self.rule
    }

    fn cost(&self) -> Cost {
        Cost::Slow
    }

    async fn judge(
        &self,
        account: &Arc<Account>,
        ctx: &Arc<ExecutionContext>,
    ) -> Result<RuleResult, EngineError> {
        let text = match (&account.pinned_post_text, account.pinned_post_id) {
            (Some(text), _) => Some(text.clone()),
            (None, Some(post_id)) => {
                let posts = ctx.client.get_posts_by_ids(&[post_id]).await?;
                posts.into_iter().find(|post| post.id == post_id).map(|post| post.text)
            }
            (None, None) => None,
        };

        let matched = text.as_deref().is_some_and(|text| self.regex.is_match(text));
        debug!(
            rule.path = %self.rule.path,
            account.id = account.id,
            has_pinned = text.is_some(),
            matched,
            "Pinned post checked"
        );
        Ok(RuleResult::new(&self.rule, matched))
    }
}

pub(crate) fn parse_user_texts_match(
    parser: &mut Parser<'_>,
    node: &RuleNode<'_>,
) -> Option<Arc<dyn FilterRule>> {
    let regex = parse_regex(parser, node)?;
    Some(Arc::new(UserTextsFilter {
        rule: node.rule_ref(),
        regex,
    }))
}

pub(crate) fn parse_pinned_post_match(
    parser: &mut Parser<'_>,
    node: &RuleNode<'_>,
) -> Option<Arc<dyn FilterRule>> {
    let regex = parse_regex(parser, node)?;
    Some(Arc::new(PinnedPostFilter {
        rule: node.rule_ref(),
        regex,
    }))
}

/// `KEYWORD: REGEX` or `KEYWORD: {regex: REGEX}`.
fn parse_regex(parser: &mut Parser<'_>, node: &RuleNode<'_>) -> Option<Regex> {
    if let Value::String(pattern) = node.body {
        return match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(e) => {
                parser.error(&node.body_path(), format!("invalid regular expression: {e}"));
                None
            }
        };
    }

    let mut body = parser.body(node)?;
    let regex = body.regex("regex");
    let regex = body.require("regex", regex);
    body.finish()?;
    regex
}
