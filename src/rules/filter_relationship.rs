//! Relationship to the authenticated account: `is_my_follower`,
//! `is_my_following`.
//!
//! Both consult the client's cached lists, so the first evaluation in a run
//! pages through the whole list and later ones are free.

use async_trait::async_trait;
use std::sync::Arc;

use super::filter_flags::expected_bool;
use super::{Cost, ExecutionContext, FilterRule, RuleRef, RuleResult};
use crate::errors::EngineError;
use crate::model::Account;
use crate::parser::{Parser, RuleNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relationship {
    Follower,
    Following,
}

#[derive(Debug)]
pub struct RelationshipFilter {
    rule: RuleRef,
    relationship: Relationship,
    expected: bool,
}

#[async_trait]
impl FilterRule for RelationshipFilter {
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
        let list = match self.relationship {
            Relationship::Follower => ctx.client.cached_followers().await?,
            Relationship::Following => ctx.client.cached_following().await?,
        };
        Ok(RuleResult::new(
            &self.rule,
            list.contains(account.id) == self.expected,
        ))
    }
}

pub(crate) fn parse_is_my_follower(
    parser: &mut Parser<'_>,
    node: &RuleNode<'_>,
) -> Option<Arc<dyn FilterRule>> {
    parse_relationship(parser, node, Relationship::Follower)
}

pub(crate) fn parse_is_my_following(
    parser: &mut Parser<'_>,
    node: &RuleNode<'_>,
) -> Option<Arc<dyn FilterRule>> {
    parse_relationship(parser, node, Relationship::Following)
}

fn parse_relationship(
    parser: &mut Parser<'_>,
    node: &RuleNode<'_>,
    relationship: Relationship,
) -> Option<Arc<dyn FilterRule>> {
    let expected = expected_bool(parser, node)?;
    Some(Arc::new(RelationshipFilter {
        rule: node.rule_ref(),
        relationship,
        expected,
    }))
}
