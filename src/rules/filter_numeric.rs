//! Counter comparisons: `follower`, `following`, `post_count`.
//!
//! ```yaml
//! - follower: {less_than: 10}
//! - post_count: {more_than: 5, less_than: 5000}
//! ```
//!
//! Both bounds are exclusive.

use async_trait::async_trait;
use std::sync::Arc;

use super::{ExecutionContext, FilterRule, RuleRef, RuleResult};
use crate::errors::EngineError;
use crate::model::Account;
use crate::parser::{Parser, RuleNode};

/// Open interval over an account counter. An absent bound is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub more_than: Option<u64>,
    pub less_than: Option<u64>,
}

impl Interval {
    pub fn contains(&self, value: u64) -> bool {
        self.more_than.is_none_or(|low| value > low) && self.less_than.is_none_or(|high| value < high)
    }
}

#[derive(Debug)]
pub struct CounterFilter {
    rule: RuleRef,
    counter: fn(&Account) -> u64,
    interval: Interval,
}

#[async_trait]
impl FilterRule for CounterFilter {
    fn rule_ref(&self) -> &RuleRef {
        &self.rule
    }

    async fn judge(
        &self,
        account: &Arc<Account>,
        _ctx: &Arc<ExecutionContext>,
    ) -> Result<RuleResult, EngineError> {
        let value = (self.counter)(account);
        Ok(RuleResult::new(&self.rule, self.interval.contains(value)))
    }
}

pub(crate) fn parse_follower(
    parser: &mut Parser<'_>,
    node: &RuleNode<'_>,
) -> Option<Arc<dyn FilterRule>> {
    parse_counter(parser, node, |account| account.followers_count)
}

pub(crate) fn parse_following(
    parser: &mut Parser<'_>,
    node: &RuleNode<'_>,
) -> Option<Arc<dyn FilterRule>> {
    parse_counter(parser, node, |account| account.following_count)
}

pub(crate) fn parse_post_count(
    parser: &mut Parser<'_>,
    node: &RuleNode<'_>,
) -> Option<Arc<dyn FilterRule>> {
    parse_counter(parser, node, |account| account.post_count)
}

fn parse_counter(
    parser: &mut Parser<'_>,
    node: &RuleNode<'_>,
    counter: fn(&Account) -> u64,
) -> Option<Arc<dyn FilterRule>> {
    let mut body = parser.body(node)?;
    let interval = Interval {
        more_than: body.u64("more_than"),
        less_than: body.u64("less_than"),
    };

    if !body.has("more_than") && !body.has("less_than") {
        body.error("expected at least one of 'less_than' or 'more_than'");
    } else {
        match interval {
            Interval {
                more_than: Some(low),
                less_than: Some(high),
            } if high <= low.saturating_add(1) => {
                body.error(format!(
                    "no count is both more than {low} and less than {high}"
                ));
            }
            Interval {
                less_than: Some(0), ..
            } => body.field_error("less_than", "no count is less than 0"),
            _ => {}
        }
    }
    body.finish()?;

    Some(Arc::new(CounterFilter {
        rule: node.rule_ref(),
        counter,
        interval,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Fixture;
    use crate::rules::RuleRegistry;
    use crate::test_helpers::{account, context};
    use serde_json::Value;

    fn parse(yaml: &str) -> Result<Arc<dyn FilterRule>, Vec<crate::errors::ParseError>> {
        let registry = RuleRegistry::builtin().unwrap();
        let value: Value = serde_yml::from_str(yaml).unwrap();
        let mut parser = Parser::new(&registry);
        let rule = parser.parse_filter("that[0]", &value);
        parser.finish(rule)
    }

    #[test]
    fn test_interval_is_open() {
        let interval = Interval {
            more_than: Some(2),
            less_than: Some(5),
        };
        assert!(!interval.contains(2));
        assert!(interval.contains(3));
        assert!(interval.contains(4));
        assert!(!interval.contains(5));

        let below = Interval {
            more_than: None,
            less_than: Some(10),
        };
        assert!(below.contains(0));
        assert!(!below.contains(10));
    }

    #[tokio::test]
    async fn test_follower_threshold() {
        let test = context(Fixture::default());
        let rule = parse("follower: {less_than: 10}").unwrap();

        let few = Arc::new(account(1, "alice", 5));
        let many = Arc::new(account(2, "bob", 100));
        assert!(rule.judge(&few, &test.ctx).await.unwrap().is_true());
        assert!(!rule.judge(&many, &test.ctx).await.unwrap().is_true());
    }

    #[tokio::test]
    async fn test_following_and_post_count_read_their_own_counters() {
        let test = context(Fixture::default());
        let subject = Arc::new(account(1, "alice", 5));

        // helper accounts follow 10 and posted 100 times
        let following = parse("following: {more_than: 9, less_than: 11}").unwrap();
        let posts = parse("post_count: {more_than: 100}").unwrap();
        assert!(following.judge(&subject, &test.ctx).await.unwrap().is_true());
        assert!(!posts.judge(&subject, &test.ctx).await.unwrap().is_true());
    }

    #[test]
    fn test_parse_rejects_empty_intervals() {
        let errors = parse("follower: {}").unwrap_err();
        assert!(errors[0].message.contains("at least one"));

        let errors = parse("follower: {more_than: 4, less_than: 5}").unwrap_err();
        assert_eq!(errors[0].path, "that[0].follower");

        let errors = parse("following: {less_than: 0}").unwrap_err();
        assert_eq!(errors[0].path, "that[0].following.less_than");

        assert!(parse("follower: {more_than: 4, less_than: 6}").is_ok());
        assert!(parse("follower: {less_than: -1}").is_err());
    }
}
