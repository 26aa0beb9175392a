//! Boolean account flags: `verified`, `protected`.
//!
//! A bare keyword means `true`; `verified: false` matches unverified accounts.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::{ExecutionContext, FilterRule, RuleRef, RuleResult};
use crate::errors::EngineError;
use crate::model::Account;
use crate::parser::{Parser, RuleNode};

#[derive(Debug)]
pub struct FlagFilter {
    rule: RuleRef,
    flag: fn(&Account) -> bool,
    expected: bool,
}

#[async_trait]
impl FilterRule for FlagFilter {
    fn rule_ref(&self) -> &RuleRef {
        &self.rule
    }

    async fn judge(
        &self,
        account: &Arc<Account>,
        _ctx: &Arc<ExecutionContext>,
    ) -> Result<RuleResult, EngineError> {
        Ok(RuleResult::new(&self.rule, (self.flag)(account) == self.expected))
    }
}

pub(crate) fn parse_verified(
    parser: &mut Parser<'_>,
    node: &RuleNode<'_>,
) -> Option<Arc<dyn FilterRule>> {
    parse_flag(parser, node, |account| account.verified)
}

pub(crate) fn parse_protected(
    parser: &mut Parser<'_>,
    node: &RuleNode<'_>,
) -> Option<Arc<dyn FilterRule>> {
    parse_flag(parser, node, |account| account.protected)
}

fn parse_flag(
    parser: &mut Parser<'_>,
    node: &RuleNode<'_>,
    flag: fn(&Account) -> bool,
) -> Option<Arc<dyn FilterRule>> {
    let expected = expected_bool(parser, node)?;
    Some(Arc::new(FlagFilter {
        rule: node.rule_ref(),
        flag,
        expected,
    }))
}

/// Body of a yes/no rule: absent means `true`, otherwise a boolean.
pub(crate) fn expected_bool(parser: &mut Parser<'_>, node: &RuleNode<'_>) -> Option<bool> {
    match node.body {
        Value::Null => Some(true),
        Value::Bool(expected) => Some(*expected),
        _ => {
            parser.error(
                &node.body_path(),
                format!("'{}' expects true or false", node.keyword),
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Fixture;
    use crate::rules::RuleRegistry;
    use crate::test_helpers::{account, context};

    fn parse(yaml: &str) -> Result<Arc<dyn FilterRule>, Vec<crate::errors::ParseError>> {
        let registry = RuleRegistry::builtin().unwrap();
        let value: Value = serde_yml::from_str(yaml).unwrap();
        let mut parser = Parser::new(&registry);
        let rule = parser.parse_filter("that[0]", &value);
        parser.finish(rule)
    }

    #[tokio::test]
    async fn test_flags() {
        let test = context(Fixture::default());
        let mut subject = account(1, "alice", 5);
        subject.protected = true;
        let subject = Arc::new(subject);

        for (yaml, expected) in [
            ("protected", true),
            ("protected: true", true),
            ("protected: false", false),
            ("verified", false),
            ("verified: false", true),
        ] {
            let rule = parse(yaml).unwrap();
            let result = rule.judge(&subject, &test.ctx).await.unwrap();
            assert_eq!(result.is_true(), expected, "{yaml}");
        }
    }

    #[test]
    fn test_non_boolean_body() {
        let errors = parse("verified: {value: true}").unwrap_err();
        assert_eq!(errors[0].path, "that[0].verified");
        assert!(parse("protected: yes please").is_err());
    }
}
