//! `user_created`: when the account was registered.
//!
//! ```yaml
//! - user_created: {after: 2022-01-01}
//! - user_created: {before: 2020-01-01T00:00:00Z, after: 2019-06-01}
//! - user_created: {within_days: 30}
//! ```
//!
//! Bounds are exclusive. `within_days` is relative to the moment of
//! evaluation and cannot be combined with `before` or `after`.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use super::{ExecutionContext, FilterRule, RuleRef, RuleResult};
use crate::errors::EngineError;
use crate::model::Account;
use crate::parser::{Parser, RuleNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Window {
    Between {
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    },
    WithinDays(u64),
}

impl Window {
    fn contains(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match *self {
            Window::Between { after, before } => {
                after.is_none_or(|after| created_at > after)
                    && before.is_none_or(|before| created_at < before)
            }
            Window::WithinDays(days) => {
                let days = i64::try_from(days).unwrap_or(i64::MAX);
                match now.checked_sub_signed(Duration::days(days.min(365_000))) {
                    Some(since) => created_at > since,
                    None => true,
                }
            }
        }
    }
}

#[derive(Debug)]
pub struct UserCreatedFilter {
    rule: RuleRef,
    window: Window,
}

#[async_trait]
impl FilterRule for UserCreatedFilter {
    fn rule_ref(&self) -> &RuleRef {
        &self.rule
    }

    async fn judge(
        &self,
        account: &Arc<Account>,
        _ctx: &Arc<ExecutionContext>,
    ) -> Result<RuleResult, EngineError> {
        let matched = self.window.contains(account.created_at, Utc::now());
        Ok(RuleResult::new(&self.rule, matched))
    }
}

pub(crate) fn parse_user_created(
    parser: &mut Parser<'_>,
    node: &RuleNode<'_>,
) -> Option<Arc<dyn FilterRule>> {
    let mut body = parser.body(node)?;
    let before = body.date("before");
    let after = body.date("after");
    let within_days = body.positive("within_days");

    let bounded = body.has("before") || body.has("after");
    let window = if body.has("within_days") {
        if bounded {
            body.error("'within_days' cannot be combined with 'before' or 'after'");
        }
        within_days.map(Window::WithinDays)
    } else if bounded {
        if let (Some(before), Some(after)) = (before, after)
            && before <= after
        {
            body.error(format!("'before' ({before}) must be later than 'after' ({after})"));
        }
        Some(Window::Between { after, before })
    } else {
        body.error("expected 'before', 'after' or 'within_days'");
        None
    };
    body.finish()?;

    Some(Arc::new(UserCreatedFilter {
        rule: node.rule_ref(),
        window: window?,
    }))
}
