//! Rule tree: sources, filters, actions and the sets that combine them.
//!
//! Every rule carries a [`RuleRef`]: its keyword (unique within its family)
//! and the config path it was parsed from. Rules are immutable once parsed
//! and are shared as `Arc<dyn ...>` so slow filters can be evaluated on
//! spawned tasks.
//!
//! # Families
//!
//! - [`SourceRule`] produces the accounts a plan considers.
//! - [`FilterRule`] decides whether one account matches. Filters are either
//!   [`Cost::Immediate`] (decided from the account alone) or [`Cost::Slow`]
//!   (needs the platform client). Sets evaluate immediate children first.
//! - [`ActionRule`] performs a side effect on a matched account.
//!
//! Rule constructors are looked up by keyword in the [`registry`].

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::error;

use crate::client::Client;
use crate::config::Settings;
use crate::constants::PLACEHOLDER;
use crate::errors::{ClientError, EngineError};
use crate::model::Account;
use crate::report::ReportSink;

pub mod action_block;
pub mod filter_created;
pub mod filter_flags;
pub mod filter_numeric;
pub mod filter_relationship;
pub mod filter_text;
pub mod registry;
pub mod set;
pub mod source;
pub mod source_followers;

pub use registry::{RuleFamily, RuleRegistry};

/// Identifies one rule node in a parsed tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleRef {
    pub keyword: String,
    pub path: String,
}

impl RuleRef {
    pub fn new(keyword: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for RuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.keyword, self.path)
    }
}

/// Which rule produced which outcome.
///
/// Sets attach the child results that decided them in `because`, so a
/// decision record explains itself down to the leaf predicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleResult {
    pub rule: RuleRef,
    pub outcome: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub because: Vec<RuleResult>,
}

impl RuleResult {
    pub fn new(rule: &RuleRef, outcome: bool) -> Self {
        Self {
            rule: rule.clone(),
            outcome,
            because: Vec::new(),
        }
    }

    pub fn because(mut self, children: Vec<RuleResult>) -> Self {
        self.because = children;
        self
    }

    pub fn is_true(&self) -> bool {
        self.outcome
    }
}

impl From<&RuleResult> for bool {
    fn from(result: &RuleResult) -> Self {
        result.outcome
    }
}

/// Filter cost class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cost {
    /// Decided from the account alone, no remote calls.
    Immediate,
    /// Needs the platform client.
    Slow,
}

/// Everything a rule may touch while running.
pub struct ExecutionContext {
    pub client: Arc<Client>,
    pub report: Arc<dyn ReportSink>,
    pub block_following: bool,
    pub block_follower: bool,
    pub max_slow_fan_out: usize,
}

impl ExecutionContext {
    pub fn new(client: Arc<Client>, report: Arc<dyn ReportSink>, settings: &Settings) -> Self {
        Self {
            client,
            report,
            block_following: settings.block_following,
            block_follower: settings.block_follower,
            max_slow_fan_out: (*settings.max_slow_fan_out.as_ref()).max(1),
        }
    }
}

/// Accounts a source yields, one platform batch at a time.
///
/// The stream is lazy and finite: nothing is fetched until it is polled, and
/// dropping it abandons the batches not yet requested.
pub type AccountBatches<'a> = BoxStream<'a, Result<Vec<Account>, ClientError>>;

pub trait SourceRule: Send + Sync + fmt::Debug {
    fn rule_ref(&self) -> &RuleRef;

    /// Child sources, for sets. Leaves return `None`.
    fn children(&self) -> Option<&[Arc<dyn SourceRule>]> {
        None
    }

    /// The accounts this rule yields, in source order.
    fn batches<'a>(&'a self, ctx: &'a ExecutionContext) -> AccountBatches<'a>;
}

/// Drain a source into one list.
pub async fn collect_accounts(
    source: &dyn SourceRule,
    ctx: &ExecutionContext,
) -> Result<Vec<Account>, ClientError> {
    source.batches(ctx).try_concat().await
}

#[async_trait]
pub trait FilterRule: Send + Sync + fmt::Debug {
    fn rule_ref(&self) -> &RuleRef;

    fn cost(&self) -> Cost {
        Cost::Immediate
    }

    async fn judge(
        &self,
        account: &Arc<Account>,
        ctx: &Arc<ExecutionContext>,
    ) -> Result<RuleResult, EngineError>;
}

#[async_trait]
pub trait ActionRule: Send + Sync + fmt::Debug {
    fn rule_ref(&self) -> &RuleRef;

    async fn apply(
        &self,
        account: &Account,
        ctx: &ExecutionContext,
    ) -> Result<RuleResult, EngineError>;
}

/// Leaf sources of `root` in declaration order, flattening sets.
pub fn leaves(root: &Arc<dyn SourceRule>) -> Vec<Arc<dyn SourceRule>> {
    match root.children() {
        Some(children) => children.iter().flat_map(leaves).collect(),
        None => vec![root.clone()],
    }
}

/// Collapse a rule's own failure into a false result; client failures
/// stay fatal.
pub fn settle(
    rule: &RuleRef,
    result: Result<RuleResult, EngineError>,
) -> Result<RuleResult, ClientError> {
    match result {
        Ok(result) => Ok(result),
        Err(EngineError::Client(e)) => Err(e),
        Err(e) => {
            error!(rule.keyword = %rule.keyword, rule.path = %rule.path, error = ?e, "Rule evaluation failed");
            Ok(RuleResult::new(rule, false))
        }
    }
}

/// Stand-in for a rule that failed to parse.
///
/// A tree containing placeholders is never executed; the parser reports
/// errors first. Should one run anyway it matches nothing and does nothing.
#[derive(Debug)]
pub struct Placeholder {
    rule: RuleRef,
}

impl Placeholder {
    pub fn new(path: &str) -> Self {
        Self {
            rule: RuleRef::new(PLACEHOLDER, path),
        }
    }
}

impl SourceRule for Placeholder {
    fn rule_ref(&self) -> &RuleRef {
        &self.rule
    }

    fn batches<'a>(&'a self, _ctx: &'a ExecutionContext) -> AccountBatches<'a> {
        stream::empty().boxed()
    }
}

#[async_trait]
impl FilterRule for Placeholder {
    fn rule_ref(&self) -> &RuleRef {
        &self.rule
    }

    async fn judge(
        &self,
        _account: &Arc<Account>,
        _ctx: &Arc<ExecutionContext>,
    ) -> Result<RuleResult, EngineError> {
        Ok(RuleResult::new(&self.rule, false))
    }
}

#[async_trait]
impl ActionRule for Placeholder {
    fn rule_ref(&self) -> &RuleRef {
        &self.rule
    }

    async fn apply(
        &self,
        _account: &Account,
        _ctx: &ExecutionContext,
    ) -> Result<RuleResult, EngineError> {
        Ok(RuleResult::new(&self.rule, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_result_serializes_without_empty_because() {
        let result = RuleResult::new(&RuleRef::new("follower", "plans[0].that[0]"), true);
        let value = serde_json::to_value(&result).unwrap();
        assert!(value.get("because").is_none());
        assert!(bool::from(&result));

        let back: RuleResult = serde_json::from_value(value).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_settle_turns_rule_failures_false() {
        let rule = RuleRef::new("user_texts_match", "plans[0].that[0]");
        let failed = Err(EngineError::RuleFailed {
            keyword: rule.keyword.clone(),
            path: rule.path.clone(),
            details: "boom".into(),
        });
        assert_eq!(settle(&rule, failed).unwrap(), RuleResult::new(&rule, false));

        let fatal = Err(EngineError::Client(ClientError::failure("block", "reset")));
        assert!(settle(&rule, fatal).is_err());
    }
}
