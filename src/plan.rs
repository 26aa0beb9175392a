//! Plans and their executor.
//!
//! A plan streams accounts out of its source tree leaf by leaf, drops
//! accounts it has already seen, judges each remaining account against the
//! filter tree and, on a match, applies every action in declaration order.
//! Exactly one [`Decision`] is emitted per distinct account.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::constants::RECORD_DECISION;
use crate::errors::{ClientError, RunError};
use crate::model::Account;
use crate::report::Recordable;
use crate::rules::{
    ActionRule, ExecutionContext, FilterRule, RuleRef, RuleResult, SourceRule, leaves, settle,
};

/// One account's way through a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub account: Account,
    pub filter: RuleResult,
    /// Empty when the filter did not match.
    pub actions: Vec<RuleResult>,
}

impl Recordable for Decision {
    const RECORD_TYPE: &'static str = RECORD_DECISION;
}

/// Counters logged when a plan finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub considered: usize,
    pub duplicates: usize,
    pub matched: usize,
    pub actions_succeeded: usize,
    pub actions_failed: usize,
}

pub struct Plan {
    name: String,
    source: Arc<dyn SourceRule>,
    filter: Option<Arc<dyn FilterRule>>,
    actions: Vec<Arc<dyn ActionRule>>,
}

impl fmt::Debug for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plan")
            .field("name", &self.name)
            .field("source", &self.source.rule_ref())
            .field("filter", &self.filter.as_ref().map(|filter| filter.rule_ref()))
            .field("actions", &self.actions.len())
            .finish()
    }
}

impl Plan {
    pub fn new(
        name: String,
        source: Arc<dyn SourceRule>,
        filter: Option<Arc<dyn FilterRule>>,
        actions: Vec<Arc<dyn ActionRule>>,
    ) -> Self {
        Self {
            name,
            source,
            filter,
            actions,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &Arc<dyn SourceRule> {
        &self.source
    }

    pub fn filter(&self) -> Option<&Arc<dyn FilterRule>> {
        self.filter.as_ref()
    }

    pub fn actions(&self) -> &[Arc<dyn ActionRule>] {
        &self.actions
    }

    /// Run the plan to completion, or until `cancel` fires.
    ///
    /// Sources are drained one batch at a time and every account of a batch
    /// is decided before the next batch is requested. Cancellation is
    /// observed between accounts and while waiting on a batch or a filter;
    /// an action that already started runs to completion
    /// so its outcome is recorded.
    #[instrument(skip_all, fields(plan.name = %self.name))]
    pub async fn execute(
        &self,
        ctx: &Arc<ExecutionContext>,
        cancel: &CancellationToken,
    ) -> Result<PlanSummary, RunError> {
        let mut seen = HashSet::new();
        let mut summary = PlanSummary::default();
        let from_path = &self.source.rule_ref().path;
        let plan_path = from_path.strip_suffix(".from").unwrap_or(from_path);
        let always = RuleRef::new("always", format!("{plan_path}.that"));

        for leaf in leaves(&self.source) {
            let mut batches = leaf.batches(ctx);
            loop {
                let batch = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(RunError::Interrupted),
                    batch = batches.next() => batch,
                };
                let Some(accounts) = batch.transpose()? else {
                    break;
                };
                debug!(
                    rule.keyword = %leaf.rule_ref().keyword,
                    rule.path = %leaf.rule_ref().path,
                    count = accounts.len(),
                    "Source produced a batch"
                );

                for account in accounts {
                    if cancel.is_cancelled() {
                        return Err(RunError::Interrupted);
                    }
                    if !account.is_valid() {
                        continue;
                    }
                    if !seen.insert(account.id) {
                        summary.duplicates += 1;
                        continue;
                    }
                    summary.considered += 1;
                    self.decide(account, ctx, cancel, &always, &mut summary).await?;
                }
            }
        }

        info!(
            considered = summary.considered,
            duplicates = summary.duplicates,
            matched = summary.matched,
            actions_succeeded = summary.actions_succeeded,
            actions_failed = summary.actions_failed,
            "Plan finished"
        );
        Ok(summary)
    }

    /// Judge one account, apply the actions on a match and record the
    /// decision.
    async fn decide(
        &self,
        account: Account,
        ctx: &Arc<ExecutionContext>,
        cancel: &CancellationToken,
        always: &RuleRef,
        summary: &mut PlanSummary,
    ) -> Result<(), RunError> {
        let account = Arc::new(account);
        let filter = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RunError::Interrupted),
            filter = self.judge(&account, ctx, always) => filter?,
        };

        let mut actions = Vec::new();
        if filter.is_true() {
            summary.matched += 1;
            for action in &self.actions {
                let result = settle(action.rule_ref(), action.apply(&account, ctx).await)?;
                if result.is_true() {
                    summary.actions_succeeded += 1;
                } else {
                    summary.actions_failed += 1;
                }
                actions.push(result);
            }
        }

        debug!(
            account.id = account.id,
            account.handle = %account.handle,
            matched = filter.is_true(),
            "Decision made"
        );
        let decision = Decision {
            account: Arc::unwrap_or_clone(account),
            filter,
            actions,
        };
        ctx.report.emit_recordable(&decision)?;
        Ok(())
    }

    async fn judge(
        &self,
        account: &Arc<Account>,
        ctx: &Arc<ExecutionContext>,
        always: &RuleRef,
    ) -> Result<RuleResult, ClientError> {
        match &self.filter {
            Some(filter) => settle(filter.rule_ref(), filter.judge(account, ctx).await),
            None => Ok(RuleResult::new(always, true)),
        }
    }
}
