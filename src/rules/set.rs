//! Composite rules: `all_of`, `any_of`, `weight_of` over filters and
//! `any_of` over sources.
//!
//! Filter sets split their children by cost. Immediate children run first,
//! one after another, in declaration order. Slow children then run
//! concurrently on a [`JoinSet`], at most `max_slow_fan_out` at a time; the
//! next pending child is spawned whenever one finishes. The first decisive
//! result wins and dropping the join set aborts whatever is still in flight,
//! so cancelled children never reach the report.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error};

use super::{
    AccountBatches, Cost, ExecutionContext, FilterRule, RuleRef, RuleResult, SourceRule, settle,
};
use crate::errors::{ClientError, EngineError};
use crate::model::Account;
use crate::parser::{Parser, RuleNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetKind {
    AllOf,
    AnyOf,
}

impl SetKind {
    /// The child outcome that decides the whole set.
    fn decisive(self) -> bool {
        matches!(self, Self::AnyOf)
    }
}

/// `all_of` / `any_of` over filter rules.
#[derive(Debug)]
pub struct FilterSet {
    rule: RuleRef,
    kind: SetKind,
    immediate: Vec<Arc<dyn FilterRule>>,
    slow: Vec<Arc<dyn FilterRule>>,
}

impl FilterSet {
    pub fn all_of(rule: RuleRef, children: Vec<Arc<dyn FilterRule>>) -> Self {
        Self::new(rule, SetKind::AllOf, children)
    }

    pub fn any_of(rule: RuleRef, children: Vec<Arc<dyn FilterRule>>) -> Self {
        Self::new(rule, SetKind::AnyOf, children)
    }

    fn new(rule: RuleRef, kind: SetKind, children: Vec<Arc<dyn FilterRule>>) -> Self {
        let (slow, immediate) = children
            .into_iter()
            .partition(|child| child.cost() == Cost::Slow);
        Self {
            rule,
            kind,
            immediate,
            slow,
        }
    }
}

#[async_trait]
impl FilterRule for FilterSet {
    fn rule_ref(&self) -> &RuleRef {
        &self.rule
    }

    fn cost(&self) -> Cost {
        if self.slow.is_empty() {
            Cost::Immediate
        } else {
            Cost::Slow
        }
    }

    async fn judge(
        &self,
        account: &Arc<Account>,
        ctx: &Arc<ExecutionContext>,
    ) -> Result<RuleResult, EngineError> {
        let decisive = self.kind.decisive();
        let mut results = Vec::with_capacity(self.immediate.len() + self.slow.len());

        for child in &self.immediate {
            let result = settle(child.rule_ref(), child.judge(account, ctx).await)?;
            if result.outcome == decisive {
                return Ok(RuleResult::new(&self.rule, decisive).because(vec![result]));
            }
            results.push(result);
        }

        let mut fan_out = SlowFanOut::start(&self.rule, &self.slow, account, ctx);
        while let Some((_, result)) = fan_out.next().await? {
            if result.outcome == decisive {
                debug!(
                    rule.keyword = %self.rule.keyword,
                    rule.path = %self.rule.path,
                    in_flight = fan_out.in_flight(),
                    "Rule set decided, cancelling remaining slow rules"
                );
                return Ok(RuleResult::new(&self.rule, decisive).because(vec![result]));
            }
            results.push(result);
        }

        Ok(RuleResult::new(&self.rule, !decisive).because(results))
    }
}

/// `weight_of`: triggers once the weights of satisfied children reach `goal`.
#[derive(Debug)]
pub struct WeightedSet {
    rule: RuleRef,
    goal: u64,
    immediate: Vec<(u64, Arc<dyn FilterRule>)>,
    slow: Vec<Arc<dyn FilterRule>>,
    slow_weights: Vec<u64>,
}

impl WeightedSet {
    /// Callers guarantee the weights can reach `goal`.
    pub fn new(rule: RuleRef, goal: u64, children: Vec<(u64, Arc<dyn FilterRule>)>) -> Self {
        let (slow, immediate): (Vec<_>, Vec<_>) = children
            .into_iter()
            .partition(|(_, child)| child.cost() == Cost::Slow);
        let (slow_weights, slow) = slow.into_iter().unzip();
        Self {
            rule,
            goal,
            immediate,
            slow,
            slow_weights,
        }
    }

    fn total_weight(&self) -> u64 {
        self.immediate.iter().map(|(weight, _)| weight).sum::<u64>()
            + self.slow_weights.iter().sum::<u64>()
    }
}

/// Running tally of a weighted evaluation.
struct Tally {
    goal: u64,
    sum: u64,
    remaining: u64,
}

impl Tally {
    fn add(&mut self, weight: u64, satisfied: bool) {
        self.remaining = self.remaining.saturating_sub(weight);
        if satisfied {
            self.sum += weight;
        }
    }

    fn decided(&self) -> Option<bool> {
        if self.sum >= self.goal {
            Some(true)
        } else if self.sum + self.remaining < self.goal {
            Some(false)
        } else {
            None
        }
    }
}

#[async_trait]
impl FilterRule for WeightedSet {
    fn rule_ref(&self) -> &RuleRef {
        &self.rule
    }

    fn cost(&self) -> Cost {
        if self.slow.is_empty() {
            Cost::Immediate
        } else {
            Cost::Slow
        }
    }

    async fn judge(
        &self,
        account: &Arc<Account>,
        ctx: &Arc<ExecutionContext>,
    ) -> Result<RuleResult, EngineError> {
        let mut tally = Tally {
            goal: self.goal,
            sum: 0,
            remaining: self.total_weight(),
        };
        let mut results = Vec::new();

        for (weight, child) in &self.immediate {
            let result = settle(child.rule_ref(), child.judge(account, ctx).await)?;
            tally.add(*weight, result.outcome);
            results.push(result);
            if let Some(outcome) = tally.decided() {
                return Ok(RuleResult::new(&self.rule, outcome).because(results));
            }
        }

        let mut fan_out = SlowFanOut::start(&self.rule, &self.slow, account, ctx);
        while let Some((index, result)) = fan_out.next().await? {
            let weight = self.slow_weights.get(index).copied().unwrap_or(0);
            tally.add(weight, result.outcome);
            results.push(result);
            if let Some(outcome) = tally.decided() {
                return Ok(RuleResult::new(&self.rule, outcome).because(results));
            }
        }

        Ok(RuleResult::new(&self.rule, tally.sum >= tally.goal).because(results))
    }
}

/// Bounded concurrent evaluation of slow children.
struct SlowFanOut<'c> {
    pending: std::iter::Enumerate<std::slice::Iter<'c, Arc<dyn FilterRule>>>,
    tasks: JoinSet<(usize, Result<RuleResult, ClientError>)>,
    account: Arc<Account>,
    ctx: Arc<ExecutionContext>,
    owner: &'c RuleRef,
}

impl<'c> SlowFanOut<'c> {
    fn start(
        owner: &'c RuleRef,
        children: &'c [Arc<dyn FilterRule>],
        account: &Arc<Account>,
        ctx: &Arc<ExecutionContext>,
    ) -> Self {
        let mut fan_out = Self {
            pending: children.iter().enumerate(),
            tasks: JoinSet::new(),
            account: account.clone(),
            ctx: ctx.clone(),
            owner,
        };
        for _ in 0..ctx.max_slow_fan_out {
            if !fan_out.spawn_next() {
                break;
            }
        }
        fan_out
    }

    fn spawn_next(&mut self) -> bool {
        let Some((index, child)) = self.pending.next() else {
            return false;
        };
        let child = child.clone();
        let account = self.account.clone();
        let ctx = self.ctx.clone();
        self.tasks.spawn(async move {
            let result = child.judge(&account, &ctx).await;
            (index, settle(child.rule_ref(), result))
        });
        true
    }

    fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Next finished child as `(declaration index, result)`, or `None` when
    /// every child has run.
    async fn next(&mut self) -> Result<Option<(usize, RuleResult)>, ClientError> {
        let Some(joined) = self.tasks.join_next().await else {
            return Ok(None);
        };
        self.spawn_next();

        match joined {
            Ok((index, result)) => Ok(Some((index, result?))),
            Err(e) => {
                // Only a panic gets here; tasks are aborted solely by dropping
                // the join set. A panicked task cannot be traced back to its
                // child, so the false result is attributed to the owning set.
                error!(
                    error = ?e,
                    rule.keyword = %self.owner.keyword,
                    rule.path = %self.owner.path,
                    "Slow rule task failed"
                );
                Ok(Some((usize::MAX, RuleResult::new(self.owner, false))))
            }
        }
    }
}

/// `any_of` over source rules: the concatenation of its children.
#[derive(Debug)]
pub struct SourceSet {
    rule: RuleRef,
    children: Vec<Arc<dyn SourceRule>>,
}

impl SourceSet {
    pub fn any_of(rule: RuleRef, children: Vec<Arc<dyn SourceRule>>) -> Self {
        Self { rule, children }
    }
}

impl SourceRule for SourceSet {
    fn rule_ref(&self) -> &RuleRef {
        &self.rule
    }

    fn children(&self) -> Option<&[Arc<dyn SourceRule>]> {
        Some(&self.children)
    }

    fn batches<'a>(&'a self, ctx: &'a ExecutionContext) -> AccountBatches<'a> {
        stream::iter(&self.children)
            .flat_map(move |child| child.batches(ctx))
            .boxed()
    }
}

pub(crate) fn parse_all_of(
    parser: &mut Parser<'_>,
    node: &RuleNode<'_>,
) -> Option<Arc<dyn FilterRule>> {
    let children = parse_filter_children(parser, node)?;
    Some(Arc::new(FilterSet::all_of(node.rule_ref(), children)))
}

pub(crate) fn parse_any_of(
    parser: &mut Parser<'_>,
    node: &RuleNode<'_>,
) -> Option<Arc<dyn FilterRule>> {
    let children = parse_filter_children(parser, node)?;
    Some(Arc::new(FilterSet::any_of(node.rule_ref(), children)))
}

pub(crate) fn parse_source_any_of(
    parser: &mut Parser<'_>,
    node: &RuleNode<'_>,
) -> Option<Arc<dyn SourceRule>> {
    let path = node.body_path();
    let children = parser.parse_sources(&path, node.body);
    if children.is_empty() {
        parser.error(&path, "must contain at least one source rule");
        return None;
    }
    Some(Arc::new(SourceSet::any_of(node.rule_ref(), children)))
}

fn parse_filter_children(
    parser: &mut Parser<'_>,
    node: &RuleNode<'_>,
) -> Option<Vec<Arc<dyn FilterRule>>> {
    let path = node.body_path();
    let children = parser.parse_filters(&path, node.body);
    if children.is_empty() {
        parser.error(&path, "must contain at least one filter rule");
        return None;
    }
    Some(children)
}

/// ```yaml
/// weight_of:
///   goal: 2
///   rules:
///     - {weight: 1, follower: {less_than: 10}}
///     - {weight: 2, verified: false}
/// ```
pub(crate) fn parse_weight_of(
    parser: &mut Parser<'_>,
    node: &RuleNode<'_>,
) -> Option<Arc<dyn FilterRule>> {
    let mut body = parser.body(node)?;
    let goal = body.positive("goal");
    let goal = body.require("goal", goal);
    let rules = body.raw("rules");
    let rules = body.require("rules", rules);
    let rules_path = format!("{}.rules", body.path());
    let clean = body.finish().is_some();

    let Some(items) = rules.and_then(Value::as_array) else {
        if rules.is_some() {
            parser.error(&rules_path, "expected a list of weighted filter rules");
        }
        return None;
    };
    if items.is_empty() {
        parser.error(&rules_path, "must contain at least one weighted filter rule");
        return None;
    }

    let mut children = Vec::with_capacity(items.len());
    let mut weights_ok = true;
    for (index, item) in items.iter().enumerate() {
        let path = format!("{rules_path}[{index}]");
        let Some(map) = item.as_object() else {
            parser.error(&path, "expected a mapping with 'weight' and one filter rule");
            weights_ok = false;
            continue;
        };

        let weight = match map.get("weight") {
            Some(value) => match value.as_u64().filter(|weight| *weight > 0) {
                Some(weight) => Some(weight),
                None => {
                    parser.error(&format!("{path}.weight"), "must be a positive integer");
                    None
                }
            },
            None => {
                parser.error(&path, "missing required field 'weight'");
                None
            }
        };

        let mut rest = map.clone();
        rest.remove("weight");
        let child = parser.parse_filter(&path, &Value::Object(rest));
        match weight {
            Some(weight) => children.push((weight, child)),
            None => weights_ok = false,
        }
    }

    let goal = goal?;
    if !clean || !weights_ok {
        return None;
    }

    let total: u64 = children.iter().map(|(weight, _)| weight).sum();
    if total < goal {
        parser.error(
            &format!("{}.goal", node.body_path()),
            format!("goal {goal} is unreachable, the weights only sum to {total}"),
        );
        return None;
    }

    Some(Arc::new(WeightedSet::new(node.rule_ref(), goal, children)))
}
