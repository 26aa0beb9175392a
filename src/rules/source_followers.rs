//! `my_followers`: a slice of the authenticated account's followers.
//!
//! The platform lists followers newest first, so `last: N` is the N most
//! recent followers and `first: N` the N earliest. `after_user: HANDLE`
//! yields everyone who followed after HANDLE, not including HANDLE.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::{AccountBatches, ExecutionContext, RuleRef, SourceRule};
use crate::errors::ClientError;
use crate::model::Account;
use crate::parser::{Parser, RuleNode};
use crate::report::Warning;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Selection {
    All,
    Last(usize),
    First(usize),
    AfterUser(String),
}

#[derive(Debug)]
pub struct MyFollowersSource {
    rule: RuleRef,
    selection: Selection,
}

impl MyFollowersSource {
    /// Apply the selection to a newest-first follower list.
    fn select(&self, followers: &[Account], ctx: &ExecutionContext) -> Vec<Account> {
        match &self.selection {
            Selection::All => followers.to_vec(),
            Selection::Last(n) => followers[..(*n).min(followers.len())].to_vec(),
            Selection::First(n) => {
                followers[followers.len().saturating_sub(*n)..].to_vec()
            }
            Selection::AfterUser(handle) => {
                match followers.iter().position(|follower| follower.has_handle(handle)) {
                    Some(index) => followers[..index].to_vec(),
                    None => {
                        let message = format!("follower '{handle}' not found, nothing selected");
                        warn!(rule.path = %self.rule.path, handle = %handle, "Named follower not found");
                        let warning = Warning {
                            source: self.rule.path.clone(),
                            message,
                        };
                        if let Err(e) = ctx.report.emit_recordable(&warning) {
                            error!(error = ?e, "Failed to record warning");
                        }
                        Vec::new()
                    }
                }
            }
        }
    }
}

impl SourceRule for MyFollowersSource {
    fn rule_ref(&self) -> &RuleRef {
        &self.rule
    }

    /// One batch: the selection needs the whole cached list anyway.
    fn batches<'a>(&'a self, ctx: &'a ExecutionContext) -> AccountBatches<'a> {
        stream::once(async move {
            let followers = ctx.client.cached_followers().await?;
            let selected = self.select(followers.accounts(), ctx);
            debug!(
                rule.path = %self.rule.path,
                followers = followers.len(),
                selected = selected.len(),
                "Selected followers"
            );
            Ok::<_, ClientError>(selected)
        })
        .boxed()
    }
}

pub(crate) fn parse_my_followers(
    parser: &mut Parser<'_>,
    node: &RuleNode<'_>,
) -> Option<Arc<dyn SourceRule>> {
    let mut body = parser.body(node)?;
    let last = body.positive("last");
    let first = body.positive("first");
    let after_user = body.string("after_user");

    let given = ["last", "first", "after_user"]
        .into_iter()
        .filter(|key| body.has(key))
        .count();
    if given > 1 {
        body.error("at most one of 'last', 'first' or 'after_user' may be given");
    }
    body.finish()?;

    let selection = match (last, first, after_user) {
        (Some(n), _, _) => Selection::Last(n as usize),
        (_, Some(n), _) => Selection::First(n as usize),
        (_, _, Some(handle)) => Selection::AfterUser(handle.trim_start_matches('@').to_string()),
        _ => Selection::All,
    };

    Some(Arc::new(MyFollowersSource {
        rule: node.rule_ref(),
        selection,
    }))
}
