//! # puntgun
//!
//! puntgun is a batch moderation tool for a social platform. A user describes
//! in a YAML plan file which accounts to look at, which of them to act on,
//! and what to do with them; puntgun runs the plans against the platform API
//! under one authenticated account and writes a structured report of every
//! decision it made.
//!
//! ## Architecture Overview
//!
//! ### Rule Tree
//! - **Source rules** produce accounts: `handles`, `ids`, `my_followers`,
//!   `who_liked`, `who_retweeted`
//! - **Filter rules** judge one account: counters, creation time, text
//!   patterns, flags, relationships to the authenticated account
//! - **Rule sets** `all_of`, `any_of` and `weight_of` compose filters and
//!   short-circuit on the first decisive child
//! - **Action rules** act on matched accounts: `block`
//!
//! ### Execution
//! - Plans run strictly one after another and share one platform client
//! - Every distinct account gets exactly one decision record
//! - Slow filters (those needing the platform) run concurrently inside a set,
//!   bounded by `max_slow_fan_out`, and are cancelled once the set is decided
//!
//! ### Platform Client
//! - Batches lookups into chunks of 100, follows pagination cursors
//! - Caches the follower, following and blocked lists once per run
//! - Forwards partial errors into the report instead of failing
//!
//! ### Report
//! - An append-only JSON document written fragment by fragment
//! - Loadable even when the run was killed half way
//!
//! ## Configuration
//!
//! Settings come from an optional YAML file overridden by `PUNTGUN_*`
//! environment variables:
//! - `PUNTGUN_LOG_LEVEL`: trace, debug, info, warn or error
//! - `PUNTGUN_BLOCK_FOLLOWING`: allow blocking accounts you follow
//! - `PUNTGUN_BLOCK_FOLLOWER`: allow blocking accounts that follow you
//! - `PUNTGUN_MAX_SLOW_FAN_OUT`: concurrent slow filters per rule set
//!
//! ## Error Handling
//!
//! All error strings use the format: `error-puntgun-<domain>-<number> <message>: <details>`
//!
//! ## Examples
//!
//! ```rust,ignore
//! use puntgun::{client::{Fixture, InMemoryPlatform}, config::Settings, runner::Runner};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runner = Runner::new(Settings::load(None)?)?;
//!     let platform = Arc::new(InMemoryPlatform::new(Fixture::default()));
//!
//!     let outcome = runner
//!         .start("plans.yml".as_ref(), platform, None, CancellationToken::new())
//!         .await?;
//!     println!("report written to {}", outcome.report_path.display());
//!     Ok(())
//! }
//! ```

/// Platform client and its SDK seam.
///
/// [`client::Client`] is the only gateway to the platform. It wraps a
/// [`client::PlatformApi`] implementation, either the HTTP one or the
/// fixture-backed one used for dry runs and tests.
pub mod client;

/// Settings loading and validation.
///
/// Defaults, an optional YAML settings file and `PUNTGUN_*` environment
/// variables, in increasing precedence.
pub mod config;

pub(crate) mod constants;

/// Error types for every layer of the tool.
pub mod errors;

/// Accounts and posts as built from platform API objects.
pub mod model;

/// Plan document parser with accumulated, path-addressed errors.
pub mod parser;

/// Plans, decisions and the plan executor.
pub mod plan;

/// Append-only run report: records, writer and loader.
pub mod report;

/// Rule families, rule sets and the keyword registry.
pub mod rules;

/// Run orchestration: parse, open the report, execute plans, close.
pub mod runner;

/// Credential stores consumed by the HTTP platform client.
pub mod secrets;

#[cfg(test)]
pub mod test_helpers;
