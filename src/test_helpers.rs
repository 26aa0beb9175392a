//! Test helper utilities for puntgun tests
//!
//! Fixtures for accounts and execution contexts, plus a spy filter that
//! records how often it was invoked and whether it was cancelled mid-flight.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::client::{Client, Fixture, InMemoryPlatform};
use crate::config::Settings;
use crate::errors::EngineError;
use crate::model::Account;
use crate::report::MemorySink;
use crate::rules::{Cost, ExecutionContext, FilterRule, RuleRef, RuleResult};

// Test environment mutex to prevent concurrent environment variable modification
pub static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Raw API user object.
pub fn user_json(id: u64, handle: &str, followers: u64) -> Value {
    json!({
        "id": id.to_string(),
        "username": handle,
        "name": handle,
        "created_at": "2015-06-01T00:00:00.000Z",
        "description": "",
        "public_metrics": {
            "followers_count": followers,
            "following_count": 10,
            "tweet_count": 100
        }
    })
}

pub fn account(id: u64, handle: &str, followers: u64) -> Account {
    Account::from_api(&user_json(id, handle, followers), None)
}

pub struct TestContext {
    pub ctx: Arc<ExecutionContext>,
    pub platform: Arc<InMemoryPlatform>,
    pub sink: Arc<MemorySink>,
}

pub fn context(fixture: Fixture) -> TestContext {
    context_with(fixture, Settings::default())
}

pub fn context_with(fixture: Fixture, settings: Settings) -> TestContext {
    let platform = Arc::new(InMemoryPlatform::new(fixture));
    let sink = Arc::new(MemorySink::new());
    let client = Arc::new(Client::new(platform.clone(), sink.clone()));
    let ctx = Arc::new(ExecutionContext::new(client, sink.clone(), &settings));
    TestContext {
        ctx,
        platform,
        sink,
    }
}

/// Filter with a fixed outcome that counts calls and notices cancellation.
#[derive(Debug)]
pub struct SpyFilter {
    rule: RuleRef,
    outcome: bool,
    cost: Cost,
    delay: Option<Duration>,
    pub calls: Arc<AtomicUsize>,
    pub completed: Arc<AtomicUsize>,
    pub cancelled: Arc<AtomicBool>,
}

impl SpyFilter {
    pub fn immediate(path: &str, outcome: bool) -> Self {
        Self {
            rule: RuleRef::new("spy", path),
            outcome,
            cost: Cost::Immediate,
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
            completed: Arc::new(AtomicUsize::new(0)),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn slow(path: &str, outcome: bool, delay: Duration) -> Self {
        Self {
            cost: Cost::Slow,
            delay: Some(delay),
            ..Self::immediate(path, outcome)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

struct CancelGuard {
    flag: Arc<AtomicBool>,
    armed: bool,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.armed {
            self.flag.store(true, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl FilterRule for SpyFilter {
    fn rule_ref(&self) -> &RuleRef {
        &self.rule
    }

    fn cost(&self) -> Cost {
        self.cost
    }

    async fn judge(
        &self,
        _account: &Arc<Account>,
        _ctx: &Arc<ExecutionContext>,
    ) -> Result<RuleResult, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut guard = CancelGuard {
            flag: self.cancelled.clone(),
            armed: true,
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        guard.armed = false;
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(RuleResult::new(&self.rule, self.outcome))
    }
}
