//! Platform client used by the rule engine.
//!
//! [`Client`] wraps a [`PlatformApi`] implementation and adds what the rules
//! need on top of raw calls: lookup batching, pagination, per-run caches of
//! the authenticated account's relationship lists, and reporting of partial
//! errors.
//!
//! The relationship caches are single-flight: concurrent first callers share
//! one fetch, and every later caller sees the same list for the rest of the
//! run.

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, instrument, warn};

use crate::constants::LOOKUP_BATCH_SIZE;
use crate::errors::ClientError;
use crate::model::{Account, Post};
use crate::report::{PartialErrors, ReportSink};

pub mod http;
pub mod memory;
pub mod platform;

pub use http::{HttpPlatformApi, HttpReply, HttpTransport, ReqwestTransport};
pub use memory::{Fixture, InMemoryPlatform};
pub use platform::{ApiError, ApiResponse, Includes, PlatformApi, ResponseMeta, UserList};

/// A fully paginated account list with constant-time membership checks.
#[derive(Debug, Default)]
pub struct AccountList {
    accounts: Vec<Account>,
    ids: HashSet<u64>,
}

impl AccountList {
    pub fn new(accounts: Vec<Account>) -> Self {
        let ids = accounts.iter().map(|account| account.id).collect();
        Self { accounts, ids }
    }

    /// Accounts in the order the platform listed them.
    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn contains(&self, id: u64) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

pub struct Client {
    api: Arc<dyn PlatformApi>,
    report: Arc<dyn ReportSink>,
    me: OnceCell<Account>,
    followers: OnceCell<AccountList>,
    following: OnceCell<AccountList>,
    blocked: OnceCell<AccountList>,
    blocked_this_run: Mutex<HashSet<u64>>,
}

impl Client {
    pub fn new(api: Arc<dyn PlatformApi>, report: Arc<dyn ReportSink>) -> Self {
        Self {
            api,
            report,
            me: OnceCell::new(),
            followers: OnceCell::new(),
            following: OnceCell::new(),
            blocked: OnceCell::new(),
            blocked_this_run: Mutex::new(HashSet::new()),
        }
    }

    /// The authenticated account, fetched once per run.
    pub async fn me(&self) -> Result<&Account, ClientError> {
        self.me
            .get_or_try_init(|| async {
                let response = self.api.me().await?;
                self.record_partial_errors("me", &response);
                response
                    .items()
                    .first()
                    .map(|user| Account::from_api(user, Some(&response.includes)))
                    .filter(Account::is_valid)
                    .ok_or_else(|| {
                        ClientError::failure("me", "platform returned no authenticated account")
                    })
            })
            .await
    }

    /// Look up at most 100 accounts by handle. Unknown handles are reported
    /// as partial errors and left out of the result.
    ///
    /// The limit applies to the handles as passed in, before duplicates are
    /// dropped: more than 100 inputs is rejected even when fewer than 100
    /// are distinct. Use [`Client::lookup_users_by_handles`] for larger sets.
    #[instrument(skip(self, handles), fields(count = handles.len()))]
    pub async fn get_users_by_handles(
        &self,
        handles: &[String],
    ) -> Result<Vec<Account>, ClientError> {
        if handles.len() > LOOKUP_BATCH_SIZE {
            return Err(too_many("get_users_by_handles", handles.len()));
        }
        let handles = unique_handles(handles);
        if handles.is_empty() {
            return Ok(Vec::new());
        }

        let response = self.api.users_by_handles(&handles).await?;
        self.record_partial_errors("get_users_by_handles", &response);
        Ok(accounts_from(&response))
    }

    /// Look up at most 100 accounts by id. As with handles, the limit counts
    /// the ids passed in, duplicates included.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn get_users_by_ids(&self, ids: &[u64]) -> Result<Vec<Account>, ClientError> {
        if ids.len() > LOOKUP_BATCH_SIZE {
            return Err(too_many("get_users_by_ids", ids.len()));
        }
        let ids = unique_ids(ids);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let response = self.api.users_by_ids(&ids).await?;
        self.record_partial_errors("get_users_by_ids", &response);
        Ok(accounts_from(&response))
    }

    /// Look up at most 100 posts by id.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn get_posts_by_ids(&self, ids: &[u64]) -> Result<Vec<Post>, ClientError> {
        if ids.len() > LOOKUP_BATCH_SIZE {
            return Err(too_many("get_posts_by_ids", ids.len()));
        }
        let ids = unique_ids(ids);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let response = self.api.posts_by_ids(&ids).await?;
        self.record_partial_errors("get_posts_by_ids", &response);
        Ok(response
            .items()
            .into_iter()
            .map(|tweet| Post::from_api(tweet, &response.includes))
            .filter(|post| post.id != 0)
            .collect())
    }

    /// Look up any number of handles, 100 per platform call.
    pub async fn lookup_users_by_handles(
        &self,
        handles: &[String],
    ) -> Result<Vec<Account>, ClientError> {
        self.users_by_handles_batches(handles).try_concat().await
    }

    /// Look up any number of ids, 100 per platform call.
    pub async fn lookup_users_by_ids(&self, ids: &[u64]) -> Result<Vec<Account>, ClientError> {
        self.users_by_ids_batches(ids).try_concat().await
    }

    /// Distinct handles in batches of 100. Each batch is looked up only when
    /// the stream is polled for it.
    pub fn users_by_handles_batches(
        &self,
        handles: &[String],
    ) -> BoxStream<'_, Result<Vec<Account>, ClientError>> {
        let batches: Vec<Vec<String>> = unique_handles(handles)
            .chunks(LOOKUP_BATCH_SIZE)
            .map(<[String]>::to_vec)
            .collect();
        stream::iter(batches)
            .then(move |batch| async move { self.get_users_by_handles(&batch).await })
            .boxed()
    }

    /// Distinct ids in batches of 100, looked up lazily.
    pub fn users_by_ids_batches(
        &self,
        ids: &[u64],
    ) -> BoxStream<'_, Result<Vec<Account>, ClientError>> {
        let batches: Vec<Vec<u64>> = unique_ids(ids)
            .chunks(LOOKUP_BATCH_SIZE)
            .map(<[u64]>::to_vec)
            .collect();
        stream::iter(batches)
            .then(move |batch| async move { self.get_users_by_ids(&batch).await })
            .boxed()
    }

    pub async fn lookup_posts_by_ids(&self, ids: &[u64]) -> Result<Vec<Post>, ClientError> {
        let mut posts = Vec::with_capacity(ids.len());
        for chunk in unique_ids(ids).chunks(LOOKUP_BATCH_SIZE) {
            posts.extend(self.get_posts_by_ids(chunk).await?);
        }
        Ok(posts)
    }

    pub async fn get_users_who_like_post(&self, post_id: u64) -> Result<Vec<Account>, ClientError> {
        self.collect_list(UserList::LikingUsers(post_id)).await
    }

    pub async fn get_users_who_retweet_post(
        &self,
        post_id: u64,
    ) -> Result<Vec<Account>, ClientError> {
        self.collect_list(UserList::RetweetedBy(post_id)).await
    }

    /// One item per page of `list`; the next page is requested only when the
    /// stream is polled again.
    pub fn list_pages(&self, list: UserList) -> BoxStream<'_, Result<Vec<Account>, ClientError>> {
        let first: Option<Option<String>> = Some(None);
        stream::try_unfold(first, move |cursor| async move {
            let Some(next_token) = cursor else {
                return Ok::<_, ClientError>(None);
            };
            let response = self.api.list_page(list, next_token.as_deref()).await?;
            self.record_partial_errors(list.name(), &response);
            let cursor = match response.meta.next_token.as_deref() {
                Some(token) if !token.is_empty() => Some(Some(token.to_string())),
                _ => None,
            };
            Ok(Some((accounts_from(&response), cursor)))
        })
        .boxed()
    }

    /// Accounts following the authenticated account, newest first.
    pub async fn cached_followers(&self) -> Result<&AccountList, ClientError> {
        self.followers
            .get_or_try_init(|| async {
                let me = self.me().await?.id;
                Ok(AccountList::new(self.collect_list(UserList::Followers(me)).await?))
            })
            .await
    }

    /// Accounts the authenticated account follows.
    pub async fn cached_following(&self) -> Result<&AccountList, ClientError> {
        self.following
            .get_or_try_init(|| async {
                let me = self.me().await?.id;
                Ok(AccountList::new(self.collect_list(UserList::Following(me)).await?))
            })
            .await
    }

    /// Accounts blocked before this run started.
    pub async fn cached_blocked(&self) -> Result<&AccountList, ClientError> {
        self.blocked
            .get_or_try_init(|| async {
                let me = self.me().await?.id;
                Ok(AccountList::new(self.collect_list(UserList::Blocking(me)).await?))
            })
            .await
    }

    /// Whether `id` was blocked before the run or by this run.
    pub async fn is_blocked(&self, id: u64) -> Result<bool, ClientError> {
        if self.blocked_this_run.lock().contains(&id) {
            return Ok(true);
        }
        Ok(self.cached_blocked().await?.contains(id))
    }

    /// Block one account. Returns the platform's answer to whether the
    /// account is blocked afterwards.
    #[instrument(skip(self))]
    pub async fn block_user(&self, id: u64) -> Result<bool, ClientError> {
        let me = self.me().await?.id;
        let blocked = self.api.block(me, id).await?;
        if blocked {
            self.blocked_this_run.lock().insert(id);
            info!(account.id = id, "Blocked account");
        } else {
            warn!(account.id = id, "Platform did not confirm block");
        }
        Ok(blocked)
    }

    async fn collect_list(&self, list: UserList) -> Result<Vec<Account>, ClientError> {
        let pages: Vec<Vec<Account>> = self.list_pages(list).try_collect().await?;
        debug!(
            list = list.name(),
            pages = pages.len(),
            count = pages.iter().map(Vec::len).sum::<usize>(),
            "Collected account list"
        );
        Ok(pages.concat())
    }

    fn record_partial_errors(&self, operation: &str, response: &ApiResponse) {
        if response.errors.is_empty() {
            return;
        }

        debug!(
            operation,
            count = response.errors.len(),
            "Platform returned partial errors"
        );
        let record = PartialErrors {
            operation: operation.to_string(),
            errors: response.errors.clone(),
        };
        if let Err(e) = self.report.emit_recordable(&record) {
            error!(error = ?e, operation, "Failed to record partial errors");
        }
    }
}

fn accounts_from(response: &ApiResponse) -> Vec<Account> {
    response
        .items()
        .into_iter()
        .map(|user| Account::from_api(user, Some(&response.includes)))
        .filter(Account::is_valid)
        .collect()
}

fn unique_handles(handles: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    handles
        .iter()
        .map(|handle| handle.trim().trim_start_matches('@'))
        .filter(|handle| !handle.is_empty())
        .filter(|handle| seen.insert(handle.to_ascii_lowercase()))
        .map(str::to_string)
        .collect()
}

fn unique_ids(ids: &[u64]) -> Vec<u64> {
    let mut seen = HashSet::new();
    ids.iter()
        .copied()
        .filter(|&id| id != 0 && seen.insert(id))
        .collect()
}

fn too_many(operation: &str, count: usize) -> ClientError {
    ClientError::InvalidArgument {
        operation: operation.to_string(),
        details: format!("{count} items requested, at most {LOOKUP_BATCH_SIZE} allowed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::MemorySink;
    use serde_json::json;
    use std::time::Duration;

    fn fixture(users: u64) -> Fixture {
        Fixture {
            users: (2..2 + users)
                .map(|id| json!({"id": id.to_string(), "username": format!("user{id}")}))
                .collect(),
            followers: (2..2 + users).rev().collect(),
            blocked: vec![5],
            page_size: 50,
            ..Fixture::default()
        }
    }

    fn client(platform: Arc<InMemoryPlatform>) -> (Client, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        (Client::new(platform, sink.clone()), sink)
    }

    #[tokio::test]
    async fn test_lookup_over_limit_is_rejected() {
        let platform = Arc::new(InMemoryPlatform::new(fixture(1)));
        let (client, _) = client(platform.clone());
        let ids: Vec<u64> = (1..=101).collect();

        let result = client.get_users_by_ids(&ids).await;
        assert!(matches!(result, Err(ClientError::InvalidArgument { .. })));
        assert_eq!(platform.call_count("users_by_ids"), 0);
    }

    #[tokio::test]
    async fn test_limit_counts_inputs_before_deduplication() {
        let platform = Arc::new(InMemoryPlatform::new(fixture(3)));
        let (client, _) = client(platform.clone());
        // 101 inputs, only three distinct handles
        let handles: Vec<String> = (0..101).map(|i| format!("user{}", 2 + i % 3)).collect();

        let result = client.get_users_by_handles(&handles).await;
        assert!(matches!(result, Err(ClientError::InvalidArgument { .. })));
        assert_eq!(platform.call_count("users_by_handles"), 0);

        let accounts = client.lookup_users_by_handles(&handles).await.unwrap();
        assert_eq!(accounts.len(), 3);
        assert_eq!(platform.call_count("users_by_handles"), 1);
    }

    #[tokio::test]
    async fn test_large_lookups_are_batched() {
        let platform = Arc::new(InMemoryPlatform::new(fixture(250)));
        let (client, _) = client(platform.clone());
        let ids: Vec<u64> = (2..252).collect();

        let accounts = client.lookup_users_by_ids(&ids).await.unwrap();
        assert_eq!(accounts.len(), 250);
        assert_eq!(platform.call_count("users_by_ids"), 3);
    }

    #[tokio::test]
    async fn test_handles_are_deduplicated_case_insensitively() {
        let platform = Arc::new(InMemoryPlatform::new(fixture(3)));
        let (client, _) = client(platform);
        let handles = vec!["user2".to_string(), "@USER2".to_string(), "user3".to_string()];

        let accounts = client.get_users_by_handles(&handles).await.unwrap();
        assert_eq!(accounts.len(), 2);
    }

    #[tokio::test]
    async fn test_partial_errors_are_recorded() {
        let platform = Arc::new(InMemoryPlatform::new(fixture(1)));
        let (client, sink) = client(platform);
        let handles = vec!["user2".to_string(), "ghost".to_string()];

        let accounts = client.get_users_by_handles(&handles).await.unwrap();
        assert_eq!(accounts.len(), 1);

        let records = sink.of_type("partial_errors");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data["operation"], "get_users_by_handles");
        assert_eq!(records[0].data["errors"][0]["value"], "ghost");
    }

    #[tokio::test]
    async fn test_followers_are_paginated_in_order() {
        let platform = Arc::new(InMemoryPlatform::new(fixture(120)));
        let (client, _) = client(platform.clone());

        let followers = client.cached_followers().await.unwrap();
        assert_eq!(followers.len(), 120);
        assert_eq!(followers.accounts()[0].id, 121);
        assert_eq!(platform.call_count("followers"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_lists_are_single_flight() {
        let platform = Arc::new(
            InMemoryPlatform::new(fixture(10)).with_latency(Duration::from_millis(100)),
        );
        let (client, _) = client(platform.clone());
        let client = Arc::new(client);

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let client = client.clone();
            tasks.spawn(async move { client.cached_followers().await.map(AccountList::len) });
        }
        while let Some(result) = tasks.join_next().await {
            assert_eq!(result.unwrap().unwrap(), 10);
        }

        assert_eq!(platform.call_count("me"), 1);
        assert_eq!(platform.call_count("followers"), 1);
    }

    #[tokio::test]
    async fn test_block_user_marks_blocked() {
        let platform = Arc::new(InMemoryPlatform::new(fixture(5)));
        let (client, _) = client(platform.clone());

        assert!(client.is_blocked(5).await.unwrap());
        assert!(!client.is_blocked(3).await.unwrap());
        assert!(client.block_user(3).await.unwrap());
        assert!(client.is_blocked(3).await.unwrap());
        assert_eq!(platform.block_calls(), vec![3]);
    }
}
