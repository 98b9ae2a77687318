//! Cached reads of team records, and the background refresher that re-fetches
//! stale keys while someone is subscribed to them.

use std::{sync::Arc, time::Duration};

use backon::{ExponentialBuilder, Retryable};
use db::models::{
    collection::Collection,
    team::{TEAM_SELECT_COLUMNS, TeamRecord, TeamRow},
};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    app_error::AppError,
    query_cache::{CacheEvent, QueryCache, QueryData, QueryKey, RefreshOutcome},
    record_store::{RecordStore, StoreError},
};

const LOAD_TEAMS_ERROR: &str = "Unable to load teams. Please try again.";
const LOAD_TEAM_ERROR: &str = "Unable to load team details. Please try again.";

pub fn teams_list_key() -> QueryKey {
    QueryKey::list(Collection::Teams)
}

pub fn team_detail_key(team_id: Uuid) -> QueryKey {
    QueryKey::detail(Collection::Teams, team_id)
}

pub(crate) fn decode_team(value: Value) -> Result<TeamRecord, StoreError> {
    serde_json::from_value::<TeamRow>(value)
        .map(TeamRecord::from)
        .map_err(|e| StoreError::Serde(e.to_string()))
}

/// Backoff applied to read refreshes. Mutations are never retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_times: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_times: 3,
            min_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_times: 0,
            ..Default::default()
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_times)
            .with_jitter()
    }
}

#[derive(Clone)]
pub struct TeamQueries {
    store: Arc<dyn RecordStore>,
    cache: Arc<QueryCache<TeamRecord>>,
    retry: RetryPolicy,
}

impl TeamQueries {
    pub fn new(store: Arc<dyn RecordStore>, cache: Arc<QueryCache<TeamRecord>>) -> Self {
        Self {
            store,
            cache,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn cache(&self) -> &Arc<QueryCache<TeamRecord>> {
        &self.cache
    }

    /// All teams visible to the current user, oldest first
    pub async fn list(&self) -> Result<Vec<TeamRecord>, AppError> {
        if let Some(teams) = self
            .cache
            .get_fresh(&teams_list_key())
            .and_then(QueryData::into_list)
        {
            return Ok(teams);
        }
        self.refresh_list().await
    }

    /// A single team; `None` when it does not exist or `team_id` is nil
    pub async fn get(&self, team_id: Uuid) -> Result<Option<TeamRecord>, AppError> {
        if team_id.is_nil() {
            return Ok(None);
        }
        if let Some(data) = self.cache.get_fresh(&team_detail_key(team_id)) {
            return Ok(data.into_record());
        }
        self.refresh_detail(team_id).await
    }

    pub async fn refresh_list(&self) -> Result<Vec<TeamRecord>, AppError> {
        let key = teams_list_key();
        let fetcher = async {
            let rows = (|| async {
                self.store
                    .select_all(Collection::Teams, TEAM_SELECT_COLUMNS, "created_at")
                    .await
            })
            .retry(self.retry.backoff())
            .when(StoreError::should_retry)
            .notify(|e, dur| {
                warn!(
                    "Loading teams failed, retrying after {:.2}s: {}",
                    dur.as_secs_f64(),
                    e
                )
            })
            .await?;

            let teams = rows
                .into_iter()
                .map(decode_team)
                .collect::<Result<Vec<_>, _>>()?;
            Ok::<_, StoreError>(QueryData::List(teams))
        };

        let outcome = self
            .cache
            .fetch(key.clone(), fetcher)
            .await
            .map_err(|e| AppError::from_store(e, LOAD_TEAMS_ERROR))?;

        let data = match outcome {
            RefreshOutcome::Stored(data) => Some(data),
            RefreshOutcome::Cancelled => self.cache.get(&key),
        };
        Ok(data.and_then(QueryData::into_list).unwrap_or_default())
    }

    pub async fn refresh_detail(&self, team_id: Uuid) -> Result<Option<TeamRecord>, AppError> {
        let key = team_detail_key(team_id);
        let fetcher = async {
            let row = (|| async {
                self.store
                    .select_one(Collection::Teams, TEAM_SELECT_COLUMNS, team_id)
                    .await
            })
            .retry(self.retry.backoff())
            .when(StoreError::should_retry)
            .notify(|e, dur| {
                warn!(
                    team_id = %team_id,
                    "Loading team failed, retrying after {:.2}s: {}",
                    dur.as_secs_f64(),
                    e
                )
            })
            .await?;

            Ok::<_, StoreError>(QueryData::Record(row.map(decode_team).transpose()?))
        };

        let outcome = self
            .cache
            .fetch(key.clone(), fetcher)
            .await
            .map_err(|e| AppError::from_store(e, LOAD_TEAM_ERROR))?;

        let data = match outcome {
            RefreshOutcome::Stored(data) => Some(data),
            RefreshOutcome::Cancelled => self.cache.get(&key),
        };
        Ok(data.and_then(QueryData::into_record))
    }

    async fn refresh_key(&self, key: &QueryKey) -> Result<(), AppError> {
        match key {
            QueryKey::List {
                collection: Collection::Teams,
            } => self.refresh_list().await.map(|_| ()),
            QueryKey::Detail {
                collection: Collection::Teams,
                id,
            } => self.refresh_detail(*id).await.map(|_| ()),
            _ => Ok(()),
        }
    }

    /// Spawn the background refresher for stale team keys
    pub fn spawn_refresher(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let mut events = self.cache.events();
        tokio::spawn(async move {
            info!("Starting team cache refresher");
            loop {
                match events.recv().await {
                    Ok(CacheEvent::Stale(key)) => {
                        if self.cache.subscriber_count(&key) == 0 {
                            debug!(key = %key, "Stale key has no subscribers, skipping refresh");
                            continue;
                        }
                        if let Err(e) = self.refresh_key(&key).await {
                            error!(key = %key, error = %e, "Background refresh failed");
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Team cache refresher lagged behind cache events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
