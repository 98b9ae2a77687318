//! Create, update and delete of team records with optimistic cache updates.
//!
//! Update and delete write their predicted result into the cache before the
//! store answers. On failure every touched key is restored from its snapshot;
//! on success the cache is reconciled with the row the store returned. The
//! affected keys are marked stale once the mutation settles either way.
//!
//! Two mutations touching the same list key may race; whichever settles last
//! decides the list content until the next refresh.

use std::sync::Arc;

use db::models::{
    collection::Collection,
    team::{CreateTeam, DeleteTeam, TEAM_SELECT_COLUMNS, TeamPatch, TeamRecord, UpdateTeam},
};
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    app_error::AppError,
    query_cache::{QueryCache, QueryData},
    record_store::{RecordStore, StoreError},
    team_queries::{decode_team, team_detail_key, teams_list_key},
};

const CREATE_TEAM_ERROR: &str = "Unable to create team. Please try again.";
const UPDATE_TEAM_ERROR: &str = "Unable to update team. Please try again.";
const REFRESH_TEAM_ERROR: &str = "Unable to refresh team. Please try again.";
const DELETE_TEAM_ERROR: &str = "Unable to delete team. Please try again.";
const TEAM_NOT_FOUND: &str = "Team not found.";

#[derive(Clone)]
pub struct TeamMutations {
    store: Arc<dyn RecordStore>,
    cache: Arc<QueryCache<TeamRecord>>,
}

impl TeamMutations {
    pub fn new(store: Arc<dyn RecordStore>, cache: Arc<QueryCache<TeamRecord>>) -> Self {
        Self { store, cache }
    }

    /// Insert a team. There is no optimistic phase: the id is only known once
    /// the store answers.
    pub async fn create(&self, payload: CreateTeam) -> Result<TeamRecord, AppError> {
        payload.validate().map_err(AppError::validation)?;

        let list_key = teams_list_key();
        self.cache.cancel_in_flight(&list_key).await;
        let previous_teams = self.cache.snapshot(&list_key);

        let result = self.insert_team(&payload).await;

        let outcome = match result {
            Ok(team) => {
                self.cache.update(list_key.clone(), |existing| {
                    let mut teams = existing.and_then(QueryData::into_list).unwrap_or_default();
                    teams.push(team.clone());
                    QueryData::List(teams)
                });
                self.cache
                    .set(team_detail_key(team.id), QueryData::Record(Some(team.clone())));
                info!(team_id = %team.id, "Team created");
                Ok(team)
            }
            Err(e) => {
                warn!(error = %e, "Team create failed, restoring cache");
                self.cache.restore(previous_teams);
                Err(AppError::from_store(e, CREATE_TEAM_ERROR))
            }
        };

        self.cache.mark_stale(&list_key);
        if let Ok(team) = &outcome {
            self.cache.mark_stale(&team_detail_key(team.id));
        }
        outcome
    }

    /// Apply the fields present in `payload`. A payload without fields writes
    /// nothing and re-reads the current row instead.
    pub async fn update(&self, payload: UpdateTeam) -> Result<TeamRecord, AppError> {
        payload.validate().map_err(AppError::validation)?;

        let team_id = payload.team_id;
        let list_key = teams_list_key();
        let detail_key = team_detail_key(team_id);

        futures::join!(
            self.cache.cancel_in_flight(&list_key),
            self.cache.cancel_in_flight(&detail_key),
        );

        let previous_teams = self.cache.snapshot(&list_key);
        let previous_detail = self.cache.snapshot(&detail_key);

        let patch = payload.patch();
        if !patch.is_empty() {
            self.apply_optimistic_patch(team_id, &patch);
        }

        let result = if patch.is_empty() {
            self.refetch_team(team_id).await
        } else {
            self.write_patch(team_id, &patch)
                .await
                .map_err(|e| AppError::from_store(e, UPDATE_TEAM_ERROR))
        };

        let outcome = match result {
            Ok(team) => {
                self.reconcile(&team);
                info!(team_id = %team_id, refresh_only = patch.is_empty(), "Team updated");
                Ok(team)
            }
            Err(e) => {
                warn!(team_id = %team_id, error = %e, "Team update failed, rolling back cache");
                self.cache.restore(previous_teams);
                self.cache.restore(previous_detail);
                Err(e)
            }
        };

        self.cache.mark_stale(&list_key);
        self.cache.mark_stale(&detail_key);
        outcome
    }

    /// Remove a team. The list entry and detail entry disappear from the cache
    /// before the store is asked.
    pub async fn delete(&self, payload: DeleteTeam) -> Result<(), AppError> {
        payload.validate().map_err(AppError::validation)?;

        let team_id = payload.team_id;
        let list_key = teams_list_key();
        let detail_key = team_detail_key(team_id);

        futures::join!(
            self.cache.cancel_in_flight(&list_key),
            self.cache.cancel_in_flight(&detail_key),
        );

        let previous_teams = self.cache.snapshot(&list_key);
        let previous_detail = self.cache.snapshot(&detail_key);

        if previous_teams.data().is_some() {
            self.cache.update(list_key.clone(), |existing| {
                let mut teams = existing.and_then(QueryData::into_list).unwrap_or_default();
                teams.retain(|team| team.id != team_id);
                QueryData::List(teams)
            });
        }
        self.cache.remove(&detail_key);

        let outcome = match self.store.delete(Collection::Teams, team_id).await {
            Ok(()) => {
                info!(team_id = %team_id, "Team deleted");
                Ok(())
            }
            Err(e) => {
                warn!(team_id = %team_id, error = %e, "Team delete failed, rolling back cache");
                self.cache.restore(previous_teams);
                self.cache.restore(previous_detail);
                Err(AppError::from_store(e, DELETE_TEAM_ERROR))
            }
        };

        self.cache.mark_stale(&list_key);
        self.cache.mark_stale(&detail_key);
        outcome
    }

    async fn insert_team(&self, payload: &CreateTeam) -> Result<TeamRecord, StoreError> {
        let body = serde_json::to_value(payload.to_insert_row())
            .map_err(|e| StoreError::Serde(e.to_string()))?;
        let row = self
            .store
            .insert(Collection::Teams, TEAM_SELECT_COLUMNS, body)
            .await?;
        decode_team(row)
    }

    async fn write_patch(&self, team_id: Uuid, patch: &TeamPatch) -> Result<TeamRecord, StoreError> {
        let body = serde_json::to_value(patch).map_err(|e| StoreError::Serde(e.to_string()))?;
        let row = self
            .store
            .update(Collection::Teams, TEAM_SELECT_COLUMNS, team_id, body)
            .await?;
        decode_team(row)
    }

    async fn refetch_team(&self, team_id: Uuid) -> Result<TeamRecord, AppError> {
        let row = self
            .store
            .select_one(Collection::Teams, TEAM_SELECT_COLUMNS, team_id)
            .await
            .map_err(|e| AppError::from_store(e, REFRESH_TEAM_ERROR))?
            .ok_or_else(|| AppError::new(TEAM_NOT_FOUND))?;
        decode_team(row).map_err(|e| AppError::from_store(e, REFRESH_TEAM_ERROR))
    }

    /// Patch only entries that are already cached
    fn apply_optimistic_patch(&self, team_id: Uuid, patch: &TeamPatch) {
        let list_key = teams_list_key();
        if self.cache.get(&list_key).is_some() {
            self.cache.update(list_key, |existing| {
                let mut teams = existing.and_then(QueryData::into_list).unwrap_or_default();
                for team in teams.iter_mut().filter(|team| team.id == team_id) {
                    *team = patch.apply_to(team);
                }
                QueryData::List(teams)
            });
        }

        let detail_key = team_detail_key(team_id);
        if let Some(current) = self.cache.get(&detail_key).and_then(QueryData::into_record) {
            self.cache
                .set(detail_key, QueryData::Record(Some(patch.apply_to(&current))));
        }
    }

    /// Overwrite the cached copies of `team` with the store's version
    fn reconcile(&self, team: &TeamRecord) {
        let list_key = teams_list_key();
        if self.cache.get(&list_key).is_some() {
            self.cache.update(list_key, |existing| {
                let mut teams = existing.and_then(QueryData::into_list).unwrap_or_default();
                for cached in teams.iter_mut().filter(|cached| cached.id == team.id) {
                    *cached = team.clone();
                }
                QueryData::List(teams)
            });
        }
        self.cache
            .set(team_detail_key(team.id), QueryData::Record(Some(team.clone())));
    }
}
