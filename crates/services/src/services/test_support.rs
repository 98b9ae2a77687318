//! Scripted [`RecordStore`] for service tests.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use db::models::{collection::Collection, team::TeamRecord};
use serde_json::{Value, json};
use uuid::Uuid;

use super::record_store::{RecordStore, StoreError};

#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    SelectAll(Collection),
    SelectOne(Collection, Uuid),
    Insert(Collection, Value),
    Update(Collection, Uuid, Value),
    Delete(Collection, Uuid),
    Upsert(Collection, Value, String),
}

type CallHook = Box<dyn Fn(&StoreCall) + Send + Sync>;

#[derive(Default)]
pub struct StubStore {
    calls: Mutex<Vec<StoreCall>>,
    select_all: Mutex<VecDeque<Result<Vec<Value>, StoreError>>>,
    select_one: Mutex<VecDeque<Result<Option<Value>, StoreError>>>,
    writes: Mutex<VecDeque<Result<Value, StoreError>>>,
    deletes: Mutex<VecDeque<Result<(), StoreError>>>,
    upserts: Mutex<VecDeque<Result<(), StoreError>>>,
    on_call: Mutex<Option<CallHook>>,
}

impl StubStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_select_all(&self, result: Result<Vec<Value>, StoreError>) {
        self.select_all.lock().unwrap().push_back(result);
    }

    pub fn push_select_one(&self, result: Result<Option<Value>, StoreError>) {
        self.select_one.lock().unwrap().push_back(result);
    }

    /// Response for the next insert or update
    pub fn push_write(&self, result: Result<Value, StoreError>) {
        self.writes.lock().unwrap().push_back(result);
    }

    pub fn push_delete(&self, result: Result<(), StoreError>) {
        self.deletes.lock().unwrap().push_back(result);
    }

    pub fn push_upsert(&self, result: Result<(), StoreError>) {
        self.upserts.lock().unwrap().push_back(result);
    }

    /// Run `hook` when a call arrives, before its scripted result is returned
    pub fn on_call(&self, hook: impl Fn(&StoreCall) + Send + Sync + 'static) {
        *self.on_call.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: StoreCall) {
        if let Some(hook) = self.on_call.lock().unwrap().as_ref() {
            hook(&call);
        }
        self.calls.lock().unwrap().push(call);
    }

    fn next<T>(queue: &Mutex<VecDeque<Result<T, StoreError>>>) -> Result<T, StoreError> {
        queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(StoreError::Transport("unscripted store call".to_string())))
    }
}

#[async_trait]
impl RecordStore for StubStore {
    async fn select_all(
        &self,
        collection: Collection,
        _columns: &str,
        _order_by: &str,
    ) -> Result<Vec<Value>, StoreError> {
        self.record(StoreCall::SelectAll(collection));
        Self::next(&self.select_all)
    }

    async fn select_one(
        &self,
        collection: Collection,
        _columns: &str,
        id: Uuid,
    ) -> Result<Option<Value>, StoreError> {
        self.record(StoreCall::SelectOne(collection, id));
        Self::next(&self.select_one)
    }

    async fn insert(
        &self,
        collection: Collection,
        _columns: &str,
        payload: Value,
    ) -> Result<Value, StoreError> {
        self.record(StoreCall::Insert(collection, payload));
        Self::next(&self.writes)
    }

    async fn update(
        &self,
        collection: Collection,
        _columns: &str,
        id: Uuid,
        patch: Value,
    ) -> Result<Value, StoreError> {
        self.record(StoreCall::Update(collection, id, patch));
        Self::next(&self.writes)
    }

    async fn delete(&self, collection: Collection, id: Uuid) -> Result<(), StoreError> {
        self.record(StoreCall::Delete(collection, id));
        Self::next(&self.deletes)
    }

    async fn upsert(
        &self,
        collection: Collection,
        payload: Value,
        on_conflict: &str,
    ) -> Result<(), StoreError> {
        self.record(StoreCall::Upsert(collection, payload, on_conflict.to_string()));
        Self::next(&self.upserts)
    }
}

/// Route service logs to the test output; `RUST_LOG` overrides the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn forbidden() -> StoreError {
    StoreError::Postgrest {
        status: 403,
        code: Some("42501".to_string()),
        message: "Forbidden".to_string(),
        details: None,
        hint: None,
    }
}

pub fn timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse().unwrap()
}

pub fn team(name: &str) -> TeamRecord {
    TeamRecord {
        id: Uuid::new_v4(),
        owner_id: Uuid::new_v4(),
        sport_id: Uuid::new_v4(),
        name: name.to_string(),
        notes: Some("Focus on defensive drills".to_string()),
        created_at: timestamp("2024-01-01T00:00:00Z"),
        updated_at: timestamp("2024-01-02T00:00:00Z"),
    }
}

/// Store-side row for `team`
pub fn row(team: &TeamRecord) -> Value {
    json!({
        "id": team.id,
        "owner_id": team.owner_id,
        "sport_id": team.sport_id,
        "name": team.name,
        "notes": team.notes,
        "created_at": team.created_at,
        "updated_at": team.updated_at,
    })
}
