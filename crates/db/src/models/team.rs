use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

/// Columns requested on every read and on every write that returns the row
pub const TEAM_SELECT_COLUMNS: &str = "id, owner_id, sport_id, name, notes, created_at, updated_at";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TeamPayloadError {
    #[error("A team id is required.")]
    MissingTeamId,
    #[error("A team sport is required.")]
    MissingSportId,
}

/// Team as consumed by the rest of the app
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct TeamRecord {
    pub id: Uuid,
    pub owner_id: Uuid, // Set by row-level security on insert
    pub sport_id: Uuid, // Foreign key to Sport
    pub name: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Raw `teams` row in the store's snake_case projection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamRow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub sport_id: Uuid,
    pub name: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<TeamRow> for TeamRecord {
    fn from(row: TeamRow) -> Self {
        Self {
            id: row.id,
            owner_id: row.owner_id,
            sport_id: row.sport_id,
            name: row.name,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct CreateTeam {
    pub name: String,
    pub sport_id: Uuid,
    #[serde(default)]
    #[ts(optional)]
    pub notes: Option<String>,
}

/// Insert body for `teams`. `owner_id` is filled in by the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamInsertRow {
    pub name: String,
    pub sport_id: Uuid,
    pub notes: Option<String>, // Always sent, `null` when absent
}

impl CreateTeam {
    pub fn new(name: impl Into<String>, sport_id: Uuid) -> Self {
        Self {
            name: name.into(),
            sport_id,
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn validate(&self) -> Result<(), TeamPayloadError> {
        if self.sport_id.is_nil() {
            return Err(TeamPayloadError::MissingSportId);
        }
        Ok(())
    }

    pub fn to_insert_row(&self) -> TeamInsertRow {
        TeamInsertRow {
            name: self.name.clone(),
            sport_id: self.sport_id,
            notes: self.notes.clone(),
        }
    }
}

/// Partial update. `None` leaves a field untouched; for `notes`,
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTeam {
    pub team_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub sport_id: Option<Uuid>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "serde_with::rust::double_option"
    )]
    #[ts(optional, as = "Option<String>")]
    pub notes: Option<Option<String>>,
}

impl UpdateTeam {
    pub fn new(team_id: Uuid) -> Self {
        Self {
            team_id,
            ..Default::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn sport_id(mut self, sport_id: Uuid) -> Self {
        self.sport_id = Some(sport_id);
        self
    }

    pub fn notes(mut self, notes: Option<String>) -> Self {
        self.notes = Some(notes);
        self
    }

    pub fn validate(&self) -> Result<(), TeamPayloadError> {
        if self.team_id.is_nil() {
            return Err(TeamPayloadError::MissingTeamId);
        }
        if self.sport_id.is_some_and(|sport_id| sport_id.is_nil()) {
            return Err(TeamPayloadError::MissingSportId);
        }
        Ok(())
    }

    /// Fields explicitly present in the payload, nothing else
    pub fn patch(&self) -> TeamPatch {
        TeamPatch {
            name: self.name.clone(),
            sport_id: self.sport_id,
            notes: self.notes.clone(),
        }
    }
}

/// Update body for `teams`; omitted fields are not serialized at all
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TeamPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sport_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
}

impl TeamPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.sport_id.is_none() && self.notes.is_none()
    }

    pub fn apply_to(&self, team: &TeamRecord) -> TeamRecord {
        let mut patched = team.clone();
        if let Some(name) = &self.name {
            patched.name = name.clone();
        }
        if let Some(sport_id) = self.sport_id {
            patched.sport_id = sport_id;
        }
        if let Some(notes) = &self.notes {
            patched.notes = notes.clone();
        }
        patched
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct DeleteTeam {
    pub team_id: Uuid,
}

impl DeleteTeam {
    pub fn new(team_id: Uuid) -> Self {
        Self { team_id }
    }

    pub fn validate(&self) -> Result<(), TeamPayloadError> {
        if self.team_id.is_nil() {
            return Err(TeamPayloadError::MissingTeamId);
        }
        Ok(())
    }
}
