use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Upsert body for `app_users`, keyed on `auth_user_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpsertAppUser {
    pub auth_user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Authenticated user as reported by the auth provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Map<String, Value>,
}

impl AuthUser {
    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.user_metadata.get(key)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user: AuthUser,
}
