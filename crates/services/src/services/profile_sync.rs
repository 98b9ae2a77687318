//! Keeps the `app_users` profile row in step with the signed-in auth user.

use db::models::{
    app_user::{Session, UpsertAppUser},
    collection::Collection,
};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use super::record_store::RecordStore;

pub const DISPLAY_NAME_MAX_LENGTH: usize = 120;
pub const PROFILE_SYNC_ERROR_PREFIX: &str = "Profile sync failed";

const APP_USERS_CONFLICT_TARGET: &str = "auth_user_id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileSyncOutcome {
    Synced,
    Failed { message: String },
}

impl ProfileSyncOutcome {
    pub fn is_synced(&self) -> bool {
        matches!(self, Self::Synced)
    }
}

/// Drop ASCII control characters, trim, and clamp to
/// [`DISPLAY_NAME_MAX_LENGTH`] characters. Blank input yields `None`.
pub fn sanitize_display_name(candidate: &str) -> Option<String> {
    let cleaned: String = candidate
        .chars()
        .filter(|c| !matches!(c, '\u{0000}'..='\u{001F}' | '\u{007F}'))
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(DISPLAY_NAME_MAX_LENGTH).collect())
}

/// Metadata values are loosely typed; scalars are accepted as text.
fn metadata_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// First usable name among `full_name`, `name` and the account email
pub fn derive_display_name(session: &Session) -> Option<String> {
    let user = &session.user;
    let candidates = [
        user.metadata("full_name").and_then(metadata_text),
        user.metadata("name").and_then(metadata_text),
        user.email.clone(),
    ];

    candidates
        .into_iter()
        .flatten()
        .find_map(|candidate| sanitize_display_name(&candidate))
}

/// Create or refresh the profile row for `auth_user_id`. Failures are
/// reported in the outcome rather than returned as errors, so sign-in can
/// carry on without a profile.
pub async fn ensure_app_user_profile(
    store: &dyn RecordStore,
    auth_user_id: Uuid,
    display_name: Option<String>,
) -> ProfileSyncOutcome {
    let row = UpsertAppUser {
        auth_user_id,
        display_name: display_name.filter(|name| !name.is_empty()),
    };

    let payload = match serde_json::to_value(&row) {
        Ok(payload) => payload,
        Err(e) => return failed(&e.to_string()),
    };

    match store
        .upsert(Collection::AppUsers, payload, APP_USERS_CONFLICT_TARGET)
        .await
    {
        Ok(()) => {
            debug!(auth_user_id = %auth_user_id, "App user profile synced");
            ProfileSyncOutcome::Synced
        }
        Err(e) => {
            warn!(auth_user_id = %auth_user_id, error = %e, "App user profile sync failed");
            failed(&e.to_string())
        }
    }
}

fn failed(reason: &str) -> ProfileSyncOutcome {
    let reason = if reason.trim().is_empty() {
        "Unknown error"
    } else {
        reason
    };
    ProfileSyncOutcome::Failed {
        message: format!("{PROFILE_SYNC_ERROR_PREFIX}: {reason}"),
    }
}

pub fn is_profile_sync_error(message: Option<&str>) -> bool {
    message.is_some_and(|m| m.starts_with(PROFILE_SYNC_ERROR_PREFIX))
}

#[cfg(test)]
mod tests {
    use db::models::app_user::AuthUser;
    use serde_json::json;

    use super::*;
    use crate::services::{
        record_store::StoreError,
        test_support::{StoreCall, StubStore},
    };

    fn session(metadata: Value, email: Option<&str>) -> Session {
        let user_metadata = match metadata {
            Value::Object(map) => map,
            _ => Default::default(),
        };
        Session {
            user: AuthUser {
                id: Uuid::new_v4(),
                email: email.map(str::to_string),
                user_metadata,
            },
        }
    }

    #[test]
    fn test_sanitize_strips_control_characters_and_trims() {
        assert_eq!(sanitize_display_name("\u{0007}  Taylor\n"), Some("Taylor".to_string()));
        assert_eq!(sanitize_display_name("   "), None);
        assert_eq!(sanitize_display_name("\u{007F}\t"), None);
        assert_eq!(sanitize_display_name(""), None);
    }

    #[test]
    fn test_sanitize_clamps_length() {
        let long = "a".repeat(DISPLAY_NAME_MAX_LENGTH + 50);
        let sanitized = sanitize_display_name(&long).unwrap();
        assert_eq!(sanitized.chars().count(), DISPLAY_NAME_MAX_LENGTH);

        // Counted in characters, not bytes
        let accented = "é".repeat(DISPLAY_NAME_MAX_LENGTH + 1);
        assert_eq!(
            sanitize_display_name(&accented).unwrap().chars().count(),
            DISPLAY_NAME_MAX_LENGTH
        );
    }

    #[test]
    fn test_derive_prefers_full_name_then_name_then_email() {
        let both = session(
            json!({ "full_name": "Coach Taylor", "name": "Backup Name" }),
            Some("coach@example.com"),
        );
        assert_eq!(derive_display_name(&both), Some("Coach Taylor".to_string()));

        let name_only = session(json!({ "name": "Fallback Coach" }), Some("coach@example.com"));
        assert_eq!(derive_display_name(&name_only), Some("Fallback Coach".to_string()));

        let email_only = session(json!({}), Some("coach@example.com"));
        assert_eq!(derive_display_name(&email_only), Some("coach@example.com".to_string()));
    }

    #[test]
    fn test_derive_skips_unusable_candidates() {
        let blank = session(json!({ "full_name": "   " }), None);
        assert_eq!(derive_display_name(&blank), None);

        let numeric = session(json!({ "full_name": null, "name": 12345 }), None);
        assert_eq!(derive_display_name(&numeric), Some("12345".to_string()));
    }

    #[tokio::test]
    async fn test_upsert_omits_missing_display_name() {
        let store = StubStore::new();
        store.push_upsert(Ok(()));
        let user_id = Uuid::new_v4();

        let outcome = ensure_app_user_profile(store.as_ref(), user_id, None).await;

        assert!(outcome.is_synced());
        assert_eq!(
            store.calls(),
            vec![StoreCall::Upsert(
                Collection::AppUsers,
                json!({ "auth_user_id": user_id }),
                "auth_user_id".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_upsert_includes_display_name() {
        let store = StubStore::new();
        store.push_upsert(Ok(()));
        let user_id = Uuid::new_v4();

        ensure_app_user_profile(store.as_ref(), user_id, Some("Coach Taylor".to_string())).await;

        assert_eq!(
            store.calls(),
            vec![StoreCall::Upsert(
                Collection::AppUsers,
                json!({ "auth_user_id": user_id, "display_name": "Coach Taylor" }),
                "auth_user_id".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_store_failure_is_reported_with_prefix() {
        let store = StubStore::new();
        store.push_upsert(Err(StoreError::Postgrest {
            status: 409,
            code: Some("23505".to_string()),
            message: "duplicate key".to_string(),
            details: None,
            hint: None,
        }));

        let outcome = ensure_app_user_profile(store.as_ref(), Uuid::new_v4(), None).await;

        let ProfileSyncOutcome::Failed { message } = outcome else {
            panic!("expected a failed profile sync");
        };
        assert_eq!(message, "Profile sync failed: duplicate key");
        assert!(is_profile_sync_error(Some(&message)));
    }

    #[test]
    fn test_is_profile_sync_error() {
        assert!(!is_profile_sync_error(None));
        assert!(!is_profile_sync_error(Some("Unable to load teams. Please try again.")));
        assert!(is_profile_sync_error(Some("Profile sync failed: Unknown error")));
    }
}
