//! Mocked identity and local-storage injection
//!
//! The app reads its signed-in user from local storage on boot. A
//! [`MockState`] is turned into [`StorageWrites`] that are either registered
//! on the context before any page script runs, or written into a live page
//! (which then needs a reload to pick them up).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::driver::BrowserDriver;
use crate::error::{DriverError, InjectionError};
use crate::session::Session;

/// Identity fields stored under the profile key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileIdentity {
    pub id: String,
    pub display_name: String,
    pub email: String,
    pub avatar_id: String,
    pub tribe_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fitness_level: Option<String>,
}

/// Signed-in user as the app expects to find it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockProfile {
    #[serde(flatten)]
    pub identity: ProfileIdentity,

    /// Session token bundle; written under its own key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthBundle>,
}

impl MockProfile {
    /// Profile for a throwaway test account with the given display name
    pub fn test_user(display_name: impl Into<String>) -> Self {
        Self {
            identity: ProfileIdentity {
                id: "mock-id".to_string(),
                display_name: display_name.into(),
                email: "test@example.com".to_string(),
                avatar_id: "male".to_string(),
                tribe_id: "test-tribe".to_string(),
                fitness_level: None,
            },
            auth: None,
        }
    }

    pub fn with_fitness_level(mut self, level: impl Into<String>) -> Self {
        self.identity.fitness_level = Some(level.into());
        self
    }

    /// Attach a mock auth bundle for this profile's id and email
    pub fn with_auth(mut self) -> Self {
        self.auth = Some(AuthBundle::mock(&self.identity.id, &self.identity.email));
        self
    }

    pub fn display_name(&self) -> &str {
        &self.identity.display_name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
}

/// Auth token bundle in the shape the auth client persists it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthBundle {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub refresh_token: String,
    pub user: AuthUser,
}

impl AuthBundle {
    pub fn mock(user_id: &str, email: &str) -> Self {
        Self {
            access_token: "mock-token".to_string(),
            token_type: "bearer".to_string(),
            expires_in: 3600,
            refresh_token: "mock-refresh".to_string(),
            user: AuthUser {
                id: user_id.to_string(),
                email: email.to_string(),
            },
        }
    }
}

/// Everything a scenario wants in local storage before the app boots
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockState {
    #[serde(default)]
    pub profile: Option<MockProfile>,

    /// Skip the onboarding tutorial
    #[serde(default)]
    pub tutorial_seen: bool,

    /// Raw entries written as-is
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl MockState {
    pub fn signed_in(profile: MockProfile) -> Self {
        Self {
            profile: Some(profile),
            tutorial_seen: true,
            extra: BTreeMap::new(),
        }
    }

    pub fn tutorial_only() -> Self {
        Self {
            profile: None,
            tutorial_seen: true,
            extra: BTreeMap::new(),
        }
    }

    pub fn entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Local-storage key names the app reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageKeys {
    pub profile: String,
    pub auth: String,
    pub tutorial: String,
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self {
            profile: "current_user_profile".to_string(),
            auth: "sb-placeholder-auth-token".to_string(),
            tutorial: "tutorial_seen".to_string(),
        }
    }
}

/// Ordered key/value pairs destined for `localStorage`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageWrites(Vec<(String, String)>);

impl StorageWrites {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut writes = Self::new();
        writes.push(key, value);
        writes
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Self-contained script performing every write in order
    pub fn to_script(&self) -> Result<String, serde_json::Error> {
        let mut script = String::from("(() => {\n");
        for (key, value) in &self.0 {
            script.push_str(&format!(
                "  window.localStorage.setItem({}, {});\n",
                serde_json::to_string(key)?,
                serde_json::to_string(value)?
            ));
        }
        script.push_str("})();");
        Ok(script)
    }
}

/// Turns mock state into storage writes and applies them to sessions
#[derive(Debug, Clone, Default)]
pub struct MockStateInjector {
    keys: StorageKeys,
}

impl MockStateInjector {
    pub fn new(keys: StorageKeys) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &StorageKeys {
        &self.keys
    }

    /// Storage writes for a mock state: tutorial flag, profile, auth, extras
    pub fn writes(&self, state: &MockState) -> Result<StorageWrites, InjectionError> {
        let mut writes = StorageWrites::new();

        if state.tutorial_seen {
            writes.push(&self.keys.tutorial, "true");
        }
        if let Some(profile) = &state.profile {
            writes.push(&self.keys.profile, serde_json::to_string(&profile.identity)?);
            if let Some(auth) = &profile.auth {
                writes.push(&self.keys.auth, serde_json::to_string(auth)?);
            }
        }
        for (key, value) in &state.extra {
            writes.push(key, value);
        }

        Ok(writes)
    }

    /// Write into the live page of a session. The app only sees the new
    /// values after a reload.
    pub async fn apply_post_load(
        &self,
        session: &Session,
        writes: &StorageWrites,
    ) -> Result<(), InjectionError> {
        if session.is_released() {
            return Err(InjectionError::ContextUnavailable);
        }

        debug!("Writing {} storage entries into session {}", writes.len(), session.id());

        session
            .driver()
            .write_storage(session.page(), writes)
            .await
            .map_err(|e| match e {
                DriverError::Closed | DriverError::NotRunning => InjectionError::ContextUnavailable,
                other => InjectionError::Evaluate(other),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_uses_app_field_names() {
        let profile = MockProfile::test_user("TestPanda").with_fitness_level("beginner");
        let json: serde_json::Value = serde_json::to_value(&profile.identity).unwrap();

        assert_eq!(json["displayName"], "TestPanda");
        assert_eq!(json["avatarId"], "male");
        assert_eq!(json["tribeId"], "test-tribe");
        assert_eq!(json["fitnessLevel"], "beginner");
        assert!(json.get("display_name").is_none());
    }

    #[test]
    fn test_writes_order_and_keys() {
        let injector = MockStateInjector::default();
        let state = MockState::signed_in(MockProfile::test_user("NewUser").with_auth()).entry("theme", "dark");

        let writes = injector.writes(&state).unwrap();
        let keys: Vec<&str> = writes.iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec!["tutorial_seen", "current_user_profile", "sb-placeholder-auth-token", "theme"]
        );
        assert_eq!(writes.get("tutorial_seen"), Some("true"));

        let auth: serde_json::Value = serde_json::from_str(writes.get("sb-placeholder-auth-token").unwrap()).unwrap();
        assert_eq!(auth["access_token"], "mock-token");
        assert_eq!(auth["token_type"], "bearer");
        assert_eq!(auth["expires_in"], 3600);
        assert_eq!(auth["user"]["id"], "mock-id");
    }

    #[test]
    fn test_custom_keys() {
        let injector = MockStateInjector::new(StorageKeys {
            profile: "me".to_string(),
            ..Default::default()
        });
        let writes = injector.writes(&MockState::signed_in(MockProfile::test_user("A"))).unwrap();
        assert!(writes.get("me").is_some());
        assert!(writes.get("current_user_profile").is_none());
    }

    #[test]
    fn test_script_escapes_values() {
        let writes = StorageWrites::single("k", "it's \"quoted\"\n</script>");
        let script = writes.to_script().unwrap();
        assert!(script.contains(r#"setItem("k", "it's \"quoted\"\n</script>")"#));
        assert!(script.starts_with("(() => {"));
    }

    #[test]
    fn test_tutorial_only_has_no_profile() {
        let writes = MockStateInjector::default().writes(&MockState::tutorial_only()).unwrap();
        assert_eq!(writes.len(), 1);
    }
}
