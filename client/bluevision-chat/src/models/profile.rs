use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Label shown for an author whose profile could not be resolved
pub const PLACEHOLDER_LABEL: &str = "Unknown user";

/// Profile row; `id` is the auth user id of the owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub username: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Partial update of the signed-in user's profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// What the presentation layer needs to draw an author
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorDisplay {
    pub username: String,
    pub avatar_url: Option<String>,
    pub initial: char,
}

impl AuthorDisplay {
    pub fn new(username: impl Into<String>, avatar_url: Option<String>) -> Self {
        let username = username.into();
        let initial = initial_for(&username);
        Self {
            username,
            avatar_url,
            initial,
        }
    }

    pub fn placeholder() -> Self {
        Self::new(PLACEHOLDER_LABEL, None)
    }

    pub fn is_placeholder(&self) -> bool {
        self.username == PLACEHOLDER_LABEL && self.avatar_url.is_none()
    }
}

impl From<&Profile> for AuthorDisplay {
    fn from(profile: &Profile) -> Self {
        AuthorDisplay::new(profile.username.clone(), profile.avatar_url.clone())
    }
}

/// Uppercased first alphanumeric character of a label, falling back to the
/// placeholder's initial
pub fn initial_for(label: &str) -> char {
    label
        .chars()
        .find(|c| c.is_alphanumeric())
        .or_else(|| PLACEHOLDER_LABEL.chars().next())
        .and_then(|c| c.to_uppercase().next())
        .unwrap_or('U')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_for() {
        assert_eq!(initial_for("alice"), 'A');
        assert_eq!(initial_for("  _élodie"), 'É');
        assert_eq!(initial_for(""), 'U');
        assert_eq!(initial_for("!!!"), 'U');
    }

    #[test]
    fn test_placeholder() {
        let display = AuthorDisplay::placeholder();
        assert_eq!(display.username, PLACEHOLDER_LABEL);
        assert_eq!(display.initial, 'U');
        assert!(display.is_placeholder());
    }

    #[test]
    fn test_profile_update_skips_unset_fields() {
        let update = ProfileUpdate {
            username: Some("neo".into()),
            avatar_url: None,
        };
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            serde_json::json!({ "username": "neo" })
        );
    }
}
