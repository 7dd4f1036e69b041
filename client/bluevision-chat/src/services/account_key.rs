//! Account key files
//!
//! Registration hands the user a random secret key, which is also the
//! password of the account. It is exported as a small JSON file
//! (`<pseudo>_bluevision.bvk`) the user keeps to sign in again.

use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const SECRET_KEY_LEN: usize = 32;
pub const KEY_FILE_VERSION: &str = "1.0";
pub const KEY_FILE_SUFFIX: &str = "_bluevision.bvk";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountKey {
    pub pseudo: String,
    pub secret_key: String,
    pub created_at: DateTime<Utc>,
    pub version: String,
}

/// Random alphanumeric secret of [`SECRET_KEY_LEN`] characters
pub fn generate_secret_key() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_KEY_LEN)
        .map(char::from)
        .collect()
}

impl AccountKey {
    pub fn generate(pseudo: &str) -> AppResult<Self> {
        let pseudo = pseudo.trim();
        if pseudo.is_empty() {
            return Err(AppError::Validation("pseudo must not be empty".into()));
        }
        Ok(Self {
            pseudo: pseudo.to_string(),
            secret_key: generate_secret_key(),
            created_at: Utc::now(),
            version: KEY_FILE_VERSION.to_string(),
        })
    }

    pub fn file_name(&self) -> String {
        format!("{}{KEY_FILE_SUFFIX}", self.pseudo)
    }

    /// Pretty-printed file contents
    pub fn to_json(&self) -> AppResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| AppError::Validation(format!("cannot encode key file: {e}")))
    }

    pub fn from_json(contents: &str) -> AppResult<Self> {
        let key: AccountKey = serde_json::from_str(contents)
            .map_err(|e| AppError::Validation(format!("not a key file: {e}")))?;

        if key.version != KEY_FILE_VERSION {
            return Err(AppError::Validation(format!(
                "unsupported key file version {}",
                key.version
            )));
        }
        if key.pseudo.trim().is_empty() || key.secret_key.is_empty() {
            return Err(AppError::Validation("key file is missing its pseudo or key".into()));
        }
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_key_shape() {
        let key = generate_secret_key();
        assert_eq!(key.len(), SECRET_KEY_LEN);
        assert!(key.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(key, generate_secret_key());
    }

    #[test]
    fn test_key_file_layout() {
        let key = AccountKey::generate(" neo ").unwrap();
        assert_eq!(key.file_name(), "neo_bluevision.bvk");

        let json = key.to_json().unwrap();
        assert!(json.contains("\n  \"secretKey\""));
        assert!(json.contains("\"version\": \"1.0\""));

        assert_eq!(AccountKey::from_json(&json).unwrap(), key);
    }

    #[test]
    fn test_rejects_foreign_files() {
        let newer = r#"{"pseudo":"neo","secretKey":"abc","createdAt":"2024-05-01T10:00:00Z","version":"2.0"}"#;
        assert!(matches!(AccountKey::from_json(newer), Err(AppError::Validation(_))));
        assert!(AccountKey::from_json("{}").is_err());
        assert!(AccountKey::generate("  ").is_err());
    }
}
