//! Profile and avatar resolution
//!
//! Author identities are resolved in batches (one backend request per batch)
//! and cached per identity. A missing profile or a failed lookup resolves to
//! the placeholder author and is not cached, so a later batch retries it.

use crate::error::{AppError, AppResult};
use crate::gateway::{bounded, BackendGateway};
use crate::models::{AuthorDisplay, Profile, ProfileUpdate};
use crate::session::SessionProvider;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const AVATAR_FILE: &str = "profile.png";
const AVATAR_CONTENT_TYPE: &str = "image/png";

pub struct ProfileService {
    gateway: Arc<dyn BackendGateway>,
    session: Arc<SessionProvider>,
    request_timeout: Duration,
    cache: RwLock<HashMap<Uuid, Profile>>,
}

impl ProfileService {
    pub fn new(
        gateway: Arc<dyn BackendGateway>,
        session: Arc<SessionProvider>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            session,
            request_timeout,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Records a profile learned from another query (e.g. a join)
    pub fn remember(&self, profile: Profile) {
        self.cache.write().insert(profile.id, profile);
    }

    pub fn cached(&self, id: Uuid) -> Option<Profile> {
        self.cache.read().get(&id).cloned()
    }

    /// Display data for every id, fetching uncached ones in a single request
    pub async fn resolve_many(&self, ids: &[Uuid]) -> HashMap<Uuid, AuthorDisplay> {
        let mut missing: Vec<Uuid> = Vec::new();
        {
            let cache = self.cache.read();
            for id in ids {
                if !cache.contains_key(id) && !missing.contains(id) {
                    missing.push(*id);
                }
            }
        }

        if !missing.is_empty() {
            debug!(count = missing.len(), "fetching uncached profiles");
            match bounded(self.request_timeout, self.gateway.fetch_profiles(&missing)).await {
                Ok(profiles) => {
                    let mut cache = self.cache.write();
                    for profile in profiles {
                        cache.insert(profile.id, profile);
                    }
                }
                Err(e) => {
                    warn!(error = %e, count = missing.len(), "profile lookup failed, using placeholders");
                }
            }
        }

        let cache = self.cache.read();
        ids.iter()
            .map(|id| {
                let display = cache
                    .get(id)
                    .map(AuthorDisplay::from)
                    .unwrap_or_else(AuthorDisplay::placeholder);
                (*id, display)
            })
            .collect()
    }

    pub async fn resolve(&self, id: Uuid) -> AuthorDisplay {
        self.resolve_many(&[id])
            .await
            .remove(&id)
            .unwrap_or_else(AuthorDisplay::placeholder)
    }

    /// Profile of the signed-in identity
    pub async fn my_profile(&self) -> AppResult<Profile> {
        let user_id = self.session.user_id().ok_or(AppError::SignedOut)?;

        let profiles = bounded(self.request_timeout, self.gateway.fetch_profiles(&[user_id]))
            .await
            .map_err(AppError::fetch)?;
        let profile = profiles
            .into_iter()
            .find(|p| p.id == user_id)
            .ok_or_else(|| AppError::FetchFailed(format!("no profile for {user_id}")))?;

        self.remember(profile.clone());
        Ok(profile)
    }

    /// Renames the signed-in identity and optionally replaces its avatar
    ///
    /// The avatar is stored as `<user id>/profile.png` (overwriting any
    /// previous one) and its public URL becomes the profile's `avatar_url`.
    pub async fn update_profile(&self, username: &str, avatar_png: Option<Vec<u8>>) -> AppResult<Profile> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AppError::Validation("username must not be empty".into()));
        }
        let user_id = self.session.user_id().ok_or(AppError::SignedOut)?;

        let mut update = ProfileUpdate {
            username: Some(username.to_string()),
            avatar_url: None,
        };

        if let Some(bytes) = avatar_png {
            if bytes.is_empty() {
                return Err(AppError::Validation("avatar image is empty".into()));
            }
            let path = format!("{user_id}/{AVATAR_FILE}");
            let stored = bounded(
                self.request_timeout,
                self.gateway.upload(&path, bytes, AVATAR_CONTENT_TYPE, true),
            )
            .await
            .map_err(AppError::send)?;
            update.avatar_url = Some(self.gateway.public_url(&stored));
        }

        let profile = bounded(self.request_timeout, self.gateway.update_profile(user_id, update))
            .await
            .map_err(AppError::send)?;

        info!(%user_id, "profile updated");
        self.remember(profile.clone());
        Ok(profile)
    }
}
