//! Session provider
//!
//! Tracks who is signed in. `Unresolved` is the starting state and a valid
//! one: dependent components skip their fetches until it resolves.

use crate::error::{AppError, AppResult, GatewayError};
use crate::gateway::{bounded, BackendGateway};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityState {
    /// Not yet asked, or the answer is still in flight
    Unresolved,
    SignedOut,
    SignedIn(Uuid),
}

impl IdentityState {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            IdentityState::SignedIn(id) => Some(*id),
            _ => None,
        }
    }
}

pub struct SessionProvider {
    gateway: Arc<dyn BackendGateway>,
    request_timeout: Duration,
    state: watch::Sender<IdentityState>,
}

impl SessionProvider {
    pub fn new(gateway: Arc<dyn BackendGateway>, request_timeout: Duration) -> Self {
        let (state, _) = watch::channel(IdentityState::Unresolved);
        Self {
            gateway,
            request_timeout,
            state,
        }
    }

    pub fn current(&self) -> IdentityState {
        *self.state.borrow()
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.current().user_id()
    }

    /// Receiver notified on every identity change
    pub fn watch(&self) -> watch::Receiver<IdentityState> {
        self.state.subscribe()
    }

    /// Asks the backend for the current user; any failure counts as signed out
    pub async fn resolve(&self) -> IdentityState {
        let state = match bounded(self.request_timeout, self.gateway.current_user()).await {
            Ok(Some(user_id)) => IdentityState::SignedIn(user_id),
            Ok(None) => IdentityState::SignedOut,
            Err(e) => {
                warn!(error = %e, "could not resolve session, treating as signed out");
                IdentityState::SignedOut
            }
        };
        debug!(?state, "session resolved");
        self.set(state);
        state
    }

    pub async fn sign_in(&self, identifier: &str, secret: &str) -> AppResult<Uuid> {
        let identifier = identifier.trim();
        if identifier.is_empty() || secret.is_empty() {
            return Err(AppError::Validation(
                "identifier and secret key are required".into(),
            ));
        }

        let session = bounded(self.request_timeout, self.gateway.sign_in(identifier, secret))
            .await
            .map_err(credentials_error)?;

        info!(user_id = %session.user_id, "signed in");
        self.set(IdentityState::SignedIn(session.user_id));
        Ok(session.user_id)
    }

    /// Registers an account whose profile carries `username`
    pub async fn sign_up(&self, identifier: &str, secret: &str, username: &str) -> AppResult<Uuid> {
        let identifier = identifier.trim();
        let username = username.trim();
        if identifier.is_empty() || username.is_empty() {
            return Err(AppError::Validation("identifier and username are required".into()));
        }
        if secret.is_empty() {
            return Err(AppError::Validation("secret key is required".into()));
        }

        let session = bounded(
            self.request_timeout,
            self.gateway
                .sign_up(identifier, secret, json!({ "username": username })),
        )
        .await
        .map_err(|e| match e {
            GatewayError::Conflict(_) => {
                AppError::Validation(format!("{identifier} is already registered"))
            }
            other => AppError::backend(other),
        })?;

        info!(user_id = %session.user_id, "signed up");
        self.set(IdentityState::SignedIn(session.user_id));
        Ok(session.user_id)
    }

    /// Ends the session; the local state is signed out even if the backend
    /// call fails
    pub async fn sign_out(&self) -> AppResult<()> {
        let result = bounded(self.request_timeout, self.gateway.sign_out()).await;
        self.set(IdentityState::SignedOut);

        if let Err(e) = result {
            warn!(error = %e, "backend sign-out failed");
            return Err(AppError::backend(e));
        }
        info!("signed out");
        Ok(())
    }

    fn set(&self, state: IdentityState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

fn credentials_error(e: GatewayError) -> AppError {
    match e {
        GatewayError::Unauthorized | GatewayError::Rejected { status: 400, .. } => {
            AppError::Validation("invalid identifier or secret key".into())
        }
        other => AppError::backend(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::InMemoryBackend;

    fn provider(backend: &InMemoryBackend) -> SessionProvider {
        SessionProvider::new(Arc::new(backend.clone()), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_starts_unresolved_and_resolves_signed_out() {
        let backend = InMemoryBackend::new();
        let session = provider(&backend);
        assert_eq!(session.current(), IdentityState::Unresolved);

        assert_eq!(session.resolve().await, IdentityState::SignedOut);
    }

    #[tokio::test]
    async fn test_resolve_failure_is_signed_out() {
        let backend = InMemoryBackend::new();
        backend.set_available(false);
        let session = provider(&backend);

        assert_eq!(session.resolve().await, IdentityState::SignedOut);
    }

    #[tokio::test]
    async fn test_sign_up_then_sign_out_notifies_watchers() {
        let backend = InMemoryBackend::new();
        let session = provider(&backend);
        let mut watcher = session.watch();

        let user_id = session.sign_up("neo", "k3y", "Neo").await.unwrap();
        watcher.changed().await.unwrap();
        assert_eq!(*watcher.borrow_and_update(), IdentityState::SignedIn(user_id));

        session.sign_out().await.unwrap();
        watcher.changed().await.unwrap();
        assert_eq!(*watcher.borrow_and_update(), IdentityState::SignedOut);
        assert_eq!(session.resolve().await, IdentityState::SignedOut);
    }

    #[tokio::test]
    async fn test_sign_in_rejects_bad_credentials() {
        let backend = InMemoryBackend::new();
        backend.register_user("trinity", "right", "Trinity").unwrap();
        let session = provider(&backend);

        let err = session.sign_in("trinity", "wrong").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(session.current(), IdentityState::Unresolved);

        let err = session.sign_in("", "x").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_duplicate_sign_up() {
        let backend = InMemoryBackend::new();
        backend.register_user("morpheus", "k", "Morpheus").unwrap();
        let session = provider(&backend);

        let err = session.sign_up("morpheus", "k", "Morpheus").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(msg) if msg.contains("already registered")));
    }
}
