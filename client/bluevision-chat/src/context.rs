use crate::config::Config;
use crate::error::AppResult;
use crate::gateway::{BackendGateway, RestBackend};
use crate::services::{ConversationDirectory, FeedController, ProfileService};
use crate::session::SessionProvider;
use std::sync::Arc;

/// Shared dependencies of every controller
///
/// Cheap to clone; all controllers built from one context share its gateway,
/// session and profile cache.
#[derive(Clone)]
pub struct ChatContext {
    pub gateway: Arc<dyn BackendGateway>,
    pub session: Arc<SessionProvider>,
    pub profiles: Arc<ProfileService>,
    pub config: Arc<Config>,
}

impl ChatContext {
    pub fn new(gateway: Arc<dyn BackendGateway>, config: Config) -> Self {
        let session = Arc::new(SessionProvider::new(gateway.clone(), config.request_timeout));
        let profiles = Arc::new(ProfileService::new(
            gateway.clone(),
            session.clone(),
            config.request_timeout,
        ));
        Self {
            gateway,
            session,
            profiles,
            config: Arc::new(config),
        }
    }

    /// Context talking to the hosted backend described by `config`
    pub fn connect(config: Config) -> AppResult<Self> {
        let backend = RestBackend::new(&config).map_err(crate::error::AppError::backend)?;
        Ok(Self::new(Arc::new(backend), config))
    }

    pub fn directory(&self) -> ConversationDirectory {
        ConversationDirectory::new(self.clone())
    }

    pub fn feed(&self) -> FeedController {
        FeedController::new(self.clone())
    }
}
