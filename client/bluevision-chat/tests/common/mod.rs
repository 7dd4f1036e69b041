#![allow(dead_code)]

use bluevision_chat::gateway::InMemoryBackend;
use bluevision_chat::services::FeedView;
use bluevision_chat::{ChatContext, Config};
use std::sync::Arc;
use uuid::Uuid;

/// One signed-in user of a shared in-memory backend
pub struct TestClient {
    pub backend: InMemoryBackend,
    pub ctx: ChatContext,
    pub user_id: Uuid,
}

pub async fn sign_up(server: &InMemoryBackend, name: &str) -> TestClient {
    let backend = server.new_client();
    let ctx = ChatContext::new(Arc::new(backend.clone()), Config::test_defaults());
    let user_id = ctx
        .session
        .sign_up(&format!("{name}@bluevision.test"), "secret-key", name)
        .await
        .expect("sign up");
    TestClient {
        backend,
        ctx,
        user_id,
    }
}

/// Client whose identity is never resolved
pub fn anonymous(server: &InMemoryBackend) -> ChatContext {
    ChatContext::new(Arc::new(server.new_client()), Config::test_defaults())
}

/// Lets spawned feed tasks drain their channels
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

pub fn contents(view: &FeedView) -> Vec<String> {
    view.items.iter().map(|item| item.content.clone()).collect()
}
