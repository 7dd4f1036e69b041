mod common;

use bluevision_chat::gateway::InMemoryBackend;
use bluevision_chat::models::{ConversationKind, Profile};
use bluevision_chat::AppError;
use common::{anonymous, sign_up};
use uuid::Uuid;

#[tokio::test]
async fn test_private_conversation_is_reused_from_either_side() {
    let server = InMemoryBackend::new();
    let alice = sign_up(&server, "alice").await;
    let bob = sign_up(&server, "bob").await;

    let first = alice.ctx.directory().create_private(bob.user_id).await.unwrap();
    let again = alice.ctx.directory().create_private(bob.user_id).await.unwrap();
    let reverse = bob.ctx.directory().create_private(alice.user_id).await.unwrap();

    assert_eq!(first.id, again.id);
    assert_eq!(first.id, reverse.id);
    assert_eq!(server.conversation_count(), 1);
    assert_eq!(first.kind(), ConversationKind::Private);
}

#[tokio::test]
async fn test_private_conversation_with_self_is_rejected() {
    let server = InMemoryBackend::new();
    let alice = sign_up(&server, "alice").await;

    let err = alice
        .ctx
        .directory()
        .create_private(alice.user_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(server.conversation_count(), 0);
}

#[tokio::test]
async fn test_group_validation() {
    let server = InMemoryBackend::new();
    let alice = sign_up(&server, "alice").await;
    let bob = sign_up(&server, "bob").await;
    let directory = alice.ctx.directory();

    let blank = directory.create_group("   ", &[bob.user_id]).await;
    assert!(matches!(blank, Err(AppError::Validation(_))));

    let alone = directory.create_group("Solo", &[]).await;
    assert!(matches!(alone, Err(AppError::Validation(_))));

    let only_self = directory.create_group("Solo", &[alice.user_id]).await;
    assert!(matches!(only_self, Err(AppError::Validation(_))));

    let too_long = directory.create_group(&"x".repeat(256), &[bob.user_id]).await;
    assert!(matches!(too_long, Err(AppError::Validation(_))));
    assert_eq!(server.conversation_count(), 0);

    let group = directory
        .create_group("  Tech  ", &[bob.user_id, bob.user_id, alice.user_id])
        .await
        .unwrap();
    assert_eq!(group.name.as_deref(), Some("Tech"));
    assert_eq!(server.participants_of(group.id), vec![alice.user_id, bob.user_id]);
}

#[tokio::test]
async fn test_list_is_newest_first_with_display_identity() {
    let server = InMemoryBackend::new();
    let alice = sign_up(&server, "alice").await;
    let bob = sign_up(&server, "bob").await;
    let carol = sign_up(&server, "carol").await;
    server.seed_profile(Profile {
        id: bob.user_id,
        username: "bob".to_string(),
        avatar_url: Some("memory://avatars/bob.png".to_string()),
    });

    let directory = alice.ctx.directory();
    let private = directory.create_private(bob.user_id).await.unwrap();
    let group = directory
        .create_group("Weekend", &[bob.user_id, carol.user_id])
        .await
        .unwrap();

    let entries = directory.list_conversations().await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].conversation.id, group.id);
    assert_eq!(entries[0].display.name, "Weekend");
    assert_eq!(entries[0].display.avatar_url, None);
    assert_eq!(entries[0].participants.len(), 3);

    assert_eq!(entries[1].conversation.id, private.id);
    assert_eq!(entries[1].display.name, "bob");
    assert_eq!(entries[1].display.initial, 'B');
    assert_eq!(
        entries[1].display.avatar_url.as_deref(),
        Some("memory://avatars/bob.png")
    );

    // listing warms the profile cache used by the feed
    assert!(alice.ctx.profiles.cached(carol.user_id).is_some());

    let found = directory.filter(&entries, "WEEK");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].conversation.id, group.id);
}

#[tokio::test]
async fn test_list_without_identity_is_empty() {
    let server = InMemoryBackend::new();
    let alice = sign_up(&server, "alice").await;
    let bob = sign_up(&server, "bob").await;
    alice.ctx.directory().create_private(bob.user_id).await.unwrap();

    let stranger = anonymous(&server);
    assert!(stranger.directory().list_conversations().await.unwrap().is_empty());

    let err = stranger.directory().create_private(bob.user_id).await.unwrap_err();
    assert_eq!(err, AppError::SignedOut);
}

#[tokio::test]
async fn test_signed_out_identity_cannot_create() {
    let server = InMemoryBackend::new();
    let alice = sign_up(&server, "alice").await;
    alice.ctx.session.sign_out().await.unwrap();

    let err = alice
        .ctx
        .directory()
        .create_group("Later", &[Uuid::new_v4()])
        .await
        .unwrap_err();
    assert_eq!(err, AppError::SignedOut);
}

#[tokio::test]
async fn test_backend_outage_surfaces_as_unavailable() {
    let server = InMemoryBackend::new();
    let alice = sign_up(&server, "alice").await;
    server.set_available(false);

    let err = alice.ctx.directory().list_conversations().await.unwrap_err();
    assert!(matches!(err, AppError::BackendUnavailable(_)));
    assert!(err.is_retryable());
}
