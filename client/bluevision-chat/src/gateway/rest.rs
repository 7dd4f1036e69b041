//! HTTP gateway for a Supabase-compatible hosted backend
//!
//! Records go through PostgREST (`/rest/v1`), sessions through GoTrue
//! (`/auth/v1`), avatars through Storage (`/storage/v1`) and broadcasts through
//! the realtime REST endpoint. Realtime subscriptions use the Phoenix websocket
//! at `/realtime/v1/websocket`.
use super::realtime::{self, channel_topic};
use super::{AuthApi, AuthSession, BlobStore, RealtimeApi, RecordStore, Subscription};
use crate::config::Config;
use crate::error::{GatewayError, GatewayResult};
use crate::models::{
    BroadcastMessage, Conversation, ConversationWithMembers, Message, MessageWithSender,
    NewConversation, NewMessage, Participant, Profile, ProfileUpdate,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, warn};
use uuid::Uuid;

const MESSAGE_COLUMNS: &str =
    "id,conversation_id,sender_id,content,created_at,sender:profiles(username,avatar_url)";
const CONVERSATION_COLUMNS: &str =
    "id,name,created_at,participants(profiles(id,username,avatar_url))";
const PROFILE_COLUMNS: &str = "id,username,avatar_url";

#[derive(Debug, Clone, Default)]
struct SessionState {
    access_token: Option<String>,
    user_id: Option<Uuid>,
}

/// REST client for the hosted backend
pub struct RestBackend {
    client: Client,
    /// Base URL without trailing slash (e.g. "https://project.supabase.co")
    base_url: String,
    anon_key: String,
    avatar_bucket: String,
    request_timeout: Duration,
    session: RwLock<SessionState>,
}

#[derive(Debug, Serialize)]
struct PasswordCredentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct SignUpRequest<'a> {
    email: &'a str,
    password: &'a str,
    data: Value,
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: Uuid,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    user: Option<AuthUser>,
    /// Present when sign-up answers with the bare user object
    #[serde(default)]
    id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
struct MembershipRow {
    conversation_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct MemberRow {
    #[serde(default)]
    profiles: Option<Profile>,
}

#[derive(Debug, Deserialize)]
struct ConversationRow {
    id: Uuid,
    #[serde(default)]
    name: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    participants: Vec<MemberRow>,
}

#[derive(Debug, Serialize)]
struct NewConversationRow<'a> {
    name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct FindPrivateRequest {
    user_a: Uuid,
    user_b: Uuid,
}

fn id_list(ids: &[Uuid]) -> String {
    let joined: Vec<String> = ids.iter().map(Uuid::to_string).collect();
    format!("in.({})", joined.join(","))
}

fn storage_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

impl RestBackend {
    pub fn new(config: &Config) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayError::Unavailable(format!("http client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.backend.url.trim_end_matches('/').to_string(),
            anon_key: config.backend.anon_key.clone(),
            avatar_bucket: config.backend.avatar_bucket.clone(),
            request_timeout: config.request_timeout,
            session: RwLock::new(SessionState::default()),
        })
    }

    /// Restores a previously issued session token
    pub fn with_access_token(self, access_token: impl Into<String>) -> Self {
        self.session.write().access_token = Some(access_token.into());
        self
    }

    pub fn access_token(&self) -> Option<String> {
        self.session.read().access_token.clone()
    }

    fn bearer(&self) -> String {
        let token = self
            .session
            .read()
            .access_token
            .clone()
            .unwrap_or_else(|| self.anon_key.clone());
        format!("Bearer {token}")
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.anon_key)
            .header("Authorization", self.bearer())
    }

    fn socket_url(&self) -> String {
        format!(
            "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            self.base_url.replacen("http", "ws", 1),
            urlencoding::encode(&self.anon_key)
        )
    }

    async fn send(&self, builder: RequestBuilder, operation: &str) -> GatewayResult<Response> {
        let response = self.authorized(builder).send().await.map_err(|e| {
            error!(operation, error = %e, "backend request failed");
            GatewayError::from(e)
        })?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            warn!(operation, status = status.as_u16(), %body, "backend returned error");
            Err(GatewayError::from_status(status.as_u16(), body))
        }
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        operation: &str,
    ) -> GatewayResult<T> {
        let response = self.send(builder, operation).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// First row of a `return=representation` write
    async fn send_returning<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        operation: &str,
    ) -> GatewayResult<T> {
        let rows: Vec<T> = self
            .send_json(builder.header("Prefer", "return=representation"), operation)
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| GatewayError::Decode(format!("{operation}: empty representation")))
    }

    fn store_session(&self, response: TokenResponse) -> GatewayResult<AuthSession> {
        let user_id = response
            .user
            .map(|u| u.id)
            .or(response.id)
            .ok_or_else(|| GatewayError::Decode("auth response without user id".into()))?;

        let mut session = self.session.write();
        session.user_id = Some(user_id);
        if response.access_token.is_some() {
            session.access_token = response.access_token.clone();
        }

        Ok(AuthSession {
            user_id,
            access_token: response.access_token,
        })
    }
}

#[async_trait]
impl AuthApi for RestBackend {
    async fn sign_in(&self, identifier: &str, secret: &str) -> GatewayResult<AuthSession> {
        let request = self
            .client
            .post(self.url("/auth/v1/token"))
            .query(&[("grant_type", "password")])
            .json(&PasswordCredentials {
                email: identifier,
                password: secret,
            });

        let response: TokenResponse = self.send_json(request, "sign_in").await?;
        self.store_session(response)
    }

    async fn sign_up(
        &self,
        identifier: &str,
        secret: &str,
        metadata: Value,
    ) -> GatewayResult<AuthSession> {
        let request = self.client.post(self.url("/auth/v1/signup")).json(&SignUpRequest {
            email: identifier,
            password: secret,
            data: metadata,
        });

        let response: TokenResponse = self.send_json(request, "sign_up").await?;
        self.store_session(response)
    }

    async fn sign_out(&self) -> GatewayResult<()> {
        if self.session.read().access_token.is_none() {
            return Ok(());
        }

        let result = self
            .send(self.client.post(self.url("/auth/v1/logout")), "sign_out")
            .await;

        // the local session ends even if the server call failed
        *self.session.write() = SessionState::default();
        result.map(|_| ())
    }

    async fn current_user(&self) -> GatewayResult<Option<Uuid>> {
        if self.session.read().access_token.is_none() {
            return Ok(None);
        }

        match self
            .send_json::<AuthUser>(self.client.get(self.url("/auth/v1/user")), "current_user")
            .await
        {
            Ok(user) => {
                self.session.write().user_id = Some(user.id);
                Ok(Some(user.id))
            }
            Err(GatewayError::Unauthorized) => {
                debug!("stored session rejected, clearing it");
                *self.session.write() = SessionState::default();
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl RecordStore for RestBackend {
    async fn fetch_messages(&self, conversation_id: Uuid) -> GatewayResult<Vec<MessageWithSender>> {
        let request = self.client.get(self.url("/rest/v1/messages")).query(&[
            ("select", MESSAGE_COLUMNS.to_string()),
            ("conversation_id", format!("eq.{conversation_id}")),
            ("order", "created_at.asc".to_string()),
        ]);
        self.send_json(request, "fetch_messages").await
    }

    async fn insert_message(&self, message: NewMessage) -> GatewayResult<Message> {
        let request = self.client.post(self.url("/rest/v1/messages")).json(&message);
        self.send_returning(request, "insert_message").await
    }

    async fn list_conversations(&self, user_id: Uuid) -> GatewayResult<Vec<ConversationWithMembers>> {
        let memberships: Vec<MembershipRow> = self
            .send_json(
                self.client.get(self.url("/rest/v1/participants")).query(&[
                    ("select", "conversation_id".to_string()),
                    ("user_id", format!("eq.{user_id}")),
                ]),
                "list_memberships",
            )
            .await?;

        if memberships.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = memberships.iter().map(|m| m.conversation_id).collect();

        let rows: Vec<ConversationRow> = self
            .send_json(
                self.client.get(self.url("/rest/v1/conversations")).query(&[
                    ("select", CONVERSATION_COLUMNS.to_string()),
                    ("id", id_list(&ids)),
                    ("order", "created_at.desc".to_string()),
                ]),
                "list_conversations",
            )
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| ConversationWithMembers {
                conversation: Conversation {
                    id: row.id,
                    name: row.name,
                    created_at: row.created_at,
                },
                members: row
                    .participants
                    .into_iter()
                    .filter_map(|member| member.profiles)
                    .collect(),
            })
            .collect())
    }

    async fn find_private_conversation(&self, a: Uuid, b: Uuid) -> GatewayResult<Option<Conversation>> {
        let request = self
            .client
            .post(self.url("/rest/v1/rpc/find_private_conversation"))
            .json(&FindPrivateRequest { user_a: a, user_b: b });

        let rows: Vec<Conversation> = self.send_json(request, "find_private_conversation").await?;
        Ok(rows.into_iter().next())
    }

    async fn create_conversation(&self, new: NewConversation) -> GatewayResult<Conversation> {
        let conversation: Conversation = self
            .send_returning(
                self.client
                    .post(self.url("/rest/v1/conversations"))
                    .json(&NewConversationRow {
                        name: new.name.as_deref(),
                    }),
                "create_conversation",
            )
            .await?;

        let edges: Vec<Participant> = new
            .participants
            .iter()
            .map(|&user_id| Participant {
                conversation_id: conversation.id,
                user_id,
            })
            .collect();

        let inserted = self
            .send(
                self.client
                    .post(self.url("/rest/v1/participants"))
                    .header("Prefer", "return=minimal")
                    .json(&edges),
                "insert_participants",
            )
            .await;

        if let Err(e) = inserted {
            warn!(
                conversation_id = %conversation.id,
                error = %e,
                "participant insert failed, removing conversation"
            );
            let cleanup = self
                .send(
                    self.client
                        .delete(self.url("/rest/v1/conversations"))
                        .query(&[("id", format!("eq.{}", conversation.id))]),
                    "delete_conversation",
                )
                .await;
            if let Err(cleanup_error) = cleanup {
                error!(
                    conversation_id = %conversation.id,
                    error = %cleanup_error,
                    "failed to remove conversation without participants"
                );
            }
            return Err(e);
        }

        Ok(conversation)
    }

    async fn fetch_profiles(&self, ids: &[Uuid]) -> GatewayResult<Vec<Profile>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let request = self.client.get(self.url("/rest/v1/profiles")).query(&[
            ("select", PROFILE_COLUMNS.to_string()),
            ("id", id_list(ids)),
        ]);
        self.send_json(request, "fetch_profiles").await
    }

    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> GatewayResult<Profile> {
        let request = self
            .client
            .patch(self.url("/rest/v1/profiles"))
            .query(&[("id", format!("eq.{id}"))])
            .json(&update);

        match self.send_returning(request, "update_profile").await {
            Err(GatewayError::Decode(_)) => Err(GatewayError::NotFound),
            other => other,
        }
    }
}

#[async_trait]
impl RealtimeApi for RestBackend {
    async fn subscribe_inserts(&self, conversation_id: Uuid) -> GatewayResult<Subscription<Message>> {
        let token = self.access_token();
        realtime::join_channel(
            &self.socket_url(),
            channel_topic(&format!("messages:{conversation_id}")),
            realtime::inserts_join_payload(conversation_id, token.as_deref()),
            self.request_timeout,
            realtime::decode_insert,
        )
        .await
    }

    async fn subscribe_broadcast(&self, topic: &str) -> GatewayResult<Subscription<BroadcastMessage>> {
        let token = self.access_token();
        realtime::join_channel(
            &self.socket_url(),
            channel_topic(topic),
            realtime::broadcast_join_payload(token.as_deref()),
            self.request_timeout,
            realtime::decode_broadcast(topic.to_string()),
        )
        .await
    }

    async fn broadcast(&self, topic: &str, event: &str, payload: Value) -> GatewayResult<()> {
        let body = json!({
            "messages": [{ "topic": topic, "event": event, "payload": payload }]
        });
        self.send(
            self.client
                .post(self.url("/realtime/v1/api/broadcast"))
                .json(&body),
            "broadcast",
        )
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl BlobStore for RestBackend {
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        upsert: bool,
    ) -> GatewayResult<String> {
        let url = self.url(&format!(
            "/storage/v1/object/{}/{}",
            self.avatar_bucket,
            storage_path(path)
        ));
        let request = self
            .client
            .post(url)
            .header("Content-Type", content_type)
            .header("x-upsert", if upsert { "true" } else { "false" })
            .body(bytes);

        self.send(request, "upload").await?;
        Ok(path.to_string())
    }

    fn public_url(&self, path: &str) -> String {
        self.url(&format!(
            "/storage/v1/object/public/{}/{}",
            self.avatar_bucket,
            storage_path(path)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> RestBackend {
        RestBackend::new(&Config::test_defaults()).unwrap()
    }

    #[test]
    fn test_id_list_uses_in_filter() {
        let a = Uuid::nil();
        assert_eq!(
            id_list(&[a, a]),
            format!("in.({a},{a})")
        );
    }

    #[test]
    fn test_public_url_encodes_segments() {
        let backend = backend();
        assert_eq!(
            backend.public_url("abc/my avatar.png"),
            "http://localhost:54321/storage/v1/object/public/avatars/abc/my%20avatar.png"
        );
    }

    #[test]
    fn test_socket_url_switches_scheme() {
        let backend = backend();
        assert_eq!(
            backend.socket_url(),
            "ws://localhost:54321/realtime/v1/websocket?apikey=test-anon-key&vsn=1.0.0"
        );
    }

    #[test]
    fn test_bearer_prefers_session_token() {
        let backend = backend();
        assert_eq!(backend.bearer(), "Bearer test-anon-key");

        let backend = backend.with_access_token("user-token");
        assert_eq!(backend.bearer(), "Bearer user-token");
    }
}
