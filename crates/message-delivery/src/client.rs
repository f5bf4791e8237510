//! Supabase REST client for chat messages.

use crate::{DeliveryError, DeliveryResult, MessageDeliverer, OutgoingMessage};
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

/// Credentials for writes on behalf of the signed-in user.
#[derive(Clone)]
pub struct DeliveryContext {
    pub access_token: String,
}

impl std::fmt::Debug for DeliveryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryContext").finish_non_exhaustive()
    }
}

/// Writes messages into the `messages` table and touches the owning
/// conversation's `updated_at`.
pub struct SupabaseMessageClient {
    http_client: reqwest::Client,
    api_url: String,
    anon_key: String,
    context: RwLock<Option<DeliveryContext>>,
}

impl SupabaseMessageClient {
    /// Create a client for the project at `api_url` (e.g. `https://xyz.supabase.co`).
    pub fn new(api_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        let api_url: String = api_url.into();
        Self {
            http_client: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            context: RwLock::new(None),
        }
    }

    /// Install the access token used for subsequent deliveries.
    pub async fn set_context(&self, context: DeliveryContext) {
        *self.context.write().await = Some(context);
    }

    /// Forget the access token (sign-out). Deliveries fail until a new one is set.
    pub async fn clear_context(&self) {
        *self.context.write().await = None;
    }

    pub async fn has_context(&self) -> bool {
        self.context.read().await.is_some()
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.api_url, table)
    }

    /// Insert the message. Repeats with the same id merge into one row.
    pub async fn insert_message(
        &self,
        message: &OutgoingMessage,
        access_token: &str,
    ) -> DeliveryResult<()> {
        let url = self.rest_url("messages");

        debug!(
            message_id = %message.id,
            conversation_id = %message.conversation_id,
            "Saving message to Supabase"
        );

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", access_token))
            .header("Content-Type", "application/json")
            .header("Prefer", "resolution=merge-duplicates")
            .json(message)
            .send()
            .await
            .map_err(transport_error)?;

        check_response(response).await
    }

    /// Bump the conversation's `updated_at` so it sorts to the top.
    pub async fn touch_conversation(
        &self,
        conversation_id: &str,
        access_token: &str,
    ) -> DeliveryResult<()> {
        let url = self.rest_url("conversations");
        let filter = format!("eq.{}", conversation_id);

        let body = ConversationTouch {
            updated_at: chrono::Utc::now().to_rfc3339(),
        };

        let response = self
            .http_client
            .patch(&url)
            .query(&[("id", filter.as_str())])
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", access_token))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        check_response(response).await
    }
}

#[derive(Serialize)]
struct ConversationTouch {
    updated_at: String,
}

#[async_trait]
impl MessageDeliverer for SupabaseMessageClient {
    async fn deliver(&self, message: &OutgoingMessage) -> DeliveryResult<()> {
        let access_token = match self.context.read().await.as_ref() {
            Some(ctx) => ctx.access_token.clone(),
            None => return Err(DeliveryError::Unauthenticated),
        };

        self.insert_message(message, &access_token).await?;

        // The message row is what matters; a stale conversation timestamp is not
        // worth redelivering for.
        if let Err(err) = self
            .touch_conversation(&message.conversation_id, &access_token)
            .await
        {
            warn!(
                conversation_id = %message.conversation_id,
                error = %err,
                "Failed to update conversation timestamp"
            );
        }

        debug!(message_id = %message.id, "Message saved to Supabase");
        Ok(())
    }
}

impl std::fmt::Debug for SupabaseMessageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseMessageClient")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

fn transport_error(err: reqwest::Error) -> DeliveryError {
    if err.is_connect() || err.is_timeout() {
        DeliveryError::Unavailable(err.to_string())
    } else {
        DeliveryError::Http(err)
    }
}

async fn check_response(response: reqwest::Response) -> DeliveryResult<()> {
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        error!("Supabase request failed: {} - {}", status, body);
        return Err(DeliveryError::Supabase {
            status,
            message: body,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn message() -> OutgoingMessage {
        OutgoingMessage {
            id: "msg-1".into(),
            conversation_id: "conv-A".into(),
            user_id: "user-1".into(),
            role: "user".into(),
            content: "What were Q3 sales by region?".into(),
        }
    }

    async fn signed_in_client(base_url: &str) -> SupabaseMessageClient {
        let client = SupabaseMessageClient::new(base_url, "anon-key");
        client
            .set_context(DeliveryContext {
                access_token: "user-token".into(),
            })
            .await;
        client
    }

    #[test]
    fn test_rest_url_trims_trailing_slash() {
        let client = SupabaseMessageClient::new("https://test.supabase.co/", "key");
        assert_eq!(
            client.rest_url("messages"),
            "https://test.supabase.co/rest/v1/messages"
        );
    }

    #[tokio::test]
    async fn deliver_inserts_message_and_touches_conversation() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/rest/v1/messages"))
            .and(header("apikey", "anon-key"))
            .and(header("Authorization", "Bearer user-token"))
            .and(header("Prefer", "resolution=merge-duplicates"))
            .and(body_json(serde_json::json!({
                "id": "msg-1",
                "conversation_id": "conv-A",
                "user_id": "user-1",
                "role": "user",
                "content": "What were Q3 sales by region?"
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("PATCH"))
            .and(path("/rest/v1/conversations"))
            .and(query_param("id", "eq.conv-A"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = signed_in_client(&server.uri()).await;
        client.deliver(&message()).await.unwrap();
    }

    #[tokio::test]
    async fn conversation_filter_is_url_encoded() {
        let server = MockServer::start().await;

        Mock::given(method("PATCH"))
            .and(path("/rest/v1/conversations"))
            .and(query_param("id", "eq.conv&status=eq.x,y"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = signed_in_client(&server.uri()).await;
        client
            .touch_conversation("conv&status=eq.x,y", "user-token")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn deliver_without_context_is_unauthenticated() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let client = SupabaseMessageClient::new(server.uri(), "anon-key");
        let err = client.deliver(&message()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Unauthenticated));
    }

    #[tokio::test]
    async fn deliver_surfaces_insert_failure() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/rest/v1/messages"))
            .respond_with(ResponseTemplate::new(500).set_body_string("database unavailable"))
            .mount(&server)
            .await;

        let client = signed_in_client(&server.uri()).await;
        let err = client.deliver(&message()).await.unwrap_err();
        match err {
            DeliveryError::Supabase { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "database unavailable");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn conversation_touch_failure_is_not_fatal() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/rest/v1/messages"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        Mock::given(method("PATCH"))
            .and(path("/rest/v1/conversations"))
            .respond_with(ResponseTemplate::new(403).set_body_string("rls"))
            .mount(&server)
            .await;

        let client = signed_in_client(&server.uri()).await;
        assert!(client.deliver(&message()).await.is_ok());
    }

    #[tokio::test]
    async fn clear_context_stops_deliveries() {
        let client = signed_in_client("http://127.0.0.1:9").await;
        assert!(client.has_context().await);
        client.clear_context().await;
        assert!(!client.has_context().await);
        assert!(matches!(
            client.deliver(&message()).await,
            Err(DeliveryError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn unreachable_backend_is_unavailable() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = signed_in_client(&format!("http://127.0.0.1:{}", port)).await;
        let err = client.deliver(&message()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Unavailable(_)), "got {err:?}");
    }
}
