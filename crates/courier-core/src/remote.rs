//! Client for the named-user endpoints of the remote service.

use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::config::RemoteConfig;
use crate::error::{CourierError, Result};
use crate::named_user::tag_groups::TagGroupEdit;

/// Status of a completed HTTP exchange. Transport failures never produce a
/// response; they surface as [`CourierError::Remote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteResponse {
    pub status: u16,
}

impl RemoteResponse {
    pub fn new(status: u16) -> Self {
        Self { status }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }
}

pub trait NamedUserClient: Send + Sync {
    fn associate<'a>(
        &'a self,
        named_user_id: &'a str,
        channel_id: &'a str,
    ) -> BoxFuture<'a, Result<RemoteResponse>>;

    fn disassociate<'a>(&'a self, channel_id: &'a str) -> BoxFuture<'a, Result<RemoteResponse>>;

    fn update_tag_groups<'a>(
        &'a self,
        named_user_id: &'a str,
        edits: &'a [TagGroupEdit],
    ) -> BoxFuture<'a, Result<RemoteResponse>>;
}

// ---------------------------------------------------------------------------
// HttpNamedUserClient
// ---------------------------------------------------------------------------

pub struct HttpNamedUserClient {
    http: reqwest::Client,
    base_url: String,
    app_key: String,
    app_secret: String,
    device_type: String,
}

impl HttpNamedUserClient {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CourierError::Remote(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            app_key: config.app_key.clone(),
            app_secret: config.app_secret.clone(),
            device_type: config.device_type.clone(),
        })
    }

    async fn post(&self, path: &str, body: Value) -> Result<RemoteResponse> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .post(&url)
            .basic_auth(&self.app_key, Some(&self.app_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| CourierError::Remote(format!("POST {url}: {e}")))?;
        let status = resp.status().as_u16();
        debug!(%url, status, "remote responded");
        Ok(RemoteResponse::new(status))
    }
}

impl NamedUserClient for HttpNamedUserClient {
    fn associate<'a>(
        &'a self,
        named_user_id: &'a str,
        channel_id: &'a str,
    ) -> BoxFuture<'a, Result<RemoteResponse>> {
        let body = json!({
            "channel_id": channel_id,
            "device_type": self.device_type,
            "named_user_id": named_user_id,
        });
        self.post("/api/named_users/associate", body).boxed()
    }

    fn disassociate<'a>(&'a self, channel_id: &'a str) -> BoxFuture<'a, Result<RemoteResponse>> {
        let body = json!({
            "channel_id": channel_id,
            "device_type": self.device_type,
        });
        self.post("/api/named_users/disassociate", body).boxed()
    }

    fn update_tag_groups<'a>(
        &'a self,
        named_user_id: &'a str,
        edits: &'a [TagGroupEdit],
    ) -> BoxFuture<'a, Result<RemoteResponse>> {
        self.post("/api/named_users/tags", tag_groups_body(named_user_id, edits))
            .boxed()
    }
}

fn tag_groups_body(named_user_id: &str, edits: &[TagGroupEdit]) -> Value {
    let mut add = Map::new();
    let mut remove = Map::new();
    for edit in edits {
        if !edit.add.is_empty() {
            add.insert(edit.group.clone(), json!(edit.add));
        }
        if !edit.remove.is_empty() {
            remove.insert(edit.group.clone(), json!(edit.remove));
        }
    }

    let mut body = Map::new();
    body.insert("audience".into(), json!({ "named_user_id": [named_user_id] }));
    if !add.is_empty() {
        body.insert("add".into(), Value::Object(add));
    }
    if !remove.is_empty() {
        body.insert("remove".into(), Value::Object(remove));
    }
    Value::Object(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client_for(server: &mockito::ServerGuard) -> HttpNamedUserClient {
        HttpNamedUserClient::new(&RemoteConfig {
            base_url: format!("{}/", server.url()),
            app_key: "key".into(),
            app_secret: "secret".into(),
            device_type: "android".into(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn status_classes() {
        assert!(RemoteResponse::new(204).is_success());
        assert!(RemoteResponse::new(409).is_client_error());
        assert!(RemoteResponse::new(503).is_server_error());
        assert!(!RemoteResponse::new(302).is_success());
    }

    #[test]
    fn tag_body_omits_empty_sections() {
        let mut edit = TagGroupEdit::new("loyalty");
        edit.add_tag("gold");
        let body = tag_groups_body("alice", &[edit]);
        assert_eq!(
            body,
            json!({
                "audience": { "named_user_id": ["alice"] },
                "add": { "loyalty": ["gold"] },
            })
        );
    }

    #[tokio::test]
    async fn associate_posts_json_with_basic_auth() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/named_users/associate")
            // base64("key:secret")
            .match_header("authorization", "Basic a2V5OnNlY3JldA==")
            .match_body(Matcher::Json(json!({
                "channel_id": "chan-1",
                "device_type": "android",
                "named_user_id": "alice",
            })))
            .with_status(200)
            .create_async()
            .await;

        let resp = client_for(&server).associate("alice", "chan-1").await.unwrap();
        assert!(resp.is_success());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn disassociate_reports_server_errors_as_responses() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/named_users/disassociate")
            .match_body(Matcher::PartialJson(json!({ "channel_id": "chan-1" })))
            .with_status(503)
            .create_async()
            .await;

        let resp = client_for(&server).disassociate("chan-1").await.unwrap();
        assert!(resp.is_server_error());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn tag_groups_upload_hits_tags_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/named_users/tags")
            .match_body(Matcher::Json(json!({
                "audience": { "named_user_id": ["alice"] },
                "remove": { "loyalty": ["silver"] },
            })))
            .with_status(202)
            .create_async()
            .await;

        let mut edit = TagGroupEdit::new("loyalty");
        edit.remove_tag("silver");
        let resp = client_for(&server)
            .update_tag_groups("alice", &[edit])
            .await
            .unwrap();
        assert_eq!(resp.status, 202);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transport_error() {
        let client = HttpNamedUserClient::new(&RemoteConfig {
            base_url: "http://127.0.0.1:1".into(),
            timeout_secs: 2,
            ..RemoteConfig::default()
        })
        .unwrap();
        assert!(matches!(
            client.disassociate("chan-1").await,
            Err(CourierError::Remote(_))
        ));
    }
}
