//! HTTP backend for the hosted control plane.
//!
//! JSON over reqwest with a bearer token. A 404 on a lookup means "absent"
//! and maps to `None`; any other non-success status is an error.

use crate::backend::SharingBackend;
use crate::config::ShareConfig;
use crate::error::{ShareError, ShareResult};
use crate::types::{EntryAccessKey, KeyBackup, Tag, UserTag};
use async_trait::async_trait;
use inkwell_crypto::{PUBLIC_KEY_SIZE, decode_public_key};
use inkwell_types::{EntryId, TagId, UserId};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

/// [`SharingBackend`] backed by the REST API.
pub struct HttpBackend {
    client: Client,
    config: ShareConfig,
    access_token: RwLock<Option<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublicKeyResponse {
    public_key_b64: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AccessKeyBatch<'a> {
    keys: &'a [EntryAccessKey],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AccessKeyDeletion<'a> {
    entry_id: EntryId,
    user_ids: &'a [UserId],
}

#[derive(Deserialize)]
struct DeletedCount {
    deleted: usize,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TagIds {
    tag_ids: Vec<TagId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryIds {
    entry_ids: Vec<EntryId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserIds {
    user_ids: Vec<UserId>,
}

#[derive(Deserialize)]
struct TagList {
    tags: Vec<Tag>,
}

#[derive(Deserialize)]
struct Memberships {
    memberships: Vec<UserTag>,
}

impl HttpBackend {
    pub fn new(config: ShareConfig) -> ShareResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            config,
            access_token: RwLock::new(None),
        })
    }

    /// Sets the bearer token used for every request.
    pub async fn set_access_token(&self, token: impl Into<String>) {
        *self.access_token.write().await = Some(token.into());
    }

    pub async fn clear_access_token(&self) {
        *self.access_token.write().await = None;
    }

    pub async fn is_authenticated(&self) -> bool {
        self.access_token.read().await.is_some()
    }

    // ── Request helpers ──

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url.trim_end_matches('/'), path)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> ShareResult<Response> {
        let token = self
            .access_token
            .read()
            .await
            .clone()
            .ok_or_else(|| ShareError::Backend("not authenticated".to_string()))?;
        let resp = request.bearer_auth(token).send().await?;
        debug!("{what} -> {}", resp.status());
        Ok(resp)
    }

    async fn auth_get(&self, path: &str) -> ShareResult<Response> {
        self.send(self.client.get(self.url(path)), &format!("GET {path}"))
            .await
    }

    async fn auth_post(&self, path: &str, body: &impl Serialize) -> ShareResult<Response> {
        self.send(self.client.post(self.url(path)).json(body), &format!("POST {path}"))
            .await
    }

    async fn auth_put(&self, path: &str, body: &impl Serialize) -> ShareResult<Response> {
        self.send(self.client.put(self.url(path)).json(body), &format!("PUT {path}"))
            .await
    }

    async fn auth_delete(&self, path: &str, body: Option<&(impl Serialize + Sync)>) -> ShareResult<Response> {
        let mut request = self.client.delete(self.url(path));
        if let Some(body) = body {
            request = request.json(body);
        }
        self.send(request, &format!("DELETE {path}")).await
    }

    /// Maps non-success statuses to errors.
    fn check(resp: Response) -> ShareResult<Response> {
        match resp.status() {
            StatusCode::NOT_FOUND => Err(ShareError::NotFound(resp.url().path().to_string())),
            StatusCode::CONFLICT => Err(ShareError::Conflict(resp.url().path().to_string())),
            StatusCode::FORBIDDEN => Err(ShareError::Forbidden(resp.url().path().to_string())),
            _ => resp
                .error_for_status()
                .map_err(|e| ShareError::Backend(e.to_string())),
        }
    }

    async fn json<T: DeserializeOwned>(resp: Response) -> ShareResult<T> {
        Ok(Self::check(resp)?.json().await?)
    }

    /// Like [`Self::json`], but a 404 is `None`.
    async fn optional_json<T: DeserializeOwned>(resp: Response) -> ShareResult<Option<T>> {
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(Self::json(resp).await?))
    }
}

#[async_trait]
impl SharingBackend for HttpBackend {
    // ── Key directory ──

    async fn get_public_key(&self, user_id: UserId) -> ShareResult<Option<[u8; PUBLIC_KEY_SIZE]>> {
        let resp = self.auth_get(&format!("/api/keys/{user_id}/public")).await?;
        match Self::optional_json::<PublicKeyResponse>(resp).await? {
            Some(data) => Ok(Some(decode_public_key(&data.public_key_b64)?)),
            None => Ok(None),
        }
    }

    async fn publish_keys(&self, backup: &KeyBackup) -> ShareResult<()> {
        let resp = self
            .auth_put(&format!("/api/keys/{}", backup.user_id), backup)
            .await?;
        Self::check(resp)?;
        Ok(())
    }

    async fn get_key_backup(&self, user_id: UserId) -> ShareResult<Option<KeyBackup>> {
        let resp = self.auth_get(&format!("/api/keys/{user_id}/backup")).await?;
        Self::optional_json(resp).await
    }

    // ── Access keys ──

    async fn get_access_key(
        &self,
        entry_id: EntryId,
        user_id: UserId,
    ) -> ShareResult<Option<EntryAccessKey>> {
        let resp = self
            .auth_get(&format!("/api/entries/{entry_id}/access-keys/{user_id}"))
            .await?;
        Self::optional_json(resp).await
    }

    async fn list_access_user_ids(&self, entry_id: EntryId) -> ShareResult<Vec<UserId>> {
        let resp = self
            .auth_get(&format!("/api/entries/{entry_id}/access-keys"))
            .await?;
        Ok(Self::json::<UserIds>(resp).await?.user_ids)
    }

    async fn upsert_access_keys(&self, keys: &[EntryAccessKey]) -> ShareResult<()> {
        let resp = self
            .auth_post("/api/access-keys/batch", &AccessKeyBatch { keys })
            .await?;
        Self::check(resp)?;
        Ok(())
    }

    async fn delete_access_keys(&self, entry_id: EntryId, user_ids: &[UserId]) -> ShareResult<usize> {
        let body = AccessKeyDeletion { entry_id, user_ids };
        let resp = self
            .auth_delete("/api/access-keys/batch", Some(&body))
            .await?;
        Ok(Self::json::<DeletedCount>(resp).await?.deleted)
    }

    // ── Entry-tag links ──

    async fn link_entry_tags(&self, entry_id: EntryId, tag_ids: &[TagId]) -> ShareResult<()> {
        let body = TagIds {
            tag_ids: tag_ids.to_vec(),
        };
        let resp = self
            .auth_post(&format!("/api/entries/{entry_id}/tags"), &body)
            .await?;
        Self::check(resp)?;
        Ok(())
    }

    async fn tags_for_entry(&self, entry_id: EntryId) -> ShareResult<Vec<TagId>> {
        let resp = self.auth_get(&format!("/api/entries/{entry_id}/tags")).await?;
        Ok(Self::json::<TagIds>(resp).await?.tag_ids)
    }

    async fn shared_entries_for_member(
        &self,
        tag_id: TagId,
        user_id: UserId,
    ) -> ShareResult<Vec<EntryId>> {
        let resp = self
            .auth_get(&format!("/api/tags/{tag_id}/members/{user_id}/entries"))
            .await?;
        Ok(Self::json::<EntryIds>(resp).await?.entry_ids)
    }

    // ── Tags ──

    async fn create_tag(&self, tag: &Tag) -> ShareResult<Tag> {
        let resp = self.auth_post("/api/tags", tag).await?;
        Self::json(resp).await
    }

    async fn update_tag(&self, tag: &Tag) -> ShareResult<Tag> {
        let resp = self.auth_put(&format!("/api/tags/{}", tag.id), tag).await?;
        Self::json(resp).await
    }

    async fn delete_tag(&self, tag_id: TagId) -> ShareResult<()> {
        let resp = self
            .auth_delete(&format!("/api/tags/{tag_id}"), None::<&()>)
            .await?;
        Self::check(resp)?;
        Ok(())
    }

    async fn get_tag(&self, tag_id: TagId) -> ShareResult<Option<Tag>> {
        let resp = self.auth_get(&format!("/api/tags/{tag_id}")).await?;
        Self::optional_json(resp).await
    }

    async fn list_tags(&self, owner_id: UserId) -> ShareResult<Vec<Tag>> {
        let resp = self.auth_get(&format!("/api/tags?ownerId={owner_id}")).await?;
        Ok(Self::json::<TagList>(resp).await?.tags)
    }

    // ── Memberships ──

    async fn add_user_tag(&self, user_tag: &UserTag) -> ShareResult<UserTag> {
        let resp = self
            .auth_post(&format!("/api/tags/{}/members", user_tag.tag_id), user_tag)
            .await?;
        Self::json(resp).await
    }

    async fn remove_user_tag(&self, tag_id: TagId, user_id: UserId) -> ShareResult<Option<UserTag>> {
        let resp = self
            .auth_delete(&format!("/api/tags/{tag_id}/members/{user_id}"), None::<&()>)
            .await?;
        Self::optional_json(resp).await
    }

    async fn tag_members(&self, tag_id: TagId) -> ShareResult<Vec<UserTag>> {
        let resp = self.auth_get(&format!("/api/tags/{tag_id}/members")).await?;
        Ok(Self::json::<Memberships>(resp).await?.memberships)
    }

    async fn tags_for_user(&self, user_id: UserId) -> ShareResult<Vec<UserTag>> {
        let resp = self.auth_get(&format!("/api/users/{user_id}/tags")).await?;
        Ok(Self::json::<Memberships>(resp).await?.memberships)
    }
}
