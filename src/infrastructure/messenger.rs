//! Messenger Platform Collaborators
//!
//! The two outward-facing Messenger APIs the sync layer touches, behind
//! async traits: the Graph API for user profiles and the Send API for the
//! "portfolio created" notification. Template construction and webhook
//! handling live outside this service.
//!
//! Demo mode swaps both for offline implementations so the server runs
//! without platform credentials.

use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::errors::MessengerError;

/// Profile fields the webview renders for a member
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileDetails {
    pub fb_id: i64,
    pub name: String,
    pub profile_pic: Option<String>,
}

impl ProfileDetails {
    /// The profile used when the Graph API cannot be reached: the platform
    /// id doubles as the display name.
    pub fn fallback(fb_id: i64) -> Self {
        Self {
            fb_id,
            name: fb_id.to_string(),
            profile_pic: None,
        }
    }
}

/// Graph API lookup of a platform user's public profile
#[async_trait]
pub trait UserProfileApi: Send + Sync {
    async fn details(&self, fb_id: i64) -> Result<ProfileDetails, MessengerError>;
}

/// Send API notifications triggered by the sync layer
#[async_trait]
pub trait SendApi: Send + Sync {
    /// Tell the first owner their portfolio now exists
    async fn portfolio_created(
        &self,
        recipient_fb_id: i64,
        portfolio_id: i64,
        title: &str,
    ) -> Result<(), MessengerError>;
}

#[derive(Debug, Deserialize)]
struct GraphProfileResponse {
    first_name: Option<String>,
    last_name: Option<String>,
    profile_pic: Option<String>,
}

/// Production profile source: Graph API lookups behind an LRU cache, so a
/// join does not re-fetch every member the room has already seen.
pub struct GraphProfileApi {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
    cache: Mutex<LruCache<i64, ProfileDetails>>,
}

impl GraphProfileApi {
    pub fn new(base_url: &str, access_token: &str, cache_size: usize) -> Self {
        let capacity =
            NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::new(256).unwrap());
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }
}

#[async_trait]
impl UserProfileApi for GraphProfileApi {
    async fn details(&self, fb_id: i64) -> Result<ProfileDetails, MessengerError> {
        if let Some(cached) = self.cache.lock().await.get(&fb_id) {
            debug!("Profile cache hit for {}", fb_id);
            return Ok(cached.clone());
        }

        let url = format!("{}/{}", self.base_url, fb_id);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("fields", "first_name,last_name,profile_pic"),
                ("access_token", self.access_token.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MessengerError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let profile: GraphProfileResponse = response
            .json()
            .await
            .map_err(|e| MessengerError::Decode(e.to_string()))?;

        // Display name falls back first → last → the raw platform id
        let name = profile
            .first_name
            .filter(|name| !name.is_empty())
            .or(profile.last_name.filter(|name| !name.is_empty()))
            .unwrap_or_else(|| fb_id.to_string());

        let details = ProfileDetails {
            fb_id,
            name,
            profile_pic: profile.profile_pic,
        };
        self.cache.lock().await.put(fb_id, details.clone());
        Ok(details)
    }
}

/// Production Send API client posting plain-text messages
pub struct GraphSendApi {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl GraphSendApi {
    pub fn new(base_url: &str, access_token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        }
    }
}

#[async_trait]
impl SendApi for GraphSendApi {
    async fn portfolio_created(
        &self,
        recipient_fb_id: i64,
        portfolio_id: i64,
        title: &str,
    ) -> Result<(), MessengerError> {
        let url = format!("{}/me/messages", self.base_url);
        let body = serde_json::json!({
            "recipient": {"id": recipient_fb_id.to_string()},
            "message": {
                "text": format!("Portfolio \"{}\" is ready to share.", title)
            },
        });

        let response = self
            .http
            .post(&url)
            .query(&[("access_token", self.access_token.as_str())])
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(
                "Send API rejected portfolio_created for {} (portfolio {}): {} {}",
                recipient_fb_id, portfolio_id, status, text
            );
            return Err(MessengerError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        debug!(
            "Notified {} that portfolio {} was created",
            recipient_fb_id, portfolio_id
        );
        Ok(())
    }
}

/// Offline profile source for demo mode: deterministic names, no network
pub struct DemoProfileApi;

#[async_trait]
impl UserProfileApi for DemoProfileApi {
    async fn details(&self, fb_id: i64) -> Result<ProfileDetails, MessengerError> {
        Ok(ProfileDetails {
            fb_id,
            name: format!("Viewer {}", fb_id),
            profile_pic: None,
        })
    }
}

/// Send API stand-in for demo mode; logs instead of calling out
pub struct NoopSendApi;

#[async_trait]
impl SendApi for NoopSendApi {
    async fn portfolio_created(
        &self,
        recipient_fb_id: i64,
        portfolio_id: i64,
        title: &str,
    ) -> Result<(), MessengerError> {
        debug!(
            "Demo mode: skipping portfolio_created to {} for portfolio {} ({})",
            recipient_fb_id, portfolio_id, title
        );
        Ok(())
    }
}
