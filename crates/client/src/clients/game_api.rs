use std::time::Duration;

use chess_core::GameDto;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

/// Body of `GET /invitations/pending`; `{}` means nothing is pending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingInvitation {
    #[serde(default)]
    pub from_username: Option<String>,
}

impl PendingInvitation {
    pub fn from_user(&self) -> Option<&str> {
        self.from_username.as_deref().filter(|u| !u.is_empty())
    }
}

/// Game server REST client. Cheap to clone; every request carries the
/// bearer credential the client was built with.
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    credential: Option<String>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent("ChessClient/1.0")
            .timeout(config.http_timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            credential: None,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Copy of this client that authenticates with `credential`.
    pub fn with_credential(&self, credential: Option<&str>) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            credential: credential.map(str::to_string),
        }
    }

    pub async fn get_game(&self, id: i64) -> Result<GameDto> {
        let resp = self.send(self.client.get(self.url(&format!("/games/{id}")))).await?;
        Self::json(resp, || format!("Game {id}")).await
    }

    pub async fn active_games(&self) -> Result<Vec<GameDto>> {
        let resp = self.send(self.client.get(self.url("/games/active"))).await?;
        Self::json(resp, || "Active games".to_string()).await
    }

    pub async fn game_history(&self) -> Result<Vec<GameDto>> {
        let resp = self.send(self.client.get(self.url("/games/history"))).await?;
        Self::json(resp, || "Game history".to_string()).await
    }

    pub async fn resign(&self, id: i64) -> Result<()> {
        let req = self
            .client
            .post(self.url(&format!("/games/{id}/resign")))
            .json(&serde_json::json!({}));
        let resp = self.send(req).await?;
        Self::check(resp, || format!("Game {id}"))?;
        Ok(())
    }

    pub async fn pending_invitation(&self) -> Result<PendingInvitation> {
        let resp = self.send(self.client.get(self.url("/invitations/pending"))).await?;
        let resp = Self::check(resp, || "Invitation".to_string())?;
        let text = resp.text().await?;
        if text.trim().is_empty() {
            return Ok(PendingInvitation::default());
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response> {
        let req = match &self.credential {
            Some(token) => req.bearer_auth(token),
            None => req,
        };
        let resp = req.header("Accept", "application/json").send().await?;
        debug!(url = %resp.url(), status = %resp.status(), "API response");
        Ok(resp)
    }

    fn check(resp: Response, what: impl FnOnce() -> String) -> Result<Response> {
        match resp.status() {
            s if s.is_success() => Ok(resp),
            StatusCode::UNAUTHORIZED => Err(ClientError::Unauthorized),
            StatusCode::NOT_FOUND => Err(ClientError::NotFound(what())),
            s => Err(ClientError::Status(s.as_u16())),
        }
    }

    async fn json<T: DeserializeOwned>(resp: Response, what: impl FnOnce() -> String) -> Result<T> {
        let resp = Self::check(resp, what)?;
        let text = resp.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}
