use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::core::error::{LauncherError, LauncherResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    Offline,
    Authenticated,
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::Offline => "offline",
            AuthMode::Authenticated => "authenticated",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokens {
    pub identity_token: String,
    pub session_token: String,
}

/// Identity the game is started with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchIdentity {
    pub name: String,
    pub uuid: Uuid,
    pub tokens: Option<SessionTokens>,
}

impl LaunchIdentity {
    pub fn offline(name: &str, uuid: Uuid) -> Self {
        Self {
            name: name.trim().to_string(),
            uuid,
            tokens: None,
        }
    }

    pub fn mode(&self) -> AuthMode {
        if self.tokens.is_some() {
            AuthMode::Authenticated
        } else {
            AuthMode::Offline
        }
    }
}

/// Issues game sessions for a player.
#[async_trait]
pub trait AuthService: Send + Sync {
    async fn create_session(&self, domain: &str, name: &str, uuid: Uuid) -> LauncherResult<SessionTokens>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionRequest<'a> {
    uuid: String,
    name: &'a str,
}

/// Talks to `https://sessions.<domain>/game-session/new`.
#[derive(Debug, Clone)]
pub struct HttpAuthService {
    client: Client,
    base_url_override: Option<String>,
}

impl HttpAuthService {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            base_url_override: None,
        }
    }

    /// Send every request to `base_url` instead of the domain's session host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url_override = Some(base_url.into());
        self
    }

    pub fn session_url(&self, domain: &str) -> String {
        let base = match &self.base_url_override {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("https://sessions.{}", domain.trim().trim_end_matches('/')),
        };
        format!("{base}/game-session/new")
    }
}

#[async_trait]
impl AuthService for HttpAuthService {
    #[instrument(skip(self))]
    async fn create_session(&self, domain: &str, name: &str, uuid: Uuid) -> LauncherResult<SessionTokens> {
        let url = self.session_url(domain);
        debug!("Requesting game session from {}", url);

        let response = self
            .client
            .post(&url)
            .json(&SessionRequest {
                uuid: uuid.to_string(),
                name,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LauncherError::Auth(format!("{url} answered HTTP {}", status.as_u16())));
        }

        let tokens: SessionTokens = response.json().await?;
        if tokens.identity_token.trim().is_empty() || tokens.session_token.trim().is_empty() {
            return Err(LauncherError::Auth("session response carried empty tokens".into()));
        }
        Ok(tokens)
    }
}
