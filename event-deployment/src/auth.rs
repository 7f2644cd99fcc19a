use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use moka::future::Cache;
use reqwest::{header, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::client::{check_status, endpoint};
use crate::error::{AuthError, DeployError, RequestError};

const TOKEN_EXCHANGE_GRANT: &str = "urn:ietf:params:oauth:grant-type:token-exchange";

/// A bearer token, ready to be used as `Authorization` header value.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn bearer(access_token: &str) -> Self {
        AuthToken(format!("Bearer {access_token}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(..)")
    }
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Token of this service, used for the device repository.
    async fn admin_token(&self) -> Result<AuthToken, AuthError>;

    /// Token impersonating `user_id`. Fails with `UserDoesNotExist` for unknown users.
    async fn user_token(&self, user_id: &str) -> Result<AuthToken, AuthError>;
}

#[derive(Deserialize, Debug, Default)]
struct OpenidToken {
    access_token: String,
    #[serde(default)]
    expires_in: f64,
}

struct CachedToken {
    token: AuthToken,
    valid_until: Instant,
}

/// Keycloak backed token provider.
pub struct KeycloakAuth {
    client: reqwest::Client,
    endpoint: String,
    client_id: String,
    client_secret: String,
    expiration_buffer: Duration,
    admin: Mutex<Option<CachedToken>>,
    user_tokens: Cache<String, AuthToken>,
}

impl KeycloakAuth {
    pub fn new(
        client: reqwest::Client,
        endpoint: &str,
        client_id: &str,
        client_secret: &str,
        expiration_buffer: Duration,
        user_token_lifespan: Duration,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.to_owned(),
            client_id: client_id.to_owned(),
            client_secret: client_secret.to_owned(),
            expiration_buffer,
            admin: Mutex::new(None),
            user_tokens: Cache::builder().time_to_live(user_token_lifespan).build(),
        }
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<OpenidToken, AuthError> {
        let url = endpoint(
            &self.endpoint,
            &["auth", "realms", "master", "protocol", "openid-connect", "token"],
        )?;
        let response = self
            .client
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(RequestError::from)?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::AccessDenied { status, body });
        }
        Ok(response.json().await.map_err(RequestError::from)?)
    }

    async fn exchange_user_token(&self, user_id: &str) -> Result<AuthToken, AuthError> {
        let token = self
            .request_token(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", TOKEN_EXCHANGE_GRANT),
                ("requested_subject", user_id),
            ])
            .await?;
        Ok(AuthToken::bearer(&token.access_token))
    }

    async fn user_exists(&self, user_id: &str) -> Result<bool, AuthError> {
        let admin = self.admin_token().await?;
        let url = endpoint(
            &self.endpoint,
            &["auth", "admin", "realms", "master", "users", user_id],
        )?;
        let response = self
            .client
            .get(url)
            .header(header::AUTHORIZATION, admin.as_str())
            .send()
            .await
            .map_err(RequestError::from)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check_status(response).await?;
        Ok(true)
    }
}

#[async_trait]
impl TokenProvider for KeycloakAuth {
    async fn admin_token(&self) -> Result<AuthToken, AuthError> {
        let mut cached = self.admin.lock().await;
        if let Some(current) = cached.as_ref() {
            if Instant::now() < current.valid_until {
                return Ok(current.token.clone());
            }
        }

        info!("requesting new admin access token");
        let requested_at = Instant::now();
        let token = self
            .request_token(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .await
            .map_err(|e| {
                error!("unable to get new access token: {}", e);
                e
            })?;

        let lifetime = Duration::try_from_secs_f64(token.expires_in)
            .unwrap_or_default()
            .saturating_sub(self.expiration_buffer);
        let result = AuthToken::bearer(&token.access_token);
        *cached = Some(CachedToken {
            token: result.clone(),
            valid_until: requested_at + lifetime,
        });
        Ok(result)
    }

    async fn user_token(&self, user_id: &str) -> Result<AuthToken, AuthError> {
        if let Some(token) = self.user_tokens.get(user_id).await {
            return Ok(token);
        }

        let token = match self.exchange_user_token(user_id).await {
            Ok(token) => token,
            Err(exchange_error) => {
                warn!(user_id, "token exchange failed: {}", exchange_error);
                if !self.user_exists(user_id).await? {
                    return Err(AuthError::UserDoesNotExist);
                }
                return Err(exchange_error);
            }
        };

        self.user_tokens
            .insert(user_id.to_owned(), token.clone())
            .await;
        Ok(token)
    }
}

/// The parts of a platform jwt this service looks at.
#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Claims {
    pub sub: String,
    pub realm_access: RealmAccess,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RealmAccess {
    pub roles: Vec<String>,
}

impl Claims {
    /// Decode the payload of a jwt, with or without `Bearer ` prefix.
    ///
    /// The signature is not checked here, the api gateway has already verified it.
    pub fn parse(token: &str) -> Result<Self, DeployError> {
        let token = token
            .strip_prefix("Bearer ")
            .or_else(|| token.strip_prefix("bearer "))
            .unwrap_or(token)
            .trim();

        let payload = token
            .split('.')
            .nth(1)
            .ok_or_else(|| DeployError::InvalidToken("not a jwt".to_owned()))?;
        let decoded = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| DeployError::InvalidToken(e.to_string()))?;
        serde_json::from_slice(&decoded).map_err(|e| DeployError::InvalidToken(e.to_string()))
    }

    pub fn is_admin(&self) -> bool {
        self.realm_access.roles.iter().any(|role| role == "admin")
    }
}

#[cfg(test)]
pub(crate) fn test_jwt(sub: &str, roles: &[&str]) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        serde_json::json!({"sub": sub, "realm_access": {"roles": roles}}).to_string(),
    );
    format!("Bearer {header}.{payload}.signature")
}
