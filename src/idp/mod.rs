//! Keycloak Admin REST client.
//!
//! Read-only: the agent lists users, role members, and the realm
//! representation. Authentication is the password grant against the master
//! realm; the bearer token is cached and refreshed transparently exactly
//! once when a request comes back 401.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

const TOKEN_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(15);

/// Bounded page size for user listings.
pub const MAX_USERS: u32 = 500;

#[derive(Debug, Error)]
pub enum IdpError {
    #[error("identity provider unavailable: {0}")]
    Unavailable(#[from] reqwest::Error),
}

/// A Keycloak user as the admin API returns it. Attribute values are lists
/// of strings in the IdP model, even for single-valued attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub created_timestamp: i64,
    #[serde(default)]
    pub attributes: HashMap<String, Vec<String>>,
}

fn default_true() -> bool {
    true
}

/// Realm representation, reduced to the realm-level attribute map the
/// checks consume.
#[derive(Debug, Clone, Deserialize)]
pub struct Realm {
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct KeycloakClient {
    http: reqwest::Client,
    base_url: String,
    realm: String,
    admin_user: String,
    admin_password: String,
    token: Mutex<Option<String>>,
}

impl KeycloakClient {
    pub fn new(base_url: &str, realm: &str, admin_user: &str, admin_password: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            realm: realm.to_string(),
            admin_user: admin_user.to_string(),
            admin_password: admin_password.to_string(),
            token: Mutex::new(None),
        }
    }

    async fn fetch_token(&self) -> Result<String, IdpError> {
        let resp = self
            .http
            .post(format!("{}/realms/master/protocol/openid-connect/token", self.base_url))
            .form(&[
                ("grant_type", "password"),
                ("client_id", "admin-cli"),
                ("username", self.admin_user.as_str()),
                ("password", self.admin_password.as_str()),
            ])
            .timeout(TOKEN_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        let token: TokenResponse = resp.json().await?;
        Ok(token.access_token)
    }

    async fn bearer(&self) -> Result<String, IdpError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }
        let token = self.fetch_token().await?;
        *guard = Some(token.clone());
        Ok(token)
    }

    async fn refresh_bearer(&self) -> Result<String, IdpError> {
        let token = self.fetch_token().await?;
        *self.token.lock().await = Some(token.clone());
        Ok(token)
    }

    /// GET an admin endpoint under the configured realm, refreshing the
    /// bearer token and retrying the same request exactly once on 401.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, IdpError> {
        let url = format!("{}/admin/realms/{}{}", self.base_url, self.realm, path);
        let token = self.bearer().await?;
        let mut resp = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .query(query)
            .timeout(READ_TIMEOUT)
            .send()
            .await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            debug!(url, "bearer token expired, refreshing");
            let token = self.refresh_bearer().await?;
            resp = self
                .http
                .get(&url)
                .bearer_auth(&token)
                .query(query)
                .timeout(READ_TIMEOUT)
                .send()
                .await?;
        }
        Ok(resp.error_for_status()?.json().await?)
    }

    /// All users in the realm, bounded to [`MAX_USERS`].
    pub async fn list_users(&self) -> Result<Vec<User>, IdpError> {
        self.get_json("/users", &[("max", MAX_USERS.to_string())]).await
    }

    /// Members of the named realm role.
    pub async fn get_role_users(&self, role_name: &str) -> Result<Vec<User>, IdpError> {
        self.get_json(&format!("/roles/{role_name}/users"), &[]).await
    }

    /// The realm representation, including realm-level attributes.
    pub async fn get_realm(&self) -> Result<Realm, IdpError> {
        self.get_json("", &[]).await
    }

    /// Fails until the IdP accepts the admin credentials; used by the
    /// startup wait loop.
    pub async fn ping(&self) -> Result<(), IdpError> {
        self.fetch_token().await?;
        info!(base_url = %self.base_url, realm = %self.realm, "identity provider reachable");
        Ok(())
    }
}
